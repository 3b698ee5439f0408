//! The store capability the viewer reads through, and its zarrs-backed
//! implementations.

use serde::Deserialize;
use zarrs::array::Array;
use zarrs::group::{Group, GroupCreateError};
use zarrs::node::{NodePath, node_exists};
use zarrs::storage::{
    ListableStorageTraits, ReadableListableStorage, ReadableListableStorageTraits,
    ReadableStorageTraits, StorageError, StoreKey, StorePrefix,
};

use crate::chunk::{ArraySlice, Element, ElementKind, TypedBuffer};
use crate::metadata::{ArrayMetadata, Attributes};

#[cfg(feature = "async")]
pub mod asynch;

/// Characters of the Crockford base32 alphabet used by snapshot ids.
const SNAPSHOT_ALPHABET: &str = "0123456789ABCDEFGHJKMNPQRSTVWXYZ";
const SNAPSHOT_ID_LEN: usize = 20;
const DEFAULT_BRANCH: &str = "main";

/// Join a node path and a child name; paths have no leading or trailing `/`.
pub fn join_path(base: &str, name: &str) -> String {
    let base = base.trim_matches('/');
    let name = name.trim_matches('/');
    match (base.is_empty(), name.is_empty()) {
        (true, _) => name.to_string(),
        (_, true) => base.to_string(),
        _ => format!("{base}/{name}"),
    }
}

/// The path of a node's parent; the root is its own parent.
pub fn parent_path(path: &str) -> &str {
    let path = path.trim_matches('/');
    path.rsplit_once('/').map_or("", |(parent, _)| parent)
}

/// A version of the store to read: an immutable snapshot or a moving branch/tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StoreRef {
    Snapshot(String),
    Branch(String),
}

impl Default for StoreRef {
    fn default() -> Self {
        Self::Branch(DEFAULT_BRANCH.to_string())
    }
}

impl StoreRef {
    /// 20-character uppercase base32 strings are snapshot ids; anything
    /// else names a branch or tag.
    pub fn parse(s: &str) -> Self {
        let s = s.trim();
        if s.is_empty() {
            Self::default()
        } else if Self::is_snapshot_id(s) {
            Self::Snapshot(s.to_string())
        } else {
            Self::Branch(s.to_string())
        }
    }

    pub fn is_snapshot_id(s: &str) -> bool {
        s.len() == SNAPSHOT_ID_LEN && s.chars().all(|c| SNAPSHOT_ALPHABET.contains(c))
    }

    pub fn name(&self) -> &str {
        match self {
            StoreRef::Snapshot(s) | StoreRef::Branch(s) => s,
        }
    }
}

/// The outcome of [Store::resolve_ref].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRef {
    pub requested: StoreRef,
    /// The snapshot the ref points at, when the store tracks snapshots.
    pub snapshot: Option<String>,
}

/// Read access to a hierarchy of groups and arrays.
///
/// Paths are `/`-separated relative to the store root, `""` being the root.
#[cfg_attr(target_arch = "wasm32", async_trait::async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait::async_trait)]
pub trait Store: Send + Sync {
    /// Names of the child nodes of a group, sorted. Arrays have no children.
    async fn list_children(&self, path: &str) -> crate::Result<Vec<String>>;

    async fn open_array(&self, path: &str) -> crate::Result<ArrayMetadata>;

    async fn open_group(&self, path: &str) -> crate::Result<Attributes>;

    async fn read_array(&self, path: &str, slice: &ArraySlice) -> crate::Result<TypedBuffer>;

    async fn resolve_ref(&self, store_ref: &StoreRef) -> crate::Result<ResolvedRef>;
}

#[derive(Debug, Deserialize)]
struct RefFile {
    snapshot: String,
}

/// Keys under which a branch or tag pointer may be stored.
fn ref_keys(name: &str) -> [String; 2] {
    [
        format!("refs/branch.{name}/ref.json"),
        format!("refs/tag.{name}/ref.json"),
    ]
}

fn parse_ref_file(key: &str, bytes: &[u8]) -> crate::Result<String> {
    let file: RefFile = serde_json::from_slice(bytes)
        .map_err(|e| crate::Error::metadata(key, format!("could not parse ref: {e}")))?;
    Ok(file.snapshot)
}

fn store_key(key: &str) -> crate::Result<StoreKey> {
    Ok(StoreKey::new(key).map_err(StorageError::from)?)
}

fn snapshot_key(id: &str) -> crate::Result<StoreKey> {
    store_key(&format!("snapshots/{id}"))
}

/// The zarrs node path of a store path, `/` being the root.
fn node_path(path: &str) -> crate::Result<NodePath> {
    NodePath::new(&format!("/{}", path.trim_matches('/')))
        .map_err(|e| crate::Error::metadata(path, e.to_string()))
}

fn dir_prefix(path: &str) -> crate::Result<StorePrefix> {
    let path = path.trim_matches('/');
    if path.is_empty() {
        Ok(StorePrefix::root())
    } else {
        Ok(StorePrefix::new(format!("{path}/")).map_err(StorageError::from)?)
    }
}

/// Group attributes, or empty ones for a root without group metadata.
fn group_attributes<S: ?Sized>(
    path: &str,
    group: Result<Group<S>, GroupCreateError>,
) -> crate::Result<Attributes> {
    match group {
        Ok(group) => Ok(Attributes::from_map(group.attributes().clone())),
        Err(GroupCreateError::MissingMetadata) if path.trim_matches('/').is_empty() => {
            Ok(Attributes::default())
        }
        Err(e) => Err(crate::Error::group_open(path, e)),
    }
}

fn missing_snapshot(id: &str) -> crate::Error {
    crate::Error::RefNotFound(format!("snapshot {id}"))
}

/// Child names from the prefixes of a directory listing; hidden entries
/// are dropped.
fn children_from_prefixes<'a>(path: &str, prefixes: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let base = path.trim_matches('/');
    let mut names: Vec<String> = prefixes
        .into_iter()
        .filter_map(|p| {
            let s = p.trim_end_matches('/');
            let name = if base.is_empty() {
                s
            } else {
                s.strip_prefix(base)?.strip_prefix('/')?
            };
            (!name.is_empty() && !name.starts_with('.') && !name.contains('/'))
                .then(|| name.to_string())
        })
        .collect();
    names.sort();
    names.dedup();
    names
}

/// A [Store] over any synchronous zarrs storage holding Zarr v2 or v3 data.
pub struct ZarrStore {
    storage: ReadableListableStorage,
}

impl ZarrStore {
    pub fn new(storage: ReadableListableStorage) -> Self {
        crate::codec::register_codecs();
        Self { storage }
    }

    fn open(&self, path: &str) -> crate::Result<Array<dyn ReadableListableStorageTraits>> {
        Array::open(self.storage.clone(), node_path(path)?.as_str())
            .map_err(|e| crate::Error::array_open(path, e))
    }

    fn is_node(&self, path: &str) -> crate::Result<bool> {
        Ok(node_exists(&self.storage, &node_path(path)?)?)
    }
}

#[cfg_attr(target_arch = "wasm32", async_trait::async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait::async_trait)]
impl Store for ZarrStore {
    async fn list_children(&self, path: &str) -> crate::Result<Vec<String>> {
        let is_root = path.trim_matches('/').is_empty();
        if !is_root && !self.is_node(path)? {
            return Err(crate::Error::NodeNotFound(path.to_string()));
        }
        let listing = self.storage.list_dir(&dir_prefix(path)?)?;
        let mut children = Vec::new();
        for name in children_from_prefixes(path, listing.prefixes().iter().map(StorePrefix::as_str)) {
            if self.is_node(&join_path(path, &name))? {
                children.push(name);
            }
        }
        Ok(children)
    }

    async fn open_array(&self, path: &str) -> crate::Result<ArrayMetadata> {
        ArrayMetadata::from_array(&self.open(path)?)
    }

    async fn open_group(&self, path: &str) -> crate::Result<Attributes> {
        group_attributes(path, Group::open(self.storage.clone(), node_path(path)?.as_str()))
    }

    async fn read_array(&self, path: &str, slice: &ArraySlice) -> crate::Result<TypedBuffer> {
        let array = self.open(path)?;
        let subset = slice.to_subset(array.shape())?;
        let kind = ElementKind::require(array.data_type())?;
        let values = crate::with_element_type!(kind, T => {
            <T as Element>::into_buffer(array.retrieve_array_subset::<Vec<T>>(&subset)?)
        });
        log::debug!("read {slice:?} of {path:?}");
        Ok(values)
    }

    async fn resolve_ref(&self, store_ref: &StoreRef) -> crate::Result<ResolvedRef> {
        let snapshot = match store_ref {
            StoreRef::Snapshot(id) => {
                if self.storage.size_key(&snapshot_key(id)?)?.is_none() {
                    return Err(missing_snapshot(id));
                }
                Some(id.clone())
            }
            StoreRef::Branch(name) => {
                let mut found = None;
                for key in ref_keys(name) {
                    if let Some(b) = self.storage.get(&store_key(&key)?)? {
                        found = Some(parse_ref_file(&key, &b)?);
                        break;
                    }
                }
                match found {
                    Some(id) => Some(id),
                    // a plain store without refs has a single implicit branch
                    None if name == DEFAULT_BRANCH => None,
                    None => return Err(crate::Error::RefNotFound(name.clone())),
                }
            }
        };
        Ok(ResolvedRef {
            requested: store_ref.clone(),
            snapshot,
        })
    }
}
