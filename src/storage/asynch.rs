use zarrs::array::Array;
use zarrs::group::Group;
use zarrs::node::async_node_exists;
use zarrs::storage::{
    AsyncListableStorageTraits, AsyncReadableListableStorage, AsyncReadableListableStorageTraits,
    AsyncReadableStorageTraits, StorePrefix,
};

use super::{
    DEFAULT_BRANCH, ResolvedRef, Store, StoreRef, children_from_prefixes, dir_prefix,
    group_attributes, join_path, missing_snapshot, node_path, parse_ref_file, ref_keys,
    snapshot_key, store_key,
};
use crate::chunk::{ArraySlice, Element, ElementKind, TypedBuffer};
use crate::metadata::{ArrayMetadata, Attributes};

/// A [Store] over any asynchronous zarrs storage, e.g. an HTTP or object store.
pub struct AsyncZarrStore {
    storage: AsyncReadableListableStorage,
}

impl AsyncZarrStore {
    pub fn new(storage: AsyncReadableListableStorage) -> Self {
        crate::codec::register_codecs();
        Self { storage }
    }

    async fn open(&self, path: &str) -> crate::Result<Array<dyn AsyncReadableListableStorageTraits>> {
        Array::async_open(self.storage.clone(), node_path(path)?.as_str())
            .await
            .map_err(|e| crate::Error::array_open(path, e))
    }

    async fn is_node(&self, path: &str) -> crate::Result<bool> {
        Ok(async_node_exists(&self.storage, &node_path(path)?).await?)
    }
}

#[cfg_attr(target_arch = "wasm32", async_trait::async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait::async_trait)]
impl Store for AsyncZarrStore {
    async fn list_children(&self, path: &str) -> crate::Result<Vec<String>> {
        let is_root = path.trim_matches('/').is_empty();
        if !is_root && !self.is_node(path).await? {
            return Err(crate::Error::NodeNotFound(path.to_string()));
        }
        let listing = self.storage.list_dir(&dir_prefix(path)?).await?;
        let names = children_from_prefixes(path, listing.prefixes().iter().map(StorePrefix::as_str));
        let exists = futures::future::try_join_all(
            names.iter().map(|name| async move { self.is_node(&join_path(path, name)).await }),
        )
        .await?;
        Ok(names
            .into_iter()
            .zip(exists)
            .filter_map(|(name, exists)| exists.then_some(name))
            .collect())
    }

    async fn open_array(&self, path: &str) -> crate::Result<ArrayMetadata> {
        ArrayMetadata::from_array(&self.open(path).await?)
    }

    async fn open_group(&self, path: &str) -> crate::Result<Attributes> {
        let group = Group::async_open(self.storage.clone(), node_path(path)?.as_str()).await;
        group_attributes(path, group)
    }

    async fn read_array(&self, path: &str, slice: &ArraySlice) -> crate::Result<TypedBuffer> {
        let array = self.open(path).await?;
        let subset = slice.to_subset(array.shape())?;
        let kind = ElementKind::require(array.data_type())?;
        let values = crate::with_element_type!(kind, T => {
            <T as Element>::into_buffer(array.async_retrieve_array_subset::<Vec<T>>(&subset).await?)
        });
        log::debug!("read {slice:?} of {path:?}");
        Ok(values)
    }

    async fn resolve_ref(&self, store_ref: &StoreRef) -> crate::Result<ResolvedRef> {
        let snapshot = match store_ref {
            StoreRef::Snapshot(id) => {
                if self.storage.size_key(&snapshot_key(id)?).await?.is_none() {
                    return Err(missing_snapshot(id));
                }
                Some(id.clone())
            }
            StoreRef::Branch(name) => {
                let mut found = None;
                for key in ref_keys(name) {
                    if let Some(b) = self.storage.get(&store_key(&key)?).await? {
                        found = Some(parse_ref_file(&key, &b)?);
                        break;
                    }
                }
                match found {
                    Some(id) => Some(id),
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
