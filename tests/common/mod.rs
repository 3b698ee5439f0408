#![allow(dead_code)]

use std::sync::Arc;

use serde_json::{Value, json};
use zarrs::storage::store::MemoryStore;
use zarrs::storage::{StoreKey, WritableStorageTraits};
use zarrs_panels::codec::{Codec, CodecChain};
use zarrs_panels::storage::{ZarrStore, join_path};

/// Element encodings the fixtures write.
#[derive(Debug, Clone, Copy)]
pub enum Element {
    F32Le,
    F64Le,
    F64Be,
}

impl Element {
    pub fn encode(self, values: &[f64]) -> Vec<u8> {
        values
            .iter()
            .flat_map(|v| match self {
                Element::F32Le => (*v as f32).to_le_bytes().to_vec(),
                Element::F64Le => v.to_le_bytes().to_vec(),
                Element::F64Be => v.to_be_bytes().to_vec(),
            })
            .collect()
    }
}

pub fn init_logging() {
    env_logger::try_init().ok();
}

/// Builds Zarr v2 hierarchies in memory.
pub struct Fixture {
    store: Arc<MemoryStore>,
}

impl Fixture {
    pub fn new() -> Self {
        init_logging();
        let fixture = Self {
            store: Arc::new(MemoryStore::new()),
        };
        fixture.group("");
        fixture
    }

    pub fn put(&self, key: &str, bytes: Vec<u8>) {
        self.store
            .set(&StoreKey::new(key).expect("valid key"), bytes.into())
            .expect("memory store write");
    }

    pub fn put_json(&self, key: &str, value: &Value) {
        self.put(key, value.to_string().into_bytes());
    }

    pub fn group(&self, path: &str) {
        self.put_json(&join_path(path, ".zgroup"), &json!({"zarr_format": 2}));
    }

    pub fn group_attrs(&self, path: &str, attrs: Value) {
        self.group(path);
        self.put_json(&join_path(path, ".zattrs"), &attrs);
    }

    /// A float32 array stored with shuffle and zlib, chunked along every axis.
    pub fn float32(
        &self,
        path: &str,
        shape: &[u64],
        chunks: &[u64],
        values: &[f64],
        fill_value: Option<f64>,
        attrs: Value,
    ) {
        let codecs = vec![Codec::Shuffle { elementsize: 4 }, Codec::Zlib { level: 1 }];
        self.array(path, "<f4", Element::F32Le, shape, chunks, values, fill_value, &codecs, attrs);
    }

    /// A float64 array without compression, in one chunk.
    pub fn float64(&self, path: &str, values: &[f64], attrs: Value) {
        let shape = [values.len() as u64];
        self.array(path, "<f8", Element::F64Le, &shape, &shape, values, None, &[], attrs);
    }

    #[allow(clippy::too_many_arguments)]
    fn array(
        &self,
        path: &str,
        dtype: &str,
        element: Element,
        shape: &[u64],
        chunks: &[u64],
        values: &[f64],
        fill_value: Option<f64>,
        codecs: &[Codec],
        attrs: Value,
    ) {
        assert_eq!(values.len() as u64, shape.iter().product::<u64>());
        let (filters, compressor): (Vec<Codec>, Option<Codec>) = match codecs.split_last() {
            Some((last, rest)) if !matches!(last, Codec::Shuffle { .. }) => (rest.to_vec(), Some(*last)),
            _ => (codecs.to_vec(), None),
        };
        let zarray = json!({
            "zarr_format": 2,
            "shape": shape,
            "chunks": chunks,
            "dtype": dtype,
            "compressor": compressor,
            "fill_value": fill_value,
            "filters": if filters.is_empty() { Value::Null } else { json!(filters) },
            "order": "C",
        });
        self.put_json(&join_path(path, ".zarray"), &zarray);
        if attrs.as_object().is_some_and(|m| !m.is_empty()) {
            self.put_json(&join_path(path, ".zattrs"), &attrs);
        }

        let chain = CodecChain::new(codecs.to_vec());
        let grid: Vec<u64> = shape.iter().zip(chunks).map(|(s, c)| s.div_ceil(*c)).collect();
        for grid_index in indices(&grid) {
            let chunk = chunk_values(shape, chunks, &grid_index, values, fill_value.unwrap_or(0.0));
            let raw = element.encode(&chunk);
            let key = if grid_index.is_empty() {
                "0".to_string()
            } else {
                grid_index
                    .iter()
                    .map(u64::to_string)
                    .collect::<Vec<_>>()
                    .join(".")
            };
            self.put(&join_path(path, &key), chain.encode(&raw).expect("encode chunk"));
        }
    }

    pub fn storage(&self) -> Arc<MemoryStore> {
        Arc::clone(&self.store)
    }

    pub fn zarr_store(&self) -> ZarrStore {
        ZarrStore::new(self.storage())
    }
}

/// Every index within `shape`, last axis fastest.
fn indices(shape: &[u64]) -> Vec<Vec<u64>> {
    let mut out = vec![Vec::new()];
    for n in shape {
        out = out
            .into_iter()
            .flat_map(|prefix| {
                (0..*n).map(move |i| {
                    let mut idx = prefix.clone();
                    idx.push(i);
                    idx
                })
            })
            .collect();
    }
    out
}

/// The full-size contents of one chunk; cells past the array edge hold `fill`.
fn chunk_values(shape: &[u64], chunks: &[u64], grid_index: &[u64], values: &[f64], fill: f64) -> Vec<f64> {
    indices(chunks)
        .into_iter()
        .map(|local| {
            let mut flat = 0;
            for d in 0..shape.len() {
                let global = grid_index[d] * chunks[d] + local[d];
                if global >= shape[d] {
                    return fill;
                }
                flat = flat * shape[d] + global;
            }
            values[flat as usize]
        })
        .collect()
}

/// Time values for yearly steps as days since `<first>-01-01` in a
/// 365-day calendar.
pub fn noleap_days(first: i32, years: &[i32]) -> Vec<f64> {
    years.iter().map(|y| f64::from((y - first) * 365)).collect()
}
