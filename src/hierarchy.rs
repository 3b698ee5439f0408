//! Inferring the model / experiment / variable layout of a store.
//!
//! Stores come in three shapes below the base path:
//!
//! - depth 0: the base group holds the variable arrays directly;
//! - depth 1: `experiment/variable`, with no model level;
//! - depth 2: `model/experiment/variable`.

use std::collections::BTreeMap;

use crate::storage::{Store, join_path};

/// Model key under which depth 0 and depth 1 hierarchies file their experiments.
pub const ROOT_MODEL_KEY: &str = "__root__";

/// Coordinate and bookkeeping arrays that are never offered as variables.
const COORDINATE_NAMES: &[&str] = &[
    "x",
    "y",
    "lat",
    "lon",
    "latitude",
    "longitude",
    "time",
    "bnds",
    "nv",
    "x_bnds",
    "y_bnds",
    "lat_bnds",
    "lon_bnds",
    "time_bnds",
    "x_bounds",
    "y_bounds",
    "lat_bounds",
    "lon_bounds",
    "time_bounds",
    "crs",
    "mapping",
    "spatial_ref",
    "polar_stereographic",
];

/// Whether `name` is a coordinate or bookkeeping array (case-insensitive).
pub fn is_coordinate_name(name: &str) -> bool {
    COORDINATE_NAMES
        .iter()
        .any(|c| c.eq_ignore_ascii_case(name))
}

/// Number of group levels between the base path and the variable arrays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Depth {
    #[default]
    Variables,
    Experiments,
    Models,
}

impl Depth {
    pub fn levels(&self) -> u8 {
        match self {
            Depth::Variables => 0,
            Depth::Experiments => 1,
            Depth::Models => 2,
        }
    }
}

/// The namespace found by [discover].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Hierarchy {
    pub base_path: String,
    pub depth: Depth,
    /// Empty below depth 2.
    pub models: Vec<String>,
    pub experiments: BTreeMap<String, Vec<String>>,
    pub variables: Vec<String>,
}

impl Hierarchy {
    /// The model a new panel starts on.
    pub fn default_model(&self) -> &str {
        self.models.first().map_or(ROOT_MODEL_KEY, String::as_str)
    }

    pub fn experiments_for(&self, model: &str) -> &[String] {
        self.experiments.get(model).map_or(&[], Vec::as_slice)
    }

    pub fn default_experiment(&self, model: &str) -> Option<&str> {
        self.experiments_for(model).first().map(String::as_str)
    }

    pub fn contains(&self, model: &str, experiment: &str) -> bool {
        match self.depth {
            Depth::Variables => true,
            _ => self.experiments_for(model).iter().any(|e| e == experiment),
        }
    }

    /// Path of the group holding the variables of one model/experiment.
    pub fn group_path(&self, model: &str, experiment: &str) -> String {
        match self.depth {
            Depth::Variables => self.base_path.clone(),
            Depth::Experiments => join_path(&self.base_path, experiment),
            Depth::Models => join_path(&join_path(&self.base_path, model), experiment),
        }
    }

    pub fn variable_path(&self, model: &str, experiment: &str, variable: &str) -> String {
        join_path(&self.group_path(model, experiment), variable)
    }

    /// The group variables and grid geometry are sampled from.
    pub fn sample_group_path(&self) -> String {
        let model = self.default_model();
        let experiment = self.default_experiment(model).unwrap_or_default();
        self.group_path(model, experiment)
    }
}

/// Children of `path`, or `None` when it has none or cannot be listed.
async fn child_names(store: &dyn Store, path: &str) -> Option<Vec<String>> {
    match store.list_children(path).await {
        Ok(children) if !children.is_empty() => Some(children),
        Ok(_) => None,
        Err(e) => {
            log::debug!("treating {path:?} as a leaf: {e}");
            None
        }
    }
}

fn without_coordinates(names: Vec<String>) -> Vec<String> {
    names
        .into_iter()
        .filter(|n| !is_coordinate_name(n))
        .collect()
}

/// Names in `group` that open as arrays of rank 2 or more.
async fn spatial_variables(store: &dyn Store, group: &str, names: Vec<String>) -> Vec<String> {
    let candidates = without_coordinates(names);
    let paths: Vec<String> = candidates.iter().map(|n| join_path(group, n)).collect();
    let opened = futures::future::join_all(paths.iter().map(|p| store.open_array(p))).await;
    candidates
        .into_iter()
        .zip(opened)
        .filter_map(|(name, meta)| match meta {
            Ok(meta) if meta.rank() >= 2 => Some(name),
            Ok(_) => None,
            Err(e) => {
                log::debug!("skipping variable {name:?}: {e}");
                None
            }
        })
        .collect()
}

/// Classify the store below `base_path` and enumerate its namespace.
///
/// Only a failure to list `base_path` itself is an error; any other
/// failure marks that node as a leaf.
pub async fn discover(store: &dyn Store, base_path: &str) -> crate::Result<Hierarchy> {
    let base_path = base_path.trim_matches('/').to_string();
    let children = store
        .list_children(&base_path)
        .await
        .map_err(|e| crate::Error::Discovery(format!("cannot list {base_path:?}: {e}")))?;

    let mut hierarchy = Hierarchy {
        base_path,
        ..Default::default()
    };
    let Some(first) = children.first() else {
        log::info!("{:?} is empty", hierarchy.base_path);
        return Ok(hierarchy);
    };

    let first_path = join_path(&hierarchy.base_path, first);
    let Some(second) = child_names(store, &first_path).await else {
        hierarchy.variables = without_coordinates(children);
        log::info!("depth 0 hierarchy with {} variables", hierarchy.variables.len());
        return Ok(hierarchy);
    };

    let second_path = join_path(&first_path, &second[0]);
    if child_names(store, &second_path).await.is_none() {
        hierarchy.depth = Depth::Experiments;
        hierarchy.variables = without_coordinates(second);
        hierarchy
            .experiments
            .insert(ROOT_MODEL_KEY.to_string(), children);
        log::info!("depth 1 hierarchy with {} experiments", hierarchy.experiments_for(ROOT_MODEL_KEY).len());
        return Ok(hierarchy);
    }

    hierarchy.depth = Depth::Models;
    let model_paths: Vec<String> = children
        .iter()
        .map(|model| join_path(&hierarchy.base_path, model))
        .collect();
    let experiment_lists =
        futures::future::join_all(model_paths.iter().map(|p| child_names(store, p))).await;
    for (model, experiments) in children.iter().zip(experiment_lists) {
        hierarchy
            .experiments
            .insert(model.clone(), experiments.unwrap_or_default());
    }
    hierarchy.models = children;

    // variable sets are assumed uniform, so one experiment is sampled
    let sample = hierarchy.sample_group_path();
    if let Some(names) = child_names(store, &sample).await {
        hierarchy.variables = spatial_variables(store, &sample, names).await;
    }
    log::info!(
        "depth 2 hierarchy with {} models and {} variables",
        hierarchy.models.len(),
        hierarchy.variables.len()
    );
    Ok(hierarchy)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use futures::executor::block_on;
    use zarrs::storage::store::MemoryStore;
    use zarrs::storage::{StoreKey, WritableStorageTraits};

    use super::*;
    use crate::storage::ZarrStore;

    fn put(store: &MemoryStore, key: &str, json: &str) {
        store
            .set(&StoreKey::new(key).unwrap(), json.as_bytes().to_vec().into())
            .unwrap();
    }

    fn group(store: &MemoryStore, path: &str) {
        put(store, &join_path(path, ".zgroup"), r#"{"zarr_format": 2}"#);
    }

    fn array(store: &MemoryStore, path: &str, shape: &[u64]) {
        let zarray = serde_json::json!({
            "zarr_format": 2,
            "shape": shape,
            "chunks": shape,
            "dtype": "<f4",
            "compressor": null,
            "fill_value": null,
            "filters": null,
            "order": "C",
        });
        put(store, &join_path(path, ".zarray"), &zarray.to_string());
    }

    fn discover_in(store: MemoryStore, base: &str) -> Hierarchy {
        env_logger::try_init().ok();
        let store = ZarrStore::new(Arc::new(store));
        block_on(discover(&store, base)).unwrap()
    }

    #[test]
    fn coordinate_names() {
        assert!(is_coordinate_name("Lat"));
        assert!(is_coordinate_name("TIME_BNDS"));
        assert!(!is_coordinate_name("lithk"));
    }

    #[test]
    fn depth_two() {
        let store = MemoryStore::new();
        group(&store, "");
        group(&store, "modelX");
        group(&store, "modelX/expY");
        array(&store, "modelX/expY/var1", &[3, 4, 5]);
        array(&store, "modelX/expY/var2", &[4, 5]);
        array(&store, "modelX/expY/series", &[3]);
        array(&store, "modelX/expY/x", &[5]);
        array(&store, "modelX/expY/y", &[4]);
        group(&store, "modelZ");
        group(&store, "modelZ/expA");
        group(&store, "modelZ/expB");
        array(&store, "modelZ/expA/var1", &[3, 4, 5]);
        array(&store, "modelZ/expB/var1", &[3, 4, 5]);

        let h = discover_in(store, "");
        assert_eq!(h.depth, Depth::Models);
        assert_eq!(h.models, vec!["modelX", "modelZ"]);
        assert_eq!(h.experiments_for("modelX"), ["expY"]);
        assert_eq!(h.experiments_for("modelZ"), ["expA", "expB"]);
        assert_eq!(h.variables, vec!["var1", "var2"]);
        assert_eq!(h.variable_path("modelZ", "expB", "var1"), "modelZ/expB/var1");
        assert_eq!(h.sample_group_path(), "modelX/expY");
    }

    #[test]
    fn depth_one_under_base_path() {
        let store = MemoryStore::new();
        group(&store, "");
        group(&store, "views");
        group(&store, "views/ctrl");
        group(&store, "views/hist");
        array(&store, "views/ctrl/lithk", &[2, 4, 5]);
        array(&store, "views/ctrl/time", &[2]);
        array(&store, "views/hist/lithk", &[2, 4, 5]);

        let h = discover_in(store, "/views/");
        assert_eq!(h.depth, Depth::Experiments);
        assert!(h.models.is_empty());
        assert_eq!(h.default_model(), ROOT_MODEL_KEY);
        assert_eq!(h.experiments_for(ROOT_MODEL_KEY), ["ctrl", "hist"]);
        assert_eq!(h.variables, vec!["lithk"]);
        assert_eq!(h.variable_path(ROOT_MODEL_KEY, "hist", "lithk"), "views/hist/lithk");
    }

    #[test]
    fn depth_zero() {
        let store = MemoryStore::new();
        group(&store, "");
        array(&store, "lithk", &[2, 4, 5]);
        array(&store, "LAT", &[4]);
        array(&store, "series", &[2]);

        let h = discover_in(store, "");
        assert_eq!(h.depth, Depth::Variables);
        // rank filtering only applies to sampled depth 2 stores
        assert_eq!(h.variables, vec!["lithk", "series"]);
        assert_eq!(h.group_path(ROOT_MODEL_KEY, ""), "");
    }

    #[test]
    fn empty_and_missing() {
        let store = MemoryStore::new();
        group(&store, "");
        let h = discover_in(store, "");
        assert_eq!(h, Hierarchy::default());

        let store = ZarrStore::new(Arc::new(MemoryStore::new()));
        let err = block_on(discover(&store, "nowhere")).unwrap_err();
        assert!(matches!(err, crate::Error::Discovery(_)));
    }
}
