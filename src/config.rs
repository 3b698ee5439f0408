//! Initial viewer state supplied by the embedding page.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::color::Colormap;
use crate::grid::GridConfig;
use crate::storage::{StoreRef, join_path};

/// Which controls the host shows around the panels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlsMode {
    #[default]
    Full,
    Minimal,
    Hidden,
}

/// Initial model/experiment for one panel; unset fields pick the first
/// available entry.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PanelSelection {
    pub model: Option<String>,
    pub experiment: Option<String>,
}

impl PanelSelection {
    /// `model/experiment`, or just `experiment`.
    pub fn parse(s: &str) -> Self {
        let s = s.trim();
        match s.split_once('/') {
            Some((model, experiment)) => Self {
                model: Some(model.to_string()).filter(|m| !m.is_empty()),
                experiment: Some(experiment.to_string()).filter(|e| !e.is_empty()),
            },
            None => Self {
                model: None,
                experiment: Some(s.to_string()).filter(|e| !e.is_empty()),
            },
        }
    }
}

/// Explicit grid geometry overriding what is read from the store.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GridOverrides {
    pub width: Option<u64>,
    pub height: Option<u64>,
    #[serde(alias = "cellSize")]
    pub cell_size: Option<f64>,
    #[serde(alias = "xMin")]
    pub x_min: Option<f64>,
    #[serde(alias = "yMin")]
    pub y_min: Option<f64>,
}

impl GridOverrides {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// A grid when every field is present and the result is valid.
    pub fn to_grid(&self) -> Option<GridConfig> {
        let grid = GridConfig::new(
            self.width?,
            self.height?,
            self.cell_size?,
            self.x_min?,
            self.y_min?,
        );
        grid.validate().ok().map(|_| grid)
    }

    /// Replace the fields of `grid` that are overridden; invalid results
    /// leave `grid` unchanged.
    pub fn apply(&self, grid: GridConfig) -> GridConfig {
        let merged = GridConfig::new(
            self.width.unwrap_or(grid.width),
            self.height.unwrap_or(grid.height),
            self.cell_size.unwrap_or(grid.cell_size),
            self.x_min.unwrap_or(grid.x_min),
            self.y_min.unwrap_or(grid.y_min),
        );
        match merged.validate() {
            Ok(()) => merged,
            Err(e) => {
                log::warn!("ignoring grid overrides: {e}");
                grid
            }
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_debounce_ms() -> u64 {
    300
}

/// Everything the host can set before the first load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerOptions {
    /// Location of the store; opened by the host, not by the viewer.
    #[serde(alias = "url")]
    pub store_url: Option<String>,
    #[serde(rename = "ref", alias = "snapshot", alias = "branch")]
    pub store_ref: String,
    #[serde(alias = "group", alias = "basePath")]
    pub base_path: String,
    /// A sub-group of `base_path` holding the hierarchy.
    #[serde(alias = "dataView", alias = "view")]
    pub data_view: Option<String>,
    pub panels: Vec<PanelSelection>,
    #[serde(alias = "var")]
    pub variable: Option<String>,
    /// Raw time index used until a target year is known.
    pub time: Option<u64>,
    #[serde(alias = "year", alias = "targetYear")]
    pub target_year: Option<i32>,
    #[serde(alias = "cmap")]
    pub colormap: Colormap,
    pub vmin: Option<f64>,
    pub vmax: Option<f64>,
    pub controls: ControlsMode,
    pub grid: GridOverrides,
    #[serde(default = "default_true", alias = "autoLoad")]
    pub auto_load: bool,
    #[serde(alias = "instantLoad")]
    pub instant_load: bool,
    #[serde(default = "default_debounce_ms", alias = "debounceMs")]
    pub debounce_ms: u64,
}

impl Default for ViewerOptions {
    fn default() -> Self {
        Self {
            store_url: None,
            store_ref: StoreRef::default().name().to_string(),
            base_path: String::new(),
            data_view: None,
            panels: Vec::new(),
            variable: None,
            time: None,
            target_year: None,
            colormap: Colormap::default(),
            vmin: None,
            vmax: None,
            controls: ControlsMode::default(),
            grid: GridOverrides::default(),
            auto_load: default_true(),
            instant_load: false,
            debounce_ms: default_debounce_ms(),
        }
    }
}

const GRID_KEYS: &[(&str, &str)] = &[
    ("width", "width"),
    ("grid_width", "width"),
    ("height", "height"),
    ("grid_height", "height"),
    ("cell_size", "cell_size"),
    ("cellSize", "cell_size"),
    ("x_min", "x_min"),
    ("xMin", "x_min"),
    ("y_min", "y_min"),
    ("yMin", "y_min"),
];

impl ViewerOptions {
    pub fn from_json(json: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Build from flat string options such as query parameters.
    ///
    /// Values are read as JSON where they parse, otherwise as strings. Grid
    /// fields may be given flat, and `panels` as a comma-separated list of
    /// `model/experiment` entries.
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> crate::Result<Self>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut map = Map::new();
        let mut grid = Map::new();
        for (key, value) in pairs {
            let (key, raw) = (key.as_ref(), value.as_ref());
            let value = match key {
                // these stay strings even when they look like numbers
                "ref" | "snapshot" | "branch" | "variable" | "var" | "colormap" | "cmap" => {
                    Value::String(raw.to_string())
                }
                "panels" if serde_json::from_str::<Value>(raw).is_err() => Value::Array(
                    raw.split(',')
                        .filter(|s| !s.trim().is_empty())
                        .map(|s| serde_json::to_value(PanelSelection::parse(s)))
                        .collect::<Result<_, _>>()?,
                ),
                _ => serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string())),
            };
            if let Some((_, field)) = GRID_KEYS.iter().find(|(k, _)| *k == key) {
                grid.insert(field.to_string(), value);
            } else {
                map.insert(key.to_string(), value);
            }
        }
        if !grid.is_empty() {
            map.insert("grid".to_string(), Value::Object(grid));
        }
        Ok(serde_json::from_value(Value::Object(map))?)
    }

    pub fn store_ref(&self) -> StoreRef {
        StoreRef::parse(&self.store_ref)
    }

    /// The group discovery starts from.
    pub fn hierarchy_root(&self) -> String {
        match &self.data_view {
            Some(view) => join_path(&self.base_path, view),
            None => self.base_path.trim_matches('/').to_string(),
        }
    }

    /// Both colour limits disable automatic ranging; a single one only
    /// pins that side of the estimated range.
    pub fn auto_range(&self) -> bool {
        self.vmin.is_none() || self.vmax.is_none()
    }
}
