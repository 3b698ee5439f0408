use std::fmt;

use crate::color::{Bitmap, is_valid_value};
use crate::metadata::Attributes;
use crate::time::TimeLabel;

/// Stable identity of a panel; never reused within one viewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PanelId(pub u64);

impl fmt::Display for PanelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "panel-{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PanelStatus {
    #[default]
    Empty,
    Loading,
    Loaded,
    /// Loaded, but no value is finite and distinct from the fill value.
    AllInvalid,
    /// The target year lies outside this panel's time axis.
    OutOfRange,
    Error(String),
}

impl PanelStatus {
    pub fn has_data(&self) -> bool {
        matches!(self, PanelStatus::Loaded | PanelStatus::AllInvalid)
    }
}

/// Which time step a load settled on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedTime {
    /// The array has no time axis.
    Static,
    Index(u64),
    /// No time step exists for the target year.
    NoDataForYear,
}

impl ResolvedTime {
    pub fn index(&self) -> Option<u64> {
        match self {
            ResolvedTime::Index(i) => Some(*i),
            _ => None,
        }
    }
}

/// One 2-D grid of a variable, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct Raster {
    pub values: Vec<f32>,
    pub height: usize,
    pub width: usize,
}

impl Raster {
    pub fn value_at(&self, x: usize, y: usize) -> Option<f32> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.values.get(y * self.width + x).copied()
    }
}

/// Summary of a raster's values.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RasterStats {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub mean: Option<f64>,
    pub valid_count: usize,
    pub nan_count: usize,
    /// Finite values rejected as fill or sentinel.
    pub fill_count: usize,
}

impl RasterStats {
    pub fn compute(values: &[f32], fill_value: Option<f64>) -> Self {
        let mut stats = Self::default();
        let mut sum = 0.0;
        for v in values.iter().map(|v| *v as f64) {
            if !v.is_finite() {
                stats.nan_count += 1;
            } else if !is_valid_value(v, fill_value) {
                stats.fill_count += 1;
            } else {
                stats.valid_count += 1;
                sum += v;
                stats.min = Some(stats.min.map_or(v, |m| m.min(v)));
                stats.max = Some(stats.max.map_or(v, |m| m.max(v)));
            }
        }
        if stats.valid_count > 0 {
            stats.mean = Some(sum / stats.valid_count as f64);
        }
        stats
    }

    pub fn all_invalid(&self) -> bool {
        self.valid_count == 0
    }
}

/// Display state of one panel.
#[derive(Debug, Clone)]
pub struct Panel {
    pub(super) id: PanelId,
    pub(super) model: String,
    pub(super) experiment: String,
    pub(super) status: PanelStatus,
    pub(super) raster: Option<Raster>,
    pub(super) stats: Option<RasterStats>,
    /// `None` until loaded, or when the time axis could not be decoded.
    pub(super) time_labels: Option<Vec<TimeLabel>>,
    pub(super) max_time_index: Option<u64>,
    pub(super) resolved_time: Option<ResolvedTime>,
    pub(super) group_attributes: Attributes,
    pub(super) load_generation: u64,
    pub(super) bitmap_generation: u64,
    pub(super) bitmap: Option<Bitmap>,
}

impl Panel {
    pub(super) fn new(id: PanelId, model: String, experiment: String) -> Self {
        Self {
            id,
            model,
            experiment,
            status: PanelStatus::Empty,
            raster: None,
            stats: None,
            time_labels: None,
            max_time_index: None,
            resolved_time: None,
            group_attributes: Attributes::default(),
            load_generation: 0,
            bitmap_generation: 0,
            bitmap: None,
        }
    }

    /// Drop loaded data and invalidate anything in flight.
    pub(super) fn reset(&mut self) {
        self.status = PanelStatus::Empty;
        self.raster = None;
        self.stats = None;
        self.time_labels = None;
        self.max_time_index = None;
        self.resolved_time = None;
        self.group_attributes = Attributes::default();
        self.load_generation += 1;
        self.bitmap_generation += 1;
        self.bitmap = None;
    }

    pub fn id(&self) -> PanelId {
        self.id
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn experiment(&self) -> &str {
        &self.experiment
    }

    pub fn status(&self) -> &PanelStatus {
        &self.status
    }

    pub fn raster(&self) -> Option<&Raster> {
        self.raster.as_ref()
    }

    pub fn stats(&self) -> Option<&RasterStats> {
        self.stats.as_ref()
    }

    pub fn time_labels(&self) -> Option<&[TimeLabel]> {
        self.time_labels.as_deref()
    }

    pub fn max_time_index(&self) -> Option<u64> {
        self.max_time_index
    }

    pub fn resolved_time(&self) -> Option<ResolvedTime> {
        self.resolved_time
    }

    /// Label of the displayed time step.
    pub fn resolved_label(&self) -> Option<TimeLabel> {
        let index = self.resolved_time?.index()?;
        self.time_labels.as_ref()?.get(index as usize).copied()
    }

    pub fn group_attributes(&self) -> &Attributes {
        &self.group_attributes
    }

    pub fn load_generation(&self) -> u64 {
        self.load_generation
    }

    pub fn bitmap(&self) -> Option<&Bitmap> {
        self.bitmap.as_ref()
    }
}
