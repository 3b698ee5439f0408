//! The state machine tying discovery, time alignment, loading and colour
//! ranging together.
//!
//! All state lives in [Viewer] and changes only through its methods. Loads
//! run in three phases: [Viewer::prepare_load] snapshots what a load needs
//! and tags it with the panel's generation, [fetch_panel] does the store
//! I/O without touching viewer state, and [Viewer::apply_load] commits the
//! outcome unless the panel has moved on since.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::chunk::ArraySlice;
use crate::color::{Bitmap, BitmapJob, ColorRange, Colormap};
use crate::config::{PanelSelection, ViewerOptions};
use crate::grid::{
    GridConfig, GridSource, fill_value_of, resolve_attributes, resolve_fill_value, resolve_grid,
};
use crate::hierarchy::{Depth, Hierarchy, discover};
use crate::metadata::Attributes;
use crate::storage::{ResolvedRef, Store, join_path};
use crate::time::{TimeLabel, YearRange, decode_time_axis, find_index_for_year, year_range};

mod panel;

pub use panel::{Panel, PanelId, PanelStatus, Raster, RasterStats, ResolvedTime};

/// Name of the time coordinate array beside the variables.
const TIME_ARRAY: &str = "time";

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ViewerStatus {
    #[default]
    Uninitialized,
    Ready,
    /// Initialisation failed; nothing can be loaded.
    Failed(String),
}

/// The value under the cursor in one panel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hover {
    pub panel: PanelId,
    pub x: usize,
    pub y: usize,
    pub value: Option<f32>,
}

/// A pending time change; only the most recent ticket is honoured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeChangeTicket {
    seq: u64,
    position: u64,
}

impl TimeChangeTicket {
    pub fn position(&self) -> u64 {
        self.position
    }
}

/// Everything one panel load needs, captured when it was issued.
#[derive(Debug, Clone)]
pub struct LoadRequest {
    pub panel: PanelId,
    pub generation: u64,
    pub array_path: String,
    pub group_path: String,
    pub time_path: String,
    pub target_year: Option<i32>,
    pub raw_time_index: u64,
    pub fill_value: Option<f64>,
    /// Previously decoded labels for `time_path`; the inner `None` marks an
    /// axis known to be undecodable.
    pub cached_labels: Option<Option<Vec<TimeLabel>>>,
}

#[derive(Debug)]
pub enum LoadResult {
    Loaded {
        raster: Raster,
        stats: RasterStats,
        time: ResolvedTime,
    },
    OutOfRange,
    Failed(crate::Error),
}

/// What [fetch_panel] found for one [LoadRequest].
#[derive(Debug)]
pub struct LoadOutcome {
    pub panel: PanelId,
    pub generation: u64,
    pub time_path: String,
    /// Labels looked up during this load, for the time-axis cache.
    pub fetched_labels: Option<Option<Vec<TimeLabel>>>,
    pub time_labels: Option<Vec<TimeLabel>>,
    pub max_time_index: Option<u64>,
    pub group_attributes: Attributes,
    pub result: LoadResult,
}

async fn read_time_labels(store: &dyn Store, path: &str, len: u64) -> Option<Vec<TimeLabel>> {
    let meta = match store.open_array(path).await {
        Ok(meta) => meta,
        Err(e) => {
            log::debug!("no time coordinate at {path:?}: {e}");
            return None;
        }
    };
    let values = match store.read_array(path, &ArraySlice::all(&meta.shape)).await {
        Ok(values) => values.to_f64_vec(),
        Err(e) => {
            log::warn!("could not read time coordinate {path:?}: {e}");
            return None;
        }
    };
    let attrs = &meta.attributes;
    let labels = decode_time_axis(&values, attrs.units.as_deref(), attrs.calendar.as_deref())?;
    if labels.len() as u64 != len {
        log::warn!(
            "{path:?} has {} labels for a time axis of {len}",
            labels.len()
        );
        return None;
    }
    Some(labels)
}

/// Pick the time step for a panel.
///
/// With decoded labels and a target year the closest year wins; otherwise
/// the raw index is clamped to the axis.
pub fn resolve_time_index(
    labels: Option<&[TimeLabel]>,
    time_len: u64,
    target_year: Option<i32>,
    raw_index: u64,
) -> ResolvedTime {
    if time_len == 0 {
        return ResolvedTime::NoDataForYear;
    }
    match (labels, target_year) {
        (Some(labels), Some(year)) => match find_index_for_year(labels, year) {
            Some(i) => ResolvedTime::Index(i as u64),
            None => ResolvedTime::NoDataForYear,
        },
        _ => ResolvedTime::Index(raw_index.min(time_len - 1)),
    }
}

/// Replace either side of an estimated range with a configured limit. When
/// that inverts the range, the free side keeps the estimate's width.
fn pin_limits(estimate: ColorRange, vmin: Option<f64>, vmax: Option<f64>) -> ColorRange {
    let width = estimate.vmax - estimate.vmin;
    match (vmin, vmax) {
        (Some(lo), Some(hi)) => ColorRange::new(lo, hi),
        (Some(lo), None) if lo < estimate.vmax => ColorRange::new(lo, estimate.vmax),
        (Some(lo), None) => ColorRange::new(lo, lo + width),
        (None, Some(hi)) if hi > estimate.vmin => ColorRange::new(estimate.vmin, hi),
        (None, Some(hi)) => ColorRange::new(hi - width, hi),
        (None, None) => estimate,
    }
}

/// Perform the store reads for one load.
pub async fn fetch_panel(store: &dyn Store, request: &LoadRequest) -> LoadOutcome {
    let mut outcome = LoadOutcome {
        panel: request.panel,
        generation: request.generation,
        time_path: request.time_path.clone(),
        fetched_labels: None,
        time_labels: None,
        max_time_index: None,
        group_attributes: Attributes::default(),
        result: LoadResult::OutOfRange,
    };
    let meta = match store.open_array(&request.array_path).await {
        Ok(meta) => meta,
        Err(e) => {
            outcome.result = LoadResult::Failed(e);
            return outcome;
        }
    };
    let shape = meta.shape.clone();
    let time_len = match shape.len() {
        2 => None,
        3 => Some(shape[0]),
        rank => {
            outcome.result = LoadResult::Failed(crate::Error::metadata(
                &request.array_path,
                format!("cannot display an array of rank {rank}"),
            ));
            return outcome;
        }
    };

    outcome.group_attributes = resolve_attributes(store, &request.group_path).await;
    let time = match time_len {
        None => ResolvedTime::Static,
        Some(len) => {
            let labels = match &request.cached_labels {
                // variables sharing a time coordinate may differ in length
                Some(cached) => cached.clone().filter(|l| l.len() as u64 == len),
                None => {
                    let labels = read_time_labels(store, &request.time_path, len).await;
                    outcome.fetched_labels = Some(labels.clone());
                    labels
                }
            };
            if labels.is_none() {
                log::debug!("{}: stepping the time axis by raw index", request.panel);
            }
            outcome.max_time_index = len.checked_sub(1);
            let time = resolve_time_index(
                labels.as_deref(),
                len,
                request.target_year,
                request.raw_time_index,
            );
            outcome.time_labels = labels;
            time
        }
    };

    let slice = match time {
        ResolvedTime::Static => ArraySlice::all(&shape),
        ResolvedTime::Index(i) => ArraySlice::leading_index(&shape, i),
        ResolvedTime::NoDataForYear => {
            log::debug!("{}: no data for {:?}", request.panel, request.target_year);
            return outcome;
        }
    };
    let values = match store.read_array(&request.array_path, &slice).await {
        Ok(values) => values.into_f32_vec(),
        Err(e) => {
            outcome.result = LoadResult::Failed(e);
            return outcome;
        }
    };
    let fill_value = fill_value_of(&meta).or(request.fill_value);
    let stats = RasterStats::compute(&values, fill_value);
    let raster = Raster {
        values,
        height: shape[shape.len() - 2] as usize,
        width: shape[shape.len() - 1] as usize,
    };
    outcome.result = LoadResult::Loaded {
        raster,
        stats,
        time,
    };
    outcome
}

/// Multi-panel viewer state.
pub struct Viewer {
    store: Arc<dyn Store>,
    options: ViewerOptions,
    status: ViewerStatus,
    resolved_ref: Option<ResolvedRef>,
    hierarchy: Hierarchy,
    grid: GridConfig,
    grid_source: GridSource,
    variable: Option<String>,
    variable_attributes: Attributes,
    fill_value: Option<f64>,
    panels: Vec<Panel>,
    active: Option<PanelId>,
    next_panel_id: u64,
    target_year: Option<i32>,
    time_index: u64,
    time_seq: u64,
    colormap: Colormap,
    range: ColorRange,
    auto_range: bool,
    /// A single configured limit kept while the other is estimated.
    pinned: (Option<f64>, Option<f64>),
    hover: Option<Hover>,
    time_cache: HashMap<String, Option<Vec<TimeLabel>>>,
}

impl Viewer {
    pub fn new(store: Arc<dyn Store>, options: ViewerOptions) -> Self {
        let auto_range = options.auto_range();
        let pinned = if auto_range {
            (options.vmin, options.vmax)
        } else {
            (None, None)
        };
        let range = if auto_range {
            pin_limits(ColorRange::default(), pinned.0, pinned.1)
        } else {
            ColorRange::new(options.vmin.unwrap_or(0.0), options.vmax.unwrap_or(1.0))
        };
        Self {
            store,
            status: ViewerStatus::Uninitialized,
            resolved_ref: None,
            hierarchy: Hierarchy::default(),
            grid: GridConfig::default(),
            grid_source: GridSource::Default,
            variable: None,
            variable_attributes: Attributes::default(),
            fill_value: None,
            panels: Vec::new(),
            active: None,
            next_panel_id: 0,
            target_year: options.target_year,
            time_index: options.time.unwrap_or(0),
            time_seq: 0,
            colormap: options.colormap,
            range,
            auto_range,
            pinned,
            hover: None,
            time_cache: HashMap::new(),
            options,
        }
    }

    /// Open the requested ref, discover the hierarchy, resolve grid and
    /// metadata, create the initial panels and, if enabled, load them.
    ///
    /// Failures to reach the store or its base path are fatal and leave the
    /// viewer in [ViewerStatus::Failed].
    pub async fn initialize(&mut self) -> crate::Result<()> {
        match self.try_initialize().await {
            Ok(()) => {
                self.status = ViewerStatus::Ready;
            }
            Err(e) => {
                log::error!("viewer initialisation failed: {e}");
                self.status = ViewerStatus::Failed(e.to_string());
                return Err(e);
            }
        }
        if self.options.auto_load && self.variable.is_some() {
            self.load_all_panels().await;
        }
        Ok(())
    }

    async fn try_initialize(&mut self) -> crate::Result<()> {
        let store = Arc::clone(&self.store);
        let requested = self.options.store_ref();
        let resolved = store.resolve_ref(&requested).await?;
        log::info!("opened {:?} at {:?}", requested, resolved.snapshot);
        self.resolved_ref = Some(resolved);

        self.time_cache.clear();
        self.panels.clear();
        self.active = None;
        self.hover = None;
        self.hierarchy = discover(store.as_ref(), &self.options.hierarchy_root()).await?;

        self.variable = match &self.options.variable {
            Some(v) if self.hierarchy.variables.contains(v) => Some(v.clone()),
            requested => {
                if let Some(v) = requested {
                    log::warn!("variable {v:?} not found, using the first available");
                }
                self.hierarchy.variables.first().cloned()
            }
        };

        let sample = self.hierarchy.sample_group_path();
        let (grid, source) = resolve_grid(store.as_ref(), &sample, self.options.grid.to_grid()).await;
        self.grid = match source {
            GridSource::Coordinates if !self.options.grid.is_empty() => {
                self.options.grid.apply(grid)
            }
            _ => grid,
        };
        self.grid_source = source;
        self.refresh_variable_metadata().await;

        let selections = if self.options.panels.is_empty() {
            vec![PanelSelection::default()]
        } else {
            self.options.panels.clone()
        };
        for selection in &selections {
            self.add_panel(selection);
        }
        Ok(())
    }

    /// Re-read fill value and attributes of the selected variable from the
    /// sample group.
    async fn refresh_variable_metadata(&mut self) {
        let Some(variable) = &self.variable else {
            self.fill_value = None;
            self.variable_attributes = Attributes::default();
            return;
        };
        let path = join_path(&self.hierarchy.sample_group_path(), variable);
        self.fill_value = resolve_fill_value(self.store.as_ref(), &path).await;
        self.variable_attributes = resolve_attributes(self.store.as_ref(), &path).await;
    }

    pub fn status(&self) -> &ViewerStatus {
        &self.status
    }

    pub fn options(&self) -> &ViewerOptions {
        &self.options
    }

    pub fn store(&self) -> Arc<dyn Store> {
        Arc::clone(&self.store)
    }

    pub fn resolved_ref(&self) -> Option<&ResolvedRef> {
        self.resolved_ref.as_ref()
    }

    pub fn hierarchy(&self) -> &Hierarchy {
        &self.hierarchy
    }

    pub fn grid(&self) -> GridConfig {
        self.grid
    }

    pub fn grid_source(&self) -> GridSource {
        self.grid_source
    }

    pub fn variable(&self) -> Option<&str> {
        self.variable.as_deref()
    }

    pub fn variable_attributes(&self) -> &Attributes {
        &self.variable_attributes
    }

    pub fn fill_value(&self) -> Option<f64> {
        self.fill_value
    }

    pub fn panels(&self) -> &[Panel] {
        &self.panels
    }

    pub fn panel(&self, id: PanelId) -> Option<&Panel> {
        self.panels.iter().find(|p| p.id == id)
    }

    fn require_panel(&self, id: PanelId) -> crate::Result<&Panel> {
        self.panel(id)
            .ok_or_else(|| crate::Error::general(format!("no such panel {id}")))
    }

    pub fn active_panel(&self) -> Option<PanelId> {
        self.active
    }

    pub fn target_year(&self) -> Option<i32> {
        self.target_year
    }

    pub fn colormap(&self) -> Colormap {
        self.colormap
    }

    pub fn color_range(&self) -> ColorRange {
        self.range
    }

    pub fn auto_range(&self) -> bool {
        self.auto_range
    }

    pub fn hover(&self) -> Option<&Hover> {
        self.hover.as_ref()
    }

    /// Add a panel; unknown or missing selections fall back to the first
    /// model and experiment. The first panel becomes active.
    pub fn add_panel(&mut self, selection: &PanelSelection) -> PanelId {
        let h = &self.hierarchy;
        let model = match &selection.model {
            _ if h.depth != Depth::Models => h.default_model().to_string(),
            Some(m) if h.models.contains(m) => m.clone(),
            requested => {
                if let Some(m) = requested {
                    log::warn!("model {m:?} not found");
                }
                h.default_model().to_string()
            }
        };
        let experiment = match &selection.experiment {
            Some(e) if h.contains(&model, e) => e.clone(),
            requested => {
                if let Some(e) = requested {
                    log::warn!("experiment {e:?} not found for model {model:?}");
                }
                h.default_experiment(&model).unwrap_or_default().to_string()
            }
        };
        let id = PanelId(self.next_panel_id);
        self.next_panel_id += 1;
        self.panels.push(Panel::new(id, model, experiment));
        if self.active.is_none() {
            self.active = Some(id);
        }
        id
    }

    pub fn remove_panel(&mut self, id: PanelId) -> bool {
        let before = self.panels.len();
        self.panels.retain(|p| p.id != id);
        if self.panels.len() == before {
            return false;
        }
        if self.active == Some(id) {
            self.active = self.panels.first().map(|p| p.id);
        }
        if self.hover.is_some_and(|h| h.panel == id) {
            self.hover = None;
        }
        self.refresh_auto_range();
        true
    }

    pub fn set_active_panel(&mut self, id: PanelId) -> crate::Result<()> {
        self.require_panel(id)?;
        self.active = Some(id);
        Ok(())
    }

    /// Switch a panel's model, keeping its experiment when the new model
    /// has one of the same name.
    pub fn select_model(&mut self, id: PanelId, model: &str) -> crate::Result<()> {
        if self.hierarchy.depth != Depth::Models || !self.hierarchy.models.iter().any(|m| m == model) {
            return Err(crate::Error::general(format!("unknown model {model:?}")));
        }
        let experiment = {
            let current = &self.require_panel(id)?.experiment;
            if self.hierarchy.contains(model, current) {
                current.clone()
            } else {
                self.hierarchy
                    .default_experiment(model)
                    .unwrap_or_default()
                    .to_string()
            }
        };
        self.apply_selection(id, model.to_string(), experiment)
    }

    pub fn select_experiment(&mut self, id: PanelId, experiment: &str) -> crate::Result<()> {
        let model = self.require_panel(id)?.model.clone();
        if !self.hierarchy.contains(&model, experiment) {
            return Err(crate::Error::general(format!(
                "unknown experiment {experiment:?} for model {model:?}"
            )));
        }
        self.apply_selection(id, model, experiment.to_string())
    }

    fn apply_selection(&mut self, id: PanelId, model: String, experiment: String) -> crate::Result<()> {
        let Some(panel) = self.panels.iter_mut().find(|p| p.id == id) else {
            return Err(crate::Error::general(format!("no such panel {id}")));
        };
        panel.model = model;
        panel.experiment = experiment;
        panel.reset();
        self.hover = None;
        self.refresh_auto_range();
        Ok(())
    }

    /// Capture a load for `id`, moving it to [PanelStatus::Loading].
    ///
    /// `None` when there is nothing to load, e.g. no variable is selected.
    pub fn prepare_load(&mut self, id: PanelId) -> Option<LoadRequest> {
        let Some(variable) = self.variable.clone() else {
            log::debug!("no variable selected, not loading {id}");
            return None;
        };
        let (model, experiment) = {
            let panel = self.panel(id)?;
            (panel.model.clone(), panel.experiment.clone())
        };
        let array_path = self.hierarchy.variable_path(&model, &experiment, &variable);
        let group_path = self.hierarchy.group_path(&model, &experiment);
        let time_path = join_path(&group_path, TIME_ARRAY);
        let cached_labels = self.time_cache.get(&time_path).cloned();
        let (target_year, raw_time_index, fill_value) =
            (self.target_year, self.time_index, self.fill_value);

        let panel = self.panels.iter_mut().find(|p| p.id == id)?;
        panel.load_generation += 1;
        panel.status = PanelStatus::Loading;
        Some(LoadRequest {
            panel: id,
            generation: panel.load_generation,
            array_path,
            group_path,
            time_path,
            target_year,
            raw_time_index,
            fill_value,
            cached_labels,
        })
    }

    /// Commit a finished load. Returns `false` for outcomes of superseded
    /// requests or removed panels, which are discarded.
    pub fn apply_load(&mut self, outcome: LoadOutcome) -> bool {
        if let Some(labels) = &outcome.fetched_labels {
            self.time_cache
                .entry(outcome.time_path.clone())
                .or_insert_with(|| labels.clone());
        }
        let Some(panel) = self.panels.iter_mut().find(|p| p.id == outcome.panel) else {
            log::debug!("discarding load for removed {}", outcome.panel);
            return false;
        };
        if panel.load_generation != outcome.generation {
            log::debug!(
                "discarding stale load for {} (generation {} < {})",
                panel.id,
                outcome.generation,
                panel.load_generation
            );
            return false;
        }

        panel.time_labels = outcome.time_labels;
        panel.max_time_index = outcome.max_time_index;
        panel.group_attributes = outcome.group_attributes;
        panel.bitmap_generation += 1;
        panel.bitmap = None;
        match outcome.result {
            LoadResult::Loaded {
                raster,
                stats,
                time,
            } => {
                panel.status = if stats.all_invalid() {
                    log::info!("{}: every value is fill or non-finite", panel.id);
                    PanelStatus::AllInvalid
                } else {
                    PanelStatus::Loaded
                };
                panel.raster = Some(raster);
                panel.stats = Some(stats);
                panel.resolved_time = Some(time);
                if self.target_year.is_none() {
                    if let Some(year) = panel.resolved_label().and_then(|l| l.year()) {
                        log::info!("aligning panels on {year} from {}", panel.id);
                        self.target_year = Some(year);
                    }
                }
            }
            LoadResult::OutOfRange => {
                panel.status = PanelStatus::OutOfRange;
                panel.raster = None;
                panel.stats = None;
                panel.resolved_time = Some(ResolvedTime::NoDataForYear);
            }
            LoadResult::Failed(e) => {
                log::warn!("loading {} failed: {e}", panel.id);
                panel.status = PanelStatus::Error(e.to_string());
                panel.raster = None;
                panel.stats = None;
                panel.resolved_time = None;
            }
        }
        self.refresh_auto_range();
        true
    }

    pub async fn load_panel(&mut self, id: PanelId) -> bool {
        let Some(request) = self.prepare_load(id) else {
            return false;
        };
        let outcome = fetch_panel(self.store.as_ref(), &request).await;
        self.apply_load(outcome)
    }

    /// Load every panel: the active one first, so it can establish the
    /// target year, then the rest concurrently.
    pub async fn load_all_panels(&mut self) {
        let active = self.active.or_else(|| self.panels.first().map(|p| p.id));
        if let Some(active) = active {
            self.load_panel(active).await;
        }
        let siblings: Vec<PanelId> = self
            .panels
            .iter()
            .map(|p| p.id)
            .filter(|id| Some(*id) != active)
            .collect();
        let requests: Vec<LoadRequest> = siblings
            .into_iter()
            .filter_map(|id| self.prepare_load(id))
            .collect();
        let store = Arc::clone(&self.store);
        let outcomes =
            futures::future::join_all(requests.iter().map(|r| fetch_panel(store.as_ref(), r))).await;
        for outcome in outcomes {
            self.apply_load(outcome);
        }
    }

    fn any_panel_has_data(&self) -> bool {
        self.panels.iter().any(|p| p.status.has_data())
    }

    /// Change the variable; panels that were showing data reload at once.
    pub async fn set_variable(&mut self, variable: &str) -> crate::Result<()> {
        if self.variable.as_deref() == Some(variable) {
            return Ok(());
        }
        if !self.hierarchy.variables.iter().any(|v| v == variable) {
            return Err(crate::Error::general(format!("unknown variable {variable:?}")));
        }
        let reload = self.any_panel_has_data();
        self.variable = Some(variable.to_string());
        for panel in &mut self.panels {
            panel.reset();
        }
        self.hover = None;
        self.refresh_variable_metadata().await;
        self.refresh_auto_range();
        if reload {
            self.load_all_panels().await;
        }
        Ok(())
    }

    /// Union of the years covered by every panel's time labels.
    pub fn year_range(&self) -> Option<YearRange> {
        year_range(self.panels.iter().filter_map(|p| p.time_labels()))
    }

    /// Whether the time slider steps through years rather than raw indices.
    pub fn year_mode(&self) -> bool {
        self.year_range().is_some()
    }

    /// Slider position: years since the union's first year, or the raw
    /// time index when no panel has decodable time labels.
    pub fn slider_position(&self) -> u64 {
        match (self.year_range(), self.target_year) {
            (Some(range), Some(year)) => year.saturating_sub(range.min_year).max(0) as u64,
            (Some(_), None) => 0,
            (None, _) => self.time_index,
        }
    }

    pub fn slider_max(&self) -> u64 {
        match self.year_range() {
            Some(range) => range.span() as u64,
            None => self
                .panels
                .iter()
                .filter_map(|p| p.max_time_index)
                .max()
                .unwrap_or(0),
        }
    }

    /// Set the alignment year directly; takes effect on the next load.
    pub fn set_target_year(&mut self, year: Option<i32>) {
        self.target_year = year;
    }

    /// Record a slider move; call [Self::apply_time_change] with the
    /// returned ticket after [Self::debounce_delay].
    pub fn request_time_change(&mut self, position: u64) -> TimeChangeTicket {
        self.time_seq += 1;
        TimeChangeTicket {
            seq: self.time_seq,
            position,
        }
    }

    pub fn debounce_delay(&self) -> Duration {
        if self.options.instant_load {
            Duration::ZERO
        } else {
            Duration::from_millis(self.options.debounce_ms)
        }
    }

    /// Apply the slider position of `ticket` and reload, unless a later
    /// request superseded it.
    pub async fn apply_time_change(&mut self, ticket: TimeChangeTicket) -> bool {
        if ticket.seq != self.time_seq {
            log::debug!("skipping superseded time change to {}", ticket.position);
            return false;
        }
        let position = ticket.position.min(self.slider_max());
        match self.year_range() {
            Some(range) => {
                let offset = i32::try_from(position).unwrap_or(i32::MAX);
                self.target_year = Some(range.min_year.saturating_add(offset));
            }
            None => {}
        }
        // panels without decodable labels step by the same position
        self.time_index = position;
        self.hover = None;
        self.load_all_panels().await;
        true
    }

    pub fn set_colormap(&mut self, colormap: Colormap) {
        self.colormap = colormap;
    }

    /// Fix the colour limits, turning automatic ranging off.
    pub fn set_range(&mut self, vmin: f64, vmax: f64) {
        self.auto_range = false;
        self.pinned = (None, None);
        self.range = ColorRange::new(vmin, vmax);
    }

    pub fn set_auto_range(&mut self, enabled: bool) {
        self.auto_range = enabled;
        self.pinned = (None, None);
        self.refresh_auto_range();
    }

    /// Re-estimate the colour range over every panel holding data.
    fn refresh_auto_range(&mut self) {
        if !self.auto_range {
            return;
        }
        let values = self
            .panels
            .iter()
            .filter_map(|p| p.raster.as_ref())
            .flat_map(|r| r.values.iter().map(|v| *v as f64));
        let estimate = ColorRange::estimate(values, self.fill_value);
        self.range = pin_limits(estimate, self.pinned.0, self.pinned.1);
    }

    pub fn set_hover(&mut self, panel: PanelId, x: usize, y: usize) -> Option<&Hover> {
        let value = self.panel(panel)?.raster()?.value_at(x, y);
        self.hover = Some(Hover { panel, x, y, value });
        self.hover.as_ref()
    }

    pub fn clear_hover(&mut self) {
        self.hover = None;
    }

    /// Start rendering a panel's raster. Any job issued earlier for the same
    /// panel becomes stale.
    pub fn begin_bitmap(&mut self, id: PanelId) -> Option<BitmapJob> {
        let (range, fill_value, colormap) = (self.range, self.fill_value, self.colormap);
        let panel = self.panels.iter_mut().find(|p| p.id == id)?;
        let raster = panel.raster.as_ref()?;
        panel.bitmap_generation += 1;
        Some(BitmapJob {
            panel: id,
            generation: panel.bitmap_generation,
            width: raster.width,
            height: raster.height,
            values: raster.values.clone(),
            range,
            fill_value,
            colormap,
        })
    }

    /// Install a rendered bitmap if it is still the latest for its panel;
    /// stale bitmaps are dropped.
    pub fn commit_bitmap(&mut self, bitmap: Bitmap) -> bool {
        let Some(panel) = self.panels.iter_mut().find(|p| p.id == bitmap.panel) else {
            return false;
        };
        if panel.bitmap_generation != bitmap.generation {
            log::debug!(
                "dropping stale bitmap for {} (generation {} < {})",
                panel.id,
                bitmap.generation,
                panel.bitmap_generation
            );
            return false;
        }
        panel.bitmap = Some(bitmap);
        true
    }
}
