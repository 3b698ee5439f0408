//! Grid geometry, fill values and descriptive metadata, each resolved with
//! a fallback so that missing metadata never blocks the viewer.

use serde::{Deserialize, Serialize};

use crate::chunk::ArraySlice;
use crate::metadata::{ArrayMetadata, Attributes};
use crate::storage::{Store, join_path};

/// Spatial geometry shared by every panel of a data view.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridConfig {
    pub width: u64,
    pub height: u64,
    pub cell_size: f64,
    pub x_min: f64,
    pub y_min: f64,
    pub x_max: f64,
    pub y_max: f64,
}

impl Default for GridConfig {
    /// The 8 km ISMIP6 Antarctic grid.
    fn default() -> Self {
        Self::new(761, 761, 8000.0, -3_040_000.0, -3_040_000.0)
    }
}

impl GridConfig {
    /// Bounds follow from the origin, the size and the cell size.
    pub fn new(width: u64, height: u64, cell_size: f64, x_min: f64, y_min: f64) -> Self {
        Self {
            width,
            height,
            cell_size,
            x_min,
            y_min,
            x_max: x_min + width as f64 * cell_size,
            y_max: y_min + height as f64 * cell_size,
        }
    }

    /// Derive the grid from coordinate values along each axis.
    pub fn from_axes(x: &[f64], y: &[f64]) -> crate::Result<Self> {
        let (Some(x0), Some(y0)) = (x.first(), y.first()) else {
            return Err(crate::Error::general("empty coordinate axis"));
        };
        let step = |axis: &[f64]| match axis {
            [a, b, ..] => (b - a).abs(),
            _ => 0.0,
        };
        let grid = Self::new(
            x.len() as u64,
            y.len() as u64,
            step(x).max(step(y)),
            *x0,
            *y0,
        );
        grid.validate()?;
        Ok(grid)
    }

    pub fn validate(&self) -> crate::Result<()> {
        if !(self.cell_size.is_finite() && self.cell_size > 0.0) {
            return Err(crate::Error::general(format!(
                "invalid cell size {}",
                self.cell_size
            )));
        }
        let bounds = [self.x_min, self.y_min, self.x_max, self.y_max];
        if bounds.iter().any(|v| !v.is_finite()) {
            return Err(crate::Error::general(format!("non-finite bounds {bounds:?}")));
        }
        if self.width == 0 || self.height == 0 {
            return Err(crate::Error::general("grid has no cells"));
        }
        Ok(())
    }

    pub fn num_cells(&self) -> u64 {
        self.width * self.height
    }
}

/// Where a resolved [GridConfig] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GridSource {
    Coordinates,
    Overrides,
    Default,
}

async fn read_axis(store: &dyn Store, path: &str) -> crate::Result<Vec<f64>> {
    let meta = store.open_array(path).await?;
    if meta.rank() != 1 {
        return Err(crate::Error::metadata(path, "coordinate axis is not 1-dimensional"));
    }
    let values = store.read_array(path, &ArraySlice::all(&meta.shape)).await?;
    Ok(values.to_f64_vec())
}

async fn grid_from_coordinates(store: &dyn Store, group: &str) -> crate::Result<GridConfig> {
    let x = read_axis(store, &join_path(group, "x")).await?;
    let y = read_axis(store, &join_path(group, "y")).await?;
    GridConfig::from_axes(&x, &y)
}

/// Grid geometry from the `x` and `y` arrays of `group`, falling back to
/// `overrides` and then to [GridConfig::default].
pub async fn resolve_grid(
    store: &dyn Store,
    group: &str,
    overrides: Option<GridConfig>,
) -> (GridConfig, GridSource) {
    match grid_from_coordinates(store, group).await {
        Ok(grid) => return (grid, GridSource::Coordinates),
        Err(e) => log::debug!("no grid from coordinates in {group:?}: {e}"),
    }
    match overrides.filter(|g| g.validate().is_ok()) {
        Some(grid) => (grid, GridSource::Overrides),
        None => {
            log::info!("using the default grid");
            (GridConfig::default(), GridSource::Default)
        }
    }
}

/// The array-level fill value, else the `_FillValue` attribute.
pub fn fill_value_of(meta: &ArrayMetadata) -> Option<f64> {
    meta.fill_value.or_else(|| meta.attributes.fill_value())
}

/// Fill value of the array at `path`; `None` when unset or unreadable.
pub async fn resolve_fill_value(store: &dyn Store, path: &str) -> Option<f64> {
    match store.open_array(path).await {
        Ok(meta) => fill_value_of(&meta),
        Err(e) => {
            log::debug!("no fill value for {path:?}: {e}");
            None
        }
    }
}

/// Attributes of the node at `path`, array or group; empty when unreadable.
pub async fn resolve_attributes(store: &dyn Store, path: &str) -> Attributes {
    match store.open_array(path).await {
        Ok(meta) => return meta.attributes,
        Err(e) => log::debug!("{path:?} is not a readable array: {e}"),
    }
    store.open_group(path).await.unwrap_or_else(|e| {
        log::debug!("no attributes for {path:?}: {e}");
        Attributes::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_grid_bounds() {
        let g = GridConfig::default();
        assert_eq!(g.x_max, 3_048_000.0);
        assert_eq!(g.y_max, 3_048_000.0);
        assert!(g.validate().is_ok());
    }

    #[test]
    fn from_axes_takes_larger_step() {
        let x = [0.0, 10.0, 20.0, 30.0];
        let y = [100.0, 85.0, 70.0];
        let g = GridConfig::from_axes(&x, &y).unwrap();
        assert_eq!((g.width, g.height), (4, 3));
        assert_eq!(g.cell_size, 15.0);
        assert_eq!((g.x_min, g.y_min), (0.0, 100.0));
        assert_eq!((g.x_max, g.y_max), (60.0, 145.0));
    }

    #[test]
    fn degenerate_axes() {
        assert!(GridConfig::from_axes(&[1.0], &[2.0]).is_err());
        assert!(GridConfig::from_axes(&[], &[2.0, 3.0]).is_err());
        assert!(GridConfig::from_axes(&[f64::NAN, 1.0], &[0.0, 1.0]).is_err());
        let g = GridConfig::new(3, 3, -1.0, 0.0, 0.0);
        assert!(g.validate().is_err());
    }
}
