//! Display ranges, colormaps and RGBA rendering of loaded rasters.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::viewer::PanelId;

/// Magnitudes above this are treated as corrupted fill encodings.
const SENTINEL_MAGNITUDE: f64 = 1e10;
/// Relative tolerance for matching the declared fill value.
const FILL_TOLERANCE: f64 = 1e-6;
const LOW_PERCENTILE: f64 = 0.05;
const HIGH_PERCENTILE: f64 = 0.95;

/// Whether a raster value is real data rather than NaN, a sentinel or fill.
pub fn is_valid_value(value: f64, fill_value: Option<f64>) -> bool {
    if !value.is_finite() || value.abs() > SENTINEL_MAGNITUDE {
        return false;
    }
    match fill_value {
        Some(fill) if fill.is_finite() => (value - fill).abs() > fill.abs() * FILL_TOLERANCE,
        _ => true,
    }
}

/// The value interval mapped onto a colormap.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ColorRange {
    pub vmin: f64,
    pub vmax: f64,
}

impl Default for ColorRange {
    fn default() -> Self {
        Self { vmin: 0.0, vmax: 1.0 }
    }
}

impl ColorRange {
    pub fn new(vmin: f64, vmax: f64) -> Self {
        Self { vmin, vmax }
    }

    /// A robust range from the 5th and 95th percentiles of the valid values.
    ///
    /// Returns `0..1` when nothing is valid. A degenerate range is widened
    /// by 10% of its magnitude either side, or to `-1..1` around zero.
    pub fn estimate(values: impl IntoIterator<Item = f64>, fill_value: Option<f64>) -> Self {
        let mut valid: Vec<f64> = values
            .into_iter()
            .filter(|v| is_valid_value(*v, fill_value))
            .collect();
        if valid.is_empty() {
            return Self::default();
        }
        valid.sort_by(f64::total_cmp);
        let n = valid.len() as f64;
        let lo = valid[(n * LOW_PERCENTILE).floor() as usize];
        let hi = valid[(n * HIGH_PERCENTILE).floor() as usize];
        if lo != hi {
            return Self::new(lo, hi);
        }
        if lo == 0.0 {
            return Self::new(-1.0, 1.0);
        }
        let margin = lo.abs() * 0.1;
        Self::new(lo - margin, lo + margin)
    }

    /// Position of `value` in the range, clamped to `0..=1`.
    pub fn normalize(&self, value: f64) -> f64 {
        let span = self.vmax - self.vmin;
        if span.is_nan() || span <= 0.0 {
            return 0.5;
        }
        ((value - self.vmin) / span).clamp(0.0, 1.0)
    }
}

const VIRIDIS: &[[u8; 3]] = &[
    [0x44, 0x01, 0x54],
    [0x48, 0x28, 0x78],
    [0x3e, 0x49, 0x89],
    [0x31, 0x68, 0x8e],
    [0x26, 0x82, 0x8e],
    [0x1f, 0x9e, 0x89],
    [0x35, 0xb7, 0x79],
    [0x6e, 0xce, 0x58],
    [0xb5, 0xde, 0x2b],
    [0xfd, 0xe7, 0x25],
];

const PLASMA: &[[u8; 3]] = &[
    [0x0d, 0x08, 0x87],
    [0x46, 0x03, 0x9f],
    [0x72, 0x01, 0xa8],
    [0x9c, 0x17, 0x9e],
    [0xbd, 0x37, 0x86],
    [0xd8, 0x57, 0x6b],
    [0xed, 0x79, 0x53],
    [0xfb, 0x9f, 0x3a],
    [0xfd, 0xca, 0x26],
    [0xf0, 0xf9, 0x21],
];

const INFERNO: &[[u8; 3]] = &[
    [0x00, 0x00, 0x04],
    [0x1b, 0x0c, 0x41],
    [0x4a, 0x0c, 0x6b],
    [0x78, 0x1c, 0x6d],
    [0xa5, 0x2c, 0x60],
    [0xcf, 0x44, 0x46],
    [0xed, 0x69, 0x25],
    [0xfb, 0x9b, 0x06],
    [0xf7, 0xd1, 0x3d],
    [0xfc, 0xff, 0xa4],
];

const MAGMA: &[[u8; 3]] = &[
    [0x00, 0x00, 0x04],
    [0x18, 0x0f, 0x3d],
    [0x44, 0x0f, 0x76],
    [0x72, 0x1f, 0x81],
    [0x9e, 0x2f, 0x7f],
    [0xcd, 0x40, 0x71],
    [0xf1, 0x60, 0x5d],
    [0xfd, 0x96, 0x68],
    [0xfe, 0xca, 0x8d],
    [0xfc, 0xfd, 0xbf],
];

const CIVIDIS: &[[u8; 3]] = &[
    [0x00, 0x22, 0x4e],
    [0x12, 0x35, 0x70],
    [0x3b, 0x49, 0x6c],
    [0x57, 0x5d, 0x6d],
    [0x70, 0x71, 0x73],
    [0x8a, 0x87, 0x79],
    [0xa6, 0x9d, 0x75],
    [0xc4, 0xb5, 0x6c],
    [0xe4, 0xcf, 0x5b],
    [0xfe, 0xe8, 0x38],
];

const COOLWARM: &[[u8; 3]] = &[
    [0x3b, 0x4c, 0xc0],
    [0x67, 0x88, 0xee],
    [0x9a, 0xbb, 0xff],
    [0xc9, 0xd7, 0xf0],
    [0xed, 0xd1, 0xc2],
    [0xf7, 0xa8, 0x89],
    [0xe2, 0x69, 0x52],
    [0xb4, 0x04, 0x26],
];

const RDBU: &[[u8; 3]] = &[
    [0x67, 0x00, 0x1f],
    [0xb2, 0x18, 0x2b],
    [0xd6, 0x60, 0x4d],
    [0xf4, 0xa5, 0x82],
    [0xfd, 0xdb, 0xc7],
    [0xf7, 0xf7, 0xf7],
    [0xd1, 0xe5, 0xf0],
    [0x92, 0xc5, 0xde],
    [0x43, 0x93, 0xc3],
    [0x21, 0x66, 0xac],
    [0x05, 0x30, 0x61],
];

const GREYS: &[[u8; 3]] = &[[0xff, 0xff, 0xff], [0x00, 0x00, 0x00]];

/// A named colour ramp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Palette {
    #[default]
    Viridis,
    Plasma,
    Inferno,
    Magma,
    Cividis,
    Coolwarm,
    RdBu,
    Greys,
}

impl Palette {
    pub const ALL: [Palette; 8] = [
        Palette::Viridis,
        Palette::Plasma,
        Palette::Inferno,
        Palette::Magma,
        Palette::Cividis,
        Palette::Coolwarm,
        Palette::RdBu,
        Palette::Greys,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Palette::Viridis => "viridis",
            Palette::Plasma => "plasma",
            Palette::Inferno => "inferno",
            Palette::Magma => "magma",
            Palette::Cividis => "cividis",
            Palette::Coolwarm => "coolwarm",
            Palette::RdBu => "rdbu",
            Palette::Greys => "greys",
        }
    }

    fn stops(&self) -> &'static [[u8; 3]] {
        match self {
            Palette::Viridis => VIRIDIS,
            Palette::Plasma => PLASMA,
            Palette::Inferno => INFERNO,
            Palette::Magma => MAGMA,
            Palette::Cividis => CIVIDIS,
            Palette::Coolwarm => COOLWARM,
            Palette::RdBu => RDBU,
            Palette::Greys => GREYS,
        }
    }
}

/// A palette, optionally reversed (`<name>_r`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Colormap {
    pub palette: Palette,
    pub reversed: bool,
}

impl Colormap {
    pub fn try_parse(name: &str) -> Option<Self> {
        let name = name.trim().to_ascii_lowercase();
        let (base, reversed) = match name.strip_suffix("_r") {
            Some(base) => (base, true),
            None => (name.as_str(), false),
        };
        let base = if base == "gray" || base == "grays" { "greys" } else { base };
        let palette = Palette::ALL.into_iter().find(|p| p.name() == base)?;
        Some(Self { palette, reversed })
    }

    /// Unknown names fall back to viridis.
    pub fn parse(name: &str) -> Self {
        Self::try_parse(name).unwrap_or_else(|| {
            log::warn!("unknown colormap {name:?}, using viridis");
            Self::default()
        })
    }

    /// Colour at `t` in `0..=1`, linearly interpolated between stops.
    pub fn color(&self, t: f64) -> [u8; 3] {
        let stops = self.palette.stops();
        let t = if t.is_nan() { 0.0 } else { t.clamp(0.0, 1.0) };
        let t = if self.reversed { 1.0 - t } else { t };
        let pos = t * (stops.len() - 1) as f64;
        let i = (pos.floor() as usize).min(stops.len() - 2);
        let frac = pos - i as f64;
        let (a, b) = (stops[i], stops[i + 1]);
        std::array::from_fn(|c| (a[c] as f64 + (b[c] as f64 - a[c] as f64) * frac).round() as u8)
    }
}

impl fmt::Display for Colormap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.palette.name())?;
        if self.reversed {
            f.write_str("_r")?;
        }
        Ok(())
    }
}

impl Serialize for Colormap {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Colormap {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(Self::parse(&name))
    }
}

/// RGBA8 pixels for `values`; invalid values are fully transparent.
pub fn colorize(
    values: &[f32],
    range: ColorRange,
    fill_value: Option<f64>,
    colormap: Colormap,
) -> Vec<u8> {
    let mut pixels = vec![0u8; values.len() * 4];
    for (px, v) in pixels.chunks_exact_mut(4).zip(values) {
        let v = *v as f64;
        if !is_valid_value(v, fill_value) {
            continue;
        }
        let [r, g, b] = colormap.color(range.normalize(v));
        px.copy_from_slice(&[r, g, b, 255]);
    }
    pixels
}

/// A pending render of one panel's raster, tagged with the generation
/// it was issued for.
#[derive(Debug, Clone)]
pub struct BitmapJob {
    pub panel: PanelId,
    pub generation: u64,
    pub width: usize,
    pub height: usize,
    pub values: Vec<f32>,
    pub range: ColorRange,
    pub fill_value: Option<f64>,
    pub colormap: Colormap,
}

impl BitmapJob {
    pub fn render(self) -> Bitmap {
        let rgba = colorize(&self.values, self.range, self.fill_value, self.colormap);
        Bitmap {
            panel: self.panel,
            generation: self.generation,
            width: self.width,
            height: self.height,
            rgba,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Bitmap {
    pub panel: PanelId,
    pub generation: u64,
    pub width: usize,
    pub height: usize,
    pub rgba: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_range(r: ColorRange, vmin: f64, vmax: f64) {
        assert!((r.vmin - vmin).abs() < 1e-12, "{r:?}");
        assert!((r.vmax - vmax).abs() < 1e-12, "{r:?}");
    }

    #[test]
    fn constant_values_widen() {
        assert_range(ColorRange::estimate([1.0, 1.0, 1.0], None), 0.9, 1.1);
        assert_range(ColorRange::estimate([0.0, 0.0], None), -1.0, 1.0);
        assert_range(ColorRange::estimate([-5.0], None), -5.5, -4.5);
    }

    #[test]
    fn nothing_valid() {
        assert_eq!(ColorRange::estimate([], None), ColorRange::default());
        let junk = [f64::NAN, f64::INFINITY, 2e10, -9999.0];
        assert_eq!(ColorRange::estimate(junk, Some(-9999.0)), ColorRange::new(0.0, 1.0));
    }

    #[test]
    fn percentile_indices() {
        // floor(3 * 0.05) = 0, floor(3 * 0.95) = 2
        assert_range(ColorRange::estimate([5.0, -5.0, 0.0], None), -5.0, 5.0);
        let values: Vec<f64> = (0..100).map(f64::from).collect();
        assert_range(ColorRange::estimate(values, None), 5.0, 95.0);
    }

    #[test]
    fn fill_tolerance() {
        // float32 storage of a float64 fill value
        let fill = 9.969_209_968_386_869e36;
        let stored = fill as f32 as f64;
        assert!(!is_valid_value(stored, Some(fill)));
        assert!(is_valid_value(1.0, Some(fill)));
        assert!(is_valid_value(-9999.5, Some(-9999.0)));
        assert!(!is_valid_value(-9999.0, Some(-9999.0)));
    }

    #[test]
    fn colormap_names() {
        assert_eq!(Colormap::parse("Plasma").palette, Palette::Plasma);
        let r = Colormap::parse("rdbu_r");
        assert!(r.reversed);
        assert_eq!(r.to_string(), "rdbu_r");
        assert_eq!(Colormap::parse("jet"), Colormap::default());
        let parsed: Colormap = serde_json::from_str("\"magma_r\"").unwrap();
        assert_eq!(serde_json::to_string(&parsed).unwrap(), "\"magma_r\"");
    }

    #[test]
    fn colormap_ends() {
        let greys = Colormap::parse("greys");
        assert_eq!(greys.color(0.0), [255, 255, 255]);
        assert_eq!(greys.color(1.0), [0, 0, 0]);
        assert_eq!(greys.color(0.5), [128, 128, 128]);
        assert_eq!(Colormap::parse("greys_r").color(0.0), [0, 0, 0]);
        assert_eq!(Colormap::default().color(2.0), [0xfd, 0xe7, 0x25]);
    }

    #[test]
    fn transparent_invalid_pixels() {
        let px = colorize(
            &[0.0, f32::NAN, 1.0, -1.0],
            ColorRange::new(0.0, 1.0),
            Some(-1.0),
            Colormap::parse("greys"),
        );
        assert_eq!(
            px,
            vec![255, 255, 255, 255, 0, 0, 0, 0, 0, 0, 0, 255, 0, 0, 0, 0]
        );
    }
}
