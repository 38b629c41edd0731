use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use ts_core::{format_number, Series};

const BILLION: f64 = 1e9;
const MILLION: f64 = 1e6;
const THOUSAND: f64 = 1e3;

/// Abbreviates large magnitudes with a B/M/K suffix, keeping at most two
/// decimals. Non-finite input is rendered literally.
pub fn compact_magnitude(n: f64) -> String {
    if !n.is_finite() {
        return format_number(n);
    }
    let abs = n.abs();
    if abs >= BILLION {
        format!("{}B", two_decimals(n / BILLION))
    } else if abs >= MILLION {
        format!("{}M", two_decimals(n / MILLION))
    } else if abs >= THOUSAND {
        format!("{}K", two_decimals(n / THOUSAND))
    } else {
        format_number(n)
    }
}

fn two_decimals(v: f64) -> String {
    let s = format!("{v:.2}");
    s.trim_end_matches('0').trim_end_matches('.').to_string()
}

/// Axis tick label.
pub fn axis_tick(v: f64) -> String {
    compact_magnitude(v)
}

/// Full value with thousands separators and up to three decimals,
/// e.g. `1234567.891` -> `1,234,567.891`.
pub fn format_grouped(v: f64) -> String {
    if !v.is_finite() {
        return format_number(v);
    }
    let fixed = format!("{:.3}", v.abs());
    let (int_part, frac_part) = fixed.split_once('.').unwrap_or((fixed.as_str(), ""));
    let frac_part = frac_part.trim_end_matches('0');

    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, ch) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    let negative = v < 0.0 && (int_part != "0" || !frac_part.is_empty());
    let mut out = String::new();
    if negative {
        out.push('-');
    }
    out.push_str(&grouped);
    if !frac_part.is_empty() {
        out.push('.');
        out.push_str(frac_part);
    }
    out
}

/// A visible chart point with its change from the previous visible point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DerivedPoint {
    pub year: String,
    pub value: f64,
    pub percent_change: Option<f64>,
}

/// Drops absent (zero) points, then computes the percent change of each
/// point against the one before it. The first point, and any point whose
/// predecessor cannot be divided by, carry no change.
pub fn derive_change(series: &Series) -> Vec<DerivedPoint> {
    let visible = series.without_absent();
    let mut out: Vec<DerivedPoint> = Vec::with_capacity(visible.len());
    let mut prev: Option<f64> = None;
    for point in visible.iter() {
        let percent_change = prev.and_then(|p| percent_change(p, point.value));
        out.push(DerivedPoint {
            year: point.year.clone(),
            value: point.value,
            percent_change,
        });
        prev = Some(point.value);
    }
    out
}

fn percent_change(prev: f64, current: f64) -> Option<f64> {
    if prev == 0.0 {
        return None;
    }
    let change = (current - prev) / prev * 100.0;
    change.is_finite().then_some(change)
}

#[derive(Debug, Error)]
#[error("unknown chart mode: {0}")]
pub struct UnknownChartMode(String);

/// How the same derived points are drawn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartMode {
    /// Filled trend with a glow overlay.
    #[default]
    Area,
    /// Bars with an overlaid trend line.
    Composed,
}

impl ChartMode {
    pub const ALL: [ChartMode; 2] = [ChartMode::Area, ChartMode::Composed];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChartMode::Area => "area",
            ChartMode::Composed => "composed",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ChartMode::Area => "Area",
            ChartMode::Composed => "Composed",
        }
    }

    pub fn layers(&self) -> &'static [Layer] {
        match self {
            ChartMode::Area => &[Layer::Area, Layer::GlowLine],
            ChartMode::Composed => &[Layer::Bars, Layer::TrendLine],
        }
    }
}

impl fmt::Display for ChartMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChartMode {
    type Err = UnknownChartMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match ts_core::normalize(s).as_str() {
            "area" => Ok(ChartMode::Area),
            "composed" => Ok(ChartMode::Composed),
            _ => Err(UnknownChartMode(s.to_string())),
        }
    }
}

/// Drawing primitives a renderer stacks, bottom to top.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Layer {
    Area,
    GlowLine,
    Bars,
    TrendLine,
}

/// Everything a renderer needs for one frame. Built from a held series, so a
/// mode switch only rebuilds this and never re-queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartModel {
    pub mode: ChartMode,
    pub layers: Vec<Layer>,
    pub points: Vec<DerivedPoint>,
}

impl ChartModel {
    pub fn new(mode: ChartMode, series: &Series) -> Self {
        Self::from_points(mode, derive_change(series))
    }

    pub fn from_points(mode: ChartMode, points: Vec<DerivedPoint>) -> Self {
        Self {
            mode,
            layers: mode.layers().to_vec(),
            points,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn y_ticks(&self) -> Vec<String> {
        self.points.iter().map(|p| axis_tick(p.value)).collect()
    }

    pub fn tooltip(&self, year: &str) -> Option<Tooltip> {
        tooltip(&self.points, year)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ChangeBadge {
    Up(f64),
    Down(f64),
    NoChange,
}

impl ChangeBadge {
    pub fn from_change(change: Option<f64>) -> Self {
        match change {
            Some(c) if c >= 0.0 => ChangeBadge::Up(c),
            Some(c) => ChangeBadge::Down(c),
            None => ChangeBadge::NoChange,
        }
    }

    pub fn label(&self) -> String {
        match self {
            ChangeBadge::Up(c) => format!("▲ {:.2}%", c.abs()),
            ChangeBadge::Down(c) => format!("▼ {:.2}%", c.abs()),
            ChangeBadge::NoChange => "No change".to_string(),
        }
    }

    /// Style hook for the renderer.
    pub fn tone(&self) -> &'static str {
        match self {
            ChangeBadge::Up(_) => "positive",
            ChangeBadge::Down(_) => "negative",
            ChangeBadge::NoChange => "neutral",
        }
    }
}

/// Hover content for one year.
#[derive(Debug, Clone, PartialEq)]
pub struct Tooltip {
    pub year: String,
    pub value: String,
    pub change: ChangeBadge,
}

pub fn tooltip(points: &[DerivedPoint], year: &str) -> Option<Tooltip> {
    let point = points.iter().find(|p| p.year == year)?;
    Some(Tooltip {
        year: point.year.clone(),
        value: format_grouped(point.value),
        change: ChangeBadge::from_change(point.percent_change),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ts_core::SeriesPoint;

    fn series(points: &[(&str, f64)]) -> Series {
        Series::from_points(
            points
                .iter()
                .map(|(y, v)| SeriesPoint::new(*y, *v))
                .collect(),
        )
    }

    #[test]
    fn compact_magnitude_thresholds() {
        assert_eq!(compact_magnitude(1_500_000.0), "1.5M");
        assert_eq!(compact_magnitude(999.0), "999");
        assert_eq!(compact_magnitude(1_000.0), "1K");
        assert_eq!(compact_magnitude(2_346.0), "2.35K");
        assert_eq!(compact_magnitude(3_000_000_000.0), "3B");
        assert_eq!(compact_magnitude(-2_500_000.0), "-2.5M");
        assert_eq!(compact_magnitude(12.5), "12.5");
    }

    #[test]
    fn compact_magnitude_picks_suffix_before_rounding() {
        // The tier comes from the raw magnitude, so rounding never promotes.
        assert_eq!(compact_magnitude(999_999.0), "1000K");
        assert_eq!(compact_magnitude(999_999_999.0), "1000M");
        assert_eq!(compact_magnitude(999.999), "999.999");
    }

    #[test]
    fn compact_magnitude_is_total() {
        assert_eq!(compact_magnitude(f64::NAN), "NaN");
        assert_eq!(compact_magnitude(f64::INFINITY), "Infinity");
        assert_eq!(compact_magnitude(f64::NEG_INFINITY), "-Infinity");
    }

    #[test]
    fn change_is_computed_over_visible_points() {
        let derived = derive_change(&series(&[
            ("2020", 100.0),
            ("2021", 150.0),
            ("2022", 0.0),
            ("2023", 200.0),
        ]));
        let years: Vec<&str> = derived.iter().map(|p| p.year.as_str()).collect();
        assert_eq!(years, ["2020", "2021", "2023"]);
        assert_eq!(derived[0].percent_change, None);
        assert_eq!(derived[1].percent_change, Some(50.0));
        let third = derived[2].percent_change.unwrap();
        assert!((third - 33.33).abs() < 0.01);
    }

    #[test]
    fn change_is_never_nan_or_infinite() {
        let derived = derive_change(&series(&[
            ("2019", f64::NAN),
            ("2020", 10.0),
            ("2021", -10.0),
        ]));
        assert_eq!(derived.len(), 3);
        assert_eq!(derived[0].percent_change, None);
        assert_eq!(derived[1].percent_change, None);
        assert_eq!(derived[2].percent_change, Some(-200.0));
    }

    #[test]
    fn empty_and_all_zero_series_derive_nothing() {
        assert!(derive_change(&Series::default()).is_empty());
        assert!(derive_change(&series(&[("2020", 0.0), ("2021", 0.0)])).is_empty());
    }

    #[test]
    fn derived_points_use_camel_case_on_the_wire() {
        let derived = derive_change(&series(&[("2020", 1.0)]));
        let json = serde_json::to_string(&derived).unwrap();
        assert_eq!(json, r#"[{"year":"2020","value":1.0,"percentChange":null}]"#);
    }

    #[test]
    fn chart_mode_parses_and_picks_layers() {
        assert_eq!("Area".parse::<ChartMode>().unwrap(), ChartMode::Area);
        assert_eq!(" composed".parse::<ChartMode>().unwrap(), ChartMode::Composed);
        assert!("pie".parse::<ChartMode>().is_err());
        assert_eq!(ChartMode::Area.layers(), &[Layer::Area, Layer::GlowLine]);
        assert_eq!(ChartMode::Composed.layers(), &[Layer::Bars, Layer::TrendLine]);
    }

    #[test]
    fn both_modes_share_the_same_points() {
        let s = series(&[("2020", 1_000.0), ("2021", 2_000.0)]);
        let area = ChartModel::new(ChartMode::Area, &s);
        let composed = ChartModel::new(ChartMode::Composed, &s);
        assert_eq!(area.points, composed.points);
        assert_ne!(area.layers, composed.layers);
        assert_eq!(area.y_ticks(), ["1K", "2K"]);
    }

    #[test]
    fn tooltip_shows_value_and_signed_change() {
        let s = series(&[("2020", 1_250_000.0), ("2021", 1_000_000.0), ("2022", 1_500_000.0)]);
        let model = ChartModel::new(ChartMode::Area, &s);

        let first = model.tooltip("2020").unwrap();
        assert_eq!(first.value, "1,250,000");
        assert_eq!(first.change.label(), "No change");
        assert_eq!(first.change.tone(), "neutral");

        let down = model.tooltip("2021").unwrap();
        assert_eq!(down.change.label(), "▼ 20.00%");
        assert_eq!(down.change.tone(), "negative");

        let up = model.tooltip("2022").unwrap();
        assert_eq!(up.change.label(), "▲ 50.00%");

        assert!(model.tooltip("1999").is_none());
    }

    #[test]
    fn grouped_formatting() {
        assert_eq!(format_grouped(0.0), "0");
        assert_eq!(format_grouped(999.0), "999");
        assert_eq!(format_grouped(1234.5), "1,234.5");
        assert_eq!(format_grouped(-1234567.891), "-1,234,567.891");
        assert_eq!(format_grouped(0.12345), "0.123");
    }
}
