//! Line charts rendered to PNG.
//!
//! Rendering needs the `plotters` feature, on by default. Without it
//! [`render_line_chart`] warns once, draws nothing and returns `Ok(false)`,
//! and notifications go out without an attachment.

use std::path::Path;

use crate::notify::NotifyResult;

/// One named line on a chart.
#[derive(Debug, Clone, PartialEq)]
pub struct ChartSeries {
    pub label: String,
    pub points: Vec<(f64, f64)>,
}

impl ChartSeries {
    pub fn new(label: impl Into<String>, points: Vec<(f64, f64)>) -> Self {
        Self {
            label: label.into(),
            points,
        }
    }
}

/// Axis labels and title for a chart.
#[derive(Debug, Clone, PartialEq)]
pub struct ChartSpec<'a> {
    pub title: &'a str,
    pub x_label: &'a str,
    pub y_label: &'a str,
}

/// Bounds covering every point, padded so flat lines stay visible.
pub fn chart_bounds(series: &[ChartSeries]) -> Option<((f64, f64), (f64, f64))> {
    let mut points = series.iter().flat_map(|s| s.points.iter()).filter(|(x, y)| x.is_finite() && y.is_finite());
    let &(x0, y0) = points.next()?;
    let (mut x_min, mut x_max, mut y_min, mut y_max) = (x0, x0, y0, y0);
    for &(x, y) in points {
        x_min = x_min.min(x);
        x_max = x_max.max(x);
        y_min = y_min.min(y);
        y_max = y_max.max(y);
    }
    if x_max <= x_min {
        x_max = x_min + 1.0;
    }
    let pad = ((y_max - y_min) * 0.05).max(1e-3);
    Some(((x_min, x_max), (y_min - pad, y_max + pad)))
}

/// Draw `series` as a line chart at `path`.
///
/// Returns whether a file was written; empty input writes nothing.
#[cfg(feature = "plotters")]
pub fn render_line_chart(path: &Path, spec: &ChartSpec<'_>, series: &[ChartSeries]) -> NotifyResult<bool> {
    use plotters::prelude::*;

    let Some(((x_min, x_max), (y_min, y_max))) = chart_bounds(series) else {
        return Ok(false);
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let draw = || -> Result<(), Box<dyn std::error::Error>> {
        let root = BitMapBackend::new(path, (1000, 500)).into_drawing_area();
        root.fill(&WHITE)?;

        let mut chart = ChartBuilder::on(&root)
            .caption(spec.title, ("sans-serif", 22))
            .margin(10)
            .x_label_area_size(35)
            .y_label_area_size(55)
            .build_cartesian_2d(x_min..x_max, y_min..y_max)?;

        chart
            .configure_mesh()
            .x_desc(spec.x_label)
            .y_desc(spec.y_label)
            .draw()?;

        let palette = [BLUE, RED, GREEN, MAGENTA];
        for (i, s) in series.iter().enumerate() {
            let color = palette[i % palette.len()];
            chart
                .draw_series(LineSeries::new(s.points.iter().copied(), &color))?
                .label(s.label.clone())
                .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color));
        }

        chart
            .configure_series_labels()
            .background_style(WHITE.mix(0.8))
            .border_style(BLACK)
            .draw()?;

        root.present()?;
        Ok(())
    };

    draw().map_err(|e| crate::notify::NotifyError::Chart {
        message: e.to_string(),
    })?;
    tracing::debug!("Saved chart to {}", path.display());
    Ok(true)
}

/// Stub when the `plotters` feature is disabled.
#[cfg(not(feature = "plotters"))]
pub fn render_line_chart(path: &Path, _spec: &ChartSpec<'_>, _series: &[ChartSeries]) -> NotifyResult<bool> {
    static WARNED: std::sync::Once = std::sync::Once::new();
    WARNED.call_once(|| {
        tracing::warn!("Built without the plotters feature; notifications will carry no charts");
    });
    tracing::debug!("Chart {} skipped", path.display());
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds_cover_all_series() {
        let series = vec![
            ChartSeries::new("score", vec![(0.0, 0.1), (2.0, 0.4)]),
            ChartSeries::new("best", vec![(1.0, 0.6)]),
        ];
        let ((x0, x1), (y0, y1)) = chart_bounds(&series).unwrap();
        assert_eq!((x0, x1), (0.0, 2.0));
        assert!(y0 < 0.1 && y1 > 0.6);
    }

    #[test]
    fn single_point_gets_non_degenerate_range() {
        let series = vec![ChartSeries::new("score", vec![(3.0, 0.5)])];
        let ((x0, x1), (y0, y1)) = chart_bounds(&series).unwrap();
        assert!(x1 > x0);
        assert!(y1 > y0);
    }

    #[test]
    fn empty_series_has_no_bounds() {
        assert!(chart_bounds(&[]).is_none());
        assert!(chart_bounds(&[ChartSeries::new("nan", vec![(f64::NAN, 1.0)])]).is_none());
    }

    #[test]
    fn empty_chart_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plot.png");
        let spec = ChartSpec {
            title: "Score",
            x_label: "hours",
            y_label: "score",
        };
        assert!(!render_line_chart(&path, &spec, &[]).unwrap());
        assert!(!path.exists());
    }

    #[cfg(feature = "plotters")]
    #[test]
    fn renders_png_when_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plot.png");
        let spec = ChartSpec {
            title: "Score",
            x_label: "hours",
            y_label: "score",
        };
        let series = vec![ChartSeries::new("score", vec![(0.0, 0.1), (1.0, 0.3)])];
        assert!(render_line_chart(&path, &spec, &series).unwrap());
        assert!(path.exists());
    }
}
