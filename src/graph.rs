use crate::series::{ChartPoint, ChartSeries, ChartType, SeriesData};
use plotters::coord::Shift;
use plotters::prelude::*;
use std::error::Error;
use std::io::Cursor;
use std::ops::Range;

/// Configuration options for chart rendering
#[derive(Clone, Debug)]
pub struct GraphOptions {
    /// Title displayed at the top of the graph
    pub title: String,

    /// Label for the X-axis
    pub x_label: String,

    /// Label for the Y-axis
    pub y_label: String,

    /// Width of the graph in pixels
    pub width: u32,

    /// Height of the graph in pixels
    pub height: u32,
}

impl Default for GraphOptions {
    fn default() -> Self {
        Self {
            title: "Chart".to_string(),
            x_label: "X Axis".to_string(),
            y_label: "Y Axis".to_string(),
            width: 800,
            height: 600,
        }
    }
}

impl GraphOptions {
    /// Options titled and labelled after a series.
    pub fn for_series(series: &ChartSeries, title: &str) -> Self {
        Self {
            title: title.to_string(),
            x_label: series.x_column.clone(),
            y_label: series.y_column.clone(),
            ..Self::default()
        }
    }
}

type GraphResult<T> = Result<T, Box<dyn Error>>;

/// Renders a chart series to PNG bytes
///
/// Bar and bar3d charts draw as bars, line charts as a polyline over the
/// categories, pie charts as wedges, scatter charts as points (scatter3d
/// points are coloured by `z`) and surfaces as a heat map of the grid.
pub fn render_png(series: &ChartSeries, options: &GraphOptions) -> GraphResult<Vec<u8>> {
    let (width, height) = (options.width, options.height);
    let mut pixels = vec![0u8; (width * height * 3) as usize];

    {
        let root = BitMapBackend::with_buffer(&mut pixels, (width, height)).into_drawing_area();
        root.fill(&WHITE)?;

        match (&series.data, series.chart_type) {
            (SeriesData::Categorical { categories, values }, ChartType::Pie) => {
                draw_pie(&root, categories, values, options)?
            }
            (SeriesData::Categorical { categories, values }, ChartType::Line) => {
                draw_line(&root, categories, values, options)?
            }
            (SeriesData::Categorical { categories, values }, _) => {
                draw_bars(&root, categories, values, options)?
            }
            (SeriesData::Points { points }, _) => draw_scatter(&root, points, options)?,
            (SeriesData::Grid { grid, .. }, _) => draw_heatmap(&root, grid, options)?,
        }

        root.present()?;
    }

    let image = image::RgbImage::from_raw(width, height, pixels)
        .ok_or("pixel buffer does not match the image size")?;
    let mut png = Vec::new();
    image::DynamicImage::ImageRgb8(image)
        .write_to(&mut Cursor::new(&mut png), image::ImageOutputFormat::Png)?;
    Ok(png)
}

/// Axis range covering `values` and zero, padded by a tenth.
fn value_range(values: impl Iterator<Item = f64>) -> Range<f64> {
    let (min, max) = values
        .filter(|v| v.is_finite())
        .fold((0.0f64, 0.0f64), |(lo, hi), v| (lo.min(v), hi.max(v)));

    let span = if max > min { max - min } else { 1.0 };
    let pad = span * 0.1;
    let lo = if min < 0.0 { min - pad } else { 0.0 };
    lo..max + pad
}

fn category_label(categories: &[String], x: f64) -> String {
    if x < 0.0 {
        return String::new();
    }
    categories.get(x.floor() as usize).cloned().unwrap_or_default()
}

fn draw_bars(
    root: &DrawingArea<BitMapBackend, Shift>,
    categories: &[String],
    values: &[f64],
    options: &GraphOptions,
) -> GraphResult<()> {
    let n = categories.len().max(1);
    let label = |x: &f64| category_label(categories, *x);

    let mut chart = ChartBuilder::on(root)
        .caption(&options.title, ("sans-serif", 30).into_font())
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(0f64..n as f64, value_range(values.iter().copied()))?;

    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_labels(n)
        .x_label_formatter(&label)
        .x_desc(&options.x_label)
        .y_desc(&options.y_label)
        .draw()?;

    chart.draw_series(values.iter().enumerate().map(|(i, &v)| {
        let x = i as f64;
        Rectangle::new([(x + 0.1, 0.0), (x + 0.9, v)], BLUE.filled())
    }))?;

    Ok(())
}

fn draw_line(
    root: &DrawingArea<BitMapBackend, Shift>,
    categories: &[String],
    values: &[f64],
    options: &GraphOptions,
) -> GraphResult<()> {
    let n = categories.len().max(1);
    let label = |x: &f64| category_label(categories, *x);

    let mut chart = ChartBuilder::on(root)
        .caption(&options.title, ("sans-serif", 30).into_font())
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(0f64..n as f64, value_range(values.iter().copied()))?;

    chart
        .configure_mesh()
        .x_labels(n)
        .x_label_formatter(&label)
        .x_desc(&options.x_label)
        .y_desc(&options.y_label)
        .draw()?;

    let points: Vec<(f64, f64)> = values
        .iter()
        .enumerate()
        .map(|(i, &v)| (i as f64 + 0.5, v))
        .collect();

    chart.draw_series(LineSeries::new(points.iter().copied(), &BLUE))?;
    chart.draw_series(points.iter().map(|&p| Circle::new(p, 3, BLUE.filled())))?;

    Ok(())
}

fn draw_pie(
    root: &DrawingArea<BitMapBackend, Shift>,
    categories: &[String],
    values: &[f64],
    options: &GraphOptions,
) -> GraphResult<()> {
    let root = root.titled(&options.title, ("sans-serif", 30).into_font())?;
    let (w, h) = root.dim_in_pixel();
    let center = ((w / 2) as i32, (h / 2) as i32);
    let radius = (w.min(h) as f64) * 0.35;

    // Negative slices cannot be drawn.
    let total: f64 = values.iter().filter(|v| **v > 0.0).sum();
    if total <= 0.0 {
        return Ok(());
    }

    let mut start = -std::f64::consts::FRAC_PI_2;
    for (i, (category, &value)) in categories.iter().zip(values).enumerate() {
        if value <= 0.0 {
            continue;
        }
        let sweep = value / total * std::f64::consts::TAU;
        let steps = ((sweep / 0.05).ceil() as usize).max(2);

        let mut wedge = vec![center];
        wedge.extend((0..=steps).map(|s| {
            let angle = start + sweep * s as f64 / steps as f64;
            polar(center, radius, angle)
        }));
        root.draw(&Polygon::new(wedge, Palette99::pick(i).filled()))?;

        let middle = start + sweep / 2.0;
        let label = format!("{} ({:.1}%)", category, value / total * 100.0);
        root.draw(&Text::new(
            label,
            polar(center, radius * 1.15, middle),
            ("sans-serif", 14).into_font(),
        ))?;

        start += sweep;
    }

    Ok(())
}

fn polar(center: (i32, i32), radius: f64, angle: f64) -> (i32, i32) {
    (
        center.0 + (radius * angle.cos()).round() as i32,
        center.1 + (radius * angle.sin()).round() as i32,
    )
}

fn draw_scatter(
    root: &DrawingArea<BitMapBackend, Shift>,
    points: &[ChartPoint],
    options: &GraphOptions,
) -> GraphResult<()> {
    let x_range = value_range(points.iter().map(|p| p.x));
    let y_range = value_range(points.iter().map(|p| p.y));

    let z_values: Vec<f64> = points.iter().filter_map(|p| p.z).collect();
    let z_lo = z_values.iter().copied().fold(f64::INFINITY, f64::min);
    let z_hi = z_values.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    let mut chart = ChartBuilder::on(root)
        .caption(&options.title, ("sans-serif", 30).into_font())
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(x_range, y_range)?;

    chart
        .configure_mesh()
        .x_desc(&options.x_label)
        .y_desc(&options.y_label)
        .draw()?;

    chart.draw_series(points.iter().map(|p| {
        let color = match p.z {
            Some(z) => heat_color(z, z_lo, z_hi),
            None => BLUE.to_rgba(),
        };
        Circle::new((p.x, p.y), 4, color.filled())
    }))?;

    Ok(())
}

fn draw_heatmap(
    root: &DrawingArea<BitMapBackend, Shift>,
    grid: &[Vec<f64>],
    options: &GraphOptions,
) -> GraphResult<()> {
    let n = grid.len().max(1) as f64;
    let lo = grid.iter().flatten().copied().fold(f64::INFINITY, f64::min);
    let hi = grid.iter().flatten().copied().fold(f64::NEG_INFINITY, f64::max);

    let mut chart = ChartBuilder::on(root)
        .caption(&options.title, ("sans-serif", 30).into_font())
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(0f64..n, 0f64..n)?;

    chart
        .configure_mesh()
        .disable_mesh()
        .x_desc("column")
        .y_desc("row")
        .draw()?;

    chart.draw_series(grid.iter().enumerate().flat_map(|(r, line)| {
        line.iter().enumerate().map(move |(c, &v)| {
            let (x, y) = (c as f64, r as f64);
            Rectangle::new([(x, y), (x + 1.0, y + 1.0)], heat_color(v, lo, hi).filled())
        })
    }))?;

    Ok(())
}

/// Blue for the low end of `lo..=hi`, red for the high end.
fn heat_color(value: f64, lo: f64, hi: f64) -> RGBAColor {
    let t = if hi > lo { (value - lo) / (hi - lo) } else { 0.5 };
    HSLColor(0.66 * (1.0 - t.clamp(0.0, 1.0)), 0.8, 0.5).to_rgba()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranges_include_zero_and_pad() {
        let r = value_range([10.0, 40.0].into_iter());
        assert_eq!(r.start, 0.0);
        assert!((r.end - 44.0).abs() < 1e-9);

        let r = value_range([-5.0, 5.0].into_iter());
        assert!((r.start - -6.0).abs() < 1e-9);
    }

    #[test]
    fn empty_values_still_give_a_range() {
        let r = value_range(std::iter::empty());
        assert!(r.end > r.start);
    }

    #[test]
    fn category_labels_follow_bar_slots() {
        let categories = vec!["North".to_string(), "South".to_string()];
        assert_eq!(category_label(&categories, 0.5), "North");
        assert_eq!(category_label(&categories, 1.0), "South");
        assert_eq!(category_label(&categories, 2.0), "");
    }

    #[test]
    fn pie_geometry_starts_at_twelve_o_clock() {
        let top = polar((100, 100), 50.0, -std::f64::consts::FRAC_PI_2);
        assert_eq!(top, (100, 50));
    }
}
