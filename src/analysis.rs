//! Descriptive statistics and templated narrative for a built series.
//!
//! Everything here is plain arithmetic over the series values: totals, means,
//! extremes, coefficient of variation, half-over-half change with a
//! least-squares slope for line charts, category shares for pie charts and
//! Pearson correlation for scatter charts.

use crate::cell::format_number;
use crate::series::{ChartRequest, ChartSeries, ChartType, SeriesData};
use serde::{Deserialize, Serialize};

/// Below this share of numerically usable source rows a data-quality note is added.
pub const DATA_QUALITY_THRESHOLD: f64 = 0.8;

/// How much weight a report can bear.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

/// Narrative report for one chart.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisReport {
    pub summary: String,
    pub insights: Vec<String>,
    pub recommendations: Vec<String>,
    pub key_findings: Vec<String>,
    pub confidence: Confidence,
}

/// Aggregate statistics over a value sequence.
#[derive(Clone, Debug, PartialEq)]
pub struct Summary {
    pub count: usize,
    pub total: f64,
    pub mean: f64,
    pub max: f64,
    pub max_label: String,
    pub min: f64,
    pub min_label: String,
    pub range: f64,
    /// Population standard deviation.
    pub std_dev: f64,
}

impl Summary {
    /// Returns `None` for an empty sequence.
    pub fn of(labels: &[String], values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }

        let count = values.len();
        let total: f64 = values.iter().sum();
        let mean = total / count as f64;

        let mut max_i = 0;
        let mut min_i = 0;
        for (i, v) in values.iter().enumerate() {
            if *v > values[max_i] {
                max_i = i;
            }
            if *v < values[min_i] {
                min_i = i;
            }
        }

        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / count as f64;
        let label = |i: usize| labels.get(i).cloned().unwrap_or_default();

        Some(Summary {
            count,
            total,
            mean,
            max: values[max_i],
            max_label: label(max_i),
            min: values[min_i],
            min_label: label(min_i),
            range: values[max_i] - values[min_i],
            std_dev: variance.sqrt(),
        })
    }

    /// Coefficient of variation as a percentage, `None` when the mean is zero.
    pub fn volatility(&self) -> Option<f64> {
        if self.mean == 0.0 {
            None
        } else {
            Some(self.std_dev / self.mean.abs() * 100.0)
        }
    }
}

/// Pearson correlation coefficient, `None` with fewer than two points or when
/// either axis is constant.
pub fn pearson(xs: &[f64], ys: &[f64]) -> Option<f64> {
    let n = xs.len().min(ys.len());
    if n < 2 {
        return None;
    }

    let mean_x = xs[..n].iter().sum::<f64>() / n as f64;
    let mean_y = ys[..n].iter().sum::<f64>() / n as f64;

    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (x, y) in xs[..n].iter().zip(&ys[..n]) {
        let dx = x - mean_x;
        let dy = y - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }

    let denom = (var_x * var_y).sqrt();
    if denom == 0.0 { None } else { Some(cov / denom) }
}

/// Least-squares slope of `values` against their index.
pub fn linear_trend(values: &[f64]) -> Option<f64> {
    let xs: Vec<f64> = (0..values.len()).map(|i| i as f64).collect();
    let n = values.len();
    if n < 2 {
        return None;
    }
    let mean_x = xs.iter().sum::<f64>() / n as f64;
    let mean_y = values.iter().sum::<f64>() / n as f64;
    let num: f64 = xs
        .iter()
        .zip(values)
        .map(|(x, y)| (x - mean_x) * (y - mean_y))
        .sum();
    let den: f64 = xs.iter().map(|x| (x - mean_x).powi(2)).sum();
    Some(num / den)
}

/// Each category's percentage of the total, or `None` when the total is zero.
pub fn shares(series: &ChartSeries) -> Option<Vec<(String, f64)>> {
    let SeriesData::Categorical { categories, values } = &series.data else {
        return None;
    };
    let total: f64 = values.iter().sum();
    if total == 0.0 {
        return None;
    }
    Some(
        categories
            .iter()
            .zip(values)
            .map(|(c, v)| (c.clone(), v / total * 100.0))
            .collect(),
    )
}

fn pct(v: f64) -> String {
    format!("{:.1}%", v)
}

fn num(v: f64) -> String {
    if v.fract() == 0.0 {
        format_number(v)
    } else {
        format!("{:.2}", v)
    }
}

/// Builds the narrative report for `series`.
///
/// Never fails: without numeric values the fixed insufficient-data report is
/// returned instead.
pub fn analyze(series: &ChartSeries, request: &ChartRequest) -> AnalysisReport {
    let (labels, values) = labelled_values(series);

    let summary = match Summary::of(&labels, &values) {
        Some(s) if series.coverage.numeric_rows > 0 => s,
        _ => return with_quality_note(insufficient_data(request), series, request),
    };

    let mut report = match series.chart_type {
        ChartType::Bar | ChartType::Bar3d => categorical_report(&summary, &values, &labels, request),
        ChartType::Line => line_report(&summary, &values, request),
        ChartType::Pie => pie_report(&summary, series, request),
        ChartType::Scatter | ChartType::Scatter3d => scatter_report(&summary, series, request),
        ChartType::Surface3d => surface_report(&summary, series, request),
    };

    report.key_findings.push(format!("Total {}: {}", request.y_column, num(summary.total)));
    report.key_findings.push(format!("Range: {}", num(summary.range)));
    if let Some(cv) = summary.volatility() {
        report
            .key_findings
            .push(format!("Volatility (coefficient of variation): {}", pct(cv)));
    }

    with_quality_note(report, series, request)
}

fn labelled_values(series: &ChartSeries) -> (Vec<String>, Vec<f64>) {
    match &series.data {
        SeriesData::Categorical { categories, values } => (categories.clone(), values.clone()),
        SeriesData::Points { points } => points.iter().map(|p| (p.label.clone(), p.y)).unzip(),
        // Padding cells past the data are not elevations.
        SeriesData::Grid { grid, .. } => grid
            .iter()
            .enumerate()
            .flat_map(|(r, row)| {
                row.iter()
                    .enumerate()
                    .map(move |(c, v)| (format!("row {}, column {}", r + 1, c + 1), *v))
            })
            .take(series.coverage.eligible_rows)
            .unzip(),
    }
}

fn title(request: &ChartRequest) -> String {
    request
        .title
        .clone()
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| format!("{} by {}", request.y_column, request.x_column))
}

fn with_quality_note(
    mut report: AnalysisReport,
    series: &ChartSeries,
    request: &ChartRequest,
) -> AnalysisReport {
    let coverage = series.coverage;
    if coverage.source_rows > 0 && coverage.numeric_ratio() < DATA_QUALITY_THRESHOLD {
        report.insights.push(format!(
            "Data quality: only {} of {} rows ({}) had usable numeric values for {}.",
            coverage.numeric_rows,
            coverage.source_rows,
            pct(coverage.numeric_ratio() * 100.0),
            request.y_column
        ));
        if report.confidence == Confidence::High {
            report.confidence = Confidence::Medium;
        }
    }
    report
}

/// The canned report for series without numeric values.
pub fn insufficient_data(request: &ChartRequest) -> AnalysisReport {
    AnalysisReport {
        summary: format!(
            "{}: there is not enough numeric data to analyze {} by {}.",
            title(request),
            request.y_column,
            request.x_column
        ),
        insights: vec!["No eligible rows contained numeric values for the selected columns.".to_string()],
        recommendations: vec![
            format!("Pick a numeric column for the Y axis instead of {}.", request.y_column),
            "Check that the selected columns are filled in for most rows.".to_string(),
        ],
        key_findings: vec!["Insufficient data".to_string()],
        confidence: Confidence::Low,
    }
}

fn categorical_report(
    s: &Summary,
    values: &[f64],
    labels: &[String],
    request: &ChartRequest,
) -> AnalysisReport {
    let dominant: Vec<&str> = labels
        .iter()
        .zip(values)
        .filter(|(_, v)| **v > 2.0 * s.mean)
        .map(|(l, _)| l.as_str())
        .collect();
    let underperforming: Vec<&str> = labels
        .iter()
        .zip(values)
        .filter(|(_, v)| **v < 0.5 * s.mean)
        .map(|(l, _)| l.as_str())
        .collect();
    let above = values.iter().filter(|v| **v > s.mean).count();
    let above_pct = above as f64 / s.count as f64 * 100.0;

    let mut insights = vec![
        format!("Highest: {} with {}.", s.max_label, num(s.max)),
        format!("Lowest: {} with {}.", s.min_label, num(s.min)),
        format!(
            "{} of {} categories ({}) are above the average of {}.",
            above,
            s.count,
            pct(above_pct),
            num(s.mean)
        ),
    ];
    for label in &dominant {
        insights.push(format!("{} dominates at more than twice the average.", label));
    }
    for label in &underperforming {
        insights.push(format!("{} underperforms at less than half the average.", label));
    }

    let mut recommendations = Vec::new();
    if !dominant.is_empty() {
        recommendations.push(format!(
            "Find out what drives {} and whether it carries over to other categories.",
            dominant.join(", ")
        ));
    }
    if !underperforming.is_empty() {
        recommendations.push(format!("Review the weakest categories: {}.", underperforming.join(", ")));
    }
    if recommendations.is_empty() {
        recommendations.push("Values are evenly spread; keep monitoring for emerging outliers.".to_string());
    }

    AnalysisReport {
        summary: format!(
            "{}: {} categories with a total of {} and an average of {} per category.",
            title(request),
            s.count,
            num(s.total),
            num(s.mean)
        ),
        insights,
        recommendations,
        key_findings: vec![
            format!("Top category: {}", s.max_label),
            format!("Dominant categories: {}", dominant.len()),
            format!("Underperforming categories: {}", underperforming.len()),
        ],
        confidence: Confidence::High,
    }
}

/// Half-over-half comparison of a sequence.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Momentum {
    pub first_half_mean: f64,
    pub second_half_mean: f64,
    /// Percent change relative to the first half's magnitude.
    pub percent_change: f64,
}

impl Momentum {
    /// Splits at the midpoint; `None` with fewer than two values.
    pub fn of(values: &[f64]) -> Option<Self> {
        if values.len() < 2 {
            return None;
        }
        let (first, second) = values.split_at(values.len() / 2);
        let mean = |xs: &[f64]| xs.iter().sum::<f64>() / xs.len() as f64;
        let first_half_mean = mean(first);
        let second_half_mean = mean(second);
        let percent_change = if first_half_mean == 0.0 {
            0.0
        } else {
            (second_half_mean - first_half_mean) / first_half_mean.abs() * 100.0
        };
        Some(Momentum {
            first_half_mean,
            second_half_mean,
            percent_change,
        })
    }

    pub fn is_upward(&self) -> bool {
        self.second_half_mean > self.first_half_mean
    }

    pub fn is_strong(&self) -> bool {
        self.percent_change.abs() > 20.0
    }
}

fn line_report(s: &Summary, values: &[f64], request: &ChartRequest) -> AnalysisReport {
    let mut insights = vec![
        format!("Peak: {} at {}.", num(s.max), s.max_label),
        format!("Low point: {} at {}.", num(s.min), s.min_label),
    ];
    let mut recommendations = Vec::new();
    let mut key_findings = Vec::new();

    match Momentum::of(values) {
        Some(m) => {
            let direction = if m.is_upward() {
                "upward"
            } else if m.second_half_mean < m.first_half_mean {
                "downward"
            } else {
                "flat"
            };
            insights.push(format!(
                "The trend is {}: the second half averages {} against {} in the first half ({:+.1}%).",
                direction,
                num(m.second_half_mean),
                num(m.first_half_mean),
                m.percent_change
            ));
            if m.is_strong() {
                insights.push(format!("Strong momentum: the average moved by more than 20% ({}).", direction));
                recommendations.push(if m.is_upward() {
                    "Momentum is strong; plan capacity for continued growth.".to_string()
                } else {
                    "The decline is steep; investigate the drop before it compounds.".to_string()
                });
            } else {
                recommendations.push("Change is moderate; keep tracking the series for a clearer signal.".to_string());
            }
            key_findings.push(format!("Trend direction: {}", direction));
            key_findings.push(format!("Half-over-half change: {:+.1}%", m.percent_change));
        }
        None => {
            insights.push("A single point cannot show a trend.".to_string());
            recommendations.push("Add more periods to reveal a trend.".to_string());
        }
    }

    if let Some(slope) = linear_trend(values) {
        key_findings.push(format!("Linear trend: {} per step", num(slope)));
    }

    AnalysisReport {
        summary: format!(
            "{}: {} points averaging {}, ranging from {} to {}.",
            title(request),
            s.count,
            num(s.mean),
            num(s.min),
            num(s.max)
        ),
        insights,
        recommendations,
        key_findings,
        confidence: Confidence::High,
    }
}

fn pie_report(s: &Summary, series: &ChartSeries, request: &ChartRequest) -> AnalysisReport {
    let shares = shares(series).unwrap_or_default();
    let mut insights: Vec<String> = shares
        .iter()
        .map(|(label, share)| format!("{} accounts for {} of the total.", label, pct(*share)))
        .collect();
    let mut recommendations = Vec::new();
    let mut key_findings = Vec::new();

    let dominant = shares
        .iter()
        .filter(|(_, share)| *share > 50.0)
        .max_by(|a, b| a.1.total_cmp(&b.1));
    if let Some((label, share)) = dominant {
        insights.push(format!("{} is dominant with {} of the total.", label, pct(*share)));
        recommendations.push(format!(
            "The total leans heavily on {}; consider the risk of that concentration.",
            label
        ));
        key_findings.push(format!("Dominant share: {} ({})", label, pct(*share)));
    }

    let mid_sized = shares
        .iter()
        .filter(|(_, share)| (10.0..=30.0).contains(share))
        .count();
    if mid_sized >= 3 {
        insights.push(format!(
            "Balanced distribution: {} categories each hold between 10% and 30%.",
            mid_sized
        ));
        key_findings.push("Balanced distribution".to_string());
    }

    if recommendations.is_empty() {
        recommendations.push("No single category dominates; compare shares over time to spot shifts.".to_string());
    }

    AnalysisReport {
        summary: format!(
            "{}: {} categories sharing a total of {}; the largest is {}.",
            title(request),
            s.count,
            num(s.total),
            s.max_label
        ),
        insights,
        recommendations,
        key_findings,
        confidence: Confidence::High,
    }
}

fn scatter_report(s: &Summary, series: &ChartSeries, request: &ChartRequest) -> AnalysisReport {
    let (xs, ys): (Vec<f64>, Vec<f64>) = match &series.data {
        SeriesData::Points { points } => points.iter().map(|p| (p.x, p.y)).unzip(),
        _ => (Vec::new(), Vec::new()),
    };

    let mut insights = vec![format!(
        "Highest {}: {} ({}).",
        request.y_column,
        num(s.max),
        s.max_label
    )];
    let mut recommendations = Vec::new();
    let mut key_findings = Vec::new();

    match pearson(&xs, &ys) {
        Some(r) => {
            let strength = if r.abs() > 0.7 {
                "strong"
            } else if r.abs() > 0.4 {
                "moderate"
            } else {
                "weak"
            };
            let direction = if r > 0.0 {
                "positive"
            } else if r < 0.0 {
                "negative"
            } else {
                "no"
            };
            insights.push(format!(
                "There is a {} {} correlation between {} and {} (r = {:.2}).",
                strength, direction, request.x_column, request.y_column, r
            ));
            recommendations.push(match strength {
                "strong" => format!(
                    "{} tracks {} closely; it may serve as a predictor.",
                    request.y_column, request.x_column
                ),
                "moderate" => "The relationship is real but loose; look for other contributing factors.".to_string(),
                _ => format!(
                    "{} says little about {}; explore other columns.",
                    request.x_column, request.y_column
                ),
            });
            key_findings.push(format!("Correlation: {:.2} ({} {})", r, strength, direction));
        }
        None => {
            insights.push("Correlation is undefined: one of the axes does not vary.".to_string());
            recommendations.push("Pick columns that vary across rows to study their relationship.".to_string());
        }
    }

    AnalysisReport {
        summary: format!(
            "{}: {} points with {} averaging {}.",
            title(request),
            s.count,
            request.y_column,
            num(s.mean)
        ),
        insights,
        recommendations,
        key_findings,
        confidence: Confidence::High,
    }
}

fn surface_report(s: &Summary, series: &ChartSeries, request: &ChartRequest) -> AnalysisReport {
    let size = match &series.data {
        SeriesData::Grid { size, .. } => *size,
        _ => 0,
    };

    AnalysisReport {
        summary: format!(
            "{}: a {}×{} elevation surface of {}.",
            title(request),
            size,
            size,
            request.y_column
        ),
        insights: vec![
            format!("Highest elevation: {} at {}.", num(s.max), s.max_label),
            format!("Lowest elevation: {} at {}.", num(s.min), s.min_label),
        ],
        recommendations: vec!["Rotate the surface to inspect peaks and valleys from several angles.".to_string()],
        key_findings: vec![format!("Elevation range: {} to {}", num(s.min), num(s.max))],
        confidence: Confidence::High,
    }
}
