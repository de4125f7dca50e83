//! SVG figures: correlation heatmap, ROC and PR curves, importance bars,
//! partial dependence panels and choropleth maps.

use crate::error::{Error, Result};
use crate::features::{Feature, Observation};
use crate::interpret::{Importance, PartialDependence};
use crate::metrics::{PrPoint, RocPoint};
use crate::record::Party;
use plotters::coord::Shift;
use plotters::drawing::DrawingAreaErrorKind;
use plotters::prelude::*;
use plotters_svg::SVGBackend;
use std::collections::HashMap;
use std::path::Path;

const FONT: &str = "sans-serif";
const DEMOCRAT_BLUE: RGBColor = RGBColor(33, 102, 172);
const REPUBLICAN_RED: RGBColor = RGBColor(178, 24, 43);
const MISSING_GREY: RGBColor = RGBColor(200, 200, 200);

impl<E: std::error::Error + Send + Sync> From<DrawingAreaErrorKind<E>> for Error {
    fn from(e: DrawingAreaErrorKind<E>) -> Self {
        Error::Plot(e.to_string())
    }
}

fn lerp(a: RGBColor, b: RGBColor, t: f64) -> RGBColor {
    let t = t.clamp(0.0, 1.0);
    let mix = |x: u8, y: u8| (x as f64 + (y as f64 - x as f64) * t).round() as u8;
    RGBColor(mix(a.0, b.0), mix(a.1, b.1), mix(a.2, b.2))
}

/// Blue for -1, white for 0, red for +1.
fn diverging(r: f64) -> RGBColor {
    if r.is_nan() {
        MISSING_GREY
    } else if r < 0.0 {
        lerp(WHITE, DEMOCRAT_BLUE, -r)
    } else {
        lerp(WHITE, REPUBLICAN_RED, r)
    }
}

fn party_color(party: Party) -> RGBColor {
    match party {
        Party::Democrat => DEMOCRAT_BLUE,
        Party::Republican => REPUBLICAN_RED,
    }
}

/// Heatmap of the predictor correlation matrix.
pub fn correlation_heatmap(
    path: &Path,
    corr: &[Vec<f64>],
    names: &[String],
    size: (u32, u32),
) -> Result<()> {
    let p = corr.len();
    let root = SVGBackend::new(path, size).into_drawing_area();
    root.fill(&WHITE)?;
    let label = |v: &f64| {
        let i = v.floor() as usize;
        if *v - v.floor() > 0.4 && i < p {
            names[i].clone()
        } else {
            String::new()
        }
    };
    let mut chart = ChartBuilder::on(&root)
        .caption("Predictor correlation", (FONT, 22))
        .margin(10)
        .x_label_area_size(140)
        .y_label_area_size(160)
        .build_cartesian_2d(0f64..p as f64, 0f64..p as f64)?;
    chart
        .configure_mesh()
        .disable_mesh()
        .x_labels(2 * p + 1)
        .y_labels(2 * p + 1)
        .x_label_formatter(&label)
        .y_label_formatter(&label)
        .x_label_style((FONT, 11).into_font().transform(FontTransform::Rotate90))
        .y_label_style((FONT, 11))
        .draw()?;

    // Row 0 is drawn at the top.
    let cell = |i: usize, j: usize| (j as f64, (p - 1 - i) as f64);
    chart.draw_series((0..p).flat_map(|i| (0..p).map(move |j| (i, j))).map(|(i, j)| {
        let (x, y) = cell(i, j);
        Rectangle::new([(x, y), (x + 1.0, y + 1.0)], diverging(corr[i][j]).filled())
    }))?;
    if p <= 25 {
        chart.draw_series(
            (0..p)
                .flat_map(|i| (0..p).map(move |j| (i, j)))
                .filter(|&(i, j)| !corr[i][j].is_nan())
                .map(|(i, j)| {
                    let (x, y) = cell(i, j);
                    Text::new(format!("{:.2}", corr[i][j]), (x + 0.2, y + 0.65), (FONT, 10))
                }),
        )?;
    }
    root.present()?;
    Ok(())
}

/// ROC curve with the chance diagonal and the AUC in the caption.
pub fn roc_plot(path: &Path, roc: &[RocPoint], auc: f64, size: (u32, u32)) -> Result<()> {
    let root = SVGBackend::new(path, size).into_drawing_area();
    root.fill(&WHITE)?;
    let mut chart = ChartBuilder::on(&root)
        .caption(format!("ROC curve (AUC = {auc:.3})"), (FONT, 22))
        .margin(15)
        .x_label_area_size(45)
        .y_label_area_size(55)
        .build_cartesian_2d(0f64..1f64, 0f64..1f64)?;
    chart
        .configure_mesh()
        .x_desc("False positive rate")
        .y_desc("True positive rate")
        .draw()?;
    chart.draw_series(LineSeries::new(
        [(0.0, 0.0), (1.0, 1.0)],
        BLACK.mix(0.3).stroke_width(1),
    ))?;
    chart.draw_series(LineSeries::new(
        roc.iter().map(|p| (p.fpr, p.tpr)),
        DEMOCRAT_BLUE.stroke_width(2),
    ))?;
    root.present()?;
    Ok(())
}

/// Precision-recall curve.
pub fn pr_plot(path: &Path, pr: &[PrPoint], size: (u32, u32)) -> Result<()> {
    let root = SVGBackend::new(path, size).into_drawing_area();
    root.fill(&WHITE)?;
    let mut chart = ChartBuilder::on(&root)
        .caption("Precision-recall curve", (FONT, 22))
        .margin(15)
        .x_label_area_size(45)
        .y_label_area_size(55)
        .build_cartesian_2d(0f64..1f64, 0f64..1.02f64)?;
    chart
        .configure_mesh()
        .x_desc("Recall")
        .y_desc("Precision")
        .draw()?;
    chart.draw_series(LineSeries::new(
        pr.iter().map(|p| (p.recall, p.precision)),
        DEMOCRAT_BLUE.stroke_width(2),
    ))?;
    root.present()?;
    Ok(())
}

/// Horizontal bars of scaled importance, most important on top.
pub fn importance_plot(path: &Path, importance: &[Importance], size: (u32, u32)) -> Result<()> {
    let n = importance.len();
    let root = SVGBackend::new(path, size).into_drawing_area();
    root.fill(&WHITE)?;
    let names: Vec<String> = importance.iter().map(|i| i.feature.name()).collect();
    let label = |v: &f64| {
        let slot = v.floor() as usize;
        if *v - v.floor() > 0.4 && slot < n {
            names[n - 1 - slot].clone()
        } else {
            String::new()
        }
    };
    let mut chart = ChartBuilder::on(&root)
        .caption("Variable importance (impurity)", (FONT, 22))
        .margin(15)
        .x_label_area_size(45)
        .y_label_area_size(150)
        .build_cartesian_2d(0f64..105f64, 0f64..n as f64)?;
    chart
        .configure_mesh()
        .disable_y_mesh()
        .y_labels(2 * n + 1)
        .y_label_formatter(&label)
        .x_desc("Scaled importance")
        .draw()?;
    chart.draw_series(importance.iter().enumerate().map(|(i, imp)| {
        let y = (n - 1 - i) as f64;
        Rectangle::new([(0.0, y + 0.15), (imp.scaled, y + 0.85)], DEMOCRAT_BLUE.filled())
    }))?;
    root.present()?;
    Ok(())
}

/// Axis setup of one partial dependence panel.
#[derive(Debug, Clone, PartialEq)]
pub struct AxisConfig {
    pub x_label: String,
    pub y_range: (f64, f64),
}

/// One panel: the feature to plot and how to label it.
#[derive(Debug, Clone, PartialEq)]
pub struct PanelSpec {
    pub feature: Feature,
    pub axis: AxisConfig,
}

impl PanelSpec {
    pub fn new(feature: Feature) -> Self {
        PanelSpec {
            feature,
            axis: AxisConfig {
                x_label: feature.name(),
                y_range: (0.0, 1.0),
            },
        }
    }
}

fn draw_pd_panel(
    area: &DrawingArea<SVGBackend<'_>, Shift>,
    panel: &PanelSpec,
    curve: &PartialDependence,
    train: &[Observation],
    positive: Party,
) -> Result<()> {
    let xs: Vec<f64> = curve.points.iter().map(|p| p.0).collect();
    let lo = xs.first().copied().unwrap_or(0.0);
    let hi = xs.last().copied().unwrap_or(1.0);
    let hi = if hi > lo { hi } else { lo + 1.0 };
    let (y0, y1) = panel.axis.y_range;

    let mut chart = ChartBuilder::on(area)
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(45)
        .build_cartesian_2d(lo..hi, y0..y1)?;
    chart
        .configure_mesh()
        .x_desc(panel.axis.x_label.as_str())
        .y_desc(format!("P({positive})"))
        .draw()?;
    chart.draw_series(LineSeries::new(
        curve.points.iter().copied(),
        DEMOCRAT_BLUE.stroke_width(2),
    ))?;

    // Rug of observed training values.
    let tick = (y1 - y0) * 0.03;
    chart.draw_series(
        train
            .iter()
            .map(|o| panel.feature.value(o))
            .filter(|v| v.is_finite() && *v >= lo && *v <= hi)
            .map(|v| PathElement::new(vec![(v, y0), (v, y0 + tick)], BLACK.mix(0.4))),
    )?;
    Ok(())
}

/// Panels on a two-row grid, one per spec.
pub fn partial_dependence_plot(
    path: &Path,
    panels: &[PanelSpec],
    curves: &[PartialDependence],
    train: &[Observation],
    positive: Party,
    size: (u32, u32),
) -> Result<()> {
    let root = SVGBackend::new(path, size).into_drawing_area();
    root.fill(&WHITE)?;
    let cols = panels.len().div_ceil(2).max(1);
    let areas = root.split_evenly((2, cols));
    for (panel, area) in panels.iter().zip(&areas) {
        let curve = curves
            .iter()
            .find(|c| c.feature == panel.feature)
            .ok_or_else(|| {
                Error::Plot(format!("no partial dependence for {}", panel.feature.name()))
            })?;
        draw_pd_panel(area, panel, curve, train, positive)?;
    }
    root.present()?;
    Ok(())
}

fn draw_map<F>(
    area: &DrawingArea<SVGBackend<'_>, Shift>,
    title: &str,
    observations: &[Observation],
    bounds: (f64, f64, f64, f64),
    color: F,
) -> Result<()>
where
    F: Fn(&Observation) -> RGBColor,
{
    let (x0, x1, y0, y1) = bounds;
    let mut chart = ChartBuilder::on(area)
        .caption(title, (FONT, 20))
        .margin(10)
        .build_cartesian_2d(x0..x1, y0..y1)?;
    for obs in observations {
        let Some(geometry) = &obs.record.geometry else {
            continue;
        };
        let fill = color(obs);
        chart.draw_series(
            geometry
                .rings
                .iter()
                .map(|ring| Polygon::new(ring.clone(), fill.filled())),
        )?;
        chart.draw_series(
            geometry
                .rings
                .iter()
                .map(|ring| PathElement::new(ring.clone(), WHITE.stroke_width(1))),
        )?;
    }
    Ok(())
}

/// Actual winners beside the predicted probability of `positive`.
/// Returns `false` without drawing when no observation has geometry.
pub fn choropleth_maps(
    path: &Path,
    observations: &[Observation],
    predicted: &HashMap<String, f64>,
    positive: Party,
    size: (u32, u32),
) -> Result<bool> {
    let bounds = observations
        .iter()
        .filter_map(|o| o.record.geometry.as_ref()?.bounds())
        .reduce(|a, b| (a.0.min(b.0), a.1.max(b.1), a.2.min(b.2), a.3.max(b.3)));
    let Some(bounds) = bounds else {
        log::warn!(target: crate::LOG_TARGET, "no county geometry; skipping maps");
        return Ok(false);
    };

    let root = SVGBackend::new(path, size).into_drawing_area();
    root.fill(&WHITE)?;
    let areas = root.split_evenly((1, 2));
    let other = Party::ALL
        .into_iter()
        .find(|&p| p != positive)
        .unwrap_or(positive);

    draw_map(&areas[0], "Winning party", observations, bounds, |o| {
        party_color(o.party)
    })?;
    draw_map(
        &areas[1],
        &format!("Predicted P({positive})"),
        observations,
        bounds,
        |o| match predicted.get(o.fips()) {
            Some(&p) => lerp(party_color(other), party_color(positive), p),
            None => MISSING_GREY,
        },
    )?;
    root.present()?;
    Ok(true)
}
