//! Inline SVG figures comparing the raw and filtered recordings.

use crate::recording::{ChannelKind, Recording};
use crate::spectrum::{mean_psd_db, PowerSpectrum};
use nalgebra::{Point2, Vector3};
use serde::Serialize;
use std::fmt::Write;

const WIDTH: f64 = 640.0;
const HEIGHT: f64 = 320.0;
const MARGIN: f64 = 48.0;
const RAW_COLOR: &str = "#d62728";
const FILTERED_COLOR: &str = "#1f77b4";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Figure {
    pub svg: String,
    pub caption: String,
}

/// Sensor type shown in the figures: magnetometers when present, otherwise
/// gradiometers. Mixing both would mix units.
fn figure_kind(recording: &Recording) -> Option<ChannelKind> {
    let has = |kind| recording.channels.iter().any(|ch| ch.kind == kind);
    if has(ChannelKind::Mag) {
        Some(ChannelKind::Mag)
    } else if has(ChannelKind::Grad) {
        Some(ChannelKind::Grad)
    } else {
        None
    }
}

fn channels_of(recording: &Recording, kind: ChannelKind, skip_bads: bool) -> Vec<usize> {
    recording
        .channels
        .iter()
        .enumerate()
        .filter(|(_, ch)| ch.kind == kind && !(skip_bads && recording.is_bad(&ch.name)))
        .map(|(i, _)| i)
        .collect()
}

fn kind_label(kind: ChannelKind) -> &'static str {
    match kind {
        ChannelKind::Mag => "magnetometers",
        _ => "gradiometers",
    }
}

/// Raw vs. filtered channel-averaged PSD. `Err` carries the reason the
/// figure is not available.
pub fn psd_figure(raw: &Recording, filtered: &Recording) -> Result<Figure, String> {
    let kind = figure_kind(raw).ok_or_else(|| "no MEG channels".to_string())?;
    let fmax = raw
        .lowpass
        .unwrap_or(raw.sample_rate / 2.0)
        .min(raw.sample_rate / 2.0);

    let raw_psd = mean_psd_db(
        &raw.data,
        &channels_of(raw, kind, true),
        raw.sample_rate,
        Some(fmax),
    )
    .ok_or_else(|| "no renderable frequency content in the raw recording".to_string())?;
    let filtered_psd = mean_psd_db(
        &filtered.data,
        &channels_of(filtered, kind, false),
        filtered.sample_rate,
        Some(fmax),
    )
    .ok_or_else(|| "no renderable frequency content in the filtered recording".to_string())?;

    Ok(Figure {
        svg: line_plot(&[("raw", RAW_COLOR, &raw_psd), ("filtered", FILTERED_COLOR, &filtered_psd)]),
        caption: format!(
            "Mean power spectral density of {}, 0 to {:.1} Hz",
            kind_label(kind),
            fmax
        ),
    })
}

fn line_plot(series: &[(&str, &str, &PowerSpectrum)]) -> String {
    let x_max = series
        .iter()
        .filter_map(|(_, _, s)| s.frequencies.last().copied())
        .fold(0.0, f64::max)
        .max(f64::EPSILON);
    let (y_min, y_max) = series
        .iter()
        .flat_map(|(_, _, s)| s.power.iter().copied())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), p| (lo.min(p), hi.max(p)));
    let y_span = (y_max - y_min).max(1.0);

    let plot_w = WIDTH - 2.0 * MARGIN;
    let plot_h = HEIGHT - 2.0 * MARGIN;
    let to_px = |f: f64, p: f64| {
        Point2::new(
            MARGIN + f / x_max * plot_w,
            MARGIN + (1.0 - (p - y_min) / y_span) * plot_h,
        )
    };

    let mut svg = String::new();
    let _ = write!(
        svg,
        r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 {w} {h}" width="{w}" height="{h}" role="img">"#,
        w = WIDTH,
        h = HEIGHT
    );
    let _ = write!(
        svg,
        r##"<rect x="{m}" y="{m}" width="{pw}" height="{ph}" fill="none" stroke="#888"/>"##,
        m = MARGIN,
        pw = plot_w,
        ph = plot_h
    );
    let _ = write!(
        svg,
        r#"<text x="{x}" y="{y}" text-anchor="middle" font-size="12">Frequency (Hz)</text>"#,
        x = WIDTH / 2.0,
        y = HEIGHT - 12.0
    );
    let _ = write!(
        svg,
        r#"<text x="14" y="{y}" text-anchor="middle" font-size="12" transform="rotate(-90 14 {y})">Power (dB)</text>"#,
        y = HEIGHT / 2.0
    );
    for (value, anchor, x) in [(0.0, "start", MARGIN), (x_max, "end", WIDTH - MARGIN)] {
        let _ = write!(
            svg,
            r#"<text x="{x}" y="{y}" text-anchor="{anchor}" font-size="10">{value:.0}</text>"#,
            y = HEIGHT - MARGIN + 14.0
        );
    }

    for (i, (label, color, spectrum)) in series.iter().enumerate() {
        let points: Vec<String> = spectrum
            .frequencies
            .iter()
            .zip(&spectrum.power)
            .map(|(&f, &p)| {
                let pt = to_px(f, p);
                format!("{:.1},{:.1}", pt.x, pt.y)
            })
            .collect();
        let _ = write!(
            svg,
            r#"<polyline fill="none" stroke="{color}" stroke-width="1.5" points="{points}"/>"#,
            points = points.join(" ")
        );
        let legend_y = MARGIN + 16.0 + 16.0 * i as f64;
        let _ = write!(
            svg,
            r#"<line x1="{x1}" y1="{legend_y}" x2="{x2}" y2="{legend_y}" stroke="{color}" stroke-width="2"/><text x="{tx}" y="{ty}" font-size="11">{label}</text>"#,
            x1 = WIDTH - MARGIN - 90.0,
            x2 = WIDTH - MARGIN - 70.0,
            tx = WIDTH - MARGIN - 64.0,
            ty = legend_y + 4.0
        );
    }
    svg.push_str("</svg>");
    svg
}

fn rms(signal: &[f64]) -> f64 {
    if signal.is_empty() {
        return 0.0;
    }
    (signal.iter().map(|v| v * v).sum::<f64>() / signal.len() as f64).sqrt()
}

/// 2-D sensor layout in the unit disk. Uses an azimuthal projection of the
/// sensor locations around their centroid, or a grid when any is missing.
pub fn sensor_layout(recording: &Recording, channels: &[usize]) -> Vec<Point2<f64>> {
    let locations: Option<Vec<Vector3<f64>>> = channels
        .iter()
        .map(|&i| recording.channels[i].location.map(Vector3::from))
        .collect();

    match locations {
        Some(locs) if !locs.is_empty() => {
            let centroid = locs.iter().fold(Vector3::zeros(), |acc, v| acc + v) / locs.len() as f64;
            // Sensors sit on a helmet above the centroid; the pole is +z.
            let projected: Vec<Point2<f64>> = locs
                .iter()
                .map(|v| {
                    let d = v - centroid;
                    let norm = d.norm();
                    if norm == 0.0 {
                        return Point2::origin();
                    }
                    let theta = (d.z / norm).clamp(-1.0, 1.0).acos();
                    let phi = d.y.atan2(d.x);
                    Point2::new(theta * phi.cos(), theta * phi.sin())
                })
                .collect();
            let radius = projected
                .iter()
                .map(|p| p.coords.norm())
                .fold(0.0, f64::max);
            if radius > 0.0 {
                projected.into_iter().map(|p| p / radius).collect()
            } else {
                projected
            }
        }
        _ => grid_layout(channels.len()),
    }
}

fn grid_layout(n: usize) -> Vec<Point2<f64>> {
    let cols = (n as f64).sqrt().ceil().max(1.0) as usize;
    let rows = n.div_ceil(cols).max(1);
    (0..n)
        .map(|i| {
            let (r, c) = (i / cols, i % cols);
            let x = if cols > 1 { c as f64 / (cols - 1) as f64 * 1.6 - 0.8 } else { 0.0 };
            let y = if rows > 1 { r as f64 / (rows - 1) as f64 * 1.6 - 0.8 } else { 0.0 };
            Point2::new(x, y)
        })
        .collect()
}

/// Blue to red through white, `t` in [0, 1].
fn color_ramp(t: f64) -> String {
    let t = if t.is_finite() { t.clamp(0.0, 1.0) } else { 0.0 };
    let (r, g, b) = if t < 0.5 {
        let s = t * 2.0;
        (s, s, 1.0)
    } else {
        let s = (1.0 - t) * 2.0;
        (1.0, s, s)
    };
    format!(
        "rgb({},{},{})",
        (r * 255.0).round() as u8,
        (g * 255.0).round() as u8,
        (b * 255.0).round() as u8
    )
}

fn topo_panel(svg: &mut String, title: &str, cx: f64, points: &[Point2<f64>], values: &[f64]) {
    let radius = HEIGHT / 2.0 - MARGIN / 2.0;
    let cy = HEIGHT / 2.0 + 8.0;
    let max = values.iter().copied().fold(0.0, f64::max);

    let _ = write!(
        svg,
        r##"<circle cx="{cx}" cy="{cy}" r="{r}" fill="none" stroke="#444"/><text x="{cx}" y="16" text-anchor="middle" font-size="12">{title}</text>"##,
        r = radius + 6.0
    );
    for (point, value) in points.iter().zip(values) {
        let t = if max > 0.0 { value / max } else { 0.0 };
        let _ = write!(
            svg,
            r##"<circle cx="{x:.1}" cy="{y:.1}" r="5" fill="{fill}" stroke="#333" stroke-width="0.5"/>"##,
            x = cx + point.x * radius,
            y = cy - point.y * radius,
            fill = color_ramp(t)
        );
    }
}

/// Raw vs. filtered RMS amplitude per sensor, each panel on its own scale.
pub fn topography_figure(raw: &Recording, filtered: &Recording) -> Result<Figure, String> {
    let kind = figure_kind(raw).ok_or_else(|| "no MEG channels".to_string())?;
    if raw.num_samples() == 0 || filtered.num_samples() == 0 {
        return Err("recording has no samples".to_string());
    }
    let channels = channels_of(raw, kind, false);
    let layout = sensor_layout(raw, &channels);

    let raw_rms: Vec<f64> = channels
        .iter()
        .map(|&i| if raw.is_bad(&raw.channels[i].name) { 0.0 } else { rms(&raw.data[i]) })
        .collect();
    let filtered_rms: Vec<f64> = channels.iter().map(|&i| rms(&filtered.data[i])).collect();
    if filtered_rms.iter().all(|&v| v == 0.0) {
        return Err("filtered recording is flat".to_string());
    }

    let mut svg = String::new();
    let _ = write!(
        svg,
        r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 {w} {h}" width="{w}" height="{h}" role="img">"#,
        w = WIDTH,
        h = HEIGHT
    );
    topo_panel(&mut svg, "raw", WIDTH / 4.0, &layout, &raw_rms);
    topo_panel(&mut svg, "filtered", 3.0 * WIDTH / 4.0, &layout, &filtered_rms);
    svg.push_str("</svg>");

    Ok(Figure {
        svg,
        caption: format!(
            "RMS amplitude of {} {}, raw bad channels shown empty",
            channels.len(),
            kind_label(kind)
        ),
    })
}
