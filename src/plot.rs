//! Line plots of reduced anomaly series
//!
//! Renders a time series to a PNG: value gridlines with labels, a gridline
//! and label at every Jan 1, a zero reference line, and the series itself
//! with gaps wherever the value is NaN.

use crate::cf::Timestamp;
use crate::errors::Result;
use crate::statistics::TimeSeries;
use chrono::{Datelike, NaiveDate};
use image::{ImageBuffer, Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_line_segment_mut, draw_text_mut};
use imageproc::rect::Rect;
use log::{info, warn};
use rusttype::{Font, Scale};
use std::fs;
use std::path::Path;

/// Embedded font data - DejaVu Sans Mono
const FONT_DATA: &[u8] = include_bytes!("../assets/DejaVuSansMono.ttf");

const MARGIN_LEFT: u32 = 80;
const MARGIN_RIGHT: u32 = 24;
const MARGIN_TOP: u32 = 40;
const MARGIN_BOTTOM: u32 = 44;
const FONT_SIZE: f32 = 14.0;
/// Approximate advance of one monospace glyph at `FONT_SIZE`
const GLYPH_WIDTH: f32 = FONT_SIZE * 0.6;

const BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);
const GRID: Rgb<u8> = Rgb([225, 225, 225]);
const AXIS: Rgb<u8> = Rgb([60, 60, 60]);
const ZERO: Rgb<u8> = Rgb([150, 150, 150]);
const LINE: Rgb<u8> = Rgb([31, 119, 180]);
const TEXT: Rgb<u8> = Rgb([20, 20, 20]);

/// Image size of a rendered plot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlotSize {
    pub width: u32,
    pub height: u32,
}

/// Pixel rectangle holding the data
#[derive(Debug, Clone, Copy)]
struct PlotArea {
    left: f32,
    top: f32,
    right: f32,
    bottom: f32,
}

impl PlotArea {
    fn new(size: PlotSize) -> Self {
        Self {
            left: MARGIN_LEFT as f32,
            top: MARGIN_TOP as f32,
            right: size.width.saturating_sub(MARGIN_RIGHT) as f32,
            bottom: size.height.saturating_sub(MARGIN_BOTTOM) as f32,
        }
    }

    fn x(&self, fraction: f64) -> f32 {
        self.left + (self.right - self.left) * fraction as f32
    }

    fn y(&self, fraction: f64) -> f32 {
        self.bottom - (self.bottom - self.top) * fraction as f32
    }
}

/// Linear mapping of data values to [0, 1]
#[derive(Debug, Clone, Copy, PartialEq)]
struct Axis1D {
    min: f64,
    max: f64,
}

impl Axis1D {
    fn fraction(&self, value: f64) -> f64 {
        (value - self.min) / (self.max - self.min)
    }
}

/// Render `series` with `title` above the plot area.
pub fn render_series(series: &TimeSeries, title: &str, size: PlotSize) -> RgbImage {
    let mut img: RgbImage = ImageBuffer::from_pixel(size.width, size.height, BACKGROUND);
    let area = PlotArea::new(size);
    let font = Font::try_from_bytes(FONT_DATA);
    if font.is_none() {
        warn!("Failed to load font for plot labels");
    }

    let (Some(&first), Some(&last)) = (series.times.first(), series.times.last()) else {
        draw_frame(&mut img, &area);
        return img;
    };
    let x_axis = Axis1D {
        min: 0.0,
        max: seconds_between(first, last).max(1.0),
    };
    let y_axis = value_axis(series);

    // Value gridlines
    let step = nice_step(y_axis.max - y_axis.min, 6);
    let mut tick = (y_axis.min / step).ceil() * step;
    while tick <= y_axis.max {
        let y = area.y(y_axis.fraction(tick));
        draw_line_segment_mut(&mut img, (area.left, y), (area.right, y), GRID);
        if let Some(font) = &font {
            let label = format_tick(tick, step);
            let x = area.left - 6.0 - GLYPH_WIDTH * label.len() as f32;
            draw_text_mut(&mut img, TEXT, x as i32, (y - FONT_SIZE / 2.0) as i32, Scale::uniform(FONT_SIZE), font, &label);
        }
        tick += step;
    }

    // Year gridlines
    let years: Vec<(i32, Timestamp)> = (first.year() + 1..=last.year())
        .filter_map(|year| {
            NaiveDate::from_ymd_opt(year, 1, 1)
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|t| (year, t))
        })
        .collect();
    let label_every = year_label_stride(years.len(), area.right - area.left);
    for (i, (year, jan1)) in years.iter().enumerate() {
        let x = area.x(x_axis.fraction(seconds_between(first, *jan1)));
        draw_line_segment_mut(&mut img, (x, area.top), (x, area.bottom), GRID);
        if let Some(font) = &font {
            if i % label_every == 0 {
                let label = year.to_string();
                let lx = x - GLYPH_WIDTH * label.len() as f32 / 2.0;
                draw_text_mut(&mut img, TEXT, lx as i32, (area.bottom + 8.0) as i32, Scale::uniform(FONT_SIZE), font, &label);
            }
        }
    }

    if y_axis.min < 0.0 && y_axis.max > 0.0 {
        let y = area.y(y_axis.fraction(0.0));
        draw_line_segment_mut(&mut img, (area.left, y), (area.right, y), ZERO);
    }

    // Series, broken at NaN
    let mut previous: Option<(f32, f32)> = None;
    for (time, value) in series.times.iter().zip(&series.values) {
        if !value.is_finite() {
            previous = None;
            continue;
        }
        let point = (
            area.x(x_axis.fraction(seconds_between(first, *time))),
            area.y(y_axis.fraction(f64::from(*value))),
        );
        match previous {
            Some(start) => draw_line_segment_mut(&mut img, start, point, LINE),
            None => draw_line_segment_mut(&mut img, point, point, LINE),
        }
        previous = Some(point);
    }

    draw_frame(&mut img, &area);
    if let Some(font) = &font {
        draw_text_mut(&mut img, TEXT, area.left as i32, 12, Scale::uniform(FONT_SIZE), font, title);
    }
    img
}

/// Render `series` and write it as an image at `path`, creating parent
/// directories as needed.
pub fn save_series_plot(series: &TimeSeries, title: &str, size: PlotSize, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    render_series(series, title, size).save(path)?;
    info!("Saved plot to {}", path.display());
    Ok(())
}

fn draw_frame(img: &mut RgbImage, area: &PlotArea) {
    let width = (area.right - area.left).max(1.0) as u32;
    let height = (area.bottom - area.top).max(1.0) as u32;
    draw_hollow_rect_mut(
        img,
        Rect::at(area.left as i32, area.top as i32).of_size(width, height),
        AXIS,
    );
}

fn seconds_between(from: Timestamp, to: Timestamp) -> f64 {
    (to - from).num_seconds() as f64
}

/// Value range of the finite data, padded so the line stays off the frame.
fn value_axis(series: &TimeSeries) -> Axis1D {
    match series.finite_range() {
        Some((lo, hi)) if hi > lo => {
            let pad = f64::from(hi - lo) * 0.05;
            Axis1D {
                min: f64::from(lo) - pad,
                max: f64::from(hi) + pad,
            }
        }
        Some((v, _)) => Axis1D {
            min: f64::from(v) - 1.0,
            max: f64::from(v) + 1.0,
        },
        None => Axis1D { min: -1.0, max: 1.0 },
    }
}

/// Tick spacing of 1, 2 or 5 times a power of ten giving about `target`
/// ticks over `span`.
fn nice_step(span: f64, target: usize) -> f64 {
    let raw = span / target.max(1) as f64;
    if !raw.is_finite() || raw <= 0.0 {
        return 1.0;
    }
    let magnitude = 10f64.powf(raw.log10().floor());
    let normalized = raw / magnitude;
    let nice = if normalized < 1.5 {
        1.0
    } else if normalized < 3.0 {
        2.0
    } else if normalized < 7.0 {
        5.0
    } else {
        10.0
    };
    nice * magnitude
}

fn format_tick(value: f64, step: f64) -> String {
    let decimals = if step >= 1.0 { 0 } else { (-step.log10().floor()) as usize };
    // avoid "-0"
    let value = if value.abs() < step * 1e-6 { 0.0 } else { value };
    format!("{value:.decimals$}")
}

/// Label every n-th year so labels keep roughly 60 px apart.
fn year_label_stride(years: usize, width: f32) -> usize {
    if years == 0 {
        return 1;
    }
    let per_year = width / years as f32;
    ((60.0 / per_year).ceil() as usize).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cf::parse_timestamp;
    use crate::statistics::Reduction;
    use chrono::Duration;

    fn series(values: Vec<f32>) -> TimeSeries {
        let start = parse_timestamp("2002-06-01T09:00:00").unwrap();
        TimeSeries {
            times: (0..values.len()).map(|d| start + Duration::days(d as i64)).collect(),
            values,
            reduction: Reduction::SpatialMean,
        }
    }

    const SIZE: PlotSize = PlotSize {
        width: 400,
        height: 200,
    };

    #[test]
    fn test_nice_step() {
        assert_eq!(nice_step(10.0, 5), 2.0);
        assert_eq!(nice_step(3.0, 6), 0.5);
        assert_eq!(nice_step(0.0, 6), 1.0);
        assert!((nice_step(0.12, 6) - 0.02).abs() < 1e-12);
    }

    #[test]
    fn test_format_tick() {
        assert_eq!(format_tick(2.0, 1.0), "2");
        assert_eq!(format_tick(-0.5, 0.5), "-0.5");
        assert_eq!(format_tick(-1e-12, 0.5), "0.0");
    }

    #[test]
    fn test_render_draws_series() {
        let values: Vec<f32> = (0..800).map(|d| (d as f32 / 50.0).sin()).collect();
        let img = render_series(&series(values), "mean", SIZE);
        assert_eq!(img.dimensions(), (400, 200));
        assert!(img.pixels().any(|p| *p == LINE));
    }

    #[test]
    fn test_render_all_nan() {
        let img = render_series(&series(vec![f32::NAN; 10]), "point", SIZE);
        assert!(!img.pixels().any(|p| *p == LINE));
        let empty = render_series(&series(Vec::new()), "empty", SIZE);
        assert_eq!(empty.dimensions(), (400, 200));
    }

    #[test]
    fn test_save_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("plot.png");
        save_series_plot(&series(vec![0.5, -0.25, f32::NAN, 1.0]), "mean", SIZE, &path).unwrap();
        assert!(path.exists());
        assert!(fs::metadata(&path).unwrap().len() > 0);
    }
}
