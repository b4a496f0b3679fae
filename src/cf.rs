//! CF convention helpers shared by the Zarr and NetCDF readers
//!
//! Covers the three pieces of CF metadata the pipeline relies on:
//! time coordinates encoded as `<unit> since <reference>`, packed variables
//! (`scale_factor` / `add_offset` / `_FillValue`), and label-based slicing of
//! monotonic coordinate vectors.

use crate::errors::{AnomalyError, Result};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use std::ops::Range;

/// Timestamp precision used throughout the pipeline (nanoseconds, no zone)
pub type Timestamp = NaiveDateTime;

/// Rendering of range boundaries, e.g. `2002-06-01T09:00:00`
pub const BOUNDARY_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

const REFERENCE_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

/// Parse a timestamp such as `2002-06-01T09:00:00` or `2002-06-01`.
pub fn parse_timestamp(s: &str) -> Result<Timestamp> {
    let trimmed = s
        .trim()
        .trim_end_matches(" UTC")
        .trim_end_matches('Z')
        .trim_end_matches("+00:00")
        .trim();

    for fmt in REFERENCE_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(trimmed, fmt) {
            return Ok(ts);
        }
    }

    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .ok_or_else(|| AnomalyError::InvalidTimestamp(s.to_string()))
}

/// Format a timestamp the way range boundaries are written.
pub fn format_timestamp(ts: &Timestamp) -> String {
    ts.format(BOUNDARY_FORMAT).to_string()
}

/// Decoded form of a CF `units` attribute on a time coordinate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeUnits {
    unit_nanos: i64,
    reference: Timestamp,
}

impl TimeUnits {
    /// Parse e.g. `seconds since 1981-01-01 00:00:00 UTC`.
    pub fn parse(units: &str) -> Result<Self> {
        let (unit, reference) = units
            .split_once(" since ")
            .ok_or_else(|| AnomalyError::InvalidTimestamp(format!("unsupported time units '{units}'")))?;

        let unit_nanos = match unit.trim().to_ascii_lowercase().as_str() {
            "days" | "day" | "d" => 86_400_000_000_000,
            "hours" | "hour" | "hr" | "h" => 3_600_000_000_000,
            "minutes" | "minute" | "min" => 60_000_000_000,
            "seconds" | "second" | "sec" | "s" => 1_000_000_000,
            "milliseconds" | "millisecond" | "ms" => 1_000_000,
            "microseconds" | "microsecond" | "us" => 1_000,
            "nanoseconds" | "nanosecond" | "ns" => 1,
            other => {
                return Err(AnomalyError::InvalidTimestamp(format!(
                    "unsupported time unit '{other}' in '{units}'"
                )))
            }
        };

        Ok(Self {
            unit_nanos,
            reference: parse_timestamp(reference)?,
        })
    }

    /// Units used when writing output files.
    pub fn seconds_since_epoch() -> Self {
        Self {
            unit_nanos: 1_000_000_000,
            reference: NaiveDate::from_ymd_opt(1970, 1, 1)
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .unwrap_or_default(),
        }
    }

    /// CF string form of these units.
    pub fn to_cf_string(&self) -> String {
        let unit = match self.unit_nanos {
            86_400_000_000_000 => "days",
            3_600_000_000_000 => "hours",
            60_000_000_000 => "minutes",
            1_000_000_000 => "seconds",
            1_000_000 => "milliseconds",
            1_000 => "microseconds",
            _ => "nanoseconds",
        };
        format!("{unit} since {}", self.reference.format("%Y-%m-%d %H:%M:%S"))
    }

    /// Decode an integer offset exactly.
    pub fn decode_i64(&self, value: i64) -> Result<Timestamp> {
        let nanos = value
            .checked_mul(self.unit_nanos)
            .ok_or_else(|| AnomalyError::InvalidTimestamp(format!("time offset {value} overflows")))?;
        self.offset(nanos)
    }

    /// Decode a floating point offset; the integral part stays exact.
    pub fn decode_f64(&self, value: f64) -> Result<Timestamp> {
        if !value.is_finite() {
            return Err(AnomalyError::InvalidTimestamp(format!("non-finite time offset {value}")));
        }
        let whole = value.trunc();
        #[allow(clippy::cast_possible_truncation)]
        let frac_nanos = ((value - whole) * self.unit_nanos as f64).round() as i64;
        #[allow(clippy::cast_possible_truncation)]
        let nanos = (whole as i64)
            .checked_mul(self.unit_nanos)
            .and_then(|n| n.checked_add(frac_nanos))
            .ok_or_else(|| AnomalyError::InvalidTimestamp(format!("time offset {value} overflows")))?;
        self.offset(nanos)
    }

    /// Encode a timestamp as a (possibly fractional) offset in these units.
    pub fn encode(&self, ts: &Timestamp) -> f64 {
        let nanos = (*ts - self.reference).num_nanoseconds().unwrap_or(i64::MAX);
        nanos as f64 / self.unit_nanos as f64
    }

    fn offset(&self, nanos: i64) -> Result<Timestamp> {
        self.reference
            .checked_add_signed(Duration::nanoseconds(nanos))
            .ok_or_else(|| AnomalyError::InvalidTimestamp(format!("{nanos} ns offset out of range")))
    }
}

/// CF packing parameters of a stored variable
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PackedEncoding {
    pub scale_factor: f64,
    pub add_offset: f64,
    pub fill_value: Option<f64>,
}

impl Default for PackedEncoding {
    fn default() -> Self {
        Self {
            scale_factor: 1.0,
            add_offset: 0.0,
            fill_value: None,
        }
    }
}

impl PackedEncoding {
    /// Unpack one raw value; fill values and non-finite values become NaN.
    #[inline]
    pub fn unpack(&self, raw: f64) -> f32 {
        if !raw.is_finite() || self.fill_value.is_some_and(|fill| raw == fill) {
            return f32::NAN;
        }
        #[allow(clippy::cast_possible_truncation)]
        {
            (raw * self.scale_factor + self.add_offset) as f32
        }
    }
}

/// Index range of a monotonic coordinate whose labels fall inside
/// `[lo, hi]`, inclusive on both ends.
///
/// Works for ascending and descending coordinates. Returns `None` when no
/// label matches.
pub fn label_window<T: PartialOrd + Copy>(coord: &[T], lo: T, hi: T) -> Option<Range<usize>> {
    if coord.is_empty() || lo > hi {
        return None;
    }

    let descending = coord.len() > 1 && coord[0] > coord[coord.len() - 1];
    let (start, end) = if descending {
        (
            coord.partition_point(|&v| v > hi),
            coord.partition_point(|&v| v >= lo),
        )
    } else {
        (
            coord.partition_point(|&v| v < lo),
            coord.partition_point(|&v| v <= hi),
        )
    };

    (start < end).then_some(start..end)
}
