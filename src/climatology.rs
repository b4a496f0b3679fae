//! Daily climatology loading and per-year alignment
//!
//! The climatology is a 366-step (leap calendar) daily reference stored in a
//! local NetCDF file. Opening it only reads coordinates; data is read per
//! time block once an anomaly block is evaluated.

use crate::cf::{label_window, PackedEncoding, TimeUnits, Timestamp};
use crate::errors::{AnomalyError, Result};
use crate::subset::NormalizedSubset;
use crate::years::YearKind;
use chrono::{Datelike, NaiveDate};
use log::debug;
use ndarray::Array3;
use netcdf::{AttributeValue, Variable};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Calendar year used to place dates when Feb-29 is kept
const LEAP_CALENDAR_YEAR: i32 = 2004;
/// Calendar year used to place dates once Feb-29 has been dropped
const NOLEAP_CALENDAR_YEAR: i32 = 2001;
/// Position of Feb-29 in a 366-day calendar without a decoded time axis
const LEAP_DAY_POSITION: usize = 59;

/// Label tolerance when matching subset coordinates against the climatology
const COORD_TOLERANCE: f64 = 1e-6;

/// Handle to the climatology variable of a NetCDF file
#[derive(Debug)]
pub struct Climatology {
    path: PathBuf,
    variable: String,
    len: usize,
    times: Option<Vec<Timestamp>>,
    lat: Vec<f64>,
    lon: Vec<f64>,
    encoding: PackedEncoding,
}

impl Climatology {
    /// Open `path` and locate the climatology variable.
    ///
    /// Uses `variable` when given, otherwise the first three-dimensional
    /// variable in the file.
    pub fn open(path: &Path, variable: Option<&str>) -> Result<Self> {
        if !path.exists() {
            return Err(AnomalyError::ClimatologyNotFound(path.to_path_buf()));
        }

        let file = netcdf::open(path)?;
        let var = match variable {
            Some(name) => file
                .variable(name)
                .ok_or_else(|| AnomalyError::VariableNotFound { var: name.to_string() })?,
            None => file
                .variables()
                .find(|v| v.dimensions().len() == 3)
                .ok_or_else(|| {
                    AnomalyError::SchemaError(format!(
                        "no (time, lat, lon) variable in {}",
                        path.display()
                    ))
                })?,
        };

        let dims = var.dimensions();
        if dims.len() != 3 {
            return Err(AnomalyError::SchemaError(format!(
                "climatology variable '{}' has {} dimensions, expected 3",
                var.name(),
                dims.len()
            )));
        }
        let dim_names: Vec<String> = dims.iter().map(|d| d.name()).collect();
        let len = dims[0].len();

        let read_coordinate = |name: &str| -> Result<Vec<f64>> {
            let coord = file.variable(name).ok_or_else(|| {
                AnomalyError::SchemaError(format!("climatology coordinate '{name}' missing"))
            })?;
            Ok(coord.get_values::<f64, _>(..)?)
        };
        let lat = read_coordinate(&dim_names[1])?;
        let lon = read_coordinate(&dim_names[2])?;

        let times = match file.variable(&dim_names[0]) {
            Some(time_var) => decode_times(&time_var)?,
            None => None,
        };

        let climatology = Self {
            path: path.to_path_buf(),
            variable: var.name(),
            len,
            times,
            lat,
            lon,
            encoding: packed_encoding(&var),
        };
        debug!(
            "Climatology '{}' from {}: {} days, {} x {} cells, time axis decoded: {}",
            climatology.variable,
            climatology.path.display(),
            climatology.len,
            climatology.lat.len(),
            climatology.lon.len(),
            climatology.times.is_some()
        );
        Ok(climatology)
    }

    pub fn variable(&self) -> &str {
        &self.variable
    }

    /// Number of daily steps in the file
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn lat(&self) -> &[f64] {
        &self.lat
    }

    pub fn lon(&self) -> &[f64] {
        &self.lon
    }

    /// Position of Feb-29, from the decoded time axis when available.
    pub fn leap_day_index(&self) -> Option<usize> {
        match &self.times {
            Some(times) => times.iter().position(|t| t.month() == 2 && t.day() == 29),
            None => (self.len == 366).then_some(LEAP_DAY_POSITION),
        }
    }

    /// Align the climatology with `subset`.
    ///
    /// Drops Feb-29 unless the subset itself has a Feb-29 step, restricts
    /// partial years to the days they cover, and selects the subset's
    /// spatial window. The result carries the subset's time labels.
    pub fn align(self: &Arc<Self>, subset: &NormalizedSubset) -> Result<AlignedClimatology> {
        let range = subset.range();
        let [nt, nlat, nlon] = subset.shape();

        let mut days: Vec<usize> = (0..self.len).collect();
        let drop_leap = !subset
            .times()
            .iter()
            .any(|t| t.month() == 2 && t.day() == 29);
        if drop_leap {
            if let Some(leap) = self.leap_day_index() {
                days.remove(leap);
            }
        }

        if range.kind != YearKind::FullYear {
            let calendar_year = if drop_leap { NOLEAP_CALENDAR_YEAR } else { LEAP_CALENDAR_YEAR };
            let first = calendar_position(range.start.date(), calendar_year)?;
            let last = calendar_position(range.end.date(), calendar_year)?;
            if first > last || last >= days.len() {
                return Err(AnomalyError::ShapeMismatchError(format!(
                    "{} ({}) needs climatology days {first}..={last}, only {} available",
                    range.year,
                    range.kind,
                    days.len()
                )));
            }
            days = days[first..=last].to_vec();
        }

        if days.len() != nt {
            return Err(AnomalyError::ShapeMismatchError(format!(
                "{} ({}): subset has {nt} time steps, aligned climatology has {}",
                range.year,
                range.kind,
                days.len()
            )));
        }

        let lat = self.spatial_window(&self.lat, subset.lat(), "lat")?;
        let lon = self.spatial_window(&self.lon, subset.lon(), "lon")?;
        if lat.len() != nlat || lon.len() != nlon {
            return Err(AnomalyError::ShapeMismatchError(format!(
                "subset grid {nlat} x {nlon}, climatology window {} x {}",
                lat.len(),
                lon.len()
            )));
        }

        Ok(AlignedClimatology {
            climatology: Arc::clone(self),
            day_indices: days,
            times: subset.times().to_vec(),
            lat,
            lon,
        })
    }

    fn spatial_window(&self, coord: &[f64], labels: &[f64], axis: &str) -> Result<Range<usize>> {
        let (Some(&first), Some(&last)) = (labels.first(), labels.last()) else {
            return Err(AnomalyError::EmptySelection(format!("subset has no {axis} labels")));
        };
        label_window(
            coord,
            first.min(last) - COORD_TOLERANCE,
            first.max(last) + COORD_TOLERANCE,
        )
        .ok_or_else(|| {
            AnomalyError::ShapeMismatchError(format!(
                "climatology {axis} does not cover {first}..{last}"
            ))
        })
    }

    /// Read `day_indices` over the (lat, lon) window, decoding packed values.
    ///
    /// Consecutive indices are fetched with a single hyperslab read.
    pub fn read_days(&self, day_indices: &[usize], lat: Range<usize>, lon: Range<usize>) -> Result<Array3<f32>> {
        let file = netcdf::open(&self.path)?;
        let var = file
            .variable(&self.variable)
            .ok_or_else(|| AnomalyError::VariableNotFound {
                var: self.variable.clone(),
            })?;

        let mut values = Vec::with_capacity(day_indices.len() * lat.len() * lon.len());
        for run in contiguous_runs(day_indices) {
            let raw = var.get_values::<f64, _>((run, lat.clone(), lon.clone()))?;
            values.extend(raw.into_iter().map(|v| self.encoding.unpack(v)));
        }

        Ok(Array3::from_shape_vec(
            (day_indices.len(), lat.len(), lon.len()),
            values,
        )?)
    }
}

/// Climatology days matched one-to-one with a subset's time steps
#[derive(Debug)]
pub struct AlignedClimatology {
    climatology: Arc<Climatology>,
    day_indices: Vec<usize>,
    times: Vec<Timestamp>,
    lat: Range<usize>,
    lon: Range<usize>,
}

impl AlignedClimatology {
    pub fn shape(&self) -> [usize; 3] {
        [self.day_indices.len(), self.lat.len(), self.lon.len()]
    }

    /// Time labels, identical to the subset's
    pub fn times(&self) -> &[Timestamp] {
        &self.times
    }

    /// Climatology positions backing each time step
    pub fn day_indices(&self) -> &[usize] {
        &self.day_indices
    }

    /// Read the aligned values for local time steps `time`.
    pub fn read(&self, time: Range<usize>) -> Result<Array3<f32>> {
        let days = self.day_indices.get(time.clone()).ok_or_else(|| {
            AnomalyError::IndexOutOfBounds(format!(
                "time block {time:?} outside aligned climatology of {} days",
                self.day_indices.len()
            ))
        })?;
        self.climatology.read_days(days, self.lat.clone(), self.lon.clone())
    }
}

/// Zero-based day of `date` in a calendar of `calendar_year`.
fn calendar_position(date: NaiveDate, calendar_year: i32) -> Result<usize> {
    NaiveDate::from_ymd_opt(calendar_year, date.month(), date.day())
        .map(|d| d.ordinal0() as usize)
        .ok_or_else(|| {
            AnomalyError::ShapeMismatchError(format!(
                "{date} has no counterpart once Feb-29 is dropped"
            ))
        })
}

fn contiguous_runs(indices: &[usize]) -> Vec<Range<usize>> {
    let mut runs: Vec<Range<usize>> = Vec::new();
    for &i in indices {
        match runs.last_mut() {
            Some(run) if run.end == i => run.end += 1,
            _ => runs.push(i..i + 1),
        }
    }
    runs
}

fn attribute_f64(var: &Variable, name: &str) -> Option<f64> {
    match var.attribute(name)?.value().ok()? {
        AttributeValue::Double(v) => Some(v),
        AttributeValue::Float(v) => Some(f64::from(v)),
        AttributeValue::Int(v) => Some(f64::from(v)),
        AttributeValue::Short(v) => Some(f64::from(v)),
        AttributeValue::Schar(v) => Some(f64::from(v)),
        AttributeValue::Uchar(v) => Some(f64::from(v)),
        _ => None,
    }
}

fn packed_encoding(var: &Variable) -> PackedEncoding {
    PackedEncoding {
        scale_factor: attribute_f64(var, "scale_factor").unwrap_or(1.0),
        add_offset: attribute_f64(var, "add_offset").unwrap_or(0.0),
        fill_value: attribute_f64(var, "_FillValue").or_else(|| attribute_f64(var, "missing_value")),
    }
}

fn decode_times(time_var: &Variable) -> Result<Option<Vec<Timestamp>>> {
    let units = match time_var.attribute("units").map(|a| a.value()) {
        Some(Ok(AttributeValue::Str(units))) => units,
        _ => return Ok(None),
    };
    let units = TimeUnits::parse(&units)?;
    let offsets = time_var.get_values::<f64, _>(..)?;
    offsets
        .into_iter()
        .map(|v| units.decode_f64(v))
        .collect::<Result<Vec<_>>>()
        .map(Some)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::cf::parse_timestamp;
    use crate::config::{BoundingBox, ChunkSpec};
    use crate::data_source::memory::MemoryGrid;
    use crate::data_source::GridSource;
    use crate::subset::{Normalization, SubsetOptions};
    use crate::years::{year_ranges_between, Coverage};

    /// 366 x 3 x 2 climatology whose values equal the day position
    pub(crate) fn write_climatology(path: &Path, with_time: bool) {
        let mut file = netcdf::create(path).unwrap();
        file.add_dimension("time", 366).unwrap();
        file.add_dimension("lat", 3).unwrap();
        file.add_dimension("lon", 2).unwrap();

        let mut lat = file.add_variable::<f64>("lat", &["lat"]).unwrap();
        lat.put_values(&[18.0, 20.0, 22.0], ..).unwrap();
        let mut lon = file.add_variable::<f64>("lon", &["lon"]).unwrap();
        lon.put_values(&[-160.0, -155.0], ..).unwrap();

        if with_time {
            let mut time = file.add_variable::<f64>("time", &["time"]).unwrap();
            time.put_attribute("units", "days since 2004-01-01 09:00:00").unwrap();
            let offsets: Vec<f64> = (0..366).map(f64::from).collect();
            time.put_values(&offsets, ..).unwrap();
        }

        let mut sst = file
            .add_variable::<f32>("analysed_sst", &["time", "lat", "lon"])
            .unwrap();
        #[allow(clippy::cast_precision_loss)]
        let values: Vec<f32> = (0..366 * 6).map(|i| (i / 6) as f32).collect();
        sst.put_values(&values, ..).unwrap();
    }

    /// One subset per year range of `start..=end` on a daily grid matching
    /// the climatology cells, SST 300 K everywhere
    pub(crate) fn subsets_between(start: &str, end: &str) -> Vec<NormalizedSubset> {
        let coverage = Coverage::parse(start, end).unwrap();
        let days = (coverage.end.date() - coverage.start.date()).num_days() as usize + 1;
        let source: Arc<dyn GridSource> = Arc::new(MemoryGrid::daily(
            coverage.start,
            days,
            vec![18.0, 20.0, 22.0],
            vec![-160.0, -155.0],
            |_, _, _| 300.0,
            |_, _, _| 1.0,
        ));
        let options = SubsetOptions {
            bbox: BoundingBox {
                min_lat: 18.0,
                max_lat: 22.0,
                min_lon: -160.0,
                max_lon: -155.0,
            },
            chunks: ChunkSpec::default(),
            sst_variable: "analysed_sst".to_string(),
            mask_variable: "mask".to_string(),
            normalization: Normalization::default(),
        };
        year_ranges_between(&coverage)
            .unwrap()
            .iter()
            .map(|range| NormalizedSubset::select(Arc::clone(&source), range, &options).unwrap())
            .collect()
    }

    /// Subsets for 2002 (from June 1), 2003 and 2004
    pub(crate) fn subsets() -> Vec<NormalizedSubset> {
        subsets_between("2002-06-01T09:00:00", "2004-12-31T09:00:00")
    }

    fn open_climatology(dir: &tempfile::TempDir) -> Arc<Climatology> {
        let path = dir.path().join("clim.nc");
        write_climatology(&path, true);
        Arc::new(Climatology::open(&path, None).unwrap())
    }

    #[test]
    fn test_align_partial_and_full_years() {
        for with_time in [true, false] {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("clim.nc");
            write_climatology(&path, with_time);
            let clim = Arc::new(Climatology::open(&path, None).unwrap());
            assert_eq!(clim.variable(), "analysed_sst");
            assert_eq!(clim.leap_day_index(), Some(59));

            let subsets = subsets();

            // June 1 in a calendar without Feb-29
            let partial = clim.align(&subsets[0]).unwrap();
            assert_eq!(partial.shape(), [214, 3, 2]);
            assert_eq!(partial.day_indices()[0], 152);
            assert_eq!(partial.times(), subsets[0].times());
            let block = partial.read(0..2).unwrap();
            assert_eq!(block[[0, 0, 0]], 152.0);
            assert_eq!(block[[1, 2, 1]], 153.0);

            let common = clim.align(&subsets[1]).unwrap();
            assert_eq!(common.shape()[0], 365);
            assert!(!common.day_indices().contains(&59));
            let block = common.read(58..60).unwrap();
            assert_eq!(block[[0, 0, 0]], 58.0);
            assert_eq!(block[[1, 0, 0]], 60.0);

            let leap = clim.align(&subsets[2]).unwrap();
            assert_eq!(leap.shape()[0], 366);
            assert_eq!(leap.day_indices()[59], 59);
        }
    }

    #[test]
    fn test_align_partial_leap_year_keeps_feb29() {
        let dir = tempfile::tempdir().unwrap();
        let clim = open_climatology(&dir);

        // 2004 ends on Mar 15 and includes Feb-29
        let subsets = subsets_between("2003-01-01T09:00:00", "2004-03-15T09:00:00");
        let aligned = clim.align(&subsets[1]).unwrap();
        assert_eq!(aligned.shape(), [75, 3, 2]);
        assert_eq!(aligned.day_indices(), (0..75).collect::<Vec<_>>().as_slice());
        let block = aligned.read(58..61).unwrap();
        assert_eq!(block[[0, 0, 0]], 58.0);
        assert_eq!(block[[1, 0, 0]], 59.0);
        assert_eq!(block[[2, 0, 0]], 60.0);

        // 2004 starts on Feb 1
        let subsets = subsets_between("2004-02-01T09:00:00", "2004-12-31T09:00:00");
        let aligned = clim.align(&subsets[0]).unwrap();
        assert_eq!(aligned.shape()[0], 335);
        assert_eq!(aligned.day_indices().first(), Some(&31));
        assert_eq!(aligned.day_indices().last(), Some(&365));
        assert!(aligned.day_indices().contains(&59));
    }

    #[test]
    fn test_align_partial_end_truncates_to_covered_days() {
        let dir = tempfile::tempdir().unwrap();
        let clim = open_climatology(&dir);

        let subsets = subsets_between("2020-01-01T09:00:00", "2020-01-20T09:00:00");
        assert_eq!(subsets[0].range().kind, YearKind::PartialEnd);
        let aligned = clim.align(&subsets[0]).unwrap();
        assert_eq!(aligned.shape()[0], 20);
        assert_eq!(aligned.day_indices(), (0..20).collect::<Vec<_>>().as_slice());
    }

    #[test]
    fn test_align_rejects_foreign_grid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clim.nc");
        write_climatology(&path, true);
        let clim = Arc::new(Climatology::open(&path, Some("analysed_sst")).unwrap());

        let source: Arc<dyn GridSource> = Arc::new(MemoryGrid::daily(
            parse_timestamp("2003-01-01T09:00:00").unwrap(),
            365,
            vec![30.0, 31.0],
            vec![-160.0, -155.0],
            |_, _, _| 300.0,
            |_, _, _| 1.0,
        ));
        let options = SubsetOptions {
            bbox: BoundingBox {
                min_lat: 30.0,
                max_lat: 31.0,
                min_lon: -160.0,
                max_lon: -155.0,
            },
            chunks: ChunkSpec::default(),
            sst_variable: "analysed_sst".to_string(),
            mask_variable: "mask".to_string(),
            normalization: Normalization::default(),
        };
        let coverage = Coverage::parse("2003-01-01T09:00:00", "2003-12-31T09:00:00").unwrap();
        let range = year_ranges_between(&coverage).unwrap()[0];
        let subset = NormalizedSubset::select(source, &range, &options).unwrap();
        assert!(matches!(
            clim.align(&subset),
            Err(AnomalyError::ShapeMismatchError(_))
        ));
    }

    #[test]
    fn test_calendar_position() {
        let june1 = NaiveDate::from_ymd_opt(2002, 6, 1).unwrap();
        assert_eq!(calendar_position(june1, NOLEAP_CALENDAR_YEAR).unwrap(), 151);
        assert_eq!(calendar_position(june1, LEAP_CALENDAR_YEAR).unwrap(), 152);

        let jan20 = NaiveDate::from_ymd_opt(2020, 1, 20).unwrap();
        assert_eq!(calendar_position(jan20, NOLEAP_CALENDAR_YEAR).unwrap(), 19);

        let feb29 = NaiveDate::from_ymd_opt(2004, 2, 29).unwrap();
        assert!(calendar_position(feb29, NOLEAP_CALENDAR_YEAR).is_err());
    }

    #[test]
    fn test_contiguous_runs() {
        assert_eq!(contiguous_runs(&[57, 58, 60, 61, 62]), vec![57..59, 60..63]);
        assert!(contiguous_runs(&[]).is_empty());
    }

    #[test]
    fn test_missing_file() {
        let result = Climatology::open(Path::new("/nonexistent/MURClimatology.nc"), None);
        assert!(matches!(result, Err(AnomalyError::ClimatologyNotFound(_))));
    }
}
