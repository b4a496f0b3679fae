//! End-to-end tests on a synthetic MUR-like Zarr store and climatology.
//!
//! The store spans 2003-02-20 to 2005-01-15 at 09:00 daily on a 7 x 6 grid.
//! Runs cover 2003-03-01 to 2005-01-10: a partial first year, a full leap
//! year and a partial last year.

use chrono::{Duration, NaiveDate, NaiveDateTime};
use mur_sst_anomaly::prelude::*;
use mur_sst_anomaly::storage::StoreLocation;
use serde_json::{json, Map, Value};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use zarrs::array::{ArrayBuilder, DataType, Element, FillValue};
use zarrs::array_subset::ArraySubset;
use zarrs_filesystem::FilesystemStore;

const LAT: [f64; 7] = [17.0, 18.0, 20.0, 22.0, 24.0, 25.0, 26.0];
const LON: [f64; 6] = [-161.0, -160.0, -157.0, -154.0, -150.0, -149.0];
const DAYS: usize = 9 + 306 + 366 + 10 + 5;

/// Grid cell flagged as land
const LAND: (usize, usize) = (2, 3);
/// Cell and day holding the packed fill value
const FILL: (usize, usize, usize) = (40, 4, 1);

const SCALE: f64 = 0.001;
const OFFSET: f64 = 298.15;
const CLIMATOLOGY_C: f32 = 25.0;

fn store_start() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2003, 2, 20)
        .unwrap()
        .and_hms_opt(9, 0, 0)
        .unwrap()
}

fn raw_sst(t: usize) -> i16 {
    ((t % 100) * 10) as i16
}

#[allow(clippy::too_many_arguments)]
fn write_array<T: Element>(
    store: &Arc<FilesystemStore>,
    path: &str,
    shape: Vec<u64>,
    chunks: Vec<u64>,
    data_type: DataType,
    fill_value: FillValue,
    attributes: Map<String, Value>,
    data: &[T],
) {
    let array = ArrayBuilder::new(shape.clone(), data_type, chunks.try_into().unwrap(), fill_value)
        .attributes(attributes)
        .build(store.clone(), path)
        .unwrap();
    array.store_metadata().unwrap();
    array
        .store_array_subset_elements(&ArraySubset::new_with_shape(shape), data)
        .unwrap();
}

fn attrs(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

fn write_store(path: &Path) {
    fs::create_dir_all(path).unwrap();
    let store = Arc::new(FilesystemStore::new(path).unwrap());
    let (nt, nlat, nlon) = (DAYS as u64, LAT.len() as u64, LON.len() as u64);

    let epoch = NaiveDate::from_ymd_opt(1981, 1, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap();
    let times: Vec<i64> = (0..DAYS)
        .map(|d| (store_start() + Duration::days(d as i64) - epoch).num_seconds())
        .collect();
    write_array(
        &store,
        "/time",
        vec![nt],
        vec![100],
        DataType::Int64,
        FillValue::from(0i64),
        attrs(json!({
            "units": "seconds since 1981-01-01 00:00:00 UTC",
            "_ARRAY_DIMENSIONS": ["time"],
        })),
        &times,
    );
    write_array(
        &store,
        "/lat",
        vec![nlat],
        vec![nlat],
        DataType::Float64,
        FillValue::from(f64::NAN),
        attrs(json!({ "_ARRAY_DIMENSIONS": ["lat"] })),
        &LAT,
    );
    write_array(
        &store,
        "/lon",
        vec![nlon],
        vec![nlon],
        DataType::Float64,
        FillValue::from(f64::NAN),
        attrs(json!({ "_ARRAY_DIMENSIONS": ["lon"] })),
        &LON,
    );

    let mut sst = Vec::with_capacity(DAYS * LAT.len() * LON.len());
    let mut mask = Vec::with_capacity(sst.capacity());
    for t in 0..DAYS {
        for y in 0..LAT.len() {
            for x in 0..LON.len() {
                sst.push(if (t, y, x) == FILL { -32768 } else { raw_sst(t) });
                mask.push(if (y, x) == LAND { 2i8 } else { 1i8 });
            }
        }
    }
    write_array(
        &store,
        "/analysed_sst",
        vec![nt, nlat, nlon],
        vec![50, 4, 4],
        DataType::Int16,
        FillValue::from(-32768i16),
        attrs(json!({
            "units": "kelvin",
            "scale_factor": SCALE,
            "add_offset": OFFSET,
            "_FillValue": -32768,
            "_ARRAY_DIMENSIONS": ["time", "lat", "lon"],
        })),
        &sst,
    );
    write_array(
        &store,
        "/mask",
        vec![nt, nlat, nlon],
        vec![50, 4, 4],
        DataType::Int8,
        FillValue::from(0i8),
        attrs(json!({ "_ARRAY_DIMENSIONS": ["time", "lat", "lon"] })),
        &mask,
    );
}

fn write_climatology(path: &Path) {
    let mut file = netcdf::create(path).unwrap();
    file.add_dimension("time", 366).unwrap();
    file.add_dimension("lat", LAT.len()).unwrap();
    file.add_dimension("lon", LON.len()).unwrap();

    let mut lat = file.add_variable::<f64>("lat", &["lat"]).unwrap();
    lat.put_values(&LAT, ..).unwrap();
    let mut lon = file.add_variable::<f64>("lon", &["lon"]).unwrap();
    lon.put_values(&LON, ..).unwrap();

    let mut time = file.add_variable::<f64>("time", &["time"]).unwrap();
    time.put_attribute("units", "days since 2004-01-01 09:00:00").unwrap();
    let offsets: Vec<f64> = (0..366).map(f64::from).collect();
    time.put_values(&offsets, ..).unwrap();

    let mut clim = file
        .add_variable::<f32>("analysed_sst", &["time", "lat", "lon"])
        .unwrap();
    clim.put_values(&vec![CLIMATOLOGY_C; 366 * LAT.len() * LON.len()], ..)
        .unwrap();
}

struct Fixture {
    dir: TempDir,
    config: PipelineConfig,
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let store = dir.path().join("mur.zarr");
    let clim = dir.path().join("MURClimatology.nc");
    write_store(&store);
    write_climatology(&clim);

    let mut config = PipelineConfig::default();
    config.store.url = store.to_string_lossy().into_owned();
    config.coverage_start = "2003-03-01T09:00:00".to_string();
    config.coverage_end = "2005-01-10T09:00:00".to_string();
    config.chunks = ChunkSpec { time: 30, lat: 2, lon: 3 };
    config.climatology_path = clim;
    // subset starts at grid lat index 1 and lon index 1
    config.point = GridPoint {
        lat_index: LAND.0 - 1,
        lon_index: LAND.1 - 1,
    };
    config.outputs = OutputPaths {
        mean_plot: dir.path().join("data/MURSSTAnomalyMeanRegion.png"),
        location_plot: dir.path().join("data/MURSSTAnomalyLocation.png"),
        mean_netcdf: dir.path().join("data/MURSSTAnomalyMean.nc"),
    };
    config.plot_width = 320;
    config.plot_height = 160;

    Fixture { dir, config }
}

#[test]
fn test_end_to_end_local_store() {
    let fx = fixture();
    let output = run(&fx.config).unwrap();

    let ranges = year_ranges_between(&fx.config.coverage().unwrap()).unwrap();
    assert_eq!(output.years, 3);
    assert_eq!(
        ranges.iter().map(|r| r.kind).collect::<Vec<_>>(),
        vec![YearKind::PartialStart, YearKind::FullYear, YearKind::PartialEnd]
    );
    let expected: usize = ranges.iter().map(YearRange::expected_days).sum();
    assert_eq!(expected, 306 + 366 + 10);

    let mean = &output.reduced.mean;
    assert_eq!(mean.len(), expected);
    assert!(mean.times.windows(2).all(|w| w[0] < w[1]));
    assert!(mean.values.iter().all(|v| v.is_finite()));

    // 2003-03-01 is store day 9
    let first = (OFFSET + SCALE * f64::from(raw_sst(9)) - 273.15) as f32 - CLIMATOLOGY_C;
    assert!((mean.values[0] - first).abs() < 1e-3);

    // land pixel is masked at every step
    assert!(output.reduced.point.values.iter().all(|v| v.is_nan()));

    assert!(fx.config.outputs.mean_plot.exists());
    assert!(fx.config.outputs.location_plot.exists());

    let file = netcdf::open(&fx.config.outputs.mean_netcdf).unwrap();
    let values = file
        .variable("sst_anomaly")
        .unwrap()
        .get_values::<f32, _>(..)
        .unwrap();
    assert_eq!(values.len(), expected);
    drop(fx.dir);
}

#[test]
fn test_ocean_point_series() {
    let mut fx = fixture();
    fx.config.point = GridPoint {
        lat_index: 0,
        lon_index: 0,
    };
    let output = run(&fx.config).unwrap();
    let point = &output.reduced.point;
    assert!(point.values.iter().all(|v| v.is_finite()));
    // store day 9 + 100 repeats the packed pattern
    assert!((point.values[0] - point.values[100]).abs() < 1e-4);
}

#[test]
fn test_fill_value_only_drops_one_cell() {
    let fx = fixture();
    let source: Arc<dyn GridSource> = Arc::new(
        ZarrDataset::open(&fx.config.store, &fx.config.variables, None).unwrap(),
    );
    let ranges = year_ranges_between(&fx.config.coverage().unwrap()).unwrap();
    let subset = NormalizedSubset::select(source, &ranges[0], &SubsetOptions::from(&fx.config)).unwrap();
    assert_eq!(subset.shape(), [306, 5, 4]);

    // store day 40 is local day 31 of the first range
    let block = subset.materialize(31..32).unwrap();
    let nan = block.iter().filter(|v| v.is_nan()).count();
    // the land cell and the fill cell
    assert_eq!(nan, 2);
}

#[test]
fn test_missing_climatology() {
    let mut fx = fixture();
    fx.config.climatology_path = fx.dir.path().join("absent.nc");
    assert!(matches!(
        run(&fx.config),
        Err(AnomalyError::ClimatologyNotFound(_))
    ));
}

#[test]
fn test_point_out_of_bounds() {
    let mut fx = fixture();
    fx.config.point = GridPoint::default();
    assert!(matches!(
        run(&fx.config),
        Err(AnomalyError::IndexOutOfBounds(_))
    ));
}

#[test]
fn test_missing_store_is_connectivity_error() {
    let mut fx = fixture();
    fx.config.store.url = fx.dir.path().join("nowhere.zarr").to_string_lossy().into_owned();
    assert!(matches!(
        run(&fx.config),
        Err(AnomalyError::ConnectivityError(_))
    ));
}

#[test]
fn test_consolidated_metadata_validation() {
    let fx = fixture();
    let store_path = match StoreLocation::parse(&fx.config.store.url).unwrap() {
        StoreLocation::Local(path) => path,
        StoreLocation::S3 { .. } => unreachable!(),
    };

    let mut metadata = Map::new();
    for name in ["time", "lat", "lon", "analysed_sst"] {
        metadata.insert(format!("{name}/.zarray"), json!({}));
    }
    let document = json!({ "zarr_consolidated_format": 1, "metadata": metadata });
    fs::write(store_path.join(".zmetadata"), document.to_string()).unwrap();

    let result = ZarrDataset::open(&fx.config.store, &fx.config.variables, None);
    assert!(matches!(result, Err(AnomalyError::SchemaError(_))));

    let mut lenient = fx.config.store.clone();
    lenient.consolidated = false;
    assert!(ZarrDataset::open(&lenient, &fx.config.variables, None).is_ok());
}

#[test]
fn test_unknown_variable_is_schema_error() {
    let mut fx = fixture();
    fx.config.variables.mask = "sea_ice_fraction".to_string();
    let result = ZarrDataset::open(&fx.config.store, &fx.config.variables, None);
    assert!(matches!(result, Err(AnomalyError::SchemaError(_))));
}
