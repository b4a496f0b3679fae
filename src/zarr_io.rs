//! Zarr I/O operations
//!
//! Opens the gridded SST dataset from a Zarr store (remote or local) without
//! reading any data chunks: only coordinate arrays are loaded eagerly. Data
//! variables are decoded on demand through [`GridSource::read_window`].

use crate::cf::{PackedEncoding, TimeUnits, Timestamp};
use crate::config::{StoreConfig, VariableNames};
use crate::data_source::{GridCoordinates, GridSource, GridWindow};
use crate::errors::{AnomalyError, Result};
use crate::storage::{open_store, StoreLocation};
use log::{debug, info};
use ndarray::Array3;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use tokio::runtime::Handle;
use zarrs::array::{Array, ArrayCreateError, DataType};
use zarrs::array_subset::ArraySubset;
use zarrs::storage::{ReadableStorage, ReadableStorageTraits, StoreKey};

type ZarrArray = Array<dyn ReadableStorageTraits>;

/// One opened data variable and its CF packing
struct ZarrVariable {
    array: ZarrArray,
    encoding: PackedEncoding,
}

/// Lazily read (time, lat, lon) dataset backed by a Zarr store
pub struct ZarrDataset {
    root: String,
    coordinates: GridCoordinates,
    variables: HashMap<String, ZarrVariable>,
}

impl ZarrDataset {
    /// Open the store described by `config` and the variables in `names`.
    ///
    /// `runtime` drives object store requests and is only needed for `s3://`
    /// locations.
    pub fn open(config: &StoreConfig, names: &VariableNames, runtime: Option<Handle>) -> Result<Self> {
        let location = StoreLocation::parse(&config.url)?;
        let storage = open_store(&location, config, runtime)?;
        Self::from_storage(storage, location.root(), names, config.consolidated)
    }

    /// Open the dataset from an existing storage handle.
    pub fn from_storage(
        storage: ReadableStorage,
        root: &str,
        names: &VariableNames,
        consolidated: bool,
    ) -> Result<Self> {
        let root = root.trim_matches('/').to_string();
        let data_names = [names.sst.as_str(), names.mask.as_str()];

        if consolidated {
            let required = [
                names.time.as_str(),
                names.lat.as_str(),
                names.lon.as_str(),
                names.sst.as_str(),
                names.mask.as_str(),
            ];
            check_consolidated(&storage, &root, &required)?;
        }

        let times = read_time_coordinate(&open_array(&storage, &root, &names.time)?, &names.time)?;
        let lat = read_all(&open_array(&storage, &root, &names.lat)?)?;
        let lon = read_all(&open_array(&storage, &root, &names.lon)?)?;
        let coordinates = GridCoordinates { times, lat, lon };
        let expected_dims = [names.time.as_str(), names.lat.as_str(), names.lon.as_str()];

        let mut variables = HashMap::new();
        for name in data_names {
            let array = open_array(&storage, &root, name)?;
            check_layout(&array, name, &coordinates, &expected_dims)?;
            let encoding = packed_encoding(&array);
            debug!("Variable '{name}' encoding: {encoding:?}");
            variables.insert(name.to_string(), ZarrVariable { array, encoding });
        }

        Ok(Self {
            root,
            coordinates,
            variables,
        })
    }

    /// Log the dataset schema.
    pub fn describe(&self) {
        let [nt, nlat, nlon] = self.coordinates.shape();
        info!(
            "Dataset '/{}': time[{nt}] x lat[{nlat}] x lon[{nlon}]",
            self.root
        );
        if let (Some(first), Some(last)) = (self.coordinates.times.first(), self.coordinates.times.last()) {
            info!("  time coverage: {first} .. {last}");
        }

        let mut names: Vec<&String> = self.variables.keys().collect();
        names.sort();
        for name in names {
            let var = &self.variables[name];
            info!(
                "  {name}: shape {:?}, dtype {:?}, scale {} offset {}",
                var.array.shape(),
                var.array.data_type(),
                var.encoding.scale_factor,
                var.encoding.add_offset
            );
        }
    }
}

impl GridSource for ZarrDataset {
    fn coordinates(&self) -> &GridCoordinates {
        &self.coordinates
    }

    fn read_window(&self, variable: &str, window: &GridWindow) -> Result<Array3<f32>> {
        let var = self
            .variables
            .get(variable)
            .ok_or_else(|| AnomalyError::VariableNotFound {
                var: variable.to_string(),
            })?;

        let subset = ArraySubset::new_with_ranges(&[
            window.time.start as u64..window.time.end as u64,
            window.lat.start as u64..window.lat.end as u64,
            window.lon.start as u64..window.lon.end as u64,
        ]);

        let decoded: Vec<f32> = read_elements(&var.array, &subset)?
            .into_iter()
            .map(|raw| var.encoding.unpack(raw))
            .collect();

        let [nt, nlat, nlon] = window.shape();
        Ok(Array3::from_shape_vec((nt, nlat, nlon), decoded)?)
    }
}

fn node_path(root: &str, name: &str) -> String {
    if root.is_empty() {
        format!("/{name}")
    } else {
        format!("/{root}/{name}")
    }
}

fn open_array(storage: &ReadableStorage, root: &str, name: &str) -> Result<ZarrArray> {
    let path = node_path(root, name);
    Array::open(storage.clone(), &path).map_err(|e| match e {
        ArrayCreateError::StorageError(err) => {
            AnomalyError::ConnectivityError(format!("Failed to read metadata of '{path}': {err}"))
        }
        other => AnomalyError::SchemaError(format!("Failed to open array '{path}': {other}")),
    })
}

/// Validate required variables against the consolidated metadata document.
///
/// Stores without `.zmetadata` are accepted; their arrays are then checked
/// individually when opened.
fn check_consolidated(storage: &ReadableStorage, root: &str, required: &[&str]) -> Result<()> {
    let key_name = if root.is_empty() {
        ".zmetadata".to_string()
    } else {
        format!("{root}/.zmetadata")
    };
    let key = StoreKey::new(key_name.clone())
        .map_err(|e| AnomalyError::SchemaError(format!("Invalid metadata key '{key_name}': {e}")))?;

    let bytes = storage
        .get(&key)
        .map_err(|e| AnomalyError::ConnectivityError(format!("Failed to fetch '{key_name}': {e}")))?;
    let Some(bytes) = bytes else {
        debug!("No consolidated metadata at '{key_name}'");
        return Ok(());
    };

    let document: JsonValue = serde_json::from_slice(&bytes)
        .map_err(|e| AnomalyError::SchemaError(format!("Malformed '{key_name}': {e}")))?;
    let entries = document
        .get("metadata")
        .and_then(JsonValue::as_object)
        .ok_or_else(|| AnomalyError::SchemaError(format!("'{key_name}' has no metadata object")))?;

    for name in required {
        if !entries.contains_key(&format!("{name}/.zarray")) {
            return Err(AnomalyError::SchemaError(format!(
                "Variable '{name}' missing from consolidated metadata"
            )));
        }
    }

    debug!("Consolidated metadata lists {} entries", entries.len());
    Ok(())
}

fn check_layout(
    array: &ZarrArray,
    name: &str,
    coordinates: &GridCoordinates,
    expected_dims: &[&str; 3],
) -> Result<()> {
    let shape: Vec<usize> = array.shape().iter().map(|&s| s as usize).collect();
    if shape != coordinates.shape() {
        return Err(AnomalyError::SchemaError(format!(
            "Variable '{name}' has shape {shape:?}, coordinates imply {:?}",
            coordinates.shape()
        )));
    }

    let dims = array
        .attributes()
        .get("_ARRAY_DIMENSIONS")
        .and_then(JsonValue::as_array)
        .map(|dims| dims.iter().filter_map(JsonValue::as_str).collect::<Vec<_>>());
    if let Some(dims) = dims {
        if dims != expected_dims {
            return Err(AnomalyError::SchemaError(format!(
                "Variable '{name}' has dimensions {dims:?}, expected {expected_dims:?}"
            )));
        }
    }
    Ok(())
}

fn attribute_f64(array: &ZarrArray, key: &str) -> Option<f64> {
    array.attributes().get(key).and_then(JsonValue::as_f64)
}

fn packed_encoding(array: &ZarrArray) -> PackedEncoding {
    PackedEncoding {
        scale_factor: attribute_f64(array, "scale_factor").unwrap_or(1.0),
        add_offset: attribute_f64(array, "add_offset").unwrap_or(0.0),
        fill_value: attribute_f64(array, "_FillValue")
            .or_else(|| attribute_f64(array, "missing_value"))
            .or_else(|| array_fill_value(array)),
    }
}

/// Fill value declared in the array metadata, as f64.
fn array_fill_value(array: &ZarrArray) -> Option<f64> {
    let bytes = array.fill_value().as_ne_bytes();

    macro_rules! fill_as {
        ($t:ty) => {
            bytes.try_into().ok().map(|b| <$t>::from_ne_bytes(b) as f64)
        };
    }

    match array.data_type() {
        DataType::Int8 => fill_as!(i8),
        DataType::Int16 => fill_as!(i16),
        DataType::Int32 => fill_as!(i32),
        DataType::Int64 => fill_as!(i64),
        DataType::UInt8 => fill_as!(u8),
        DataType::UInt16 => fill_as!(u16),
        DataType::UInt32 => fill_as!(u32),
        DataType::UInt64 => fill_as!(u64),
        DataType::Float32 => fill_as!(f32),
        DataType::Float64 => fill_as!(f64),
        _ => None,
    }
}

/// Retrieve `subset` as f64 regardless of the stored numeric type.
fn read_elements(array: &ZarrArray, subset: &ArraySubset) -> Result<Vec<f64>> {
    macro_rules! retrieve_as_f64 {
        ($t:ty) => {
            array
                .retrieve_array_subset_elements::<$t>(subset)?
                .into_iter()
                .map(|v| v as f64)
                .collect()
        };
    }

    let values = match array.data_type() {
        DataType::Int8 => retrieve_as_f64!(i8),
        DataType::Int16 => retrieve_as_f64!(i16),
        DataType::Int32 => retrieve_as_f64!(i32),
        DataType::Int64 => retrieve_as_f64!(i64),
        DataType::UInt8 => retrieve_as_f64!(u8),
        DataType::UInt16 => retrieve_as_f64!(u16),
        DataType::UInt32 => retrieve_as_f64!(u32),
        DataType::UInt64 => retrieve_as_f64!(u64),
        DataType::Float32 => retrieve_as_f64!(f32),
        DataType::Float64 => array.retrieve_array_subset_elements::<f64>(subset)?,
        other => {
            return Err(AnomalyError::SchemaError(format!(
                "Unsupported data type {other:?}"
            )))
        }
    };
    Ok(values)
}

fn read_all(array: &ZarrArray) -> Result<Vec<f64>> {
    let subset = ArraySubset::new_with_shape(array.shape().to_vec());
    read_elements(array, &subset)
}

fn read_time_coordinate(array: &ZarrArray, name: &str) -> Result<Vec<Timestamp>> {
    let units = array
        .attributes()
        .get("units")
        .and_then(JsonValue::as_str)
        .ok_or_else(|| AnomalyError::SchemaError(format!("Coordinate '{name}' has no units attribute")))?;
    let units = TimeUnits::parse(units)?;
    let subset = ArraySubset::new_with_shape(array.shape().to_vec());

    match array.data_type() {
        DataType::Int64 => array
            .retrieve_array_subset_elements::<i64>(&subset)?
            .into_iter()
            .map(|v| units.decode_i64(v))
            .collect(),
        DataType::Int32 => array
            .retrieve_array_subset_elements::<i32>(&subset)?
            .into_iter()
            .map(|v| units.decode_i64(i64::from(v)))
            .collect(),
        _ => read_elements(array, &subset)?
            .into_iter()
            .map(|v| units.decode_f64(v))
            .collect(),
    }
}
