//! # Gridded Time Series
//!
//! Loads a `(time, lat, lon)` NetCDF variable into a long-format Polars
//! [`DataFrame`] with one row per grid cell and time step:
//!
//! | column       | type   | content                              |
//! |--------------|--------|--------------------------------------|
//! | `lat`        | f64    | latitude of the cell                 |
//! | `lon`        | f64    | longitude of the cell                |
//! | `time`       | f64    | raw time coordinate                  |
//! | `year`       | i32    | calendar year decoded from `time`    |
//! | `<variable>` | f64    | value, null when not a finite number |
//!
//! The dataset's no-data sentinel is read from the variable's `_FillValue`
//! (or `missing_value`) attribute. Loading never masks; that is the job of
//! [`climatology::mask_sentinel`](crate::climatology::mask_sentinel).

use crate::error::{PipelineError, PipelineResult};
use crate::time::TimeAxis;
use log::{debug, warn};
use polars::prelude::*;
use std::path::Path;

pub const LAT_COLUMN: &str = "lat";
pub const LON_COLUMN: &str = "lon";
pub const TIME_COLUMN: &str = "time";
pub const YEAR_COLUMN: &str = "year";

/// Attributes checked, in order, for the no-data sentinel.
pub const SENTINEL_ATTRIBUTES: [&str; 2] = ["_FillValue", "missing_value"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Axis {
    Time,
    Lat,
    Lon,
}

impl Axis {
    fn of(dimension: &str) -> Option<Axis> {
        match dimension.to_lowercase().as_str() {
            "time" => Some(Axis::Time),
            "lat" | "latitude" => Some(Axis::Lat),
            "lon" | "longitude" => Some(Axis::Lon),
            _ => None,
        }
    }
}

/// One `(lat, lon, time)` record of a gridded time series.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridRecord {
    pub lat: f64,
    pub lon: f64,
    pub time: f64,
    pub year: i32,
    pub value: Option<f64>,
}

impl GridRecord {
    pub fn new(lat: f64, lon: f64, year: i32, value: Option<f64>) -> Self {
        Self {
            lat,
            lon,
            time: year as f64,
            year,
            value,
        }
    }
}

/// A loaded variable together with its sentinel.
#[derive(Debug, Clone)]
pub struct GridDataset {
    pub variable: String,
    /// No-data sentinel from the file metadata, if it declares one
    pub sentinel: Option<f64>,
    pub frame: DataFrame,
}

impl GridDataset {
    /// Builds a dataset from in-memory records.
    pub fn from_records(
        variable: &str,
        sentinel: Option<f64>,
        records: &[GridRecord],
    ) -> PipelineResult<Self> {
        let frame = build_frame(
            variable,
            records.iter().map(|r| r.lat).collect(),
            records.iter().map(|r| r.lon).collect(),
            records.iter().map(|r| r.time).collect(),
            records.iter().map(|r| r.year).collect(),
            records.iter().map(|r| r.value).collect(),
        )?;
        Ok(Self {
            variable: variable.to_string(),
            sentinel,
            frame,
        })
    }

    pub fn len(&self) -> usize {
        self.frame.height()
    }

    pub fn is_empty(&self) -> bool {
        self.frame.height() == 0
    }
}

fn build_frame(
    variable: &str,
    lats: Vec<f64>,
    lons: Vec<f64>,
    times: Vec<f64>,
    years: Vec<i32>,
    values: Vec<Option<f64>>,
) -> PolarsResult<DataFrame> {
    DataFrame::new(vec![
        Series::new(LAT_COLUMN.into(), lats).into(),
        Series::new(LON_COLUMN.into(), lons).into(),
        Series::new(TIME_COLUMN.into(), times).into(),
        Series::new(YEAR_COLUMN.into(), years).into(),
        Series::new(variable.into(), values).into(),
    ])
}

/// Reads a numeric attribute as `f64`, whatever its stored type.
///
/// Vector attributes yield their first element.
pub fn numeric_attribute(var: &netcdf::Variable, name: &str) -> Option<f64> {
    var.attribute_value(name)
        .and_then(|r| r.ok())
        .and_then(|v| attribute_as_f64(&v))
}

pub(crate) fn attribute_as_f64(value: &netcdf::AttributeValue) -> Option<f64> {
    use netcdf::AttributeValue as V;
    match value {
        V::Uchar(v) => Some(*v as f64),
        V::Schar(v) => Some(*v as f64),
        V::Ushort(v) => Some(*v as f64),
        V::Short(v) => Some(*v as f64),
        V::Uint(v) => Some(*v as f64),
        V::Int(v) => Some(*v as f64),
        V::Ulonglong(v) => Some(*v as f64),
        V::Longlong(v) => Some(*v as f64),
        V::Float(v) => Some(*v as f64),
        V::Double(v) => Some(*v),
        V::Uchars(v) => v.first().map(|x| *x as f64),
        V::Schars(v) => v.first().map(|x| *x as f64),
        V::Ushorts(v) => v.first().map(|x| *x as f64),
        V::Shorts(v) => v.first().map(|x| *x as f64),
        V::Uints(v) => v.first().map(|x| *x as f64),
        V::Ints(v) => v.first().map(|x| *x as f64),
        V::Ulonglongs(v) => v.first().map(|x| *x as f64),
        V::Longlongs(v) => v.first().map(|x| *x as f64),
        V::Floats(v) => v.first().map(|x| *x as f64),
        V::Doubles(v) => v.first().copied(),
        _ => None,
    }
}

/// Reads a text attribute.
pub fn string_attribute(var: &netcdf::Variable, name: &str) -> Option<String> {
    var.attribute_value(name)
        .and_then(|r| r.ok())
        .and_then(|v| match v {
            netcdf::AttributeValue::Str(s) => Some(s),
            _ => None,
        })
}

/// The variable's declared no-data sentinel, if any.
pub fn read_sentinel(var: &netcdf::Variable) -> Option<f64> {
    SENTINEL_ATTRIBUTES
        .iter()
        .find_map(|name| numeric_attribute(var, name))
}

/// Loads `variable` from the NetCDF file at `path`.
///
/// # Arguments
///
/// * `path` - Local NetCDF file
/// * `variable` - Name of a variable with time, latitude and longitude
///   dimensions (any order)
///
/// # Errors
///
/// Returns [`PipelineError::Format`] when the file cannot be opened, the
/// variable is missing or not a `(time, lat, lon)` grid, a coordinate
/// variable is missing, or the time axis cannot be decoded.
pub fn load_grid(path: &Path, variable: &str) -> PipelineResult<GridDataset> {
    let fail = |reason: String| PipelineError::format(path, reason);

    debug!("Opening NetCDF file: {}", path.display());
    let file = netcdf::open(path).map_err(|e| fail(format!("cannot open file: {}", e)))?;

    let var = file.variable(variable).ok_or_else(|| {
        let available: Vec<String> = file.variables().map(|v| v.name().to_string()).collect();
        fail(format!(
            "variable '{}' not found (available: {})",
            variable,
            available.join(", ")
        ))
    })?;

    let dimensions: Vec<(String, usize)> = var
        .dimensions()
        .iter()
        .map(|d| (d.name().to_string(), d.len()))
        .collect();
    if dimensions.len() != 3 {
        return Err(fail(format!(
            "variable '{}' has {} dimension(s), expected time, lat and lon",
            variable,
            dimensions.len()
        )));
    }

    let mut axes = [Axis::Time; 3];
    for (i, (name, _)) in dimensions.iter().enumerate() {
        axes[i] = Axis::of(name)
            .ok_or_else(|| fail(format!("unrecognised dimension '{}'", name)))?;
    }
    for axis in [Axis::Time, Axis::Lat, Axis::Lon] {
        if axes.iter().filter(|a| **a == axis).count() != 1 {
            return Err(fail(format!(
                "dimensions {:?} do not form a (time, lat, lon) grid",
                dimensions.iter().map(|(n, _)| n.as_str()).collect::<Vec<_>>()
            )));
        }
    }

    let mut coordinates: Vec<Vec<f64>> = Vec::with_capacity(3);
    for (name, len) in &dimensions {
        let coord = file
            .variable(name)
            .ok_or_else(|| fail(format!("coordinate variable '{}' is missing", name)))?;
        let values = coord
            .get_values::<f64, _>(..)
            .map_err(|e| fail(format!("cannot read coordinate '{}': {}", name, e)))?;
        if values.len() != *len {
            return Err(fail(format!(
                "coordinate '{}' has {} values for a dimension of length {}",
                name,
                values.len(),
                len
            )));
        }
        coordinates.push(values);
    }

    let time_position = axes.iter().position(|a| *a == Axis::Time).unwrap_or(0);
    let time_name = &dimensions[time_position].0;
    let time_var = file
        .variable(time_name)
        .ok_or_else(|| fail(format!("coordinate variable '{}' is missing", time_name)))?;
    let units = string_attribute(&time_var, "units")
        .ok_or_else(|| fail(format!("time coordinate '{}' has no units", time_name)))?;
    let calendar = string_attribute(&time_var, "calendar");
    let axis = TimeAxis::parse(&units, calendar.as_deref()).map_err(&fail)?;
    let years: Vec<i32> = coordinates[time_position]
        .iter()
        .map(|t| axis.year_of(*t))
        .collect::<Result<_, _>>()
        .map_err(&fail)?;
    debug!(
        "Time axis '{}' ({} calendar) spans {:?}..{:?}",
        units,
        axis.calendar,
        years.iter().min(),
        years.iter().max()
    );

    let sentinel = read_sentinel(&var);
    match sentinel {
        Some(s) => debug!("Variable '{}' declares sentinel {}", variable, s),
        None => warn!(
            "Variable '{}' in {} declares no _FillValue/missing_value; no masking will apply",
            variable,
            path.display()
        ),
    }

    let raw = var
        .get_values::<f64, _>(..)
        .map_err(|e| fail(format!("cannot read variable '{}': {}", variable, e)))?;
    let shape = [dimensions[0].1, dimensions[1].1, dimensions[2].1];
    let expected: usize = shape.iter().product();
    if raw.len() != expected {
        return Err(fail(format!(
            "variable '{}' holds {} values, expected {}",
            variable,
            raw.len(),
            expected
        )));
    }

    let mut lats = Vec::with_capacity(expected);
    let mut lons = Vec::with_capacity(expected);
    let mut times = Vec::with_capacity(expected);
    let mut record_years = Vec::with_capacity(expected);
    let mut values = Vec::with_capacity(expected);

    for (flat, value) in raw.iter().enumerate() {
        let index = [
            flat / (shape[1] * shape[2]),
            (flat / shape[2]) % shape[1],
            flat % shape[2],
        ];
        for (position, axis) in axes.iter().enumerate() {
            let i = index[position];
            match axis {
                Axis::Time => {
                    times.push(coordinates[position][i]);
                    record_years.push(years[i]);
                }
                Axis::Lat => lats.push(coordinates[position][i]),
                Axis::Lon => lons.push(coordinates[position][i]),
            }
        }
        values.push(value.is_finite().then_some(*value));
    }

    let frame = build_frame(variable, lats, lons, times, record_years, values)
        .map_err(|e| fail(e.to_string()))?;
    debug!("Loaded {} records of '{}'", frame.height(), variable);

    Ok(GridDataset {
        variable: variable.to_string(),
        sentinel,
        frame,
    })
}
