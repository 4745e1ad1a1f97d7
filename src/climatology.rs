//! # Climatology Pipeline
//!
//! Reduces a gridded time series to one long-term mean per grid cell.
//!
//! The steps always run in this order:
//!
//! 1. **Load** - [`load_grid`] parses the NetCDF file
//! 2. **Mask** - values at or above the dataset's sentinel become null
//! 3. **Filter** - only records inside the inclusive year window are kept
//! 4. **Aggregate** - records are grouped by `(lat, lon)` and averaged
//!
//! By default a single missing value makes a cell's mean missing. Set
//! [`ClimatologyConfig::skip_missing`] to average the remaining values instead.
//!
//! ## Example
//!
//! ```rust,no_run
//! use isiclim::climatology::{ClimatologyConfig, compute_climatology};
//! use std::path::Path;
//!
//! let config = ClimatologyConfig::new("tc", 1960, 2020);
//! let result = compute_climatology(Path::new("tc_global.nc"), &config)?;
//! for cell in result.cells()? {
//!     println!("{} {} {:?}", cell.lat, cell.lon, cell.value);
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use crate::error::{PipelineError, PipelineResult};
use crate::grid::{GridDataset, LAT_COLUMN, LON_COLUMN, YEAR_COLUMN, load_grid};
use log::{debug, info, warn};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const N_RECORDS_COLUMN: &str = "n_records";
pub const N_MISSING_COLUMN: &str = "n_missing";

/// Parameters of a climatology computation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClimatologyConfig {
    /// Variable to average
    pub variable: String,
    /// First year of the window (inclusive)
    pub start_year: i32,
    /// Last year of the window (inclusive)
    pub end_year: i32,
    /// Ignore missing values instead of propagating them
    #[serde(default)]
    pub skip_missing: bool,
}

impl ClimatologyConfig {
    pub fn new(variable: impl Into<String>, start_year: i32, end_year: i32) -> Self {
        Self {
            variable: variable.into(),
            start_year,
            end_year,
            skip_missing: false,
        }
    }

    pub fn with_skip_missing(mut self, skip_missing: bool) -> Self {
        self.skip_missing = skip_missing;
        self
    }

    pub fn validate(&self) -> PipelineResult<()> {
        if self.variable.trim().is_empty() {
            return Err(PipelineError::Config(
                "climatology variable must not be empty".to_string(),
            ));
        }
        if self.start_year > self.end_year {
            return Err(PipelineError::Config(format!(
                "start year {} is after end year {}",
                self.start_year, self.end_year
            )));
        }
        Ok(())
    }
}

/// One grid cell of a climatology.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClimatologyCell {
    pub lat: f64,
    pub lon: f64,
    /// Mean over the window, `None` when it is missing
    pub value: Option<f64>,
    pub n_records: u32,
    pub n_missing: u32,
}

/// Per-cell means over a year window, sorted by latitude then longitude.
#[derive(Debug, Clone)]
pub struct ClimatologyResult {
    pub variable: String,
    pub start_year: i32,
    pub end_year: i32,
    /// Columns `lat, lon, <variable>, n_records, n_missing`
    pub frame: DataFrame,
}

impl ClimatologyResult {
    pub fn len(&self) -> usize {
        self.frame.height()
    }

    pub fn is_empty(&self) -> bool {
        self.frame.height() == 0
    }

    /// Typed view of the cells.
    pub fn cells(&self) -> PolarsResult<Vec<ClimatologyCell>> {
        let lats = self.frame.column(LAT_COLUMN)?.f64()?;
        let lons = self.frame.column(LON_COLUMN)?.f64()?;
        let values = self.frame.column(&self.variable)?.f64()?;
        let records = self.frame.column(N_RECORDS_COLUMN)?.u32()?;
        let missing = self.frame.column(N_MISSING_COLUMN)?.u32()?;

        let cells = lats
            .into_iter()
            .zip(lons)
            .zip(values)
            .zip(records.into_iter().zip(missing))
            .map(|(((lat, lon), value), (n_records, n_missing))| ClimatologyCell {
                lat: lat.unwrap_or(f64::NAN),
                lon: lon.unwrap_or(f64::NAN),
                value,
                n_records: n_records.unwrap_or(0),
                n_missing: n_missing.unwrap_or(0),
            })
            .collect();
        Ok(cells)
    }

    /// The mean at `(lat, lon)`: `None` if the cell is not in the result,
    /// `Some(None)` if the cell exists but its mean is missing.
    pub fn value_at(&self, lat: f64, lon: f64) -> PolarsResult<Option<Option<f64>>> {
        const TOLERANCE: f64 = 1e-9;
        Ok(self
            .cells()?
            .into_iter()
            .find(|c| (c.lat - lat).abs() < TOLERANCE && (c.lon - lon).abs() < TOLERANCE)
            .map(|c| c.value))
    }
}

fn require_columns(frame: &DataFrame, columns: &[&str]) -> PolarsResult<()> {
    let present: Vec<&str> = frame
        .get_column_names()
        .iter()
        .map(|s| s.as_str())
        .collect();
    for name in columns {
        if !present.contains(name) {
            return Err(PolarsError::ColumnNotFound(
                format!("column '{}' not found", name).into(),
            ));
        }
    }
    Ok(())
}

/// Replaces values `>= sentinel` with null. Without a sentinel the frame is
/// returned unchanged. Applying it twice gives the same frame as once.
pub fn mask_sentinel(
    frame: DataFrame,
    variable: &str,
    sentinel: Option<f64>,
) -> PolarsResult<DataFrame> {
    let Some(sentinel) = sentinel else {
        return Ok(frame);
    };
    require_columns(&frame, &[variable])?;

    frame
        .lazy()
        .with_columns([when(col(variable).gt_eq(lit(sentinel)))
            .then(lit(NULL).cast(DataType::Float64))
            .otherwise(col(variable))
            .alias(variable)])
        .collect()
}

/// Keeps the records whose year lies in `[start_year, end_year]`.
pub fn filter_years(frame: DataFrame, start_year: i32, end_year: i32) -> PipelineResult<DataFrame> {
    if start_year > end_year {
        return Err(PipelineError::Config(format!(
            "start year {} is after end year {}",
            start_year, end_year
        )));
    }
    require_columns(&frame, &[YEAR_COLUMN]).map_err(PipelineError::Filter)?;

    frame
        .lazy()
        .filter(
            col(YEAR_COLUMN)
                .gt_eq(lit(start_year))
                .and(col(YEAR_COLUMN).lt_eq(lit(end_year))),
        )
        .collect()
        .map_err(PipelineError::Filter)
}

/// Groups by `(lat, lon)` and averages `variable`.
///
/// # Arguments
///
/// * `frame` - Records with `lat`, `lon` and `variable` columns
/// * `variable` - Column to average
/// * `skip_missing` - When false, a cell with any null value gets a null mean
pub fn aggregate(frame: DataFrame, variable: &str, skip_missing: bool) -> PolarsResult<DataFrame> {
    require_columns(&frame, &[LAT_COLUMN, LON_COLUMN, variable])?;

    let grouped = frame
        .lazy()
        .group_by([col(LAT_COLUMN), col(LON_COLUMN)])
        .agg([
            col(variable).mean().alias(variable),
            col(variable)
                .len()
                .cast(DataType::UInt32)
                .alias(N_RECORDS_COLUMN),
            col(variable)
                .null_count()
                .cast(DataType::UInt32)
                .alias(N_MISSING_COLUMN),
        ]);

    let propagated = if skip_missing {
        grouped
    } else {
        grouped.with_columns([when(col(N_MISSING_COLUMN).gt(lit(0u32)))
            .then(lit(NULL).cast(DataType::Float64))
            .otherwise(col(variable))
            .alias(variable)])
    };

    propagated
        .select([
            col(LAT_COLUMN),
            col(LON_COLUMN),
            col(variable).cast(DataType::Float64),
            col(N_RECORDS_COLUMN),
            col(N_MISSING_COLUMN),
        ])
        .sort([LAT_COLUMN, LON_COLUMN], SortMultipleOptions::default())
        .collect()
}

/// Runs Mask, Filter and Aggregate over an already loaded dataset.
pub fn climatology_from_dataset(
    dataset: GridDataset,
    config: &ClimatologyConfig,
) -> PipelineResult<ClimatologyResult> {
    config.validate()?;
    if dataset.variable != config.variable {
        return Err(PipelineError::Config(format!(
            "dataset holds '{}' but the climatology asks for '{}'",
            dataset.variable, config.variable
        )));
    }
    let variable = config.variable.as_str();

    let nulls_before = dataset
        .frame
        .column(variable)
        .map_err(PipelineError::Mask)?
        .null_count();
    let masked =
        mask_sentinel(dataset.frame, variable, dataset.sentinel).map_err(PipelineError::Mask)?;
    let masked_count = masked
        .column(variable)
        .map_err(PipelineError::Mask)?
        .null_count()
        .saturating_sub(nulls_before);
    if masked_count > 0 {
        debug!(
            "Masked {} value(s) at or above sentinel {:?}",
            masked_count, dataset.sentinel
        );
    }

    let filtered = filter_years(masked, config.start_year, config.end_year)?;
    if filtered.height() == 0 {
        warn!(
            "No records of '{}' fall within {}-{}",
            variable, config.start_year, config.end_year
        );
    }

    let frame =
        aggregate(filtered, variable, config.skip_missing).map_err(PipelineError::Aggregate)?;
    info!(
        "Computed {} climatology over {}-{} for {} cell(s)",
        variable,
        config.start_year,
        config.end_year,
        frame.height()
    );

    Ok(ClimatologyResult {
        variable: config.variable.clone(),
        start_year: config.start_year,
        end_year: config.end_year,
        frame,
    })
}

/// Loads `path` and computes the climatology described by `config`.
///
/// # Errors
///
/// - [`PipelineError::Config`] for an empty variable name or inverted window
/// - [`PipelineError::Format`] when the file cannot be loaded
/// - [`PipelineError::Mask`], [`PipelineError::Filter`] or
///   [`PipelineError::Aggregate`] when the matching frame operation fails
pub fn compute_climatology(path: &Path, config: &ClimatologyConfig) -> PipelineResult<ClimatologyResult> {
    config.validate()?;
    let dataset = load_grid(path, &config.variable)?;
    climatology_from_dataset(dataset, config)
}
