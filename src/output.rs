//! # Climatology Output Module
//!
//! Writes climatology frames to disk. The format follows the file extension:
//!
//! - `.csv` - comma separated text with a header row
//! - anything else - Parquet
//!
//! Parent directories are created when missing.

use crate::climatology::ClimatologyResult;
use crate::error::{PipelineError, PipelineResult};
use log::debug;
use polars::prelude::*;
use std::fs::File;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableFormat {
    Parquet,
    Csv,
}

impl TableFormat {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("csv") => TableFormat::Csv,
            _ => TableFormat::Parquet,
        }
    }
}

/// Writes a DataFrame to `output_path` in the format chosen by its extension.
///
/// # Errors
///
/// This function will return an error if:
/// - The parent directory cannot be created
/// - The output path is not writable
/// - The DataFrame contains types the chosen format cannot hold
pub fn write_dataframe(df: &DataFrame, output_path: &Path) -> PipelineResult<()> {
    let format = TableFormat::from_path(output_path);
    debug!("Writing DataFrame as {:?} to {}", format, output_path.display());
    debug!("DataFrame shape: {:?}", df.shape());
    debug!("DataFrame schema:\n{:?}", df.schema());
    debug!("First few rows:\n{}", df.head(Some(5)));

    let fail = |reason: String| PipelineError::output(output_path, reason);

    if let Some(parent) = output_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| fail(e.to_string()))?;
    }

    let file = File::create(output_path).map_err(|e| fail(e.to_string()))?;
    let mut df_clone = df.clone();

    match format {
        TableFormat::Parquet => {
            ParquetWriter::new(file)
                .finish(&mut df_clone)
                .map_err(|e| fail(e.to_string()))?;
        }
        TableFormat::Csv => {
            CsvWriter::new(file)
                .include_header(true)
                .finish(&mut df_clone)
                .map_err(|e| fail(e.to_string()))?;
        }
    }

    debug!("Successfully wrote {}", output_path.display());
    Ok(())
}

/// Writes a climatology result; see [`write_dataframe`].
pub fn write_climatology(result: &ClimatologyResult, output_path: &Path) -> PipelineResult<()> {
    write_dataframe(&result.frame, output_path)
}
