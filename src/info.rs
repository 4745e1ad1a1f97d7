//! # Grid File Information Module
//!
//! Inspects downloaded NetCDF files: dimensions, variables, their sentinel
//! values and time axes. Used by the `info` command to check a file before
//! running a climatology on it.

use crate::grid::{read_sentinel, string_attribute};
use crate::time::TimeAxis;
use anyhow::{Context, Result};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// A NetCDF dimension
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DimensionInfo {
    pub name: String,
    pub length: usize,
    pub is_unlimited: bool,
}

/// A NetCDF variable
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariableInfo {
    pub name: String,
    pub data_type: String,
    pub dimensions: Vec<String>,
    pub shape: Vec<usize>,
    /// No-data sentinel (`_FillValue` or `missing_value`)
    pub sentinel: Option<f64>,
    pub units: Option<String>,
    /// Only filled in for detailed reports
    pub attributes: BTreeMap<String, String>,
}

/// Decoded extent of the `time` coordinate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeInfo {
    pub units: String,
    pub calendar: String,
    pub first_year: i32,
    pub last_year: i32,
    pub steps: usize,
}

/// Everything reported about one file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridFileInfo {
    pub path: String,
    pub file_size: Option<u64>,
    pub dimensions: Vec<DimensionInfo>,
    pub variables: Vec<VariableInfo>,
    pub time: Option<TimeInfo>,
    pub global_attributes: BTreeMap<String, String>,
}

/// Collects information about the NetCDF file at `path`.
///
/// With `variable` set, only that variable is reported. `detailed` adds all
/// variable and global attributes.
pub fn get_grid_info(path: &Path, variable: Option<&str>, detailed: bool) -> Result<GridFileInfo> {
    debug!("Opening NetCDF file: {}", path.display());
    let file = netcdf::open(path)
        .with_context(|| format!("Failed to open NetCDF file: {}", path.display()))?;

    let file_size = std::fs::metadata(path).ok().map(|m| m.len());

    let dimensions = file
        .dimensions()
        .map(|dim| DimensionInfo {
            name: dim.name().to_string(),
            length: dim.len(),
            is_unlimited: dim.is_unlimited(),
        })
        .collect();

    let mut variables = Vec::new();
    for var in file.variables() {
        if variable.is_some_and(|wanted| var.name() != wanted) {
            continue;
        }

        let mut attributes = BTreeMap::new();
        if detailed {
            for attr in var.attributes() {
                if let Ok(value) = attr.value() {
                    attributes.insert(attr.name().to_string(), format_attribute_value(&value));
                }
            }
        }

        variables.push(VariableInfo {
            name: var.name().to_string(),
            data_type: format!("{:?}", var.vartype()),
            dimensions: var.dimensions().iter().map(|d| d.name().to_string()).collect(),
            shape: var.dimensions().iter().map(|d| d.len()).collect(),
            sentinel: read_sentinel(&var),
            units: string_attribute(&var, "units"),
            attributes,
        });
    }

    if let Some(wanted) = variable {
        if variables.is_empty() {
            anyhow::bail!("Variable '{}' not found in {}", wanted, path.display());
        }
    }

    let time = file.variable("time").and_then(|time_var| {
        let units = string_attribute(&time_var, "units")?;
        let calendar = string_attribute(&time_var, "calendar");
        let axis = TimeAxis::parse(&units, calendar.as_deref()).ok()?;
        let values = time_var.get_values::<f64, _>(..).ok()?;
        let first_year = axis.year_of(*values.first()?).ok()?;
        let last_year = axis.year_of(*values.last()?).ok()?;
        Some(TimeInfo {
            units,
            calendar: axis.calendar.to_string(),
            first_year,
            last_year,
            steps: values.len(),
        })
    });

    let mut global_attributes = BTreeMap::new();
    if detailed {
        for attr in file.attributes() {
            if let Ok(value) = attr.value() {
                global_attributes.insert(attr.name().to_string(), format_attribute_value(&value));
            }
        }
    }

    Ok(GridFileInfo {
        path: path.display().to_string(),
        file_size,
        dimensions,
        variables,
        time,
        global_attributes,
    })
}

fn format_attribute_value(value: &netcdf::AttributeValue) -> String {
    match value {
        netcdf::AttributeValue::Str(s) => s.clone(),
        netcdf::AttributeValue::Double(d) => d.to_string(),
        netcdf::AttributeValue::Float(f) => f.to_string(),
        netcdf::AttributeValue::Int(i) => i.to_string(),
        netcdf::AttributeValue::Short(s) => s.to_string(),
        other => format!("{:?}", other),
    }
}

/// Print file info in human-readable format
pub fn print_grid_info_human(info: &GridFileInfo) {
    println!("NetCDF File Information:");
    println!("  Path: {}", info.path);
    if let Some(size) = info.file_size {
        println!("  File Size: {:.2} MB", size as f64 / 1_048_576.0);
    }
    println!("  Dimensions:");
    for dim in &info.dimensions {
        println!(
            "    {} ({}{})",
            dim.name,
            dim.length,
            if dim.is_unlimited { ", unlimited" } else { "" }
        );
    }
    if let Some(time) = &info.time {
        println!(
            "  Time: {} steps, {}-{} ({}, {} calendar)",
            time.steps, time.first_year, time.last_year, time.units, time.calendar
        );
    }
    println!("  Variables:");
    for var in &info.variables {
        let sentinel = var
            .sentinel
            .map(|s| format!(", sentinel {}", s))
            .unwrap_or_default();
        let units = var
            .units
            .as_deref()
            .map(|u| format!(" [{}]", u))
            .unwrap_or_default();
        println!(
            "    {}{} ({}) - dimensions: [{}]{}",
            var.name,
            units,
            var.data_type,
            var.dimensions.join(", "),
            sentinel
        );
        for (name, value) in &var.attributes {
            println!("      @{}: {}", name, value);
        }
    }
    if !info.global_attributes.is_empty() {
        println!("  Global Attributes:");
        for (name, value) in &info.global_attributes {
            println!("    @{}: {}", name, value);
        }
    }
}

/// Print file info as JSON
pub fn print_grid_info_json(info: &GridFileInfo) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(info)?);
    Ok(())
}

/// Print file info as YAML
pub fn print_grid_info_yaml(info: &GridFileInfo) -> Result<()> {
    let yaml = serde_yaml::to_string(info).context("Failed to serialize file info to YAML")?;
    println!("{}", yaml);
    Ok(())
}

/// Print the variables as CSV
pub fn print_grid_info_csv(info: &GridFileInfo) -> Result<()> {
    println!("variable_name,data_type,dimensions,shape,sentinel,units");
    for var in &info.variables {
        let shape: Vec<String> = var.shape.iter().map(|s| s.to_string()).collect();
        println!(
            "{},{},\"{}\",\"{}\",{},{}",
            var.name,
            var.data_type,
            var.dimensions.join(";"),
            shape.join(";"),
            var.sentinel.map(|s| s.to_string()).unwrap_or_default(),
            var.units.as_deref().unwrap_or("")
        );
    }
    Ok(())
}
