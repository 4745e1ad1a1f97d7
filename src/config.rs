//! # Job Configuration Module
//!
//! A job file describes one complete run: which repository to talk to, what
//! to search for, whether to crop, where to download, and which climatology
//! to compute. JSON and YAML are both accepted; the format is picked from the
//! file extension.
//!
//! ## Configuration Structure
//!
//! - **client**: repository endpoints, token, polling (all optional)
//! - **query**: catalog attributes to search for
//! - **bbox**: optional `south/north/west/east` crop
//! - **download**: destination directory, dedup policy, validation flags
//! - **climatology**: optional variable and year window
//! - **output**: optional Parquet/CSV path for the climatology
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use isiclim::config::JobConfig;
//!
//! let yaml = r#"
//! query:
//!   simulation_round: ISIMIP3b
//!   product: OutputData
//!   variable: tc
//! download:
//!   dest_dir: data
//! climatology:
//!   variable: tc
//!   start_year: 1960
//!   end_year: 2020
//! "#;
//! let config = JobConfig::from_yaml(yaml)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use crate::catalog::QueryParameters;
use crate::climatology::ClimatologyConfig;
use crate::client::ClientConfig;
use crate::download::DownloadOptions;
use crate::error::{PipelineError, PipelineResult};
use crate::resolve::DedupPolicy;
use crate::subset::BoundingBox;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Where and how resources are downloaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    /// Destination directory, created if absent
    pub dest_dir: PathBuf,
    /// Treatment of files listed under several datasets
    pub dedup: DedupPolicy,
    /// Suffix of the grid file looked up after downloading
    pub grid_suffix: String,
    #[serde(flatten)]
    pub options: DownloadOptions,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            dest_dir: PathBuf::from("data"),
            dedup: DedupPolicy::default(),
            grid_suffix: ".nc".to_string(),
            options: DownloadOptions::default(),
        }
    }
}

/// A complete pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobConfig {
    #[serde(default)]
    pub client: ClientConfig,
    pub query: QueryParameters,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<BoundingBox>,
    #[serde(default)]
    pub download: DownloadConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub climatology: Option<ClimatologyConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,
}

impl JobConfig {
    /// Loads a job configuration from a JSON or YAML file.
    ///
    /// Files ending in `.yaml` or `.yml` are read as YAML, everything else
    /// as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Config`] if the file cannot be read or parsed.
    pub fn from_file<P: AsRef<Path>>(path: P) -> PipelineResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        if is_yaml_path(path) {
            Self::from_yaml(&content)
        } else {
            Self::from_json(&content)
        }
    }

    pub fn from_json(json_str: &str) -> PipelineResult<Self> {
        serde_json::from_str(json_str)
            .map_err(|e| PipelineError::Config(format!("invalid JSON job configuration: {}", e)))
    }

    pub fn from_yaml(yaml_str: &str) -> PipelineResult<Self> {
        serde_yaml::from_str(yaml_str)
            .map_err(|e| PipelineError::Config(format!("invalid YAML job configuration: {}", e)))
    }

    pub fn to_json(&self) -> PipelineResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| PipelineError::Config(e.to_string()))
    }

    pub fn to_yaml(&self) -> PipelineResult<String> {
        serde_yaml::to_string(self).map_err(|e| PipelineError::Config(e.to_string()))
    }

    /// Checks the parts of the configuration that serde cannot.
    pub fn validate(&self) -> PipelineResult<()> {
        if self.query.is_empty() {
            return Err(PipelineError::Config(
                "query must set at least one catalog attribute".to_string(),
            ));
        }
        if self.client.max_polls == 0 {
            return Err(PipelineError::Config(
                "client.max_polls must be at least 1".to_string(),
            ));
        }
        if self.download.grid_suffix.is_empty() {
            return Err(PipelineError::Config(
                "download.grid_suffix must not be empty".to_string(),
            ));
        }
        if let Some(climatology) = &self.climatology {
            climatology.validate()?;
        }
        if self.output.is_some() && self.climatology.is_none() {
            return Err(PipelineError::Config(
                "output is set but no climatology is configured".to_string(),
            ));
        }
        Ok(())
    }

    /// A starter configuration for the given template.
    pub fn template(kind: TemplateKind) -> Self {
        let query = QueryParameters::builder()
            .simulation_round("ISIMIP3b")
            .product("OutputData")
            .model("ecoocean")
            .climate_forcing("gfdl-esm4")
            .climate_scenario("historical")
            .variable("tc")
            .build();

        let mut config = JobConfig {
            client: ClientConfig::default(),
            query,
            bbox: None,
            download: DownloadConfig::default(),
            climatology: None,
            output: None,
        };

        match kind {
            TemplateKind::Search => {}
            TemplateKind::Cutout => {
                config.bbox = Some(BoundingBox {
                    south: -45.0,
                    north: -10.0,
                    west: 110.0,
                    east: 155.0,
                });
            }
            TemplateKind::Climatology => {
                config.climatology = Some(ClimatologyConfig::new("tc", 1960, 2020));
                config.output = Some(PathBuf::from("tc_climatology.parquet"));
            }
        }
        config
    }
}

/// Kinds of starter configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum TemplateKind {
    /// Search and download only
    Search,
    /// Search, crop to a bounding box and download
    Cutout,
    /// Full run ending in a climatology file
    Climatology,
}

pub fn is_yaml_path(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()).map(|e| e.to_lowercase()).as_deref(),
        Some("yaml") | Some("yml")
    )
}
