//! # CLI Module
//!
//! This module provides the command-line interface for isiclim, including:
//! - Argument parsing with clap
//! - Configuration file loading (JSON/YAML)
//! - Environment variable support with the ISICLIM_ prefix
//! - Merging of command-line, environment and file settings
//! - Subcommands for each pipeline stage and for the full run

use crate::catalog::QueryParameters;
use crate::client::ClientConfig;
use crate::config::TemplateKind;
use crate::resolve::DedupPolicy;
use crate::subset::BoundingBox;
use clap::{Args, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Environment variable holding `name=value` query pairs separated by `;`
pub const QUERY_ENV: &str = "ISICLIM_QUERY";

/// Query the ISIMIP repository, download outputs and compute climatologies
#[derive(Parser, Debug)]
#[command(name = "isiclim")]
#[command(about = "Search ISIMIP outputs, download them and compute climatologies")]
#[command(version)]
#[command(long_about = "
isiclim searches the ISIMIP data repository, downloads matching NetCDF outputs
(optionally cropped to a bounding box on the server) and reduces them to
per-cell climatological means.

FEATURES:
  • Catalog search with typed attributes and full pagination
  • Server-side cutouts to a south/north/west/east bounding box
  • Atomic downloads with checksum validation and archive extraction
  • Climatologies with sentinel masking and an inclusive year window
  • Configuration files: JSON and YAML format support with templates
  • Shell completions: Auto-completion for bash, zsh, fish, and PowerShell

EXAMPLES:
  # Search the catalog
  isiclim search -a simulation_round=ISIMIP3b -a variable=tc -a model=ecoocean

  # Download the matches, cropped to Australia
  isiclim download -a simulation_round=ISIMIP3b -a variable=tc \\
    --bbox=-45,-10,110,155 -d data

  # Climatology of a downloaded file
  isiclim climatology data/tc_global.nc -n tc --start-year 1960 --end-year 2020

  # Full pipeline from a job file
  isiclim run --config job.yaml

  # Generate templates
  isiclim template climatology --format yaml > job.yaml
")]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Quiet mode - suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Output format for structured data
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Human)]
    pub output_format: OutputFormat,

    /// Job configuration file path (JSON or YAML)
    #[arg(short, long, global = true, env = "ISICLIM_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Repository connection overrides shared by the networked commands.
#[derive(Args, Debug, Clone, Default, PartialEq)]
pub struct ApiArgs {
    /// Base URL of the metadata API
    #[arg(long, env = "ISICLIM_DATA_API")]
    pub data_api: Option<String>,

    /// Base URL of the files API (cutouts)
    #[arg(long, env = "ISICLIM_FILES_API")]
    pub files_api: Option<String>,

    /// Bearer token sent with every request
    #[arg(long, env = "ISICLIM_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Request timeout in seconds (no timeout by default)
    #[arg(long, env = "ISICLIM_TIMEOUT")]
    pub timeout: Option<u64>,
}

impl ApiArgs {
    /// Applies the overrides that were given on top of `config`.
    pub fn apply(&self, config: &mut ClientConfig) {
        if let Some(url) = &self.data_api {
            config.data_api_url = url.clone();
        }
        if let Some(url) = &self.files_api {
            config.files_api_url = url.clone();
        }
        if let Some(token) = &self.token {
            config.auth_token = Some(token.clone());
        }
        if let Some(timeout) = self.timeout {
            config.timeout_secs = Some(timeout);
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Search the catalog and list matching datasets
    #[command(long_about = "
Search the ISIMIP catalog and list the matching datasets and their files.

Query attributes: simulation_round, product, climate_forcing (forcing),
climate_scenario (scenario), model, variable. Unknown attributes are rejected
before anything is sent. Attributes may also come from ISICLIM_QUERY
(\"name=value;name=value\") or from the query section of --config.

EXAMPLES:
  isiclim search -a simulation_round=ISIMIP3b -a product=OutputData \\
    -a model=ecoocean -a forcing=gfdl-esm4 -a scenario=historical -a variable=tc

  # JSON output for scripting
  isiclim search -a variable=tc --output-format json
")]
    Search {
        /// Query attribute: name=value (can be used multiple times)
        #[arg(short = 'a', long = "query", value_parser = QueryParameters::parse_pair)]
        query: Vec<(String, String)>,

        /// Keep only the first occurrence of each path
        #[arg(long, value_enum)]
        dedup: Option<DedupPolicy>,

        #[command(flatten)]
        api: ApiArgs,
    },

    /// Search, optionally crop, and download the matching files
    #[command(long_about = "
Search the catalog and download every matching file into a directory.

With --bbox, files are first cropped on the server and the cropped result is
downloaded instead. Longitudes are passed through unchanged, so boxes that
cross the antimeridian (west > east) are allowed.

EXAMPLES:
  isiclim download -a simulation_round=ISIMIP3b -a variable=tc -d data

  # Cropped download, skipping checksum validation
  isiclim download -a variable=tc --bbox=-45,-10,110,155 --no-validate
")]
    Download {
        /// Query attribute: name=value (can be used multiple times)
        #[arg(short = 'a', long = "query", value_parser = QueryParameters::parse_pair)]
        query: Vec<(String, String)>,

        /// Destination directory (created if absent)
        #[arg(short = 'd', long, env = "ISICLIM_DEST_DIR")]
        dest_dir: Option<PathBuf>,

        /// Bounding box: south,north,west,east
        #[arg(long, allow_hyphen_values = true)]
        bbox: Option<BoundingBox>,

        /// Treatment of files listed under several datasets
        #[arg(long, value_enum)]
        dedup: Option<DedupPolicy>,

        /// Skip checksum and size validation
        #[arg(long, env = "ISICLIM_NO_VALIDATE")]
        no_validate: bool,

        /// Keep archives instead of extracting them
        #[arg(long)]
        no_extract: bool,

        /// Download again even if the file already exists
        #[arg(long)]
        overwrite: bool,

        #[command(flatten)]
        api: ApiArgs,
    },

    /// Compute a climatology from a local NetCDF file
    #[command(long_about = "
Compute per-cell means of a variable over an inclusive year window.

Values at or above the file's _FillValue/missing_value are treated as
missing. By default any missing value makes the cell's mean missing; use
--skip-missing to average the remaining values instead.

EXAMPLES:
  isiclim climatology data/tc_global.nc -n tc --start-year 1960 --end-year 2020

  # Write the result
  isiclim climatology data/tc_global.nc -n tc --start-year 1960 \\
    --end-year 2020 -o tc_1960_2020.parquet
")]
    Climatology {
        /// NetCDF file path
        file: PathBuf,

        /// Variable to average
        #[arg(short = 'n', long, env = "ISICLIM_VARIABLE")]
        variable: String,

        /// First year of the window (inclusive)
        #[arg(long)]
        start_year: i32,

        /// Last year of the window (inclusive)
        #[arg(long)]
        end_year: i32,

        /// Ignore missing values instead of propagating them
        #[arg(long)]
        skip_missing: bool,

        /// Output file (.parquet or .csv)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Run the full pipeline described by a job file
    #[command(long_about = "
Run query, resolve, optional cutout, download and climatology as described by
the job file given with --config.

EXAMPLES:
  isiclim run --config job.yaml

  # Validate and print the plan without touching the network
  isiclim run --config job.json --dry-run

  # Override the destination and output
  isiclim run --config job.yaml --dest-dir /tmp/isimip --output out.csv
")]
    Run {
        /// Override the download directory from the job file
        #[arg(long)]
        dest_dir: Option<PathBuf>,

        /// Override the climatology output from the job file
        #[arg(long)]
        output: Option<PathBuf>,

        /// Dry run - validate configuration without processing
        #[arg(long, env = "ISICLIM_DRY_RUN")]
        dry_run: bool,

        #[command(flatten)]
        api: ApiArgs,
    },

    /// Show information about a NetCDF file
    #[command(long_about = "
Inspect a NetCDF file: dimensions, variables, sentinel values and time axis.

EXAMPLES:
  isiclim info data/tc_global.nc
  isiclim info data/tc_global.nc -n tc --detailed --format json
")]
    Info {
        /// NetCDF file path
        file: PathBuf,

        /// Show all attributes
        #[arg(long)]
        detailed: bool,

        /// Show only specific variable info
        #[arg(short = 'n', long)]
        variable: Option<String>,

        /// Output format for file information
        #[arg(long, value_enum)]
        format: Option<OutputFormat>,
    },

    /// Validate a job file without running it
    Validate {
        /// Job file to validate (defaults to --config)
        config_file: Option<PathBuf>,

        /// Show detailed validation report
        #[arg(long)]
        detailed: bool,
    },

    /// Generate job file templates
    Template {
        /// Template type to generate
        #[arg(value_enum)]
        template_type: TemplateKind,

        /// Output file path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Configuration format
        #[arg(long, value_enum, default_value_t = ConfigFormat::Json)]
        format: ConfigFormat,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,

        /// Output file path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable output
    Human,
    /// JSON structured output
    Json,
    /// YAML structured output
    Yaml,
    /// CSV output (where applicable)
    Csv,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfigFormat {
    /// JSON configuration format
    Json,
    /// YAML configuration format
    Yaml,
}

/// Parses query pairs from `ISICLIM_QUERY`.
///
/// Environment variable format: `"simulation_round=ISIMIP3b;variable=tc"`
pub fn parse_query_from_env() -> Result<Vec<(String, String)>, String> {
    let mut pairs = Vec::new();
    if let Ok(raw) = env::var(QUERY_ENV)
        && !raw.trim().is_empty()
    {
        for pair in raw.split(';') {
            let pair = pair.trim();
            if !pair.is_empty() {
                pairs.push(
                    QueryParameters::parse_pair(pair)
                        .map_err(|e| format!("Invalid query pair in {}: {}", QUERY_ENV, e))?,
                );
            }
        }
    }
    Ok(pairs)
}

/// Builds the query for a command.
/// Priority: CLI arguments > environment variable > job file.
pub fn merge_query(
    cli_pairs: &[(String, String)],
    file_query: Option<&QueryParameters>,
) -> Result<QueryParameters, String> {
    let pairs = if cli_pairs.is_empty() {
        parse_query_from_env()?
    } else {
        cli_pairs.to_vec()
    };

    if pairs.is_empty() {
        return match file_query {
            Some(query) if !query.is_empty() => Ok(query.clone()),
            _ => Err(format!(
                "No query given: use -a name=value, {} or a job file",
                QUERY_ENV
            )),
        };
    }

    QueryParameters::from_pairs(pairs).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment variable tests must not run concurrently
    static ENV_TEST_MUTEX: Mutex<()> = Mutex::new(());

    #[test]
    fn test_api_args_apply() {
        let mut config = ClientConfig::default();
        let args = ApiArgs {
            data_api: Some("http://localhost:8000/api/v1".to_string()),
            token: Some("secret".to_string()),
            ..Default::default()
        };
        args.apply(&mut config);
        assert_eq!(config.data_api_url, "http://localhost:8000/api/v1");
        assert_eq!(config.files_api_url, crate::client::DEFAULT_FILES_API_URL);
        assert_eq!(config.auth_token.as_deref(), Some("secret"));
        assert!(config.timeout_secs.is_none());
    }

    #[test]
    fn test_environment_variable_query_parsing() {
        let _guard = ENV_TEST_MUTEX.lock().unwrap();
        let original = env::var(QUERY_ENV).ok();

        unsafe {
            env::set_var(QUERY_ENV, "simulation_round=ISIMIP3b; variable=tc;");
        }
        let pairs = parse_query_from_env().unwrap();
        assert_eq!(
            pairs,
            vec![
                ("simulation_round".to_string(), "ISIMIP3b".to_string()),
                ("variable".to_string(), "tc".to_string()),
            ]
        );

        unsafe {
            env::set_var(QUERY_ENV, "variable");
        }
        assert!(parse_query_from_env().is_err());

        unsafe {
            match original {
                Some(value) => env::set_var(QUERY_ENV, value),
                None => env::remove_var(QUERY_ENV),
            }
        }
    }

    #[test]
    fn test_query_merging_priority() {
        let _guard = ENV_TEST_MUTEX.lock().unwrap();
        let original = env::var(QUERY_ENV).ok();
        unsafe {
            env::set_var(QUERY_ENV, "variable=tos");
        }

        let file_query = QueryParameters::builder().variable("tcb").build();

        // CLI wins over everything
        let cli = vec![("variable".to_string(), "tc".to_string())];
        let merged = merge_query(&cli, Some(&file_query)).unwrap();
        assert_eq!(merged.variable.as_deref(), Some("tc"));

        // Environment wins over the job file
        let merged = merge_query(&[], Some(&file_query)).unwrap();
        assert_eq!(merged.variable.as_deref(), Some("tos"));

        unsafe {
            env::remove_var(QUERY_ENV);
        }
        let merged = merge_query(&[], Some(&file_query)).unwrap();
        assert_eq!(merged.variable.as_deref(), Some("tcb"));
        assert!(merge_query(&[], None).is_err());

        // Unknown attributes are rejected
        let cli = vec![("ecosystem".to_string(), "ocean".to_string())];
        assert!(merge_query(&cli, None).is_err());

        unsafe {
            if let Some(value) = original {
                env::set_var(QUERY_ENV, value);
            }
        }
    }
}
