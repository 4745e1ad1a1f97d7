//! # isiclim
//!
//! A Rust library for finding ISIMIP model outputs, downloading them and
//! reducing them to climatologies.
//!
//! ## Features
//!
//! - **Catalog search**: typed query parameters, pagination followed to the end
//! - **Resource resolution**: download URLs and path identifiers, optional dedup
//! - **Spatial cutouts**: server-side cropping to a bounding box
//! - **Safe downloads**: atomic rename, checksum validation, archive extraction
//! - **Climatologies**: sentinel masking, year window, per-cell means
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use isiclim::{run_job, config::JobConfig, client::HttpRepository};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = JobConfig::from_file("job.yaml")?;
//! let api = HttpRepository::new(config.client.clone())?;
//! let report = run_job(&api, &config).await?;
//! println!("{} file(s) downloaded", report.downloads.completed.len());
//! # Ok(())
//! # }
//! ```
//!
//! ## Configuration Example
//!
//! ```yaml
//! query:
//!   simulation_round: ISIMIP3b
//!   product: OutputData
//!   climate_forcing: gfdl-esm4
//!   climate_scenario: historical
//!   model: ecoocean
//!   variable: tc
//! bbox: { south: -45, north: -10, west: 110, east: 155 }
//! download:
//!   dest_dir: data
//! climatology:
//!   variable: tc
//!   start_year: 1960
//!   end_year: 2020
//! output: tc_climatology.parquet
//! ```

pub mod catalog;
pub mod cli;
pub mod client;
pub mod climatology;
pub mod config;
pub mod download;
pub mod error;
pub mod grid;
pub mod info;
pub mod log;
pub mod output;
pub mod resolve;
pub mod subset;
pub mod time;


use crate::catalog::{CatalogResult, FileDescriptor, search_datasets};
use crate::client::RepositoryApi;
use crate::climatology::{ClimatologyResult, compute_climatology};
use crate::config::JobConfig;
use crate::download::{BatchReport, DownloadOutcome, download_all, locate_grid_file};
use crate::error::{PipelineResult, TransferError};
use crate::output::write_climatology;
use crate::resolve::{ResolvedResources, resolve_resources};
use crate::subset::{CroppedResource, PollSettings, request_cutout};
use std::path::PathBuf;

/// Everything a pipeline run produced.
#[derive(Debug, Default)]
pub struct JobReport {
    pub catalog: CatalogResult,
    pub resolved: ResolvedResources,
    /// Cropped resources, when a bounding box was configured
    pub cropped: Option<Vec<CroppedResource>>,
    pub downloads: BatchReport,
    /// Grid file the climatology was computed from
    pub grid_file: Option<PathBuf>,
    pub climatology: Option<ClimatologyResult>,
}

/// Runs a complete job: query, resolve, optional cutout, download and, when
/// configured, the climatology.
///
/// See [`run_job_with_progress`].
pub async fn run_job<A>(api: &A, job: &JobConfig) -> PipelineResult<JobReport>
where
    A: RepositoryApi + ?Sized,
{
    run_job_with_progress(api, job, |_, _| {}).await
}

/// Runs a complete job, reporting each finished download to `on_progress`.
///
/// The steps run strictly one after the other:
/// 1. Search the catalog with `job.query`
/// 2. Resolve download URLs and path identifiers
/// 3. Crop to `job.bbox` on the server, if set
/// 4. Download every resource into `job.download.dest_dir`
/// 5. Locate the grid file and compute `job.climatology`, if set
/// 6. Write the climatology to `job.output`, if set
///
/// # Errors
///
/// Query, subset, load, climatology and output failures end the run. Failed
/// downloads do not: they are collected in [`JobReport::downloads`], and the
/// run only fails later if no grid file can be located for the climatology.
pub async fn run_job_with_progress<A, F>(
    api: &A,
    job: &JobConfig,
    on_progress: F,
) -> PipelineResult<JobReport>
where
    A: RepositoryApi + ?Sized,
    F: FnMut(&str, &Result<DownloadOutcome, TransferError>),
{
    job.validate()?;
    let mut report = JobReport::default();

    report.catalog = search_datasets(api, &job.query).await?;
    if report.catalog.is_empty() {
        ::log::warn!("No datasets match {}", job.query);
    }

    report.resolved = resolve_resources(&report.catalog.datasets, job.download.dedup);

    let targets: Vec<FileDescriptor> = match &job.bbox {
        Some(bbox) => {
            let cropped = request_cutout(
                api,
                &report.resolved.paths,
                bbox,
                PollSettings::from(&job.client),
            )
            .await?;
            if cropped.is_empty() && !report.resolved.is_empty() {
                ::log::warn!("Cutout to {} produced no files", bbox);
            }
            let targets = cropped.iter().map(|c| c.to_file_descriptor()).collect();
            report.cropped = Some(cropped);
            targets
        }
        None => report.resolved.files.clone(),
    };

    report.downloads = download_all(
        api,
        &targets,
        &job.download.dest_dir,
        job.download.options,
        on_progress,
    )
    .await;

    if let Some(climatology) = &job.climatology {
        let grid_file = locate_grid_file(&job.download.dest_dir, &job.download.grid_suffix)?;
        ::log::info!("Computing climatology from {}", grid_file.display());
        let result = compute_climatology(&grid_file, climatology)?;

        if let Some(output) = &job.output {
            write_climatology(&result, output)?;
            ::log::info!("Climatology written to {}", output.display());
        }

        report.grid_file = Some(grid_file);
        report.climatology = Some(result);
    }

    Ok(report)
}
