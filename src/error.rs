//! # Error Types
//!
//! Errors are layered the same way the pipeline is:
//!
//! - [`ApiError`]: a single request against the repository failed (transport,
//!   HTTP status, undecodable body).
//! - [`TransferError`]: a single download failed, either while fetching,
//!   while validating, or while extracting.
//! - [`PipelineError`]: what callers of the pipeline see. Every variant knows
//!   which [`Step`] failed and carries the parameters needed to reproduce it.
//!
//! Values at or above a dataset's sentinel are not errors; they are masked.

use polars::error::PolarsError;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by a [`RepositoryApi`](crate::client::RepositoryApi) implementation.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{url} answered with HTTP status {status}")]
    Status { url: String, status: u16 },

    #[error("Malformed response from {url}: {reason}")]
    Decode { url: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("job {job} still '{status}' after {polls} polls")]
    JobTimeout {
        job: String,
        status: String,
        polls: u32,
    },

    #[error("pending job {job} has no job_url to poll")]
    MissingJobUrl { job: String },
}

/// Errors raised while transferring one resource to the local filesystem.
#[derive(Error, Debug)]
pub enum TransferError {
    #[error("fetch failed: {0}")]
    Fetch(#[source] ApiError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("integrity check failed for {path}: expected {expected}, got {actual}")]
    Integrity {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("unsupported checksum type '{0}'")]
    UnsupportedChecksum(String),

    #[error("could not extract archive {archive}: {reason}")]
    Extract { archive: PathBuf, reason: String },

    #[error("cannot derive a file name from URL '{0}'")]
    InvalidUrl(String),
}

/// The pipeline step an error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Config,
    Query,
    Subset,
    Download,
    Load,
    Mask,
    Filter,
    Aggregate,
    Output,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Step::Config => "config",
            Step::Query => "query",
            Step::Subset => "subset",
            Step::Download => "download",
            Step::Load => "load",
            Step::Mask => "mask",
            Step::Filter => "filter",
            Step::Aggregate => "aggregate",
            Step::Output => "output",
        };
        f.write_str(name)
    }
}

/// Top-level error returned by pipeline operations.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("[config] {0}")]
    Config(String),

    #[error("[query] catalog lookup failed for {params}: {source}")]
    Query {
        params: String,
        #[source]
        source: ApiError,
    },

    #[error("[subset] cutout request for bbox {bbox} over {paths} path(s) failed: {source}")]
    Subset {
        bbox: String,
        paths: usize,
        #[source]
        source: ApiError,
    },

    #[error("[subset] cutout job {job} for bbox {bbox} ended with status '{status}'")]
    CutoutJob {
        job: String,
        bbox: String,
        status: String,
    },

    #[error("[download] {url}: {source}")]
    Download {
        url: String,
        #[source]
        source: TransferError,
    },

    #[error("[load] {path}: {reason}")]
    Format { path: PathBuf, reason: String },

    #[error("[mask] {0}")]
    Mask(#[source] PolarsError),

    #[error("[filter] {0}")]
    Filter(#[source] PolarsError),

    #[error("[aggregate] {0}")]
    Aggregate(#[from] PolarsError),

    #[error("[output] {path}: {reason}")]
    Output { path: PathBuf, reason: String },
}

impl PipelineError {
    /// Which step of the pipeline produced this error.
    pub fn step(&self) -> Step {
        match self {
            PipelineError::Config(_) => Step::Config,
            PipelineError::Query { .. } => Step::Query,
            PipelineError::Subset { .. } | PipelineError::CutoutJob { .. } => Step::Subset,
            PipelineError::Download { .. } => Step::Download,
            PipelineError::Format { .. } => Step::Load,
            PipelineError::Mask(_) => Step::Mask,
            PipelineError::Filter(_) => Step::Filter,
            PipelineError::Aggregate(_) => Step::Aggregate,
            PipelineError::Output { .. } => Step::Output,
        }
    }

    pub(crate) fn format(path: impl Into<PathBuf>, reason: impl fmt::Display) -> Self {
        PipelineError::Format {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn output(path: impl Into<PathBuf>, reason: impl fmt::Display) -> Self {
        PipelineError::Output {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

/// Result type for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;
