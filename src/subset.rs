//! # Spatial Subsetting
//!
//! Server-side cropping of repository files to a [`BoundingBox`]. The files API
//! runs cutouts as jobs: a task is submitted, then polled until it finishes.
//!
//! Longitudes are handed to the server exactly as given, so boxes that cross
//! the antimeridian (`west > east`) reach it unmodified.

use crate::catalog::FileDescriptor;
use crate::client::{ClientConfig, RepositoryApi};
use crate::error::{ApiError, PipelineError, PipelineResult};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Rectangular spatial extent in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawBoundingBox")]
pub struct BoundingBox {
    pub south: f64,
    pub north: f64,
    pub west: f64,
    pub east: f64,
}

#[derive(Deserialize)]
struct RawBoundingBox {
    south: f64,
    north: f64,
    west: f64,
    east: f64,
}

impl TryFrom<RawBoundingBox> for BoundingBox {
    type Error = String;

    fn try_from(raw: RawBoundingBox) -> Result<Self, Self::Error> {
        BoundingBox::new(raw.south, raw.north, raw.west, raw.east).map_err(|e| e.to_string())
    }
}

impl BoundingBox {
    /// Creates a bounding box, checking `south <= north` and latitude range.
    pub fn new(south: f64, north: f64, west: f64, east: f64) -> PipelineResult<Self> {
        if [south, north, west, east].iter().any(|v| !v.is_finite()) {
            return Err(PipelineError::Config(
                "bounding box bounds must be finite numbers".to_string(),
            ));
        }
        if !(-90.0..=90.0).contains(&south) || !(-90.0..=90.0).contains(&north) {
            return Err(PipelineError::Config(format!(
                "bounding box latitudes must lie in [-90, 90], got south={} north={}",
                south, north
            )));
        }
        if south > north {
            return Err(PipelineError::Config(format!(
                "bounding box south ({}) is greater than north ({})",
                south, north
            )));
        }
        Ok(Self {
            south,
            north,
            west,
            east,
        })
    }

    /// True when the longitude range wraps across the antimeridian.
    pub fn crosses_antimeridian(&self) -> bool {
        self.west > self.east
    }

    /// Bounds in the order the files API expects.
    pub fn as_array(&self) -> [f64; 4] {
        [self.south, self.north, self.west, self.east]
    }
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[S {}, N {}, W {}, E {}]",
            self.south, self.north, self.west, self.east
        )
    }
}

impl FromStr for BoundingBox {
    type Err = String;

    /// Parses `south,north,west,east`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let values: Result<Vec<f64>, _> = s.split(',').map(|v| v.trim().parse::<f64>()).collect();
        let values = values.map_err(|_| "Invalid numeric value in bounding box".to_string())?;
        if values.len() != 4 {
            return Err("Bounding box must be in format 'south,north,west,east'".to_string());
        }
        BoundingBox::new(values[0], values[1], values[2], values[3]).map_err(|e| e.to_string())
    }
}

/// Body of a cutout task submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CutoutRequest {
    pub task: String,
    pub paths: Vec<String>,
    pub bbox: [f64; 4],
}

impl CutoutRequest {
    pub fn new(paths: Vec<String>, bbox: &BoundingBox) -> Self {
        Self {
            task: "cutout_bbox".to_string(),
            paths,
            bbox: bbox.as_array(),
        }
    }
}

/// State of a cutout job as reported by the files API.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CutoutJob {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub job_url: Option<String>,
    pub status: String,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub file_url: Option<String>,
}

impl CutoutJob {
    pub fn is_pending(&self) -> bool {
        matches!(self.status.as_str(), "queued" | "started" | "deferred" | "scheduled")
    }

    pub fn is_finished(&self) -> bool {
        self.status == "finished"
    }

    fn label(&self) -> String {
        self.id.clone().unwrap_or_else(|| "<unnamed>".to_string())
    }
}

/// A cropped resource ready for download.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CroppedResource {
    pub file_url: String,
    pub file_name: Option<String>,
}

impl CroppedResource {
    /// Download descriptor for the crop. Cutouts carry no checksum.
    pub fn to_file_descriptor(&self) -> FileDescriptor {
        FileDescriptor {
            id: None,
            name: self.file_name.clone(),
            path: self.file_name.clone().unwrap_or_else(|| self.file_url.clone()),
            file_url: self.file_url.clone(),
            checksum: None,
            checksum_type: None,
            size: None,
        }
    }
}

/// How a running cutout job is polled.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollSettings {
    pub interval: Duration,
    pub max_polls: u32,
}

impl From<&ClientConfig> for PollSettings {
    fn from(config: &ClientConfig) -> Self {
        Self {
            interval: config.poll_interval(),
            max_polls: config.max_polls,
        }
    }
}

/// Requests a server-side crop of `paths` to `bbox`, waiting for the job.
///
/// A finished job without a download URL (for example a box that misses the
/// data extent) yields an empty vector rather than an error.
///
/// # Errors
///
/// - [`PipelineError::Subset`] when submitting or polling fails, the poll
///   budget is exhausted ([`ApiError::JobTimeout`]) or a pending job has no
///   URL to poll ([`ApiError::MissingJobUrl`])
/// - [`PipelineError::CutoutJob`] when the server reports the job as failed
pub async fn request_cutout<A>(
    api: &A,
    paths: &[String],
    bbox: &BoundingBox,
    poll: PollSettings,
) -> PipelineResult<Vec<CroppedResource>>
where
    A: RepositoryApi + ?Sized,
{
    if paths.is_empty() {
        debug!("No paths to crop, skipping cutout request");
        return Ok(Vec::new());
    }

    let subset_error = |source| PipelineError::Subset {
        bbox: bbox.to_string(),
        paths: paths.len(),
        source,
    };

    if bbox.crosses_antimeridian() {
        debug!("Bounding box {} crosses the antimeridian", bbox);
    }

    let request = CutoutRequest::new(paths.to_vec(), bbox);
    info!("Requesting cutout of {} path(s) to {}", paths.len(), bbox);
    let mut job = api.submit_cutout(&request).await.map_err(subset_error)?;

    let mut polls = 0u32;
    while job.is_pending() {
        if polls >= poll.max_polls {
            return Err(subset_error(ApiError::JobTimeout {
                job: job.label(),
                status: job.status.clone(),
                polls,
            }));
        }
        let Some(job_url) = job.job_url.clone() else {
            return Err(subset_error(ApiError::MissingJobUrl { job: job.label() }));
        };

        debug!("Cutout job {} is '{}', polling again", job.label(), job.status);
        tokio::time::sleep(poll.interval).await;
        job = api.job_status(&job_url).await.map_err(subset_error)?;
        polls += 1;
    }

    if !job.is_finished() {
        return Err(PipelineError::CutoutJob {
            job: job.label(),
            bbox: bbox.to_string(),
            status: job.status,
        });
    }

    match job.file_url {
        Some(file_url) if !file_url.is_empty() => {
            info!("Cutout job {} finished: {}", job.id.as_deref().unwrap_or("-"), file_url);
            Ok(vec![CroppedResource {
                file_url,
                file_name: job.file_name,
            }])
        }
        _ => {
            warn!(
                "Cutout job {} finished without a file; {} may not overlap the data",
                job.label(),
                bbox
            );
            Ok(Vec::new())
        }
    }
}
