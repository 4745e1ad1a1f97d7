//! # Resource Resolution
//!
//! Flattens catalog results into parallel lists of download URLs and path
//! identifiers, in dataset order and then file order within each dataset.

use crate::catalog::{DatasetDescriptor, FileDescriptor};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// What to do with a file that shows up under more than one dataset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum DedupPolicy {
    /// Keep every occurrence
    #[default]
    Keep,
    /// Keep only the first occurrence of each path identifier
    ByPath,
}

/// Parallel sequences of resolved resources. All vectors have the same length.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResolvedResources {
    pub urls: Vec<String>,
    pub paths: Vec<String>,
    /// Descriptor of each resource, used for integrity validation on download
    pub files: Vec<FileDescriptor>,
}

impl ResolvedResources {
    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FileDescriptor> {
        self.files.iter()
    }

    fn push(&mut self, file: &FileDescriptor) {
        self.urls.push(file.file_url.clone());
        self.paths.push(file.path.clone());
        self.files.push(file.clone());
    }
}

/// Extracts download URLs and path identifiers from catalog results.
pub fn resolve_resources(datasets: &[DatasetDescriptor], policy: DedupPolicy) -> ResolvedResources {
    let mut resolved = ResolvedResources::default();
    let mut seen: HashSet<&str> = HashSet::new();

    for dataset in datasets {
        for file in &dataset.files {
            if policy == DedupPolicy::ByPath && !seen.insert(file.path.as_str()) {
                debug!("Skipping duplicate resource {}", file.path);
                continue;
            }
            resolved.push(file);
        }
    }

    debug!(
        "Resolved {} resources from {} datasets ({:?})",
        resolved.len(),
        datasets.len(),
        policy
    );
    resolved
}
