//! # Catalog Query
//!
//! Builds structured dataset searches against the repository catalog and
//! collects the matching [`DatasetDescriptor`]s.
//!
//! Query attributes are typed fields rather than a free-form map, so a
//! misspelled attribute is rejected when the [`QueryParameters`] are built
//! instead of silently matching nothing on the server.
//!
//! ## Example
//!
//! ```rust,no_run
//! use isiclim::catalog::{QueryParameters, search_datasets};
//! use isiclim::client::{ClientConfig, HttpRepository};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let api = HttpRepository::new(ClientConfig::default())?;
//! let params = QueryParameters::builder()
//!     .simulation_round("ISIMIP3b")
//!     .product("OutputData")
//!     .variable("tc")
//!     .build();
//! let result = search_datasets(&api, &params).await?;
//! println!("{} datasets", result.count);
//! # Ok(())
//! # }
//! ```

use crate::client::RepositoryApi;
use crate::error::{ApiError, PipelineError, PipelineResult};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Attribute names understood by the catalog, in query-string order.
pub const QUERY_ATTRIBUTES: [&str; 6] = [
    "simulation_round",
    "product",
    "climate_forcing",
    "climate_scenario",
    "model",
    "variable",
];

/// Filters for a catalog search. Unset fields do not constrain the search.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueryParameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub simulation_round: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub climate_forcing: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub climate_scenario: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variable: Option<String>,
}

impl QueryParameters {
    pub fn builder() -> QueryParametersBuilder {
        QueryParametersBuilder::default()
    }

    /// Builds parameters from `name=value` style pairs.
    ///
    /// Fails on attribute names the catalog does not know, on repeated
    /// attributes and on empty values.
    pub fn from_pairs<I, K, V>(pairs: I) -> PipelineResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut params = QueryParameters::default();
        for (key, value) in pairs {
            let key = key.as_ref().trim();
            let value: String = value.into();
            if value.trim().is_empty() {
                return Err(PipelineError::Config(format!(
                    "query attribute '{}' has an empty value",
                    key
                )));
            }
            let slot = match key {
                "simulation_round" => &mut params.simulation_round,
                "product" => &mut params.product,
                "climate_forcing" | "forcing" => &mut params.climate_forcing,
                "climate_scenario" | "scenario" => &mut params.climate_scenario,
                "model" => &mut params.model,
                "variable" => &mut params.variable,
                other => {
                    return Err(PipelineError::Config(format!(
                        "unknown query attribute '{}' (expected one of: {})",
                        other,
                        QUERY_ATTRIBUTES.join(", ")
                    )));
                }
            };
            if slot.is_some() {
                return Err(PipelineError::Config(format!(
                    "query attribute '{}' given more than once",
                    key
                )));
            }
            *slot = Some(value.trim().to_string());
        }
        Ok(params)
    }

    /// Parses a single `name=value` argument.
    pub fn parse_pair(s: &str) -> Result<(String, String), String> {
        let (key, value) = s
            .split_once('=')
            .ok_or_else(|| format!("Query filter must be in format 'name=value': {}", s))?;
        if key.trim().is_empty() || value.trim().is_empty() {
            return Err("Query filter name and value cannot be empty".to_string());
        }
        Ok((key.trim().to_string(), value.trim().to_string()))
    }

    /// The set attributes as query-string pairs, in [`QUERY_ATTRIBUTES`] order.
    pub fn to_query_pairs(&self) -> Vec<(&'static str, String)> {
        let fields = [
            &self.simulation_round,
            &self.product,
            &self.climate_forcing,
            &self.climate_scenario,
            &self.model,
            &self.variable,
        ];
        QUERY_ATTRIBUTES
            .iter()
            .zip(fields)
            .filter_map(|(name, value)| value.as_ref().map(|v| (*name, v.clone())))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.to_query_pairs().is_empty()
    }
}

impl fmt::Display for QueryParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pairs = self.to_query_pairs();
        if pairs.is_empty() {
            return f.write_str("{}");
        }
        let rendered: Vec<String> = pairs.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        write!(f, "{{{}}}", rendered.join(", "))
    }
}

#[derive(Debug, Default)]
pub struct QueryParametersBuilder {
    params: QueryParameters,
}

impl QueryParametersBuilder {
    pub fn simulation_round(mut self, value: impl Into<String>) -> Self {
        self.params.simulation_round = Some(value.into());
        self
    }

    pub fn product(mut self, value: impl Into<String>) -> Self {
        self.params.product = Some(value.into());
        self
    }

    pub fn climate_forcing(mut self, value: impl Into<String>) -> Self {
        self.params.climate_forcing = Some(value.into());
        self
    }

    pub fn climate_scenario(mut self, value: impl Into<String>) -> Self {
        self.params.climate_scenario = Some(value.into());
        self
    }

    pub fn model(mut self, value: impl Into<String>) -> Self {
        self.params.model = Some(value.into());
        self
    }

    pub fn variable(mut self, value: impl Into<String>) -> Self {
        self.params.variable = Some(value.into());
        self
    }

    pub fn build(self) -> QueryParameters {
        self.params
    }
}

/// One file listed under a dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileDescriptor {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    /// Path identifier relative to the repository root
    pub path: String,
    /// Fully-qualified download URL
    pub file_url: String,
    #[serde(default)]
    pub checksum: Option<String>,
    #[serde(default)]
    pub checksum_type: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
}

/// One catalog search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetDescriptor {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub specifiers: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub files: Vec<FileDescriptor>,
}

impl DatasetDescriptor {
    /// A specifier rendered as a string, if present.
    pub fn specifier(&self, name: &str) -> Option<String> {
        self.specifiers.get(name).map(|value| match value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }
}

/// One page of the catalog's paginated `datasets` listing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatasetPage {
    #[serde(default)]
    pub count: u64,
    #[serde(default)]
    pub next: Option<String>,
    #[serde(default)]
    pub previous: Option<String>,
    #[serde(default)]
    pub results: Vec<DatasetDescriptor>,
}

/// All datasets matching a query.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogResult {
    pub count: u64,
    pub datasets: Vec<DatasetDescriptor>,
}

impl CatalogResult {
    pub fn is_empty(&self) -> bool {
        self.datasets.is_empty()
    }

    pub fn file_count(&self) -> usize {
        self.datasets.iter().map(|d| d.files.len()).sum()
    }
}

/// Upper bound on catalog pages read for a single search.
pub const MAX_PAGES: u32 = 10_000;

/// Searches the catalog, following pagination until every page has been read.
///
/// An empty match is a normal result (`count == 0`, no datasets). Reading
/// stops once `count` datasets have arrived, when a page comes back empty or
/// when the server stops advertising a next page.
///
/// # Errors
///
/// Returns [`PipelineError::Query`] carrying the rendered query when the
/// catalog cannot be reached, answers with something undecodable or still
/// advertises more pages after [`MAX_PAGES`].
pub async fn search_datasets<A>(api: &A, params: &QueryParameters) -> PipelineResult<CatalogResult>
where
    A: RepositoryApi + ?Sized,
{
    search_pages(api, params, MAX_PAGES).await
}

pub(crate) async fn search_pages<A>(
    api: &A,
    params: &QueryParameters,
    max_pages: u32,
) -> PipelineResult<CatalogResult>
where
    A: RepositoryApi + ?Sized,
{
    debug!("Searching catalog with {}", params);
    let query_error = |source| PipelineError::Query {
        params: params.to_string(),
        source,
    };

    let mut datasets = Vec::new();
    let mut count = 0;
    let mut page = 1u32;

    loop {
        let response = api.search_page(params, page).await.map_err(query_error)?;

        if page == 1 {
            count = response.count;
        }
        debug!(
            "Catalog page {}: {} datasets (next: {:?})",
            page,
            response.results.len(),
            response.next
        );
        let empty_page = response.results.is_empty();
        datasets.extend(response.results);

        let Some(next) = response.next else {
            break;
        };
        if datasets.len() as u64 >= count {
            break;
        }
        if empty_page {
            warn!(
                "Catalog page {} is empty but {} of {} datasets are missing, stopping",
                page,
                count - datasets.len() as u64,
                count
            );
            break;
        }
        page = match page.checked_add(1) {
            Some(next_page) if next_page <= max_pages => next_page,
            _ => {
                return Err(query_error(ApiError::Decode {
                    url: next,
                    reason: format!(
                        "catalog still advertises more pages after {} pages ({} of {} datasets read)",
                        page,
                        datasets.len(),
                        count
                    ),
                }));
            }
        };
    }

    info!("Catalog returned {} datasets for {}", count, params);
    Ok(CatalogResult { count, datasets })
}
