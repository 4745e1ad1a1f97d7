use crate::catalog::CatalogResult;
use crate::climatology::ClimatologyResult;
use crate::config::JobConfig;
use crate::download::BatchReport;
use crate::resolve::ResolvedResources;
use env_logger::{Builder, Env};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Initialises `env_logger`. `RUST_LOG` wins over the flags when it is set.
pub fn init_logging(verbose: bool, quiet: bool) {
    let default_level = if quiet {
        "error"
    } else if verbose {
        "debug"
    } else {
        "info"
    };
    let mut builder = Builder::from_env(Env::default().default_filter_or(default_level));
    builder.format_timestamp_secs();
    builder.try_init().ok();
}

pub fn show_greeting(source: &str) {
    println!("=== ISIMIP Climatology Pipeline ===");
    println!("Loading configuration from: {}", source);
}

pub fn config_echo(config: &JobConfig) {
    println!("\nConfiguration:");
    println!("  Catalog: {}", config.client.data_api_url);
    println!("  Query: {}", config.query);
    match &config.bbox {
        Some(bbox) => println!("  Bounding box: {}", bbox),
        None => println!("  Bounding box: full extent"),
    }
    println!("  Destination: {}", config.download.dest_dir.display());
    println!(
        "  Validate: {}, extract: {}, dedup: {:?}",
        config.download.options.validate, config.download.options.extract, config.download.dedup
    );
    if let Some(climatology) = &config.climatology {
        println!(
            "  Climatology: {} {}-{}{}",
            climatology.variable,
            climatology.start_year,
            climatology.end_year,
            if climatology.skip_missing {
                " (skipping missing values)"
            } else {
                ""
            }
        );
    }
    if let Some(output) = &config.output {
        println!("  Output: {}", output.display());
    }
}

pub fn show_search_results(result: &CatalogResult) {
    println!("\nCatalog Results: {} dataset(s)", result.count);
    for dataset in &result.datasets {
        println!(
            "  {} ({} file(s))",
            dataset
                .path
                .as_deref()
                .or(dataset.name.as_deref())
                .unwrap_or("<unnamed>"),
            dataset.files.len()
        );
        for file in &dataset.files {
            println!("    {}", file.file_url);
        }
    }
}

pub fn show_resolved(resources: &ResolvedResources) {
    println!("\nResolved {} resource(s):", resources.len());
    for (url, path) in resources.urls.iter().zip(&resources.paths) {
        println!("  {}  <-  {}", path, url);
    }
}

pub fn show_batch_report(report: &BatchReport) {
    println!("\nDownloads:");
    for outcome in &report.completed {
        let note = if outcome.skipped { " (already present)" } else { "" };
        println!("  ok   {}{}", outcome.path.display(), note);
        for file in &outcome.extracted {
            println!("       -> {}", file.display());
        }
    }
    for failure in &report.failed {
        println!("  FAIL {}", failure);
    }
}

pub fn show_climatology_summary(result: &ClimatologyResult) {
    println!(
        "\nClimatology of '{}' over {}-{}: {} cell(s)",
        result.variable,
        result.start_year,
        result.end_year,
        result.len()
    );
    println!("{}", result.frame.head(Some(10)));
}

/// Progress bar over a batch of downloads; hidden in quiet mode.
pub fn download_progress(total: usize, quiet: bool) -> ProgressBar {
    if quiet {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(total as u64);
    let style = ProgressStyle::with_template("{spinner} [{bar:30}] {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    bar.set_style(style);
    bar
}

/// Spinner counting finished downloads when the total is not known up front.
pub fn download_spinner(quiet: bool) -> ProgressBar {
    if quiet {
        return ProgressBar::hidden();
    }
    let spinner = ProgressBar::new_spinner();
    let style = ProgressStyle::with_template("{spinner} {pos} file(s) downloaded {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    spinner.set_style(style);
    spinner.enable_steady_tick(Duration::from_millis(120));
    spinner
}

pub fn show_farewell_with_timing(elapsed: Duration) {
    println!(
        "\n=== Completed successfully in {:.2}s ===",
        elapsed.as_secs_f64()
    );
}
