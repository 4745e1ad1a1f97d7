use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use isiclim::catalog::search_datasets;
use isiclim::cli::{ApiArgs, Cli, Commands, ConfigFormat, OutputFormat, merge_query};
use isiclim::client::{ClientConfig, HttpRepository};
use isiclim::climatology::{ClimatologyConfig, compute_climatology};
use isiclim::config::{DownloadConfig, JobConfig};
use isiclim::download::download_all;
use isiclim::info::{
    get_grid_info, print_grid_info_csv, print_grid_info_human, print_grid_info_json,
    print_grid_info_yaml,
};
use isiclim::log::{
    config_echo, download_progress, download_spinner, init_logging, show_batch_report,
    show_climatology_summary, show_farewell_with_timing, show_greeting, show_resolved,
    show_search_results,
};
use isiclim::output::write_climatology;
use isiclim::resolve::resolve_resources;
use isiclim::subset::{PollSettings, request_cutout};
use isiclim::run_job_with_progress;
use std::path::Path;
use std::time::Instant;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let start_time = Instant::now();
    run(cli).await?;
    log::debug!("Finished in {:.2}s", start_time.elapsed().as_secs_f64());
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let file_config = match &cli.config {
        Some(path) if !matches!(cli.command, Commands::Validate { .. }) => Some(
            JobConfig::from_file(path)
                .with_context(|| format!("Failed to load job file {}", path.display()))?,
        ),
        _ => None,
    };

    match cli.command {
        Commands::Search { query, dedup, api } => {
            let params = merge_query(&query, file_config.as_ref().map(|c| &c.query))
                .map_err(anyhow::Error::msg)?;
            let repository = repository(file_config.as_ref(), &api)?;
            let result = search_datasets(&repository, &params).await?;
            let resolved = resolve_resources(
                &result.datasets,
                dedup.unwrap_or_else(|| {
                    file_config
                        .as_ref()
                        .map(|c| c.download.dedup)
                        .unwrap_or_default()
                }),
            );

            match cli.output_format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
                OutputFormat::Yaml => println!("{}", serde_yaml::to_string(&result)?),
                OutputFormat::Csv => {
                    println!("path,file_url");
                    for (url, path) in resolved.urls.iter().zip(&resolved.paths) {
                        println!("{},{}", path, url);
                    }
                }
                OutputFormat::Human => {
                    if !cli.quiet {
                        show_search_results(&result);
                        show_resolved(&resolved);
                    }
                }
            }
        }

        Commands::Download {
            query,
            dest_dir,
            bbox,
            dedup,
            no_validate,
            no_extract,
            overwrite,
            api,
        } => {
            let params = merge_query(&query, file_config.as_ref().map(|c| &c.query))
                .map_err(anyhow::Error::msg)?;
            let mut download = file_config
                .as_ref()
                .map(|c| c.download.clone())
                .unwrap_or_else(DownloadConfig::default);
            if let Some(dir) = dest_dir {
                download.dest_dir = dir;
            }
            if let Some(policy) = dedup {
                download.dedup = policy;
            }
            download.options.validate &= !no_validate;
            download.options.extract &= !no_extract;
            download.options.overwrite |= overwrite;
            let bbox = bbox.or_else(|| file_config.as_ref().and_then(|c| c.bbox));

            let repository = repository(file_config.as_ref(), &api)?;
            let result = search_datasets(&repository, &params).await?;
            let resolved = resolve_resources(&result.datasets, download.dedup);

            let targets = match &bbox {
                Some(bbox) => {
                    let poll = PollSettings::from(repository.config());
                    request_cutout(&repository, &resolved.paths, bbox, poll)
                        .await?
                        .iter()
                        .map(|c| c.to_file_descriptor())
                        .collect()
                }
                None => resolved.files.clone(),
            };

            let bar = download_progress(targets.len(), cli.quiet);
            let report = download_all(
                &repository,
                &targets,
                &download.dest_dir,
                download.options,
                |url, _| {
                    bar.set_message(url.to_string());
                    bar.inc(1);
                },
            )
            .await;
            bar.finish_and_clear();

            if !cli.quiet {
                show_batch_report(&report);
            }
            if !report.is_success() {
                anyhow::bail!(
                    "{} of {} download(s) failed",
                    report.failed.len(),
                    report.total()
                );
            }
        }

        Commands::Climatology {
            file,
            variable,
            start_year,
            end_year,
            skip_missing,
            output,
        } => {
            let config = ClimatologyConfig::new(variable, start_year, end_year)
                .with_skip_missing(skip_missing);
            let result = compute_climatology(&file, &config)?;
            if let Some(output) = &output {
                write_climatology(&result, output)?;
            }
            if !cli.quiet {
                show_climatology_summary(&result);
            }
        }

        Commands::Run {
            dest_dir,
            output,
            dry_run,
            api,
        } => {
            let config_path = cli
                .config
                .as_ref()
                .context("The run command needs a job file: use --config or ISICLIM_CONFIG")?;
            let mut job = file_config.context("Job file was not loaded")?;
            api.apply(&mut job.client);
            if let Some(dir) = dest_dir {
                job.download.dest_dir = dir;
            }
            if output.is_some() {
                job.output = output;
            }

            if !cli.quiet {
                show_greeting(&config_path.display().to_string());
                config_echo(&job);
            }
            job.validate()?;
            if dry_run {
                println!("Dry run: configuration is valid, nothing was executed");
                return Ok(());
            }

            let start_time = Instant::now();
            let repository = HttpRepository::new(job.client.clone())?;
            let bar = download_spinner(cli.quiet);
            let report = run_job_with_progress(&repository, &job, |url, _| {
                bar.set_message(url.to_string());
                bar.inc(1);
            })
            .await?;
            bar.finish_and_clear();

            if !cli.quiet {
                show_search_results(&report.catalog);
                show_batch_report(&report.downloads);
                if let Some(result) = &report.climatology {
                    show_climatology_summary(result);
                }
                show_farewell_with_timing(start_time.elapsed());
            }
        }

        Commands::Info {
            file,
            detailed,
            variable,
            format,
        } => {
            let info = get_grid_info(&file, variable.as_deref(), detailed)?;
            match format.unwrap_or(cli.output_format) {
                OutputFormat::Human => print_grid_info_human(&info),
                OutputFormat::Json => print_grid_info_json(&info)?,
                OutputFormat::Yaml => print_grid_info_yaml(&info)?,
                OutputFormat::Csv => print_grid_info_csv(&info)?,
            }
        }

        Commands::Validate {
            config_file,
            detailed,
        } => {
            let path = config_file
                .or(cli.config)
                .context("No job file to validate: pass a path or use --config")?;
            validate_job_file(&path, detailed)?;
        }

        Commands::Template {
            template_type,
            output,
            format,
        } => {
            let job = JobConfig::template(template_type);
            let rendered = match format {
                ConfigFormat::Json => job.to_json()?,
                ConfigFormat::Yaml => job.to_yaml()?,
            };
            write_or_print(output.as_deref(), &rendered)?;
        }

        Commands::Completions { shell, output } => {
            let mut command = Cli::command();
            let mut buffer = Vec::new();
            clap_complete::generate(shell, &mut command, "isiclim", &mut buffer);
            let script = String::from_utf8(buffer).context("Completion script is not UTF-8")?;
            write_or_print(output.as_deref(), &script)?;
        }
    }

    Ok(())
}

fn repository(file_config: Option<&JobConfig>, api: &ApiArgs) -> Result<HttpRepository> {
    let mut client = file_config
        .map(|c| c.client.clone())
        .unwrap_or_else(ClientConfig::default);
    api.apply(&mut client);
    HttpRepository::new(client).context("Failed to build the HTTP client")
}

fn validate_job_file(path: &Path, detailed: bool) -> Result<()> {
    let job = JobConfig::from_file(path)?;
    job.validate()?;
    println!("{} is valid", path.display());
    if detailed {
        config_echo(&job);
    }
    Ok(())
}

fn write_or_print(output: Option<&Path>, content: &str) -> Result<()> {
    match output {
        Some(path) => {
            std::fs::write(path, content)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            eprintln!("Wrote {}", path.display());
        }
        None => println!("{}", content),
    }
    Ok(())
}
