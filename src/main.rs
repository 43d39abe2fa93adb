//! runboard - parallel test file runner
//!
//! Discovers test files, executes them on a pool of workers and streams
//! suite and test results as they happen.
//!
//! ## Usage
//!
//! ```bash
//! # Run every test file under the current directory
//! runboard run
//!
//! # Run two files with four workers
//! runboard run math.suite.yaml io.suite.yaml --workers 4
//!
//! # Keep running and re-run files that change
//! runboard run --watch
//!
//! # List discovered test files
//! runboard list
//!
//! # Write a configuration file
//! runboard config init
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{info, warn};

mod cli;
mod collab;
mod config;
mod coordinator;
mod engine;
mod executor;
mod models;
mod output;
mod protocol;
mod utils;
mod workspace;

use cli::Args;
use collab::ChangeWatcher;
use config::{ConfigFile, EnvConfig, RunnerConfig};
use coordinator::Coordinator;
use executor::WorkerPool;
use models::{Run, Status, TestFile};
use output::{write_report_to_file, ConsoleReporter, OutputFormat, RunFormatter, RunReport};
use utils::logger::init_logger;
use workspace::{discover_test_files, DiskContentLoader, PollingWatcher, YamlModuleBuilder};

/// How often watch mode looks for modified files
const WATCH_INTERVAL: Duration = Duration::from_millis(500);

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let env = EnvConfig::load();
    let config_path = args.config.clone().or_else(|| env.config_file.clone());

    match args.command {
        cli::Command::Run(run_args) => {
            let mut config = load_config(config_path.as_deref(), &env)?;
            apply_run_args(&mut config, &run_args);
            config.validate()?;
            init_logger(config.log_level().raised(args.verbose));

            if !run_tests(config, run_args).await? {
                std::process::exit(1);
            }
        }
        cli::Command::List(list_args) => {
            let mut config = load_config(config_path.as_deref(), &env)?;
            if let Some(dir) = &list_args.dir {
                config.target_directory = PathBuf::from(dir);
            }
            init_logger(config.log_level().raised(args.verbose));
            list_test_files(&config, list_args.detailed)?;
        }
        cli::Command::Config(config_args) => {
            manage_config(config_args, config_path.as_deref(), &env)?;
        }
    }

    Ok(())
}

/// Defaults, then the config file, then the environment
fn load_config(path: Option<&str>, env: &EnvConfig) -> Result<RunnerConfig> {
    let file = ConfigFile::load_or_default(path.map(Path::new))?;
    let mut config = file.runner;
    config.apply_env(env);
    config.validate()?;
    Ok(config)
}

fn apply_run_args(config: &mut RunnerConfig, args: &cli::RunArgs) {
    if let Some(dir) = &args.dir {
        config.target_directory = PathBuf::from(dir);
    }
    if let Some(workers) = args.workers {
        config.max_workers = Some(workers);
    }
    if let Some(timeout) = args.timeout {
        config.file_timeout_secs = Some(timeout);
    }
    config.watch |= args.watch;
    config.empty_suite_error |= args.empty_suite_error;
}

fn discover(config: &RunnerConfig) -> Result<Vec<TestFile>> {
    let root = &config.target_directory;
    if !root.is_dir() {
        anyhow::bail!("Target directory not found: {}", root.display());
    }
    discover_test_files(root, &config.file_matcher())
}

/// Returns false when the last run finished with errors
async fn run_tests(config: RunnerConfig, args: cli::RunArgs) -> Result<bool> {
    let format = OutputFormat::from_str(&args.format)
        .ok_or_else(|| anyhow::anyhow!("Unknown output format: {}", args.format))?;

    let files = discover(&config)?;
    if files.is_empty() {
        warn!(
            "No test files matching {:?} in {}",
            config.match_suffixes,
            config.target_directory.display()
        );
    }

    let selection = select_files(&args.files, &files);

    let pool = WorkerPool::with_timeout(
        config.workers(),
        Arc::new(YamlModuleBuilder::new()),
        config.run_options(),
        config.file_timeout(),
    )?;
    let content = Arc::new(DiskContentLoader::new(config.target_directory.clone()));

    let (watcher, follow_ups) = if config.watch {
        let (watcher, follow_ups) =
            PollingWatcher::new(config.target_directory.clone(), config.file_matcher());
        (Some(Arc::new(watcher)), Some(follow_ups))
    } else {
        (None, None)
    };

    let coordinator = Coordinator::new(
        pool,
        content,
        watcher.clone().map(|w| w as Arc<dyn ChangeWatcher>),
    );
    coordinator.register_test_files(files).await;

    let reporter = (!args.quiet).then(|| {
        let reporter = if args.no_color {
            ConsoleReporter::new().no_color()
        } else {
            ConsoleReporter::new()
        };
        reporter.spawn(coordinator.subscribe())
    });

    let started = SystemTime::now();
    let mut last = execute(&coordinator, selection.as_deref(), format, &args).await?;

    if let (Some(watcher), Some(mut follow_ups)) = (watcher, follow_ups) {
        info!(
            "Watching {} for changes (Ctrl+C to stop)",
            config.target_directory.display()
        );
        let mut since = if last.status == Status::Error {
            started
        } else {
            SystemTime::now()
        };
        let mut ticker = tokio::time::interval(WATCH_INTERVAL);

        loop {
            let changed = tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                Some(follow_up) = follow_ups.recv() => {
                    info!("Files changed during run {}", follow_up.after_run);
                    follow_up.files
                }
                _ = ticker.tick() => watcher.changed_since(since).await,
            };
            if changed.is_empty() {
                continue;
            }

            let run_started = SystemTime::now();
            coordinator.register_test_files(discover(&config)?).await;
            info!("Re-running {} changed files", changed.len());
            last = execute(&coordinator, Some(changed.as_slice()), format, &args).await?;
            since = if last.status == Status::Error {
                run_started
            } else {
                SystemTime::now()
            };
        }
    }

    coordinator.close().await;
    drop(coordinator);
    if let Some(reporter) = reporter {
        let _ = reporter.await;
    }

    Ok(last.status != Status::Error)
}

/// Create a run for the selection, execute it and print its report
async fn execute(
    coordinator: &Coordinator,
    selection: Option<&[String]>,
    format: OutputFormat,
    args: &cli::RunArgs,
) -> Result<Run> {
    let run = coordinator.create_run(selection).await;
    let finished = coordinator.start_run(&run.id).await?;

    let report = RunReport::new(finished.clone(), coordinator.suites_for_run(&finished.id).await);
    let formatter = if args.no_color {
        RunFormatter::new(format).no_color()
    } else {
        RunFormatter::new(format)
    };
    println!("{}", formatter.format(&report));

    if let Some(path) = &args.output {
        write_report_to_file(path, &report, format)
            .with_context(|| format!("Failed to write report to {path}"))?;
        info!("Report saved to {}", path);
    }

    Ok(finished)
}

/// Map the requested files to test file ids; `None` selects everything
fn select_files(requested: &[String], files: &[TestFile]) -> Option<Vec<String>> {
    if requested.is_empty() {
        return None;
    }

    let selection: Vec<String> = requested
        .iter()
        .map(|f| f.trim_start_matches("./").replace('\\', "/"))
        .collect();
    for id in &selection {
        if !files.iter().any(|f| &f.id == id) {
            warn!("Unknown test file: {}", id);
        }
    }
    Some(selection)
}

fn list_test_files(config: &RunnerConfig, detailed: bool) -> Result<()> {
    let files = discover(config)?;

    println!(
        "\nTest files in {} ({} total)\n",
        config.target_directory.display(),
        files.len()
    );
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    for (index, file) in files.iter().enumerate() {
        if detailed {
            println!(
                "  {:3}. {:40} {}",
                index + 1,
                file.relative_path,
                file.absolute_path.display()
            );
        } else {
            println!("  {:3}. {}", index + 1, file.relative_path);
        }
    }

    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n");
    Ok(())
}

fn manage_config(args: cli::ConfigArgs, config_path: Option<&str>, env: &EnvConfig) -> Result<()> {
    match args.action {
        cli::ConfigAction::Init { output, force } => {
            let path = Path::new(&output);
            if path.exists() && !force {
                anyhow::bail!(
                    "Configuration file already exists: {output}. Use --force to overwrite."
                );
            }

            ConfigFile::default().save(path)?;
            println!("✓ Configuration file created: {output}");
            println!("\nEdit the file to customize your settings.");
        }

        cli::ConfigAction::Show { env: env_only, format } => {
            if env_only {
                env.print_summary();
            } else {
                let config = ConfigFile {
                    runner: load_config(config_path, env)?,
                    ..ConfigFile::default()
                };
                let output = if format == "json" {
                    serde_json::to_string_pretty(&config)?
                } else {
                    serde_yaml::to_string(&config)?
                };
                println!("{output}");
            }
        }

        cli::ConfigAction::Validate { file } => {
            let path = file
                .or_else(|| config_path.map(str::to_string))
                .or_else(|| ConfigFile::find().map(|p| p.to_string_lossy().to_string()))
                .unwrap_or_else(|| "./runboard.yaml".to_string());

            match ConfigFile::load(&path) {
                Ok(_) => {
                    println!("✓ Configuration file is valid: {path}");
                }
                Err(e) => {
                    println!("✗ Configuration file is invalid: {path}");
                    println!("  Error: {e:#}");
                    return Err(e);
                }
            }
        }

        cli::ConfigAction::Env => {
            config::env::print_env_help();
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn files() -> Vec<TestFile> {
        vec![
            TestFile::new("math.suite.yaml", "/project/math.suite.yaml"),
            TestFile::new("nested/io.suite.yaml", "/project/nested/io.suite.yaml"),
        ]
    }

    #[test]
    fn test_select_files() {
        assert_eq!(select_files(&[], &files()), None);
        assert_eq!(
            select_files(&["./nested/io.suite.yaml".to_string()], &files()),
            Some(vec!["nested/io.suite.yaml".to_string()])
        );
    }

    #[test]
    fn test_apply_run_args() {
        let mut config = RunnerConfig::default();
        let args = cli::RunArgs {
            files: Vec::new(),
            dir: Some("tests".to_string()),
            workers: Some(2),
            watch: false,
            empty_suite_error: true,
            timeout: Some(30),
            format: "table".to_string(),
            output: None,
            quiet: false,
            no_color: false,
        };

        apply_run_args(&mut config, &args);
        assert_eq!(config.target_directory, PathBuf::from("tests"));
        assert_eq!(config.workers(), 2);
        assert_eq!(config.file_timeout(), Some(Duration::from_secs(30)));
        assert!(config.empty_suite_error);
        assert!(!config.watch);
    }

    #[test]
    fn test_load_config_applies_env() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runboard.yaml");
        std::fs::write(&path, "runner:\n  max_workers: 2\n  watch: true\n").unwrap();

        let env = EnvConfig {
            max_workers: Some(5),
            ..EnvConfig::default()
        };
        let config = load_config(path.to_str(), &env).unwrap();
        assert_eq!(config.max_workers, Some(5));
        assert!(config.watch);
    }
}
