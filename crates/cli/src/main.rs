//! Entry point: parses a subcommand, loads configuration, and wires the
//! REST client, session controller, and prompt dispatcher together for the
//! `run-tests` workflow. `test-run-execution`, `test-runner-status`, and
//! `abort-testing` are thin one-shot REST calls.

mod cli;
mod colorize;
mod error;
mod prompt;
mod rest;
mod session;

use std::path::PathBuf;

use anyhow::Result;
use tracing_subscriber::EnvFilter;

use cli::Command;
use colorize::{colorize_error, colorize_header, colorize_key, colorize_success, colorize_value};
use error::CliError;
use prompt::PromptDispatcher;
use rest::RestClient;
use session::TestRunSession;
use th_protocol::config::load_config;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .json()
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run().await {
        eprintln!("{} {err:#}", colorize_error("Error:"));
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    colorize::init_from_env();
    let command = cli::parse_args()?;

    match command {
        Command::RunTests(args) => run_tests(args).await,
        Command::TestRunExecution { id, log } => test_run_execution(id, log).await,
        Command::TestRunnerStatus => test_runner_status().await,
        Command::AbortTesting => abort_testing().await,
    }
}

/// Load configuration from `path`, re-wrapping any failure as a
/// `CliError::Configuration` so the top-level error boundary reports a
/// consistent "configuration error: ..." message regardless of whether the
/// file was unreadable or malformed.
fn load_config_or_error(path: &std::path::Path) -> Result<th_protocol::config::CliConfig> {
    load_config(path).map_err(|err| CliError::Configuration(err.to_string()).into())
}

async fn run_tests(args: cli::RunTestsArgs) -> Result<()> {
    if args.no_color {
        colorize::set_colors_enabled(false);
    } else {
        colorize::init_from_env();
    }

    let config_path = args.config.map(PathBuf::from).unwrap_or_else(|| PathBuf::from("./config/cli.toml"));
    let config = load_config_or_error(&config_path)?;

    let rest = RestClient::new(&config.server);

    if let Some(folder) = &args.pics_config_folder {
        upload_pics_files(&rest, folder).await;
    }

    let run_id = rest.create_run(&args.tests_list, args.title.as_deref(), args.project_id).await?;
    println!("{} {run_id}", colorize_key("Created test run execution"));

    rest.start_run(run_id).await?;
    println!("{}", colorize_success("Test run started"));

    let run_tree = rest.run_history(run_id).await?;

    let dispatcher = PromptDispatcher::new(config.clone(), RestClient::new(&config.server));
    let mut sess = TestRunSession::new(config, run_tree, dispatcher);
    sess.run().await
}

/// Upload every `.pics`/`.txt` file found directly under `folder` before the
/// run is created, matching the reference client's bulk PICS upload step.
/// Individual upload failures are logged and otherwise ignored; a missing
/// or unreadable folder is not fatal.
async fn upload_pics_files(rest: &RestClient, folder: &str) {
    let mut entries = match tokio::fs::read_dir(folder).await {
        Ok(entries) => entries,
        Err(err) => {
            eprintln!("{} {err}", colorize_error(&format!("could not read PICS config folder {folder}:")));
            return;
        }
    };

    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        let is_pics_file = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("pics") | Some("txt")
        );
        if !is_pics_file {
            continue;
        }
        if rest.upload_file(&path).await {
            println!("{} {}", colorize_success("Uploaded PICS file"), path.display());
        } else {
            eprintln!("{}", colorize_error(&format!("failed to upload PICS file {}", path.display())));
        }
    }
}

async fn test_run_execution(id: i64, log: bool) -> Result<()> {
    let config = load_config_or_error(&PathBuf::from("./config/cli.toml"))?;
    let rest = RestClient::new(&config.server);
    let history = rest.run_history(id).await?;

    println!("{}", colorize_header(&format!("Test Run Execution #{id}")));
    if let Some(state) = history.get("state").and_then(|v| v.as_str()) {
        println!("{} {}", colorize_key("state:"), colorize_value(state));
    }
    if log {
        println!("{}", serde_json::to_string_pretty(&history)?);
    }
    Ok(())
}

async fn test_runner_status() -> Result<()> {
    let config = load_config_or_error(&PathBuf::from("./config/cli.toml"))?;
    let rest = RestClient::new(&config.server);
    let status = rest.runner_status().await?;
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

async fn abort_testing() -> Result<()> {
    let config = load_config_or_error(&PathBuf::from("./config/cli.toml"))?;
    let rest = RestClient::new(&config.server);
    rest.abort_testing().await?;
    println!("{}", colorize_success("Abort request sent"));
    Ok(())
}
