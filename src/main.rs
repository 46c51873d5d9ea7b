use std::path::PathBuf;

use anyhow::{Context, Result};
use bundle_harness::auth::AuthConfig;
use bundle_harness::daemon_state::{DaemonProbe, ServiceManager};
use bundle_harness::{Scenario, ScenarioOutcome, Settings, run_scenario};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "info";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to a harness.toml settings file
    #[arg(long, env = "BUNDLE_HARNESS_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand, Debug)]
enum CliCommand {
    /// Print whether the bundle web server daemon is running
    DaemonState,
    /// Write a fixed-credentials auth configuration file
    AuthConfig(AuthConfigArgs),
    /// Clone through a freshly initialized route's bundle URI
    Smoke(SmokeArgs),
    /// Init, update and delete a route through the CLI
    Lifecycle(LifecycleArgs),
}

#[derive(Args, Debug)]
struct AuthConfigArgs {
    #[arg(long)]
    username: String,

    #[arg(long, env = "BUNDLE_HARNESS_PASSWORD", hide_env_values = true)]
    password: String,

    /// Destination of the JSON file
    #[arg(long)]
    output: PathBuf,
}

#[derive(Args, Debug)]
struct SmokeArgs {
    /// Port for the bundle web server
    #[arg(long, default_value_t = 8080)]
    port: u16,

    /// Existing remote URL; a local remote is created when omitted
    #[arg(long)]
    remote: Option<String>,
}

#[derive(Args, Debug)]
struct LifecycleArgs {
    /// Route to create; must not exist yet
    #[arg(long, default_value = "integration/lifecycle")]
    route: String,
}

fn main() {
    init_tracing();
    if let Err(err) = run() {
        eprintln!("bundle-harness error: {err:#}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::new(cli.config.clone()).context("Failed to load settings")?;
    settings.validate().context("Invalid settings")?;

    match cli.command {
        CliCommand::DaemonState => {
            let manager = ServiceManager::for_host(settings.daemon.label.clone());
            let state = manager
                .query_state()
                .with_context(|| format!("Failed to query {}", manager.name()))?;
            println!("{} ({}): {state}", manager.label(), manager.name());
        }
        CliCommand::AuthConfig(args) => {
            AuthConfig::fixed(&args.username, &args.password)
                .write_to(&args.output)
                .with_context(|| format!("Failed to write {}", args.output.display()))?;
            println!("Wrote {}", args.output.display());
        }
        CliCommand::Smoke(args) => {
            let scenario = Scenario::smoke(args.port, args.remote.as_deref());
            run_and_report(&settings, &scenario)?;
        }
        CliCommand::Lifecycle(args) => {
            let scenario = Scenario::route_lifecycle(&args.route);
            run_and_report(&settings, &scenario)?;
        }
    }
    Ok(())
}

fn run_and_report(settings: &Settings, scenario: &Scenario) -> Result<()> {
    let runtime = tokio::runtime::Runtime::new()
        .context("Failed to initialize async runtime for scenario")?;
    let outcome = runtime.block_on(run_scenario(settings, scenario))?;
    report(outcome)
}

fn report(outcome: ScenarioOutcome) -> Result<()> {
    for failure in &outcome.teardown.failures {
        eprintln!("teardown {:?} failed: {}", failure.action, failure.message);
    }
    match outcome.result {
        Ok(()) => {
            println!("Scenario '{}' passed", outcome.name);
            Ok(())
        }
        Err(err) => Err(err.context(format!("Scenario '{}' failed", outcome.name))),
    }
}
