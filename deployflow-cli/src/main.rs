//! Deployflow CLI - install, test and tear down an application on Kubernetes.

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use deployflow::adapters::{
    CommandTestRunner, DockerRegistry, GitSource, KubectlPortForward, SystemToolchain,
};
use deployflow::cluster::{ClusterClient, InMemoryCluster, KubectlClient};
use deployflow::config::{Credentials, DeployConfig};
use deployflow::context::RunContext;
use deployflow::events::{FanOutEventSink, LoggingEventSink};
use deployflow::observability::{init_tracing, LogFormat, WideEventSink, DEFAULT_FILTER};
use deployflow::pipeline::{Pipeline, PipelineMode, RunReport};
use deployflow::stages::Ports;
use deployflow::testing::{
    CountingForwarder, ScriptedScanner, StubRegistry, StubSource, StubTestRunner, StubToolchain,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "deployflow")]
#[command(about = "Idempotent deployment orchestration for Kubernetes")]
#[command(version)]
struct Cli {
    /// JSON configuration file
    #[arg(short, long, env = "DEPLOYFLOW_CONFIG")]
    config: Option<PathBuf>,

    /// Log output format
    #[arg(long, default_value = "pretty")]
    log_format: LogFormat,

    /// Rehearse against an in-memory cluster with stubbed tools
    #[arg(long)]
    dry_run: bool,

    /// kubectl context to target
    #[arg(long)]
    kube_context: Option<String>,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Clone, Copy)]
enum Commands {
    /// Deploy everything and verify convergence
    Install,
    /// Run the test suite and the quality gate only
    Test,
    /// Remove everything, namespace included
    Cleanup,
}

impl From<Commands> for PipelineMode {
    fn from(command: Commands) -> Self {
        match command {
            Commands::Install => Self::FullInstall,
            Commands::Test => Self::TestOnly,
            Commands::Cleanup => Self::CleanupOnly,
        }
    }
}

fn real_ports(config: &DeployConfig, kubectl: &KubectlClient) -> Ports {
    let ports = Ports::new(
        Arc::new(SystemToolchain::new()),
        Arc::new(GitSource::new()),
        Arc::new(DockerRegistry::new()),
        Arc::new(CommandTestRunner::new()),
    )
    .with_dashboard(Arc::new(KubectlPortForward::new(kubectl, config)));
    with_sonar(ports, config)
}

#[cfg(feature = "sonar")]
fn with_sonar(ports: Ports, config: &DeployConfig) -> Ports {
    ports.with_scanner(Arc::new(deployflow::adapters::SonarScanner::new(&config.scanner)))
}

#[cfg(not(feature = "sonar"))]
fn with_sonar(ports: Ports, _config: &DeployConfig) -> Ports {
    ports
}

fn dry_run_ports(config: &DeployConfig) -> Ports {
    Ports::new(
        Arc::new(StubToolchain::new()),
        Arc::new(StubSource::new()),
        Arc::new(StubRegistry::new()),
        Arc::new(StubTestRunner::new()),
    )
    .with_scanner(Arc::new(ScriptedScanner::new(config.scanner.project_key.clone())))
    .with_dashboard(Arc::new(CountingForwarder::new()))
}

fn print_report(report: &RunReport, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", report.to_json().context("rendering report")?);
    } else {
        println!("{}", report.render());
    }
    Ok(())
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    let config = DeployConfig::load(cli.config.as_deref()).context("loading configuration")?;
    let mut credentials = Credentials::from_env(&config);
    let mode = PipelineMode::from(cli.command);
    let pipeline = Pipeline::for_mode(&config, mode)?;

    let (cluster, ports): (Arc<dyn ClusterClient>, Ports) = if cli.dry_run {
        credentials
            .database_password
            .get_or_insert_with(|| "dry-run".to_string());
        credentials
            .scanner_token
            .get_or_insert_with(|| "dry-run".to_string());
        (Arc::new(InMemoryCluster::new()), dry_run_ports(&config))
    } else {
        let mut kubectl = KubectlClient::new();
        if let Some(context) = &cli.kube_context {
            kubectl = kubectl.with_context(context);
        }
        let ports = real_ports(&config, &kubectl);
        (Arc::new(kubectl), ports)
    };

    let events = FanOutEventSink::new()
        .with(Arc::new(LoggingEventSink::debug()))
        .with(Arc::new(WideEventSink::new()));
    let ctx = RunContext::new(config, credentials, cluster, ports).with_events(Arc::new(events));

    let cancel = Arc::clone(&ctx.cancel);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling run");
            cancel.cancel("interrupted");
        }
    });

    info!(mode = %mode, dry_run = cli.dry_run, stages = ?pipeline.stage_names(), "starting");
    let report = pipeline.run(&ctx).await;
    print_report(&report, cli.json)?;
    Ok(report.exit_code())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_tracing(cli.log_format, DEFAULT_FILTER) {
        eprintln!("Error: {e}");
        std::process::exit(2);
    }

    match run(cli).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {e:#}");
            std::process::exit(2);
        }
    }
}
