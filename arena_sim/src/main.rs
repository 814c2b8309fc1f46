//! Arena battle runner CLI
//!
//! Runs one or more battles between the given agents and streams every tick
//! to the messaging server.

use anyhow::Context;
use arena_core::descriptor::split_descriptor_list;
use arena_core::{parse_agent_env_vars, DeliveryPolicy, RunConfig, RunManager, RunReport, ServerDirectory};
use arena_env::{ContainerRuntime, HttpTransport, RenderMode, TokioContext};
use arena_sim::{ArenaFactory, DockerRuntime, JsonRecorder, TerminalInput};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// Multi-agent arena battle runner
#[derive(Parser, Debug)]
#[command(name = "arena-battle")]
#[command(about = "Run battles between arena agents", long_about = None)]
struct Args {
    /// Simulation configuration id (ArenaFFA-v0, ArenaFFASmall-v0, ArenaDuel-v0)
    #[arg(long, default_value = "ArenaFFA-v0")]
    config: String,

    /// Comma-separated agent descriptors, one per slot
    #[arg(
        long,
        default_value = "test::agents.SimpleAgent,test::agents.SimpleAgent,test::agents.SimpleAgent,test::agents.SimpleAgent"
    )]
    agents: String,

    /// Extra container environment, e.g. `0:foo=bar:baz=lar,3:foo=lam`
    #[arg(long, default_value = "")]
    agent_env_vars: String,

    /// Directory for rendered frames
    #[arg(long)]
    record_pngs_dir: Option<PathBuf>,

    /// Directory for JSON frames and merged records
    #[arg(long)]
    record_json_dir: Option<PathBuf>,

    /// Render every tick
    #[arg(long)]
    render: bool,

    /// Render target (human, rgb_array, rgb_pixel)
    #[arg(long, default_value = "human")]
    render_mode: RenderMode,

    /// Saved game state to start every episode from
    #[arg(long)]
    game_state_file: Option<PathBuf>,

    /// Sleep after each rendered frame (and 5 s after the last one)
    #[arg(long, default_value = "true", action = clap::ArgAction::Set)]
    do_sleep: bool,

    /// Host of the messaging server
    #[arg(long, default_value = "localhost")]
    messaging_host: String,

    /// Port of the messaging server
    #[arg(long, default_value = "8000")]
    messaging_port: u16,

    /// Number of episodes to run
    #[arg(short, long, default_value = "1")]
    episodes: usize,

    /// Master seed (random when omitted)
    #[arg(short, long)]
    seed: Option<u64>,

    /// Telemetry timeout in seconds
    #[arg(long, default_value = "3")]
    telemetry_timeout: f64,

    /// Remote action timeout in seconds
    #[arg(long, default_value = "1")]
    action_timeout: f64,

    /// Abort the battle when a step telemetry delivery fails
    #[arg(long)]
    abort_on_step_telemetry_failure: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// JSON output for scripting
    #[arg(long)]
    json: bool,
}

fn seconds(value: f64, flag: &str) -> anyhow::Result<Duration> {
    Duration::try_from_secs_f64(value).with_context(|| format!("invalid --{}: {}", flag, value))
}

fn build_config(args: &Args) -> anyhow::Result<RunConfig> {
    let agents = split_descriptor_list(&args.agents);

    let servers = ServerDirectory::from_lookup(agents.len(), |key| std::env::var(key).ok());
    if servers.uses_fleet() {
        info!("Using fleet game servers");
    }

    let mut config = RunConfig::new(&args.config, agents)
        .with_messaging(&args.messaging_host, args.messaging_port)
        .with_sleep(args.do_sleep)
        .with_telemetry_timeout(seconds(args.telemetry_timeout, "telemetry-timeout")?)
        .with_action_timeout(seconds(args.action_timeout, "action-timeout")?)
        .with_agent_env_vars(parse_agent_env_vars(&args.agent_env_vars)?)
        .with_servers(servers);

    if args.render {
        config = config.with_render(args.render_mode);
    } else {
        config.render_mode = args.render_mode;
    }
    if let Some(dir) = &args.record_pngs_dir {
        config = config.with_record_pngs_dir(dir);
    }
    if let Some(dir) = &args.record_json_dir {
        config = config.with_record_json_dir(dir);
    }
    if let Some(path) = &args.game_state_file {
        config = config.with_game_state_file(path);
    }
    if args.abort_on_step_telemetry_failure {
        config = config.with_step_policy(DeliveryPolicy::Fatal);
    }

    Ok(config)
}

fn print_report(report: &RunReport, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    for episode in &report.episodes {
        info!(
            "Episode {}: {} after {} ticks ({:.2}s) rewards {:?}",
            episode.index,
            episode.result,
            episode.ticks,
            episode.duration.as_secs_f64(),
            episode.rewards
        );
        if let Some(err) = &episode.recording_error {
            warn!("  recording stopped early: {}", err);
        }
    }
    if report.dropped_telemetry > 0 {
        warn!("{} step deliveries were dropped", report.dropped_telemetry);
    }
    info!("Seed: {}", report.seed);
    Ok(())
}

async fn run(args: &Args, docker: Arc<DockerRuntime>, transport: Arc<HttpTransport>) -> anyhow::Result<RunReport> {
    let config = build_config(args)?;
    let terminal = TerminalInput::new();

    let manager = RunManager::new(TokioContext::shared(), transport, Arc::new(ArenaFactory))
        .with_recorder(Arc::new(JsonRecorder::new()))
        .with_containers(docker)
        .with_human_input(terminal.factory());

    Ok(manager.run_battles(&config, args.episodes, args.seed).await?)
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Initialize logging
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }

    if !args.json {
        info!("Arena battle runner v{}", env!("CARGO_PKG_VERSION"));
    }

    let transport = match HttpTransport::shared() {
        Ok(transport) => transport,
        Err(e) => {
            error!("Failed to build HTTP client: {}", e);
            std::process::exit(1);
        }
    };
    let docker = Arc::new(DockerRuntime::new(transport.clone()));

    let outcome = tokio::select! {
        outcome = run(&args, docker.clone(), transport) => outcome,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, releasing resources");
            docker.stop_all().await;
            std::process::exit(130);
        }
    };

    match outcome.and_then(|report| print_report(&report, args.json)) {
        Ok(()) => {}
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    }
}
