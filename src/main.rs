//! Switchboard daemon entry point: config, logging, storage, and the CLI
//! gateway loop.

use switchboard::config::Config;
use switchboard::context::SqliteContextStore;
use switchboard::gateway::{Gateway, GatewayRegistry, HostProviders, NoApprovals};
use switchboard::pipeline::{Collaborators, Orchestrator};
use switchboard::policy::{
    ToolDescriptor, ToolFlags, ToolGroup, ToolHandler, ToolRegistration, ToolRegistry,
};
use switchboard::reasoning::{EchoReasoner, FoldSummarizer};
use switchboard::skills::SkillRegistry;
use switchboard::telemetry::TelemetrySink;
use switchboard::{GatewayKind, InboundMessage, OutboundMessage, ResponseCapability};

use anyhow::Context as _;
use async_trait::async_trait;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

#[derive(Parser)]
#[command(name = "switchboard", about = "Message ingestion and orchestration engine")]
struct Cli {
    /// Path to a TOML config file. Defaults to the platform config dir.
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Log at debug level.
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load()?,
    };

    let _log_guard = init_tracing(&config, cli.debug)?;
    tracing::info!(data_dir = %config.data_dir().display(), "starting switchboard");

    let store = SqliteContextStore::open(&config.sqlite_path())
        .await
        .context("failed to open context database")?;

    let telemetry = TelemetrySink::spawn(1024);

    let cli_gateway = Arc::new(CliGateway);
    let mut gateways = GatewayRegistry::new();
    gateways.register(cli_gateway);

    let tools = builtin_tools();
    let tool_count = tools.len();
    let skills = Arc::new(SkillRegistry::new());

    let orchestrator = Orchestrator::new(
        config,
        tools,
        skills.clone(),
        Collaborators {
            store: Arc::new(store),
            reasoner: Arc::new(EchoReasoner),
            summarizer: Arc::new(FoldSummarizer),
            providers: Arc::new(HostProviders::new(Vec::new())),
            approvals: Arc::new(NoApprovals),
            gateways: Arc::new(gateways),
        },
        telemetry,
    );
    let workers = orchestrator.spawn_workers();

    // The CLI gateway's inbound side: one message per stdin line.
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == ":stats" {
            let stats = orchestrator.bus().stats();
            println!(
                "queue: {} ready / {} delayed / {} in-flight / {} dead; {} skills, {} tools",
                stats.ready,
                stats.delayed,
                stats.in_flight,
                stats.dead,
                skills.snapshot().len(),
                tool_count,
            );
            continue;
        }
        let message = InboundMessage::new("cli", GatewayKind::Cli, line);
        if let Err(error) = orchestrator.bus().enqueue(message) {
            tracing::warn!(%error, "message not accepted");
            println!("(busy, try again)");
        }
    }

    tracing::info!("input closed, draining");
    orchestrator.shutdown();
    for worker in workers {
        let _ = worker.await;
    }
    Ok(())
}

fn init_tracing(config: &Config, debug: bool) -> anyhow::Result<tracing_appender::non_blocking::WorkerGuard> {
    let log_dir = config.log_dir();
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::daily(&log_dir, "switchboard.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let default_filter = if debug { "switchboard=debug" } else { "switchboard=info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(file_writer))
        .init();

    Ok(guard)
}

/// CLI gateway: replies go straight to stdout.
struct CliGateway;

#[async_trait]
impl Gateway for CliGateway {
    fn kind(&self) -> GatewayKind {
        GatewayKind::Cli
    }

    fn capabilities(&self) -> &[ResponseCapability] {
        &[ResponseCapability::Text]
    }

    async fn send(&self, message: &OutboundMessage) -> bool {
        println!("{}", message.text);
        true
    }
}

struct StatusTool {
    started: std::time::Instant,
}

#[async_trait]
impl ToolHandler for StatusTool {
    async fn call(&self, _arguments: serde_json::Value) -> anyhow::Result<serde_json::Value> {
        Ok(serde_json::json!({
            "uptime_secs": self.started.elapsed().as_secs(),
            "version": env!("CARGO_PKG_VERSION"),
        }))
    }
}

struct ReadFileTool;

#[async_trait]
impl ToolHandler for ReadFileTool {
    async fn call(&self, arguments: serde_json::Value) -> anyhow::Result<serde_json::Value> {
        let path = arguments
            .get("path")
            .and_then(|p| p.as_str())
            .context("missing 'path' argument")?;
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read {path}"))?;
        Ok(serde_json::json!({ "content": content }))
    }
}

fn builtin_tools() -> ToolRegistry {
    let mut registry = ToolRegistry::new();

    registry.register(ToolRegistration {
        descriptor: ToolDescriptor {
            name: "status".into(),
            group: ToolGroup::System,
            description: "Report engine uptime and version".into(),
            parameters: schemars::json_schema!({
                "type": "object",
                "properties": {}
            }),
            flags: ToolFlags::default(),
        },
        handler: Arc::new(StatusTool {
            started: std::time::Instant::now(),
        }),
    });

    registry.register(ToolRegistration {
        descriptor: ToolDescriptor {
            name: "read_file".into(),
            group: ToolGroup::Filesystem,
            description: "Read a UTF-8 text file from the host".into(),
            parameters: schemars::json_schema!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "Absolute file path" }
                },
                "required": ["path"]
            }),
            flags: ToolFlags::default(),
        },
        handler: Arc::new(ReadFileTool),
    });

    registry
}
