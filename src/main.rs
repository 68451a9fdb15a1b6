//! agent-mesh - MCP tool server and A2A router for customer support agents.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use agent_mesh_mcp::api::{self, MeshEndpoints};
use agent_mesh_mcp::orchestrator::{OrchestratorConfig, RetryPolicy};
use agent_mesh_mcp::store::MemoryStore;
use agent_mesh_mcp::McpServer;

/// agent-mesh - MCP tool server and A2A router.
#[derive(Parser, Debug)]
#[command(name = "agent-mesh")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON.
    #[arg(long, global = true, default_value = "false")]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the protocol server and all three agents in one process.
    Serve(ServeArgs),
    /// Run the protocol server on stdio.
    Stdio,
}

#[derive(clap::Args, Debug)]
struct ServeArgs {
    /// Bind host for every service.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Protocol server port.
    #[arg(long, default_value_t = 9010)]
    mcp_port: u16,

    /// Router agent port.
    #[arg(long, default_value_t = 9101)]
    router_port: u16,

    /// Data agent port.
    #[arg(long, default_value_t = 9102)]
    data_port: u16,

    /// Support agent port.
    #[arg(long, default_value_t = 9103)]
    support_port: u16,

    /// Maximum steps in a plan.
    #[arg(long, default_value_t = 8)]
    max_steps: usize,

    /// Maximum dispatches per routed task, retries included.
    #[arg(long, default_value_t = 16)]
    step_budget: usize,

    /// Attempts per step.
    #[arg(long, default_value_t = 3)]
    max_attempts: u32,

    /// Timeout per attempt, in milliseconds.
    #[arg(long, default_value_t = 2000)]
    attempt_timeout_ms: u64,

    /// Initial retry backoff, in milliseconds.
    #[arg(long, default_value_t = 100)]
    backoff_ms: u64,

    /// Classification timeout, in milliseconds.
    #[arg(long, default_value_t = 500)]
    classify_timeout_ms: u64,
}

impl ServeArgs {
    fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            retry: RetryPolicy {
                max_attempts: self.max_attempts,
                attempt_timeout: Duration::from_millis(self.attempt_timeout_ms),
                initial_backoff: Duration::from_millis(self.backoff_ms),
                ..RetryPolicy::default()
            },
            max_steps: self.max_steps,
            step_budget: self.step_budget,
            classify_timeout: Duration::from_millis(self.classify_timeout_ms),
        }
    }

    fn addr(&self, port: u16) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", self.host, port))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Logs go to stderr so stdio MCP traffic stays clean
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    if args.json_logs {
        fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    match args.command {
        Command::Stdio => {
            info!("agent-mesh MCP server starting on stdio");
            let server = McpServer::with_store(Arc::new(MemoryStore::seeded()));
            server.run_stdio().await?;
        }
        Command::Serve(serve) => run_mesh(serve).await?,
    }

    Ok(())
}

async fn bind(args: &ServeArgs, port: u16, service: &str) -> anyhow::Result<TcpListener> {
    TcpListener::bind(args.addr(port)?)
        .await
        .with_context(|| format!("binding {service} port {port}"))
}

async fn run_mesh(args: ServeArgs) -> anyhow::Result<()> {
    let mcp = bind(&args, args.mcp_port, "MCP").await?;
    let router = bind(&args, args.router_port, "router").await?;
    let data = bind(&args, args.data_port, "data").await?;
    let support = bind(&args, args.support_port, "support").await?;

    let url = |listener: &TcpListener| listener.local_addr().map(|a| format!("http://{a}"));
    let endpoints = MeshEndpoints {
        mcp: url(&mcp)?,
        data: url(&data)?,
        support: url(&support)?,
        router: url(&router)?,
    };
    info!(?endpoints, "agent-mesh starting");

    let config = args.orchestrator_config();
    let http_timeout = config.retry.attempt_timeout;
    let apps = api::build_mesh(Arc::new(MemoryStore::seeded()), &endpoints, config, http_timeout)?;

    tokio::try_join!(
        api::serve("mcp", mcp, apps.mcp),
        api::serve("data", data, apps.data),
        api::serve("support", support, apps.support),
        api::serve("router", router, apps.router),
    )?;

    Ok(())
}
