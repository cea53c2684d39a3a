//! Process entry point for the language host.
//!
//! The engine launches this binary with its own address as the positional
//! argument. The host initializes tracing, waits for the engine to become
//! reachable, binds the `LanguageRuntime` service on a kernel-chosen port,
//! prints that port on stdout (the engine reads it to know where to connect),
//! and then serves until shutdown.

use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::{Endpoint, Server};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use pulumi_language_nodejs::child::TypescriptOptions;
use pulumi_language_nodejs::grpc::LanguageRuntimeServer;
use pulumi_language_nodejs::host::{HostOptions, NodeLanguageHost};

/// How long to wait for the engine before giving up.
const ENGINE_WAIT_BUDGET: Duration = Duration::from_secs(5 * 60);

#[derive(Parser, Debug)]
#[command(name = "pulumi-language-nodejs", about = "Language host for Node.js Pulumi programs")]
struct Args {
    /// Emit tracing to the specified endpoint; also forwarded to the program.
    #[arg(long)]
    tracing: Option<String>,

    /// Use TypeScript transpilation when running the program.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    typescript: bool,

    /// Project root used as the discovery fallback directory.
    #[arg(long)]
    root: Option<PathBuf>,

    /// Path to a tsconfig file handed to the program.
    #[arg(long)]
    tsconfig: Option<String>,

    /// Extra arguments for the node interpreter, shell-quoted.
    #[arg(long)]
    nodeargs: Option<String>,

    /// Address of the engine's gRPC endpoint.
    engine_address: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    wait_for_engine(&args.engine_address).await?;

    let host = NodeLanguageHost::new(HostOptions {
        engine_address: args.engine_address.clone(),
        root: args.root,
        tracing_endpoint: args.tracing.unwrap_or_default(),
        nodeargs: args.nodeargs.unwrap_or_default(),
        typescript: TypescriptOptions {
            enabled: args.typescript,
            tsconfig: args.tsconfig,
        },
    });

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .context("could not bind the language host listener")?;
    let port = listener.local_addr()?.port();

    // The engine reads the chosen port from stdout.
    println!("{port}");
    std::io::stdout().flush()?;
    debug!(port, engine = %args.engine_address, "language host serving");

    Server::builder()
        .add_service(LanguageRuntimeServer::new(host))
        .serve_with_incoming(TcpListenerStream::new(listener))
        .await
        .context("language host server failed")?;

    Ok(())
}

/// Blocks until the engine is reachable, with a hard budget. The engine may
/// still be binding its own listener when it launches the host.
async fn wait_for_engine(address: &str) -> Result<()> {
    let endpoint = Endpoint::from_shared(format!("http://{address}"))
        .with_context(|| format!("invalid engine address '{address}'"))?;

    tokio::time::timeout(ENGINE_WAIT_BUDGET, async {
        loop {
            match endpoint.connect().await {
                Ok(_) => return,
                Err(err) => {
                    debug!(%err, "engine not reachable yet");
                    tokio::time::sleep(Duration::from_millis(200)).await;
                }
            }
        }
    })
    .await
    .with_context(|| format!("timed out waiting for the engine at {address}"))?;

    Ok(())
}
