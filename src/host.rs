//! The engine-facing language host service.
//!
//! `NodeLanguageHost` implements the `LanguageRuntime` gRPC surface. Most
//! methods delegate to the discovery and enumeration modules; the heart of
//! the host is [`NodeLanguageHost::execute_run`], which composes the monitor
//! proxy, the sync-invoke pipe server, and the child supervisor, then waits
//! for whichever of the three terminates first.
//!
//! Terminal events are a tagged variant funneled through a single channel.
//! Whichever event wins, the losers' resources are released on the way out:
//! spawned tasks are aborted by guard, the proxy server by its shutdown
//! handle, the child by kill-on-drop, and the pipe directory by `TempDir`.

use std::collections::HashMap;
use std::path::PathBuf;

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::transport::Endpoint;
use tonic::{Request, Response, Status};

use crate::child::{self, TypescriptOptions};
use crate::dependencies;
use crate::error::{HostError, HostResult};
use crate::grpc::{
    AboutRequest, AboutResponse, GetProgramDependenciesRequest, GetProgramDependenciesResponse,
    GetRequiredPluginsRequest, GetRequiredPluginsResponse, InstallDependenciesRequest,
    InstallDependenciesResponse, LanguageRuntime, PluginInfo, ResourceMonitorClient,
    RunPluginRequest, RunPluginResponse, RunRequest, RunResponse,
};
use crate::monitor;
use crate::pipes::SyncInvokes;
use crate::plugins;

/// Host-level options fixed at process start.
#[derive(Debug, Clone, Default)]
pub struct HostOptions {
    /// Address of the engine's own gRPC endpoint, forwarded to the child.
    pub engine_address: String,
    /// Root directory overriding the request working directory for discovery.
    pub root: Option<PathBuf>,
    /// Endpoint for the tracing collector, forwarded to the child.
    pub tracing_endpoint: String,
    /// Extra interpreter arguments, shell-split ahead of the run shim.
    pub nodeargs: String,
    /// TypeScript transpilation switches for the child.
    pub typescript: TypescriptOptions,
}

/// The NodeJS language host service.
pub struct NodeLanguageHost {
    options: HostOptions,
}

/// A terminal event from one of Run's three concurrent activities.
enum RunEvent {
    Proxy(HostError),
    Pipes(HostError),
    Child(RunResponse),
}

/// Aborts a spawned task when dropped, so early exits from Run cannot leak
/// the proxy or pipe loops.
struct TaskGuard(tokio::task::JoinHandle<()>);

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl NodeLanguageHost {
    pub fn new(options: HostOptions) -> Self {
        Self { options }
    }

    /// Runs the program, converting every failure into the Run response
    /// contract: the engine always receives exactly one response.
    async fn execute_run(&self, request: RunRequest) -> RunResponse {
        // Serialize configuration before anything is launched; a malformed
        // key must not start the child.
        let env = match child::build_env(&request, &self.options.typescript) {
            Ok(env) => env,
            Err(err) => {
                return RunResponse {
                    error: err.to_string(),
                    bail: false,
                }
            }
        };
        match self.launch(&request, env).await {
            Ok(response) => response,
            Err(err) => RunResponse {
                error: err.to_string(),
                bail: false,
            },
        }
    }

    async fn launch(
        &self,
        request: &RunRequest,
        env: Vec<(String, String)>,
    ) -> HostResult<RunResponse> {
        let channel = Endpoint::from_shared(format!("http://{}", request.monitor_address))?
            .connect()
            .await?;
        let monitor_client = ResourceMonitorClient::new(channel);

        let (events_tx, mut events_rx) = mpsc::channel::<RunEvent>(3);

        // Monitor proxy: the child's local monitor endpoint.
        let (proxy, proxy_serve) = monitor::serve_proxy(monitor_client.clone()).await?;
        let tx = events_tx.clone();
        let _proxy_task = TaskGuard(tokio::spawn(async move {
            if let Err(err) = proxy_serve.await {
                let _ = tx.send(RunEvent::Proxy(err)).await;
            }
        }));

        // Sync-invoke pipes: the child's blocking path to the monitor.
        let pipes = SyncInvokes::create()?;
        let pipe_serve = pipes.serve(monitor_client);
        let tx = events_tx.clone();
        let _pipes_task = TaskGuard(tokio::spawn(async move {
            if let Err(err) = pipe_serve.await {
                let _ = tx.send(RunEvent::Pipes(err)).await;
            }
        }));

        // Child: locate the interpreter, resolve the run shim, spawn.
        let pwd = if request.pwd.is_empty() {
            PathBuf::from(".")
        } else {
            PathBuf::from(&request.pwd)
        };
        let node = child::find_node()?;
        let run_path = child::resolve_run_module(&node, &pwd).await?;
        let argv = child::build_argv(
            request,
            &run_path,
            &proxy.address.to_string(),
            &self.options.engine_address,
            &pipes.directory().to_string_lossy(),
            &self.options.tracing_endpoint,
            &self.options.nodeargs,
        )?;

        tracing::debug!(interpreter = %node.display(), ?argv, "launching program");
        let tx = events_tx.clone();
        let child_pwd = pwd.clone();
        let _child_task = TaskGuard(tokio::spawn(async move {
            let response = child::supervise(&node, argv, env, Some(&child_pwd)).await;
            let _ = tx.send(RunEvent::Child(response)).await;
        }));

        drop(events_tx);
        let response = match events_rx.recv().await {
            Some(RunEvent::Child(response)) => response,
            Some(RunEvent::Proxy(err)) => RunResponse {
                error: format!("the resource monitor proxy failed: {err}"),
                bail: false,
            },
            Some(RunEvent::Pipes(err)) => RunResponse {
                error: format!("the sync invoke server failed: {err}"),
                bail: false,
            },
            None => RunResponse {
                error: "program exited without reporting a result".to_string(),
                bail: false,
            },
        };
        Ok(response)
    }

    /// The directory plugin discovery starts from for a request.
    fn discovery_root(&self, program: &str, pwd: &str) -> PathBuf {
        if !program.is_empty() {
            let program = PathBuf::from(program);
            if program.is_file() {
                if let Some(parent) = program.parent() {
                    return parent.to_path_buf();
                }
            }
            return program;
        }
        if !pwd.is_empty() {
            return PathBuf::from(pwd);
        }
        self.options
            .root
            .clone()
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

#[tonic::async_trait]
impl LanguageRuntime for NodeLanguageHost {
    async fn get_required_plugins(
        &self,
        request: Request<GetRequiredPluginsRequest>,
    ) -> Result<Response<GetRequiredPluginsResponse>, Status> {
        let req = request.into_inner();
        let root = self.discovery_root(&req.program, &req.pwd);

        let (plugins, versions, errors) =
            tokio::task::spawn_blocking(move || plugins::discover_plugins(&root))
                .await
                .map_err(|err| Status::internal(err.to_string()))?;

        if !errors.is_empty() {
            tracing::warn!(error = %HostError::Discovery(errors), "plugin discovery was incomplete");
        }
        plugins::warn_on_version_mismatch(&versions);

        Ok(Response::new(GetRequiredPluginsResponse { plugins }))
    }

    async fn run(&self, request: Request<RunRequest>) -> Result<Response<RunResponse>, Status> {
        let req = request.into_inner();
        Ok(Response::new(self.execute_run(req).await))
    }

    async fn get_plugin_info(&self, _request: Request<()>) -> Result<Response<PluginInfo>, Status> {
        Ok(Response::new(PluginInfo {
            version: env!("CARGO_PKG_VERSION").to_string(),
        }))
    }

    type InstallDependenciesStream = ReceiverStream<Result<InstallDependenciesResponse, Status>>;

    async fn install_dependencies(
        &self,
        request: Request<InstallDependenciesRequest>,
    ) -> Result<Response<Self::InstallDependenciesStream>, Status> {
        let req = request.into_inner();
        let dir = if req.directory.is_empty() {
            PathBuf::from(".")
        } else {
            PathBuf::from(&req.directory)
        };

        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            if let Err(err) = dependencies::stream_install(dir, tx.clone()).await {
                let _ = tx.send(Err(Status::from(err))).await;
            }
        });
        Ok(Response::new(ReceiverStream::new(rx)))
    }

    async fn about(
        &self,
        _request: Request<AboutRequest>,
    ) -> Result<Response<AboutResponse>, Status> {
        let node = child::find_node().map_err(Status::from)?;
        let output = tokio::process::Command::new(&node)
            .arg("--version")
            .output()
            .await
            .map_err(|err| Status::internal(err.to_string()))?;
        let version = String::from_utf8_lossy(&output.stdout).trim().to_string();

        Ok(Response::new(AboutResponse {
            executable: node.to_string_lossy().into_owned(),
            version,
            metadata: HashMap::new(),
        }))
    }

    async fn get_program_dependencies(
        &self,
        request: Request<GetProgramDependenciesRequest>,
    ) -> Result<Response<GetProgramDependenciesResponse>, Status> {
        let req = request.into_inner();
        let dir = if req.pwd.is_empty() {
            PathBuf::from(".")
        } else {
            PathBuf::from(&req.pwd)
        };

        let dependencies = dependencies::enumerate(&dir, req.transitive_dependencies)
            .await
            .map_err(Status::from)?;
        Ok(Response::new(GetProgramDependenciesResponse {
            dependencies,
        }))
    }

    type RunPluginStream = ReceiverStream<Result<RunPluginResponse, Status>>;

    async fn run_plugin(
        &self,
        _request: Request<RunPluginRequest>,
    ) -> Result<Response<Self::RunPluginStream>, Status> {
        Err(Status::unimplemented("not supported"))
    }
}
