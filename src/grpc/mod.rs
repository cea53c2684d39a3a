/// gRPC surface of the language host.
///
/// This module exposes the generated Pulumi RPC bindings. The host serves the
/// `LanguageRuntime` service to the engine, serves a `ResourceMonitor` proxy
/// to the child program, and holds a `ResourceMonitorClient` against the real
/// monitor for forwarding.
pub mod proto {
    //! Generated Protocol Buffer definitions from `proto/pulumi.proto`
    //!
    //! This module contains auto-generated code and provides:
    //! - `LanguageRuntime` trait and `LanguageRuntimeServer` for the engine-facing service
    //! - `ResourceMonitor` trait, `ResourceMonitorServer`, and `ResourceMonitorClient`
    //!   for the monitor proxy and its upstream
    //! - Request/Response message types for all RPC methods

    tonic::include_proto!("pulumirpc");
}

pub use proto::language_runtime_server::{LanguageRuntime, LanguageRuntimeServer};
pub use proto::resource_monitor_client::ResourceMonitorClient;
pub use proto::resource_monitor_server::{ResourceMonitor, ResourceMonitorServer};

// Re-export commonly used proto types
pub use proto::{
    AboutRequest, AboutResponse, DependencyInfo, GetProgramDependenciesRequest,
    GetProgramDependenciesResponse, GetRequiredPluginsRequest, GetRequiredPluginsResponse,
    InstallDependenciesRequest, InstallDependenciesResponse, InvokeResponse, PluginDependency,
    PluginInfo, ResourceInvokeRequest, RunPluginRequest, RunPluginResponse, RunRequest,
    RunResponse,
};
