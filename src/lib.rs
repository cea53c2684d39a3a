//! # Pulumi NodeJS Language Host
//!
//! This crate implements the language host that sits between the Pulumi
//! deployment engine and a user program running on Node.js. The engine speaks
//! gRPC; the Node.js child process is spawned and supervised by the host, and
//! its synchronous invokes are bridged over filesystem pipes because the
//! runtime cannot block on sockets.
//!
//! ## Crate Structure
//!
//! - **`child`**: Constructs the child's argument list and environment,
//!   locates the interpreter, and classifies the child's exit.
//! - **`config`**: Serializes stack configuration into the environment
//!   payloads the NodeJS SDK consumes.
//! - **`dependencies`**: Enumerates program dependencies by shelling out to
//!   the package manager owning the program's lockfile.
//! - **`error`**: Defines the `HostError` enum for centralized error handling
//!   across the host.
//! - **`grpc`**: Generated Pulumi RPC bindings plus curated re-exports.
//! - **`host`**: The `LanguageRuntime` service, including the Run
//!   orchestration of proxy, pipes, and child.
//! - **`manifest`**: `package.json` decoding and plugin metadata resolution.
//! - **`monitor`**: The transparent `ResourceMonitor` proxy the child dials.
//! - **`pipes`**: The FIFO pair carrying the child's synchronous invokes.
//! - **`plugins`**: The symlink-aware module tree walk behind
//!   `GetRequiredPlugins`.
//! - **`version`**: SDK version compatibility rules.

pub mod child;
pub mod config;
pub mod dependencies;
pub mod error;
pub mod grpc;
pub mod host;
pub mod manifest;
pub mod monitor;
pub mod pipes;
pub mod plugins;
pub mod version;
