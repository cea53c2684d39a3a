//! Resource monitor proxy.
//!
//! The child program needs a monitor endpoint whose lifetime the host
//! controls, so the host stands up a `ResourceMonitor` server on a
//! kernel-chosen port and forwards every method, unchanged, to the engine's
//! real monitor. No transformation, no caching.

use std::net::SocketAddr;

use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::{Channel, Server};
use tonic::{Request, Response, Status};

use crate::error::HostResult;
use crate::grpc::proto::{
    CallRequest, CallResponse, InvokeResponse, ReadResourceRequest, ReadResourceResponse,
    RegisterResourceOutputsRequest, RegisterResourceRequest, RegisterResourceResponse,
    ResourceInvokeRequest, SupportsFeatureRequest, SupportsFeatureResponse,
};
use crate::grpc::{ResourceMonitor, ResourceMonitorClient, ResourceMonitorServer};

/// A transparent forwarder in front of the engine's resource monitor.
pub struct MonitorProxy {
    client: ResourceMonitorClient<Channel>,
}

impl MonitorProxy {
    pub fn new(client: ResourceMonitorClient<Channel>) -> Self {
        Self { client }
    }
}

#[tonic::async_trait]
impl ResourceMonitor for MonitorProxy {
    async fn supports_feature(
        &self,
        request: Request<SupportsFeatureRequest>,
    ) -> Result<Response<SupportsFeatureResponse>, Status> {
        self.client
            .clone()
            .supports_feature(request.into_inner())
            .await
    }

    async fn invoke(
        &self,
        request: Request<ResourceInvokeRequest>,
    ) -> Result<Response<InvokeResponse>, Status> {
        self.client.clone().invoke(request.into_inner()).await
    }

    type StreamInvokeStream = tonic::Streaming<InvokeResponse>;

    async fn stream_invoke(
        &self,
        request: Request<ResourceInvokeRequest>,
    ) -> Result<Response<Self::StreamInvokeStream>, Status> {
        self.client.clone().stream_invoke(request.into_inner()).await
    }

    async fn call(&self, request: Request<CallRequest>) -> Result<Response<CallResponse>, Status> {
        self.client.clone().call(request.into_inner()).await
    }

    async fn read_resource(
        &self,
        request: Request<ReadResourceRequest>,
    ) -> Result<Response<ReadResourceResponse>, Status> {
        self.client.clone().read_resource(request.into_inner()).await
    }

    async fn register_resource(
        &self,
        request: Request<RegisterResourceRequest>,
    ) -> Result<Response<RegisterResourceResponse>, Status> {
        self.client
            .clone()
            .register_resource(request.into_inner())
            .await
    }

    async fn register_resource_outputs(
        &self,
        request: Request<RegisterResourceOutputsRequest>,
    ) -> Result<Response<()>, Status> {
        self.client
            .clone()
            .register_resource_outputs(request.into_inner())
            .await
    }
}

/// A running proxy server. Dropping the handle releases the shutdown signal
/// and stops the server.
pub struct ProxyHandle {
    /// The local address the child should dial as its monitor.
    pub address: SocketAddr,
    _shutdown: oneshot::Sender<()>,
}

/// Binds the proxy on a kernel-chosen port and returns its handle together
/// with the serving future for the caller to spawn.
pub async fn serve_proxy(
    client: ResourceMonitorClient<Channel>,
) -> HostResult<(ProxyHandle, impl std::future::Future<Output = HostResult<()>>)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let address = listener.local_addr()?;
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    let serve = async move {
        Server::builder()
            .add_service(ResourceMonitorServer::new(MonitorProxy::new(client)))
            .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async {
                let _ = shutdown_rx.await;
            })
            .await
            .map_err(Into::into)
    };

    Ok((
        ProxyHandle {
            address,
            _shutdown: shutdown_tx,
        },
        serve,
    ))
}
