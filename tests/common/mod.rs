//! Shared test fixtures: an echoing in-process resource monitor.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::net::SocketAddr;

use tokio::net::TcpListener;
use tokio_stream::wrappers::{ReceiverStream, TcpListenerStream};
use tonic::transport::Channel;
use tonic::{Request, Response, Status};

use pulumi_language_nodejs::grpc::proto::{
    CallRequest, CallResponse, InvokeResponse, ReadResourceRequest, ReadResourceResponse,
    RegisterResourceOutputsRequest, RegisterResourceRequest, RegisterResourceResponse,
    ResourceInvokeRequest, SupportsFeatureRequest, SupportsFeatureResponse,
};
use pulumi_language_nodejs::grpc::{
    ResourceMonitor, ResourceMonitorClient, ResourceMonitorServer,
};

/// A monitor that reflects the request token back in its responses, so tests
/// can verify requests arrive unchanged.
pub struct EchoMonitor;

pub fn token_struct(tok: &str) -> prost_types::Struct {
    let mut fields = BTreeMap::new();
    fields.insert(
        "tok".to_string(),
        prost_types::Value {
            kind: Some(prost_types::value::Kind::StringValue(tok.to_string())),
        },
    );
    prost_types::Struct { fields }
}

pub fn token_of(response: &InvokeResponse) -> String {
    let fields = &response.r#return.as_ref().unwrap().fields;
    match &fields.get("tok").unwrap().kind {
        Some(prost_types::value::Kind::StringValue(s)) => s.clone(),
        other => panic!("unexpected value kind: {other:?}"),
    }
}

#[tonic::async_trait]
impl ResourceMonitor for EchoMonitor {
    async fn supports_feature(
        &self,
        request: Request<SupportsFeatureRequest>,
    ) -> Result<Response<SupportsFeatureResponse>, Status> {
        let req = request.into_inner();
        Ok(Response::new(SupportsFeatureResponse {
            has_support: req.id == "secrets",
        }))
    }

    async fn invoke(
        &self,
        request: Request<ResourceInvokeRequest>,
    ) -> Result<Response<InvokeResponse>, Status> {
        let req = request.into_inner();
        Ok(Response::new(InvokeResponse {
            r#return: Some(token_struct(&req.tok)),
            failures: Vec::new(),
        }))
    }

    type StreamInvokeStream = ReceiverStream<Result<InvokeResponse, Status>>;

    async fn stream_invoke(
        &self,
        request: Request<ResourceInvokeRequest>,
    ) -> Result<Response<Self::StreamInvokeStream>, Status> {
        let req = request.into_inner();
        let (tx, rx) = tokio::sync::mpsc::channel(1);
        tx.send(Ok(InvokeResponse {
            r#return: Some(token_struct(&req.tok)),
            failures: Vec::new(),
        }))
        .await
        .unwrap();
        Ok(Response::new(ReceiverStream::new(rx)))
    }

    async fn call(
        &self,
        _request: Request<CallRequest>,
    ) -> Result<Response<CallResponse>, Status> {
        Ok(Response::new(CallResponse {
            r#return: None,
            failures: Vec::new(),
        }))
    }

    async fn read_resource(
        &self,
        request: Request<ReadResourceRequest>,
    ) -> Result<Response<ReadResourceResponse>, Status> {
        let req = request.into_inner();
        Ok(Response::new(ReadResourceResponse {
            urn: format!("urn:pulumi:test::{}", req.name),
            properties: None,
        }))
    }

    async fn register_resource(
        &self,
        request: Request<RegisterResourceRequest>,
    ) -> Result<Response<RegisterResourceResponse>, Status> {
        let req = request.into_inner();
        Ok(Response::new(RegisterResourceResponse {
            urn: format!("urn:pulumi:test::{}", req.name),
            id: String::new(),
            object: None,
            stable: false,
            stables: Vec::new(),
        }))
    }

    async fn register_resource_outputs(
        &self,
        _request: Request<RegisterResourceOutputsRequest>,
    ) -> Result<Response<()>, Status> {
        Ok(Response::new(()))
    }
}

/// Serves an `EchoMonitor` on a kernel-chosen port.
pub async fn spawn_monitor() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        tonic::transport::Server::builder()
            .add_service(ResourceMonitorServer::new(EchoMonitor))
            .serve_with_incoming(TcpListenerStream::new(listener))
            .await
            .unwrap();
    });
    addr
}

pub async fn connect(addr: SocketAddr) -> ResourceMonitorClient<Channel> {
    ResourceMonitorClient::connect(format!("http://{addr}"))
        .await
        .unwrap()
}
