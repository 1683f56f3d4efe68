//! # Generic gRPC Client
//!
//! This module wraps a standard `tonic` client to provide a generic interface for
//! gRPC communication. It is agnostic to the specific Protobuf messages being exchanged.
//!
//! ## How it works
//!
//! The [`GrpcClient`] utilizes the [`super::codec::DynamicCodec`] to handle serialization.
//! It does not need to know the structure of the data it is sending; it simply ensures
//! the connection is ready and passes the `DynamicMessage` values and the method's
//! descriptors to the codec.
//!
//! ## Features
//!
//! * **Dynamic Pathing**: Constructs the HTTP/2 path (e.g., `/package.Service/Method`) at runtime.
//! * **Metadata Handling**: Converts standard Rust string tuples into Tonic's `MetadataMap` for headers.
//! * **Deadlines**: Sends `grpc-timeout` and enforces the same deadline locally.
//! * **Access Patterns**: Implements [`Transport`], i.e. Unary, Server Streaming, Client Streaming,
//!   and Bidirectional Streaming calls.
use super::{codec::check_type, deadline::Deadline};
use crate::{
    BoxError,
    transport::{CallOptions, RequestStream, ResponseStream, RpcMethod, Transport},
};
use http_body::Body as HttpBody;
use prost_reflect::DynamicMessage;
use std::str::FromStr;
use tonic::{
    Status,
    client::GrpcService,
    metadata::{
        Ascii, MetadataKey, MetadataValue,
        errors::{InvalidMetadataKey, InvalidMetadataValue},
    },
    transport::Channel,
};

#[derive(thiserror::Error, Debug)]
pub enum GrpcRequestError {
    #[error("Internal error, the client was not ready: '{0}'")]
    ClientNotReady(#[source] BoxError),
    #[error("Invalid metadata (header) key '{key}': '{source}'")]
    InvalidMetadataKey {
        key: String,
        source: InvalidMetadataKey,
    },
    #[error("Invalid metadata (header) value for key '{key}': '{source}'")]
    InvalidMetadataValue {
        key: String,
        source: InvalidMetadataValue,
    },
}

impl From<GrpcRequestError> for Status {
    fn from(err: GrpcRequestError) -> Self {
        match err {
            GrpcRequestError::ClientNotReady(_) => Status::unavailable(err.to_string()),
            GrpcRequestError::InvalidMetadataKey { .. }
            | GrpcRequestError::InvalidMetadataValue { .. } => {
                Status::invalid_argument(err.to_string())
            }
        }
    }
}

/// A [`Transport`] backed by a `tonic` gRPC service.
///
/// The client is cheap to clone and may be shared by any number of concurrent calls.
#[derive(Debug, Clone)]
pub struct GrpcClient<S = Channel> {
    client: tonic::client::Grpc<S>,
}

impl<S> GrpcClient<S>
where
    S: GrpcService<tonic::body::Body> + Clone,
    S::Error: Into<BoxError>,
    S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
    <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
{
    pub fn new(service: S) -> Self {
        let client = tonic::client::Grpc::new(service);
        Self { client }
    }

    /// Returns a ready handle on the underlying service for a single call.
    async fn ready(&self) -> Result<tonic::client::Grpc<S>, GrpcRequestError> {
        let mut client = self.client.clone();
        client
            .ready()
            .await
            .map_err(|e| GrpcRequestError::ClientNotReady(e.into()))?;
        Ok(client)
    }
}

#[tonic::async_trait]
impl<S> Transport for GrpcClient<S>
where
    S: GrpcService<tonic::body::Body> + Clone + Send + Sync + 'static,
    S::Future: Send,
    S::Error: Into<BoxError> + Send,
    S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
    <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
{
    async fn unary(
        &self,
        method: RpcMethod,
        request: DynamicMessage,
        options: CallOptions,
    ) -> Result<DynamicMessage, Status> {
        Deadline::after(options.timeout)
            .run(async {
                check_type(method.input(), &request)?;
                let mut client = self.ready().await?;
                let request = build_request(request, options)?;
                let response = client
                    .unary(request, method.path()?, method.codec())
                    .await?;
                Ok::<_, Status>(response.into_inner())
            })
            .await
    }

    async fn server_streaming(
        &self,
        method: RpcMethod,
        request: DynamicMessage,
        options: CallOptions,
    ) -> Result<ResponseStream, Status> {
        let deadline = Deadline::after(options.timeout);
        let responses = deadline
            .run(async {
                check_type(method.input(), &request)?;
                let mut client = self.ready().await?;
                let request = build_request(request, options)?;
                let response = client
                    .server_streaming(request, method.path()?, method.codec())
                    .await?;
                Ok::<_, Status>(response.into_inner())
            })
            .await?;

        Ok(deadline.bound(responses))
    }

    async fn client_streaming(
        &self,
        method: RpcMethod,
        requests: RequestStream,
        options: CallOptions,
    ) -> Result<DynamicMessage, Status> {
        Deadline::after(options.timeout)
            .run(async {
                let mut client = self.ready().await?;
                let request = build_request(requests, options)?;
                let response = client
                    .client_streaming(request, method.path()?, method.codec())
                    .await?;
                Ok::<_, Status>(response.into_inner())
            })
            .await
    }

    async fn streaming(
        &self,
        method: RpcMethod,
        requests: RequestStream,
        options: CallOptions,
    ) -> Result<ResponseStream, Status> {
        let deadline = Deadline::after(options.timeout);
        let responses = deadline
            .run(async {
                let mut client = self.ready().await?;
                let request = build_request(requests, options)?;
                let response = client
                    .streaming(request, method.path()?, method.codec())
                    .await?;
                Ok::<_, Status>(response.into_inner())
            })
            .await?;

        Ok(deadline.bound(responses))
    }
}

fn build_request<T>(
    payload: T,
    options: CallOptions,
) -> Result<tonic::Request<T>, GrpcRequestError> {
    let mut request = tonic::Request::new(payload);
    if let Some(timeout) = options.timeout {
        request.set_timeout(timeout);
    }

    for (k, v) in options.headers {
        let key = MetadataKey::<Ascii>::from_str(&k).map_err(|source| {
            GrpcRequestError::InvalidMetadataKey {
                key: k.clone(),
                source,
            }
        })?;
        let val = MetadataValue::<Ascii>::from_str(&v)
            .map_err(|source| GrpcRequestError::InvalidMetadataValue { key: k, source })?;
        request.metadata_mut().append(key, val);
    }
    Ok(request)
}
