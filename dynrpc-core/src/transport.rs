//! # Transport Abstraction
//!
//! The dispatcher does not talk to the network itself. It drives a [`Transport`], which
//! exposes one primitive per [`CallShape`]. [`crate::grpc::client::GrpcClient`] is the
//! `tonic` implementation; tests and decorators (see [`crate::auth`]) provide others.
use crate::{grpc::codec::DynamicCodec, shape::CallShape};
use futures_util::stream::BoxStream;
use prost_reflect::{DynamicMessage, MessageDescriptor, MethodDescriptor};
use std::str::FromStr;
use std::time::Duration;
use tonic::Status;

/// Outgoing messages of a client or bidi streaming call. The stream ending is the
/// end-of-requests signal.
pub type RequestStream = BoxStream<'static, DynamicMessage>;

/// Incoming messages of a server or bidi streaming call.
pub type ResponseStream = BoxStream<'static, Result<DynamicMessage, Status>>;

/// Per-call settings handed to the transport untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallOptions {
    /// Deadline for the whole call, measured from the moment it is dispatched.
    pub timeout: Option<Duration>,
    /// Custom gRPC metadata (headers) to attach to the request.
    pub headers: Vec<(String, String)>,
}

impl CallOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }
}

/// The identity of a remote method, as seen by a transport.
///
/// Built from a [`MethodDescriptor`]: the service and method names give the route, the
/// input and output message descriptors give the marshalling pair.
#[derive(Debug, Clone)]
pub struct RpcMethod {
    shape: CallShape,
    service: String,
    name: String,
    input: MessageDescriptor,
    output: MessageDescriptor,
}

impl RpcMethod {
    pub fn new(method: &MethodDescriptor) -> Self {
        Self {
            shape: CallShape::of(method),
            service: method.parent_service().full_name().to_string(),
            name: method.name().to_string(),
            input: method.input(),
            output: method.output(),
        }
    }

    pub fn shape(&self) -> CallShape {
        self.shape
    }

    /// Fully qualified service name (e.g. `echo.EchoService`).
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Method name (e.g. `UnaryEcho`).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// gRPC full method name (e.g. `echo.EchoService/UnaryEcho`).
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.service, self.name)
    }

    /// HTTP/2 path of the method (e.g. `/echo.EchoService/UnaryEcho`).
    pub fn path(&self) -> Result<http::uri::PathAndQuery, Status> {
        let path = format!("/{}", self.full_name());
        http::uri::PathAndQuery::from_str(&path).map_err(|e| {
            Status::invalid_argument(format!("Invalid gRPC path '{path}': {e}"))
        })
    }

    pub fn input(&self) -> &MessageDescriptor {
        &self.input
    }

    pub fn output(&self) -> &MessageDescriptor {
        &self.output
    }

    /// Codec encoding requests with the input schema and decoding responses with the
    /// output schema.
    pub fn codec(&self) -> DynamicCodec {
        DynamicCodec::new(self.input.clone(), self.output.clone())
    }
}

/// A channel able to perform the four kinds of gRPC calls on dynamic messages.
///
/// Implementations may be shared by any number of concurrent calls.
#[tonic::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Single Request -> Single Response.
    async fn unary(
        &self,
        method: RpcMethod,
        request: DynamicMessage,
        options: CallOptions,
    ) -> Result<DynamicMessage, Status>;

    /// Single Request -> Stream of Responses.
    async fn server_streaming(
        &self,
        method: RpcMethod,
        request: DynamicMessage,
        options: CallOptions,
    ) -> Result<ResponseStream, Status>;

    /// Stream of Requests -> Single Response.
    async fn client_streaming(
        &self,
        method: RpcMethod,
        requests: RequestStream,
        options: CallOptions,
    ) -> Result<DynamicMessage, Status>;

    /// Stream of Requests -> Stream of Responses.
    async fn streaming(
        &self,
        method: RpcMethod,
        requests: RequestStream,
        options: CallOptions,
    ) -> Result<ResponseStream, Status>;
}
