//! # Dynamic Client
//!
//! This module implements the call dispatcher: the [`DynamicClient`] takes a method
//! descriptor, a batch of request messages and an observer, picks the right call protocol
//! for the method's [`CallShape`] and drives it against a [`Transport`].
//!
//! ## Call lifecycle
//!
//! 1. The request batch is validated against the shape and the input type of the method.
//!    Violations fail synchronously with an [`InvokeError`], before anything is sent.
//! 2. The caller's observer is paired with a completion latch in a [`CompositeObserver`].
//! 3. A [`WaitPool`] worker starts waiting on the latch; its future is the returned
//!    [`PendingCall`].
//! 4. The call itself runs on a Tokio task. Every event reaches the caller's observer first,
//!    then the latch, so once the [`PendingCall`] resolves the observer has seen everything.
//!
//! ## Example
//!
//! ```rust,no_run
//! use dynrpc_core::client::DynamicClient;
//! use dynrpc_core::grpc::client::GrpcClient;
//! use dynrpc_core::observer::CallEvent;
//! use dynrpc_core::schema::SchemaProvider;
//! use dynrpc_core::transport::CallOptions;
//! use prost_reflect::{DescriptorPool, DynamicMessage};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = DescriptorPool::decode(std::fs::read("descriptor.bin")?.as_slice())?;
//! let method = pool.method("echo.EchoService", "UnaryEcho")?;
//!
//! let channel = tonic::transport::Endpoint::new("http://localhost:50051")?
//!     .connect()
//!     .await?;
//! let client = DynamicClient::new(GrpcClient::new(channel));
//!
//! let (events, mut rx) = tokio::sync::mpsc::unbounded_channel::<CallEvent>();
//! let request = DynamicMessage::new(method.input());
//! let outcome = client
//!     .invoke(&method, vec![request], events, CallOptions::default())?
//!     .await;
//!
//! while let Ok(event) = rx.try_recv() {
//!     println!("{event:?}");
//! }
//! outcome.into_result()?;
//! # Ok(())
//! # }
//! ```
use crate::{
    auth::{Authenticated, Credentials},
    completion::{CompletionSignal, CompositeObserver, DoneObserver},
    grpc::client::GrpcClient,
    observer::{CallEvent, StreamObserver},
    shape::CallShape,
    transport::{CallOptions, RequestStream, ResponseStream, RpcMethod, Transport},
    wait_pool::{PendingCall, WaitPool, WaitPoolConfig},
};
use futures_util::StreamExt;
use prost_reflect::{DynamicMessage, MethodDescriptor, ReflectMessage};
use std::io;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tonic::Status;
use tracing::{debug, info};

/// Errors raised synchronously by [`DynamicClient::invoke`]. Nothing was sent when one of
/// these is returned.
#[derive(Debug, thiserror::Error)]
pub enum InvokeError {
    #[error("Can't make a call without any requests")]
    EmptyRequests,

    #[error("Need exactly 1 request for a {shape} call, but got: {count}")]
    RequestCount { shape: CallShape, count: usize },

    #[error("Request {index} is a '{actual}' message, but the method takes '{expected}'")]
    RequestType {
        index: usize,
        expected: String,
        actual: String,
    },

    #[error("Failed to start waiting for the call: '{0}'")]
    WaitPoolUnavailable(#[source] io::Error),
}

impl InvokeError {
    /// Whether the caller passed arguments that can never work for this method.
    pub fn is_invalid_argument(&self) -> bool {
        matches!(
            self,
            InvokeError::EmptyRequests
                | InvokeError::RequestCount { .. }
                | InvokeError::RequestType { .. }
        )
    }
}

impl From<InvokeError> for Status {
    fn from(err: InvokeError) -> Self {
        if err.is_invalid_argument() {
            Status::invalid_argument(err.to_string())
        } else {
            Status::resource_exhausted(err.to_string())
        }
    }
}

/// Settings of a [`DynamicClient`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientConfig {
    pub wait_pool: WaitPoolConfig,
}

/// Invokes any gRPC method described by a runtime [`MethodDescriptor`].
///
/// The client is cheap to clone. Clones share the transport and the wait pool, and any
/// number of calls may be in flight at once.
pub struct DynamicClient<T> {
    transport: Arc<T>,
    wait_pool: WaitPool,
    runtime: Handle,
}

impl<T> Clone for DynamicClient<T> {
    fn clone(&self) -> Self {
        Self {
            transport: self.transport.clone(),
            wait_pool: self.wait_pool.clone(),
            runtime: self.runtime.clone(),
        }
    }
}

impl<S> DynamicClient<GrpcClient<S>>
where
    GrpcClient<S>: Transport,
    S: tonic::client::GrpcService<tonic::body::Body> + Clone,
    S::Error: Into<crate::BoxError>,
    S::ResponseBody: http_body::Body<Data = tonic::codegen::Bytes> + Send + 'static,
    <S::ResponseBody as http_body::Body>::Error: Into<crate::BoxError> + Send,
{
    /// Creates a client from an existing Tonic service/channel.
    ///
    /// # Panics
    ///
    /// When called outside of a Tokio runtime.
    pub fn from_service(service: S) -> Self {
        Self::new(GrpcClient::new(service))
    }
}

impl<T, C> DynamicClient<Authenticated<T, C>>
where
    T: Transport,
    C: Credentials,
{
    /// Creates a client that attaches `credentials` to every call.
    ///
    /// # Panics
    ///
    /// When called outside of a Tokio runtime.
    pub fn with_credentials(transport: T, credentials: C) -> Self {
        Self::new(Authenticated::new(transport, credentials))
    }
}

impl<T> DynamicClient<T>
where
    T: Transport,
{
    /// Creates a client driving its calls on the current Tokio runtime.
    ///
    /// # Panics
    ///
    /// When called outside of a Tokio runtime.
    pub fn new(transport: T) -> Self {
        Self::with_config(transport, ClientConfig::default())
    }

    /// Like [`DynamicClient::new`], with custom settings.
    ///
    /// # Panics
    ///
    /// When called outside of a Tokio runtime.
    pub fn with_config(transport: T, config: ClientConfig) -> Self {
        Self {
            transport: Arc::new(transport),
            wait_pool: WaitPool::new(config.wait_pool),
            runtime: Handle::current(),
        }
    }

    /// Drives calls on `runtime` instead of the runtime the client was created on.
    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = runtime;
        self
    }

    /// Shares `wait_pool` with other clients instead of owning a pool.
    pub fn with_wait_pool(mut self, wait_pool: WaitPool) -> Self {
        self.wait_pool = wait_pool;
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Starts a call of `method` and returns immediately.
    ///
    /// Unary and server streaming methods take exactly one request. Client and bidi
    /// streaming methods send every request in order, then close the request stream.
    ///
    /// Responses and the terminal event are delivered to `observer` from a runtime task. The
    /// returned [`PendingCall`] resolves after `observer` has received the terminal event.
    ///
    /// # Returns
    ///
    /// * `Ok(PendingCall)` - The call was dispatched. Transport errors arrive through
    ///   `observer.on_error` and the resolved [`CallOutcome`](crate::completion::CallOutcome).
    /// * `Err(InvokeError)` - The request batch does not fit the method. Nothing was sent.
    pub fn invoke<O>(
        &self,
        method: &MethodDescriptor,
        requests: Vec<DynamicMessage>,
        observer: O,
        options: CallOptions,
    ) -> Result<PendingCall, InvokeError>
    where
        O: StreamObserver,
    {
        let method = RpcMethod::new(method);
        let invocation = Invocation::new(&method, requests)?;

        info!(
            method = %method.full_name(),
            shape = %method.shape(),
            requests = invocation.request_count(),
            "Making call"
        );

        let signal = Arc::new(CompletionSignal::new());
        let pending = self
            .wait_pool
            .resolve(signal.clone())
            .map_err(InvokeError::WaitPoolUnavailable)?;
        let observer = CompositeObserver::of(observer, DoneObserver::new(signal));

        let transport = self.transport.clone();
        self.runtime
            .spawn(invocation.drive(transport, method, observer, options));

        Ok(pending)
    }

    /// Performs a call and collects its responses.
    ///
    /// # Returns
    ///
    /// * `Ok(Ok(Vec))` - Successful RPC execution, with every response in arrival order.
    /// * `Ok(Err(Status))` - RPC executed, but the server or the transport returned an error.
    /// * `Err(InvokeError)` - The request batch does not fit the method.
    pub async fn call(
        &self,
        method: &MethodDescriptor,
        requests: Vec<DynamicMessage>,
        options: CallOptions,
    ) -> Result<Result<Vec<DynamicMessage>, Status>, InvokeError> {
        let (events, mut rx) = mpsc::unbounded_channel::<CallEvent>();
        let outcome = self.invoke(method, requests, events, options)?.await;

        // The observer saw every event before the call resolved.
        let mut responses = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let CallEvent::Next(message) = event {
                responses.push(message);
            }
        }

        Ok(outcome.into_result().map(|()| responses))
    }
}

/// A validated request batch, tagged with the protocol that will carry it.
enum Invocation {
    Unary(DynamicMessage),
    ServerStreaming(DynamicMessage),
    ClientStreaming(Vec<DynamicMessage>),
    BidiStreaming(Vec<DynamicMessage>),
}

impl Invocation {
    fn new(method: &RpcMethod, requests: Vec<DynamicMessage>) -> Result<Self, InvokeError> {
        if requests.is_empty() {
            return Err(InvokeError::EmptyRequests);
        }

        let expected = method.input().full_name();
        let mistyped = requests
            .iter()
            .enumerate()
            .find(|(_, request)| request.descriptor().full_name() != expected);
        if let Some((index, request)) = mistyped {
            return Err(InvokeError::RequestType {
                index,
                expected: expected.to_string(),
                actual: request.descriptor().full_name().to_string(),
            });
        }

        let shape = method.shape();
        if !shape.is_single_request() {
            return Ok(if shape == CallShape::ClientStreaming {
                Invocation::ClientStreaming(requests)
            } else {
                Invocation::BidiStreaming(requests)
            });
        }

        let count = requests.len();
        let Ok([request]) = <[DynamicMessage; 1]>::try_from(requests) else {
            return Err(InvokeError::RequestCount { shape, count });
        };
        Ok(if shape == CallShape::Unary {
            Invocation::Unary(request)
        } else {
            Invocation::ServerStreaming(request)
        })
    }

    fn request_count(&self) -> usize {
        match self {
            Invocation::Unary(_) | Invocation::ServerStreaming(_) => 1,
            Invocation::ClientStreaming(requests) | Invocation::BidiStreaming(requests) => {
                requests.len()
            }
        }
    }

    async fn drive<T>(
        self,
        transport: Arc<T>,
        method: RpcMethod,
        mut observer: CompositeObserver,
        options: CallOptions,
    ) where
        T: Transport,
    {
        match self {
            Invocation::Unary(request) => {
                let response = transport.unary(method, request, options).await;
                deliver_single(&mut observer, response);
            }
            Invocation::ServerStreaming(request) => {
                let responses = transport.server_streaming(method, request, options).await;
                deliver_stream(&mut observer, responses).await;
            }
            Invocation::ClientStreaming(requests) => {
                let response = transport
                    .client_streaming(method, request_stream(requests), options)
                    .await;
                deliver_single(&mut observer, response);
            }
            Invocation::BidiStreaming(requests) => {
                let responses = transport
                    .streaming(method, request_stream(requests), options)
                    .await;
                deliver_stream(&mut observer, responses).await;
            }
        }
    }
}

/// Sends every request in order; the stream ending closes the request side of the call.
fn request_stream(requests: Vec<DynamicMessage>) -> RequestStream {
    tokio_stream::iter(requests).boxed()
}

fn deliver_single(observer: &mut CompositeObserver, response: Result<DynamicMessage, Status>) {
    match response {
        Ok(message) => {
            observer.on_next(message);
            observer.on_completed();
        }
        Err(status) => observer.on_error(status),
    }
}

async fn deliver_stream(
    observer: &mut CompositeObserver,
    responses: Result<ResponseStream, Status>,
) {
    let mut responses = match responses {
        Ok(responses) => responses,
        Err(status) => return observer.on_error(status),
    };

    let mut received = 0usize;
    while let Some(item) = responses.next().await {
        match item {
            Ok(message) => {
                received += 1;
                observer.on_next(message);
            }
            Err(status) => {
                debug!(received, "Response stream failed");
                return observer.on_error(status);
            }
        }
    }

    debug!(received, "Response stream finished");
    observer.on_completed();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaProvider;

    fn method(name: &str) -> RpcMethod {
        let method = echo_service::descriptor_pool()
            .method(echo_service::SERVICE_NAME, name)
            .unwrap();
        RpcMethod::new(&method)
    }

    fn request(text: &str) -> DynamicMessage {
        let descriptor = echo_service::descriptor_pool()
            .get_message_by_name("echo.EchoRequest")
            .unwrap();
        let mut message = DynamicMessage::new(descriptor);
        message.set_field_by_name("message", prost_reflect::Value::String(text.to_string()));
        message
    }

    #[test]
    fn empty_batches_are_rejected_for_every_shape() {
        for name in [
            "UnaryEcho",
            "ServerStreamingEcho",
            "ClientStreamingEcho",
            "BidirectionalEcho",
        ] {
            let err = Invocation::new(&method(name), vec![]).err().unwrap();
            assert!(matches!(err, InvokeError::EmptyRequests));
            assert!(err.is_invalid_argument());
        }
    }

    #[test]
    fn single_request_shapes_report_the_actual_count() {
        let err = Invocation::new(
            &method("ServerStreamingEcho"),
            vec![request("a"), request("b")],
        )
        .err()
        .unwrap();

        assert_eq!(
            err.to_string(),
            "Need exactly 1 request for a server streaming call, but got: 2"
        );
        assert_eq!(Status::from(err).code(), tonic::Code::InvalidArgument);
    }

    #[test]
    fn streaming_shapes_keep_every_request() {
        let invocation = Invocation::new(
            &method("BidirectionalEcho"),
            vec![request("a"), request("b"), request("c")],
        )
        .unwrap();

        assert!(matches!(invocation, Invocation::BidiStreaming(_)));
        assert_eq!(invocation.request_count(), 3);
    }

    #[test]
    fn requests_of_the_wrong_type_are_rejected() {
        let response = DynamicMessage::new(
            echo_service::descriptor_pool()
                .get_message_by_name("echo.EchoResponse")
                .unwrap(),
        );

        let err = Invocation::new(&method("ClientStreamingEcho"), vec![request("a"), response])
            .err()
            .unwrap();

        match &err {
            InvokeError::RequestType {
                index,
                expected,
                actual,
            } => {
                assert_eq!(*index, 1);
                assert_eq!(expected, "echo.EchoRequest");
                assert_eq!(actual, "echo.EchoResponse");
            }
            other => panic!("Unexpected error: {other}"),
        }
        assert_eq!(Status::from(err).code(), tonic::Code::InvalidArgument);
    }
}
