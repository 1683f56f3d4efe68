use dynrpc_core::auth::{BearerToken, Credentials};
use dynrpc_core::client::{DynamicClient, InvokeError};
use dynrpc_core::completion::CallOutcome;
use dynrpc_core::grpc::client::GrpcClient;
use dynrpc_core::observer::CallEvent;
use dynrpc_core::prost_reflect::{DynamicMessage, MethodDescriptor};
use dynrpc_core::schema::SchemaProvider;
use dynrpc_core::tonic::{Code, Status};
use dynrpc_core::transport::{CallOptions, RpcMethod, Transport};
use echo_service::{EchoServiceImpl, EchoServiceServer};
use std::time::Duration;

fn method(name: &str) -> MethodDescriptor {
    echo_service::descriptor_pool()
        .method(echo_service::SERVICE_NAME, name)
        .unwrap()
}

fn payload(method: &MethodDescriptor, json: serde_json::Value) -> Vec<DynamicMessage> {
    let items = match json {
        serde_json::Value::Array(items) => items,
        item => vec![item],
    };
    items
        .into_iter()
        .map(|item| DynamicMessage::deserialize(method.input(), item).unwrap())
        .collect()
}

fn to_json(messages: Vec<DynamicMessage>) -> Vec<serde_json::Value> {
    messages
        .iter()
        .map(|message| serde_json::to_value(message).unwrap())
        .collect()
}

type EchoServer = EchoServiceServer<EchoServiceImpl>;

fn echo_client() -> DynamicClient<GrpcClient<EchoServer>> {
    DynamicClient::from_service(EchoServiceServer::new(EchoServiceImpl))
}

#[tokio::test]
async fn test_unary() {
    let unary = method("UnaryEcho");
    let body = serde_json::json!({ "message": "hello" });

    let res = echo_client()
        .call(&unary, payload(&unary, body.clone()), CallOptions::default())
        .await
        .unwrap();

    match res {
        Ok(responses) => assert_eq!(to_json(responses), vec![body]),
        Err(status) => panic!("Received error status for valid unary request: {status}"),
    }
}

#[tokio::test]
async fn test_server_streaming() {
    let server_streaming = method("ServerStreamingEcho");
    let body = serde_json::json!({ "message": "stream" });

    let res = echo_client()
        .call(
            &server_streaming,
            payload(&server_streaming, body),
            CallOptions::default(),
        )
        .await
        .unwrap();

    match res {
        Ok(responses) => {
            let results = to_json(responses);

            assert_eq!(results.len(), 3);
            assert_eq!(results[0]["message"], "stream - seq 0");
            assert_eq!(results[1]["message"], "stream - seq 1");
            assert_eq!(results[2]["message"], "stream - seq 2");
        }
        Err(status) => {
            panic!("Received error status for valid server streaming request: {status}")
        }
    }
}

#[tokio::test]
async fn test_client_streaming() {
    let client_streaming = method("ClientStreamingEcho");
    let body = serde_json::json!([
        { "message": "A" },
        { "message": "B" },
        { "message": "C" }
    ]);

    let res = echo_client()
        .call(
            &client_streaming,
            payload(&client_streaming, body),
            CallOptions::default(),
        )
        .await
        .unwrap();

    match res {
        Ok(responses) => assert_eq!(
            to_json(responses),
            vec![serde_json::json!({ "message": "ABC" })]
        ),
        Err(status) => {
            panic!("Received error status for valid client stream request: {status}")
        }
    }
}

#[tokio::test]
async fn test_bidirectional_streaming() {
    let bidi = method("BidirectionalEcho");
    let body = serde_json::json!([
        { "message": "Ping" },
        { "message": "Pong" }
    ]);

    let res = echo_client()
        .call(&bidi, payload(&bidi, body), CallOptions::default())
        .await
        .unwrap();

    match res {
        Ok(responses) => {
            let results = to_json(responses);

            assert_eq!(results.len(), 2);
            assert_eq!(results[0]["message"], "echo: Ping");
            assert_eq!(results[1]["message"], "echo: Pong");
        }
        Err(status) => {
            panic!("Received error status for valid bidirectional streaming request: {status}")
        }
    }
}

#[tokio::test]
async fn test_server_error_reaches_the_observer() {
    let bidi = method("BidirectionalEcho");
    let body = serde_json::json!([
        { "message": "ok" },
        { "message": "fail" },
        { "message": "never answered" }
    ]);
    let (events, mut rx) = tokio::sync::mpsc::unbounded_channel::<CallEvent>();

    let outcome = echo_client()
        .invoke(&bidi, payload(&bidi, body), events, CallOptions::default())
        .unwrap()
        .await;

    let mut received = Vec::new();
    while let Ok(event) = rx.try_recv() {
        received.push(event);
    }

    match outcome {
        CallOutcome::Failed(status) => assert_eq!(status.code(), Code::InvalidArgument),
        CallOutcome::Completed => panic!("Expected the call to fail"),
    }

    assert_eq!(received.len(), 2);
    match (&received[0], &received[1]) {
        (CallEvent::Next(message), CallEvent::Error(status)) => {
            assert_eq!(serde_json::to_value(message).unwrap()["message"], "echo: ok");
            assert_eq!(status.code(), Code::InvalidArgument);
        }
        events => panic!("Unexpected events: {events:?}"),
    }
}

#[tokio::test]
async fn test_deadline_exceeded() {
    let unary = method("UnaryEcho");
    let options = CallOptions::default().with_timeout(Duration::from_millis(50));

    let res = echo_client()
        .call(
            &unary,
            payload(&unary, serde_json::json!({ "message": "slow" })),
            options,
        )
        .await
        .unwrap();

    assert_eq!(res.unwrap_err().code(), Code::DeadlineExceeded);
}

#[tokio::test]
async fn test_unrepresentable_timeout_means_no_deadline() {
    let unary = method("UnaryEcho");
    let body = serde_json::json!({ "message": "hello" });
    let options = CallOptions::default().with_timeout(Duration::MAX);

    let res = echo_client()
        .call(&unary, payload(&unary, body.clone()), options)
        .await
        .unwrap();

    match res {
        Ok(responses) => assert_eq!(to_json(responses), vec![body]),
        Err(status) => panic!("Received error status for a call without deadline: {status}"),
    }
}

#[tokio::test]
async fn test_wrong_request_type_is_rejected_before_sending() {
    let unary = method("UnaryEcho");
    let response = DynamicMessage::new(unary.output());

    let err = echo_client()
        .call(&unary, vec![response], CallOptions::default())
        .await
        .err()
        .unwrap();

    assert!(matches!(err, InvokeError::RequestType { index: 0, .. }));
    assert_eq!(Status::from(err).code(), Code::InvalidArgument);
}

#[tokio::test]
async fn test_transport_rejects_wrong_request_type() {
    let unary = method("UnaryEcho");
    let transport = GrpcClient::new(EchoServiceServer::new(EchoServiceImpl));

    let status = transport
        .unary(
            RpcMethod::new(&unary),
            DynamicMessage::new(unary.output()),
            CallOptions::default(),
        )
        .await
        .unwrap_err();

    assert_eq!(status.code(), Code::InvalidArgument);
    assert!(status.message().contains("echo.EchoResponse"));
}

#[tokio::test]
async fn test_invalid_header_fails_through_the_error_path() {
    let unary = method("UnaryEcho");
    let options = CallOptions::default().with_header("bad header", "value");

    let res = echo_client()
        .call(
            &unary,
            payload(&unary, serde_json::json!({ "message": "hello" })),
            options,
        )
        .await
        .unwrap();

    assert_eq!(res.unwrap_err().code(), Code::InvalidArgument);
}

#[tokio::test]
async fn test_bearer_token_is_attached() {
    let unary = method("UnaryEcho");
    let client = DynamicClient::with_credentials(
        GrpcClient::new(EchoServiceServer::new(EchoServiceImpl)),
        BearerToken::new("t0k3n"),
    );

    let responses = client
        .call(
            &unary,
            payload(&unary, serde_json::json!({ "message": "whoami" })),
            CallOptions::default(),
        )
        .await
        .unwrap()
        .unwrap();

    assert_eq!(
        to_json(responses),
        vec![serde_json::json!({ "message": "Bearer t0k3n" })]
    );
}

struct Revoked;

#[dynrpc_core::tonic::async_trait]
impl Credentials for Revoked {
    async fn request_metadata(
        &self,
        _method: &RpcMethod,
    ) -> Result<Vec<(String, String)>, Status> {
        Err(Status::unauthenticated("token revoked"))
    }
}

#[tokio::test]
async fn test_failing_credentials_fail_the_call() {
    let unary = method("UnaryEcho");
    let client = DynamicClient::with_credentials(GrpcClient::new(EchoServiceServer::new(EchoServiceImpl)), Revoked);

    let res = client
        .call(
            &unary,
            payload(&unary, serde_json::json!({ "message": "hello" })),
            CallOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(res.unwrap_err().code(), Code::Unauthenticated);
}
