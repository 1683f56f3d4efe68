use crate::SLOW_DELAY;
use crate::pb::{EchoRequest, EchoResponse, echo_service_server::EchoService};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status, Streaming};

type EchoStream = ReceiverStream<Result<EchoResponse, Status>>;

/// The echo logic. Wrap it in an `EchoServiceServer` to hand it to a gRPC client as its
/// service, so tests never open a socket.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoServiceImpl;

/// Applies the magic messages shared by every method.
async fn screen(message: &str) -> Result<(), Status> {
    match message {
        "fail" => Err(Status::invalid_argument("the echo service was asked to fail")),
        "slow" => {
            tokio::time::sleep(SLOW_DELAY).await;
            Ok(())
        }
        _ => Ok(()),
    }
}

#[tonic::async_trait]
impl EchoService for EchoServiceImpl {
    type ServerStreamingEchoStream = EchoStream;
    type BidirectionalEchoStream = EchoStream;

    async fn unary_echo(
        &self,
        request: Request<EchoRequest>,
    ) -> Result<Response<EchoResponse>, Status> {
        let authorization = request
            .metadata()
            .get("authorization")
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();

        let EchoRequest { message } = request.into_inner();
        screen(&message).await?;

        let message = if message == "whoami" {
            authorization
        } else {
            message
        };

        Ok(Response::new(EchoResponse { message }))
    }

    async fn server_streaming_echo(
        &self,
        request: Request<EchoRequest>,
    ) -> Result<Response<Self::ServerStreamingEchoStream>, Status> {
        let EchoRequest { message } = request.into_inner();
        screen(&message).await?;

        let (tx, rx) = mpsc::channel(4);
        tokio::spawn(async move {
            for seq in 0..3 {
                let response = EchoResponse {
                    message: format!("{message} - seq {seq}"),
                };
                if tx.send(Ok(response)).await.is_err() {
                    break;
                }
            }
        });

        Ok(Response::new(ReceiverStream::new(rx)))
    }

    async fn client_streaming_echo(
        &self,
        request: Request<Streaming<EchoRequest>>,
    ) -> Result<Response<EchoResponse>, Status> {
        let mut stream = request.into_inner();
        let mut message = String::new();

        while let Some(EchoRequest { message: part }) = stream.message().await? {
            screen(&part).await?;
            message.push_str(&part);
        }

        Ok(Response::new(EchoResponse { message }))
    }

    async fn bidirectional_echo(
        &self,
        request: Request<Streaming<EchoRequest>>,
    ) -> Result<Response<Self::BidirectionalEchoStream>, Status> {
        let mut stream = request.into_inner();

        let (tx, rx) = mpsc::channel(4);
        tokio::spawn(async move {
            loop {
                let reply = match stream.message().await {
                    Ok(Some(EchoRequest { message })) => {
                        screen(&message).await.map(|()| EchoResponse {
                            message: format!("echo: {message}"),
                        })
                    }
                    Ok(None) => break,
                    Err(status) => Err(status),
                };

                let failed = reply.is_err();
                if tx.send(reply).await.is_err() || failed {
                    break;
                }
            }
        });

        Ok(Response::new(ReceiverStream::new(rx)))
    }
}
