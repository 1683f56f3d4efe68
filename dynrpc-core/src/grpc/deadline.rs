//! Client-side enforcement of [`CallOptions::timeout`](crate::transport::CallOptions).
//!
//! The timeout is also sent to the server as `grpc-timeout`, but the server might not honor
//! it, so the client stops waiting on its own once the deadline passes.
use crate::transport::ResponseStream;
use futures_util::{Stream, StreamExt, stream};
use prost_reflect::DynamicMessage;
use std::future::Future;
use std::time::Duration;
use tokio::time::{Instant, timeout_at};
use tonic::Status;

#[derive(Debug, Clone, Copy)]
pub(crate) struct Deadline(Option<Instant>);

impl Deadline {
    /// A deadline `timeout` from now, or none at all. A timeout too large to represent as
    /// an instant never expires.
    pub(crate) fn after(timeout: Option<Duration>) -> Self {
        Self(timeout.and_then(|timeout| Instant::now().checked_add(timeout)))
    }

    /// Runs `fut`, failing with `DEADLINE_EXCEEDED` if it is still pending at the deadline.
    pub(crate) async fn run<T>(
        self,
        fut: impl Future<Output = Result<T, Status>>,
    ) -> Result<T, Status> {
        match self.0 {
            None => fut.await,
            Some(at) => timeout_at(at, fut)
                .await
                .unwrap_or_else(|_| Err(deadline_exceeded())),
        }
    }

    /// Bounds every item of `responses` by the deadline. A late stream yields one
    /// `DEADLINE_EXCEEDED` error and ends.
    pub(crate) fn bound<S>(self, responses: S) -> ResponseStream
    where
        S: Stream<Item = Result<DynamicMessage, Status>> + Send + 'static,
    {
        let Some(at) = self.0 else {
            return responses.boxed();
        };

        stream::unfold(Some(Box::pin(responses)), move |state| async move {
            let mut responses = state?;
            match timeout_at(at, responses.next()).await {
                Ok(Some(item)) => Some((item, Some(responses))),
                Ok(None) => None,
                Err(_) => Some((Err(deadline_exceeded()), None)),
            }
        })
        .boxed()
    }
}

fn deadline_exceeded() -> Status {
    Status::deadline_exceeded("Deadline exceeded while waiting for the server")
}
