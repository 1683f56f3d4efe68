//! # Response Observers
//!
//! Callers receive the outcome of a dynamic call through a [`StreamObserver`]: zero or more
//! responses followed by exactly one terminal event.
use prost_reflect::DynamicMessage;
use tokio::sync::mpsc::UnboundedSender;

/// Receives the events of a single dynamic call.
///
/// Events are delivered from a transport task, not from the thread that started the call.
/// For a given call they arrive in order, and either [`StreamObserver::on_error`] or
/// [`StreamObserver::on_completed`] is always the last one.
pub trait StreamObserver: Send + 'static {
    /// A response message arrived.
    fn on_next(&mut self, message: DynamicMessage);

    /// The call failed. No further events follow.
    fn on_error(&mut self, status: tonic::Status);

    /// The call finished successfully. No further events follow.
    fn on_completed(&mut self);
}

impl<O> StreamObserver for Box<O>
where
    O: StreamObserver + ?Sized,
{
    fn on_next(&mut self, message: DynamicMessage) {
        (**self).on_next(message)
    }

    fn on_error(&mut self, status: tonic::Status) {
        (**self).on_error(status)
    }

    fn on_completed(&mut self) {
        (**self).on_completed()
    }
}

/// A single observer event, for callers that prefer consuming a call as a channel.
#[derive(Debug, Clone)]
pub enum CallEvent {
    Next(DynamicMessage),
    Error(tonic::Status),
    Completed,
}

/// Forwards every event into the channel. A closed receiver simply drops them.
impl StreamObserver for UnboundedSender<CallEvent> {
    fn on_next(&mut self, message: DynamicMessage) {
        let _ = self.send(CallEvent::Next(message));
    }

    fn on_error(&mut self, status: tonic::Status) {
        let _ = self.send(CallEvent::Error(status));
    }

    fn on_completed(&mut self) {
        let _ = self.send(CallEvent::Completed);
    }
}
