//! # Dynrpc Core
//!
//! `dynrpc-core` calls any gRPC method from a runtime schema descriptor instead of
//! compile-time generated client code. Callers discover a method (through server reflection,
//! a `FileDescriptorSet`, ...), build `DynamicMessage` arguments, and invoke it.
//!
//! ## Key Components
//!
//! * **[`client::DynamicClient`]:** The main entry point. It classifies the method's
//!   [`shape::CallShape`], drives the matching call protocol against a
//!   [`transport::Transport`], and reports the outcome through a caller-supplied
//!   [`observer::StreamObserver`] and a [`wait_pool::PendingCall`] future.
//! * **[`completion`]:** The one-shot latch and observer fan-out that make "the future
//!   resolved" mean "the observer has already seen every event".
//! * **[`wait_pool::WaitPool`]:** The threads that block on completion latches, so neither
//!   the caller nor the transport ever does.
//!
//! ## Transports
//!
//! * **[`grpc::client::GrpcClient`]:** A [`transport::Transport`] over any `tonic`
//!   `GrpcService`, using the [`grpc::codec::DynamicCodec`] to marshal dynamic messages.
//! * **[`auth::Authenticated`]:** Attaches [`auth::Credentials`] to every call of an inner
//!   transport.
//!
//! ## Re-exports
//!
//! This crate re-exports `prost`, `prost-reflect`, and `tonic` to ensure that consumers
//! use compatible versions of these underlying dependencies.
pub mod auth;
pub mod client;
pub mod completion;
pub mod grpc;
pub mod observer;
pub mod schema;
pub mod shape;
pub mod transport;
pub mod wait_pool;

// Re-exports
pub use prost;
pub use prost_reflect;
pub use tonic;

/// Type alias for the standard boxed error used in generic bounds.
type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;
