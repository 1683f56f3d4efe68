//! # Echo Service
//!
//! **INTERNAL USE ONLY**: This crate exists solely to provide a gRPC server implementation
//! and descriptor set for integration testing `dynrpc-core`.
//! It is not intended for production use.
//!
//! Behaviour of each method of [`EchoServiceImpl`]:
//!
//! * `UnaryEcho`: returns the request message untouched.
//! * `ServerStreamingEcho`: returns `"<message> - seq N"` for `N` in `0..3`.
//! * `ClientStreamingEcho`: concatenates every received message.
//! * `BidirectionalEcho`: answers every message with `"echo: <message>"`.
//!
//! Every method fails with `INVALID_ARGUMENT` when it receives the message `"fail"`, and
//! sleeps for [`SLOW_DELAY`] before answering a message `"slow"`. `UnaryEcho` answers the
//! message `"whoami"` with the value of the request's `authorization` header.
use prost_reflect::DescriptorPool;
use std::time::Duration;

mod service;

pub mod pb {
    include!(concat!(env!("OUT_DIR"), "/echo.rs"));
}

pub use pb::echo_service_server::{EchoService, EchoServiceServer};
pub use service::EchoServiceImpl;

pub const FILE_DESCRIPTOR_SET: &[u8] = tonic::include_file_descriptor_set!("descriptors");

/// Fully qualified name of the echo service.
pub const SERVICE_NAME: &str = "echo.EchoService";

/// How long handlers wait before answering a `"slow"` message.
pub const SLOW_DELAY: Duration = Duration::from_secs(5);

/// Returns a `DescriptorPool` loaded with [`FILE_DESCRIPTOR_SET`].
pub fn descriptor_pool() -> DescriptorPool {
    DescriptorPool::decode(FILE_DESCRIPTOR_SET).expect("echo descriptors are valid")
}
