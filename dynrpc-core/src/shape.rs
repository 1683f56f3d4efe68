//! # Call Shapes
//!
//! A gRPC method follows one of four request/response cardinality patterns. The pattern is
//! fully determined by the two streaming flags of its descriptor.
use prost_reflect::MethodDescriptor;
use std::fmt;

/// The request/response cardinality of a gRPC method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallShape {
    /// Single Request -> Single Response.
    Unary,
    /// Single Request -> Stream of Responses.
    ServerStreaming,
    /// Stream of Requests -> Single Response.
    ClientStreaming,
    /// Stream of Requests -> Stream of Responses.
    BidiStreaming,
}

impl CallShape {
    /// Derives the shape from the `client_streaming` and `server_streaming` flags.
    pub fn classify(client_streaming: bool, server_streaming: bool) -> Self {
        match (client_streaming, server_streaming) {
            (false, false) => CallShape::Unary,
            (false, true) => CallShape::ServerStreaming,
            (true, false) => CallShape::ClientStreaming,
            (true, true) => CallShape::BidiStreaming,
        }
    }

    /// Derives the shape of the given method.
    pub fn of(method: &MethodDescriptor) -> Self {
        Self::classify(method.is_client_streaming(), method.is_server_streaming())
    }

    /// Whether the caller has to supply exactly one request message.
    pub fn is_single_request(self) -> bool {
        matches!(self, CallShape::Unary | CallShape::ServerStreaming)
    }
}

impl fmt::Display for CallShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CallShape::Unary => "unary",
            CallShape::ServerStreaming => "server streaming",
            CallShape::ClientStreaming => "client streaming",
            CallShape::BidiStreaming => "bidi streaming",
        };
        f.write_str(name)
    }
}
