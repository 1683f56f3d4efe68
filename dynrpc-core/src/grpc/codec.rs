//! # Dynamic Message Codec
//!
//! This module implements `tonic::codec::Codec` to let `tonic` transport
//! `prost_reflect::DynamicMessage` values directly, bypassing the need for generated Rust
//! structs.
//!
//! ## How it works
//!
//! 1. **Encoder**:
//!    - Takes a `DynamicMessage`.
//!    - Checks it was built for the expected `MessageDescriptor`.
//!    - Serializes it into the generic gRPC byte buffer.
//!
//! 2. **Decoder**:
//!    - Reads raw bytes from the wire.
//!    - Merges them into an empty `DynamicMessage` of the expected `MessageDescriptor`.
use prost::Message;
use prost_reflect::{DynamicMessage, MessageDescriptor, ReflectMessage};
use tonic::{
    Status,
    codec::{Codec, DecodeBuf, Decoder, EncodeBuf, Encoder},
};

/// A custom Codec for `DynamicMessage` values.
///
/// It holds the descriptors (schemas) for both directions. On a client the encoded side is
/// the method input and the decoded side the method output; a server swaps them.
#[derive(Debug, Clone)]
pub struct DynamicCodec {
    /// Schema of the messages this side sends.
    encode_desc: MessageDescriptor,
    /// Schema of the messages this side receives.
    decode_desc: MessageDescriptor,
}

impl DynamicCodec {
    /// Creates a new `DynamicCodec`.
    ///
    /// # Arguments
    /// * `encode_desc` - Descriptor of the messages being sent.
    /// * `decode_desc` - Descriptor of the messages being received.
    pub fn new(encode_desc: MessageDescriptor, decode_desc: MessageDescriptor) -> Self {
        Self {
            encode_desc,
            decode_desc,
        }
    }
}

impl Codec for DynamicCodec {
    type Encode = DynamicMessage;
    type Decode = DynamicMessage;

    type Encoder = DynamicEncoder;
    type Decoder = DynamicDecoder;

    fn encoder(&mut self) -> Self::Encoder {
        DynamicEncoder(self.encode_desc.clone())
    }

    fn decoder(&mut self) -> Self::Decoder {
        DynamicDecoder(self.decode_desc.clone())
    }
}

/// Fails with `INVALID_ARGUMENT` unless `message` was built for the `expected` schema.
///
/// Schemas are compared by full name, so messages built from another pool holding the same
/// definitions are accepted.
pub fn check_type(expected: &MessageDescriptor, message: &DynamicMessage) -> Result<(), Status> {
    let actual = message.descriptor();
    if actual.full_name() == expected.full_name() {
        return Ok(());
    }

    Err(Status::invalid_argument(format!(
        "Expected a '{}' message but got a '{}'",
        expected.full_name(),
        actual.full_name()
    )))
}

/// Responsible for encoding a `DynamicMessage` into Protobuf bytes.
#[derive(Debug)]
pub struct DynamicEncoder(MessageDescriptor);

impl Encoder for DynamicEncoder {
    type Item = DynamicMessage;
    type Error = Status;

    fn encode(&mut self, item: Self::Item, dst: &mut EncodeBuf<'_>) -> Result<(), Self::Error> {
        check_type(&self.0, &item)?;
        item.encode_raw(dst);
        Ok(())
    }
}

/// Responsible for decoding Protobuf bytes into a `DynamicMessage`.
#[derive(Debug)]
pub struct DynamicDecoder(MessageDescriptor);

impl Decoder for DynamicDecoder {
    type Item = DynamicMessage;
    type Error = Status;

    fn decode(&mut self, src: &mut DecodeBuf<'_>) -> Result<Option<Self::Item>, Self::Error> {
        let mut msg = DynamicMessage::new(self.0.clone());
        msg.merge(src)
            .map_err(|e| Status::internal(format!("Failed to decode Protobuf bytes: {}", e)))?;

        Ok(Some(msg))
    }
}
