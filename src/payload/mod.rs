//! Payload extraction from buffered request and response bodies
//!
//! Both extractors operate on an already-buffered [`bytes::Bytes`] body and
//! never consume it, so the same bytes can be forwarded afterwards.

pub mod grpc;
pub mod json;

use thiserror::Error;

/// Errors raised while pulling a value out of a payload
#[derive(Error, Debug)]
pub enum PayloadError {
    #[error("unexpected end of payload")]
    UnexpectedEof,

    #[error("unsupported compressed message")]
    Compressed,

    #[error("invalid protobuf encoding: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("protobuf groups are not supported")]
    Group,

    #[error("invalid field query: {0}")]
    InvalidQuery(String),

    #[error("field number {0} is outside the supported range")]
    FieldOutOfRange(u32),

    #[error("field value is not valid UTF-8")]
    NotUtf8,

    #[error("no value at {0}")]
    Missing(String),

    #[error("invalid JSON body: {0}")]
    Json(#[from] serde_json::Error),

    #[error("value at {0} is not a string, number or boolean")]
    NotScalar(String),
}
