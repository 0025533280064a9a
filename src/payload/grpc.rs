//! Schema-less gRPC payload extraction
//!
//! A gRPC request body is a sequence of length-prefixed frames:
//!
//! ```text
//! +------------+---------------------------+-----------------------+
//! | compressed | message length (u32, BE)  | message bytes ...     |
//! |   1 byte   |         4 bytes           |   `length` bytes      |
//! +------------+---------------------------+-----------------------+
//! ```
//!
//! Only the first frame is inspected. Its message is decoded against a
//! synthetic descriptor: fields 1 through 100, every one a string. This lets a
//! rule pull a field out by tag number without the real `.proto` schema.
//! Nested and repeated fields are reached with a query path:
//!
//! | query    | meaning                                               |
//! |----------|-------------------------------------------------------|
//! | `3`      | string field 3                                        |
//! | `2.1`    | field 1 of the message held in field 2                |
//! | `4[1]`   | second occurrence of repeated field 4                 |
//! | `4[0].1` | field 1 of the first message in repeated field 4      |
//! | `5[]`    | every occurrence of field 5, as a list                |
//!
//! Values must be valid UTF-8. Compressed frames are rejected.

use crate::domain::AttributeValue;
use crate::payload::PayloadError;
use bytes::{Buf, Bytes};
use prost::encoding::{decode_key, decode_varint, WireType};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::OnceLock;

/// Frame header size: compression flag plus big-endian length
pub const FRAME_HEADER_LEN: usize = 5;

/// Highest field number in the synthetic descriptor
pub const SYNTHETIC_FIELD_COUNT: u32 = 100;

/// Content-type prefix shared by every gRPC encoding
pub const GRPC_CONTENT_TYPE: &str = "application/grpc";

/// Read the first frame of a gRPC body and return its message bytes
pub fn read_frame(body: &Bytes) -> Result<Bytes, PayloadError> {
    if body.len() < FRAME_HEADER_LEN {
        return Err(PayloadError::UnexpectedEof);
    }
    if body[0] != 0 {
        return Err(PayloadError::Compressed);
    }

    let length = u32::from_be_bytes([body[1], body[2], body[3], body[4]]) as usize;
    let end = FRAME_HEADER_LEN
        .checked_add(length)
        .ok_or(PayloadError::UnexpectedEof)?;
    if body.len() < end {
        return Err(PayloadError::UnexpectedEof);
    }

    Ok(body.slice(FRAME_HEADER_LEN..end))
}

/// Wrap a message in an uncompressed gRPC frame
pub fn encode_frame(message: &[u8]) -> Bytes {
    let mut framed = Vec::with_capacity(FRAME_HEADER_LEN + message.len());
    framed.push(0);
    framed.extend_from_slice(&(message.len() as u32).to_be_bytes());
    framed.extend_from_slice(message);
    Bytes::from(framed)
}

/// Kind of a synthetic field; every field is typed as a string
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    String,
}

#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    pub number: u32,
    pub name: String,
    pub kind: FieldKind,
}

/// The generic message shape all payloads are decoded against
#[derive(Debug)]
pub struct SyntheticDescriptor {
    fields: Vec<FieldDescriptor>,
}

impl SyntheticDescriptor {
    fn build() -> Self {
        let fields = (1..=SYNTHETIC_FIELD_COUNT)
            .map(|number| FieldDescriptor {
                number,
                name: format!("field_{number}"),
                kind: FieldKind::String,
            })
            .collect();
        Self { fields }
    }

    /// The shared descriptor, built on first use
    pub fn get() -> &'static SyntheticDescriptor {
        static DESCRIPTOR: OnceLock<SyntheticDescriptor> = OnceLock::new();
        DESCRIPTOR.get_or_init(Self::build)
    }

    pub fn field(&self, number: u32) -> Option<&FieldDescriptor> {
        number
            .checked_sub(1)
            .and_then(|index| self.fields.get(index as usize))
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    /// Decode a message into its length-delimited occurrences per known field.
    ///
    /// Fields with other wire types, and field numbers outside the descriptor,
    /// are skipped the way unknown fields are.
    pub fn decode(&self, message: &Bytes) -> Result<DecodedMessage, PayloadError> {
        let mut buf = message.clone();
        let mut fields: BTreeMap<u32, Vec<Bytes>> = BTreeMap::new();

        while buf.has_remaining() {
            let (tag, wire_type) = decode_key(&mut buf)?;
            match wire_type {
                WireType::LengthDelimited => {
                    let length = decode_varint(&mut buf)? as usize;
                    if buf.remaining() < length {
                        return Err(PayloadError::UnexpectedEof);
                    }
                    let value = buf.split_to(length);
                    if self.field(tag).is_some() {
                        fields.entry(tag).or_default().push(value);
                    }
                }
                WireType::Varint => {
                    decode_varint(&mut buf)?;
                }
                WireType::SixtyFourBit => skip(&mut buf, 8)?,
                WireType::ThirtyTwoBit => skip(&mut buf, 4)?,
                WireType::StartGroup | WireType::EndGroup => return Err(PayloadError::Group),
            }
        }

        Ok(DecodedMessage { fields })
    }
}

fn skip(buf: &mut Bytes, count: usize) -> Result<(), PayloadError> {
    if buf.remaining() < count {
        return Err(PayloadError::UnexpectedEof);
    }
    buf.advance(count);
    Ok(())
}

/// A message decoded against the synthetic descriptor
#[derive(Debug, Default)]
pub struct DecodedMessage {
    fields: BTreeMap<u32, Vec<Bytes>>,
}

impl DecodedMessage {
    /// All occurrences of a field in wire order
    pub fn occurrences(&self, field: u32) -> &[Bytes] {
        self.fields.get(&field).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// How one query segment selects among a field's occurrences
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selector {
    /// Singular field; the last occurrence wins
    Scalar,
    /// One element of a repeated field
    At(usize),
    /// Every element of a repeated field
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuerySegment {
    pub field: u32,
    pub selector: Selector,
}

/// A parsed field query such as `4[0].1`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldQuery {
    raw: String,
    segments: Vec<QuerySegment>,
}

impl FieldQuery {
    pub fn segments(&self) -> &[QuerySegment] {
        &self.segments
    }
}

impl FromStr for FieldQuery {
    type Err = PayloadError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let invalid = || PayloadError::InvalidQuery(raw.to_string());
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(invalid());
        }

        let segments = trimmed
            .split('.')
            .map(|segment| {
                let (field, selector) = match segment.split_once('[') {
                    Some((field, rest)) => {
                        let index = rest.strip_suffix(']').ok_or_else(invalid)?;
                        let selector = if index.is_empty() {
                            Selector::All
                        } else {
                            Selector::At(index.parse().map_err(|_| invalid())?)
                        };
                        (field, selector)
                    }
                    None => (segment, Selector::Scalar),
                };
                let field: u32 = field.parse().map_err(|_| invalid())?;
                if field == 0 || field > SYNTHETIC_FIELD_COUNT {
                    return Err(PayloadError::FieldOutOfRange(field));
                }
                Ok(QuerySegment { field, selector })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            raw: trimmed.to_string(),
            segments,
        })
    }
}

/// Run a field query against a decoded message
pub fn run_query(message: &Bytes, query: &FieldQuery) -> Result<AttributeValue, PayloadError> {
    let descriptor = SyntheticDescriptor::get();
    let missing = || PayloadError::Missing(query.raw.clone());

    let mut current = vec![message.clone()];
    let mut listed = false;

    for segment in query.segments() {
        let mut selected = Vec::new();
        for msg in &current {
            let decoded = descriptor.decode(msg)?;
            let occurrences = decoded.occurrences(segment.field);
            match segment.selector {
                Selector::Scalar => selected.extend(occurrences.last().cloned()),
                Selector::At(index) => selected.extend(occurrences.get(index).cloned()),
                Selector::All => {
                    listed = true;
                    selected.extend(occurrences.iter().cloned());
                }
            }
        }
        if selected.is_empty() {
            return Err(missing());
        }
        current = selected;
    }

    let mut values = current
        .into_iter()
        .map(|bytes| String::from_utf8(bytes.to_vec()).map_err(|_| PayloadError::NotUtf8))
        .collect::<Result<Vec<_>, _>>()?;

    if listed {
        Ok(AttributeValue::Multi(values))
    } else {
        values.pop().map(AttributeValue::Single).ok_or_else(missing)
    }
}

/// Extract a field from a framed gRPC body; the body is left untouched
pub fn extract(body: &Bytes, query: &str) -> Result<AttributeValue, PayloadError> {
    let query: FieldQuery = query.parse()?;
    let message = read_frame(body)?;
    run_query(&message, &query)
}

/// True for any `application/grpc` content type (`+proto`, `+json`, ...)
pub fn is_grpc_content_type(content_type: &str) -> bool {
    content_type.starts_with(GRPC_CONTENT_TYPE)
}
