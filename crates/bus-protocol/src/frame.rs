//! Frame serialization and streaming parse.

use crate::value::{Args, Value};
use bytes::BytesMut;
use thiserror::Error;

/// Options byte for a key-value argument map. The only value in use.
const OPTIONS_KEY_VALUE: u8 = 0;

/// Fixed frame prefix: length word, options byte, message-id length byte.
const HEADER_LEN: usize = 6;

/// Largest value payload expressible with a 24-bit length.
const MAX_VALUE_LEN: usize = 0xFF_FFFF;

const TYPE_BINARY: u8 = 0;
const TYPE_TEXT: u8 = 1;
const TYPE_UINT: u8 = 2;

/// Everything that can go wrong while encoding or decoding a frame.
///
/// On the receive side any of these inside a complete frame is fatal for
/// the connection's stream.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("frame ends before the declared content")]
    Truncated,
    #[error("declared length {declared} does not match the frame size {actual}")]
    LengthMismatch { declared: usize, actual: usize },
    #[error("declared frame length {0} is shorter than the fixed header")]
    FrameTooShort(usize),
    #[error("unsupported options byte {0:#04x}")]
    UnsupportedOptions(u8),
    #[error("message id is {0} bytes, limit is 255")]
    MessageIdTooLong(usize),
    #[error("argument key must be 1..=255 bytes, got {0}")]
    BadKeyLength(usize),
    #[error("unknown value type {0}")]
    UnknownValueType(u8),
    #[error("integer value must be 4 bytes, got {0}")]
    BadUintLength(usize),
    #[error("value is {0} bytes, limit is 2^24-1")]
    ValueTooLong(usize),
    #[error("invalid UTF-8 in {0}")]
    InvalidUtf8(&'static str),
}

/// Serialize one message into a complete frame.
pub fn serialize(message_id: &str, args: &Args) -> Result<Vec<u8>, CodecError> {
    let mid = message_id.as_bytes();
    if mid.len() > 255 {
        return Err(CodecError::MessageIdTooLong(mid.len()));
    }

    let mut body: Vec<u8> = Vec::with_capacity(64);
    for (key, value) in args {
        let key_bytes = key.as_bytes();
        if key_bytes.is_empty() || key_bytes.len() > 255 {
            return Err(CodecError::BadKeyLength(key_bytes.len()));
        }
        body.push(key_bytes.len() as u8);
        body.extend_from_slice(key_bytes);
        match value {
            Value::Binary(data) => {
                push_value_header(&mut body, TYPE_BINARY, data.len())?;
                body.extend_from_slice(data);
            }
            Value::Text(text) => {
                push_value_header(&mut body, TYPE_TEXT, text.len())?;
                body.extend_from_slice(text.as_bytes());
            }
            Value::Uint(n) => {
                push_value_header(&mut body, TYPE_UINT, 4)?;
                body.extend_from_slice(&n.to_be_bytes());
            }
        }
    }

    let total = HEADER_LEN + mid.len() + body.len();
    let mut frame = Vec::with_capacity(total);
    frame.extend_from_slice(&(total as u32).to_be_bytes());
    frame.push(OPTIONS_KEY_VALUE);
    frame.push(mid.len() as u8);
    frame.extend_from_slice(mid);
    frame.extend_from_slice(&body);
    Ok(frame)
}

fn push_value_header(body: &mut Vec<u8>, value_type: u8, len: usize) -> Result<(), CodecError> {
    if len > MAX_VALUE_LEN {
        return Err(CodecError::ValueTooLong(len));
    }
    body.push(value_type);
    let len = len as u32;
    body.extend_from_slice(&[(len >> 16) as u8, (len >> 8) as u8, len as u8]);
    Ok(())
}

/// Parse exactly one complete frame. `data` must be the full frame, length
/// word included; the declared length must equal `data.len()`.
pub fn parse_frame(data: &[u8]) -> Result<(String, Args), CodecError> {
    if data.len() < HEADER_LEN {
        return Err(CodecError::Truncated);
    }
    let declared = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
    if declared != data.len() {
        return Err(CodecError::LengthMismatch {
            declared,
            actual: data.len(),
        });
    }
    if data[4] != OPTIONS_KEY_VALUE {
        return Err(CodecError::UnsupportedOptions(data[4]));
    }

    let mut cursor = Cursor {
        data,
        offset: HEADER_LEN,
    };
    let mid_len = data[5] as usize;
    let message_id = utf8(cursor.take(mid_len)?, "message id")?.to_owned();

    let mut args = Args::new();
    while !cursor.at_end() {
        let key_len = cursor.take(1)?[0] as usize;
        if key_len == 0 {
            return Err(CodecError::BadKeyLength(0));
        }
        let key = utf8(cursor.take(key_len)?, "argument key")?.to_owned();
        let value_type = cursor.take(1)?[0];
        let len_bytes = cursor.take(3)?;
        let value_len =
            ((len_bytes[0] as usize) << 16) | ((len_bytes[1] as usize) << 8) | len_bytes[2] as usize;
        let raw = cursor.take(value_len)?;
        let value = match value_type {
            TYPE_BINARY => Value::Binary(raw.to_vec()),
            TYPE_TEXT => Value::Text(utf8(raw, "string value")?.to_owned()),
            TYPE_UINT => {
                if value_len != 4 {
                    return Err(CodecError::BadUintLength(value_len));
                }
                Value::Uint(u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]))
            }
            other => return Err(CodecError::UnknownValueType(other)),
        };
        args.insert(key, value);
    }
    Ok((message_id, args))
}

struct Cursor<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        let end = self
            .offset
            .checked_add(len)
            .ok_or(CodecError::Truncated)?;
        if end > self.data.len() {
            return Err(CodecError::Truncated);
        }
        let slice = &self.data[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    fn at_end(&self) -> bool {
        self.offset >= self.data.len()
    }
}

fn utf8<'a>(raw: &'a [u8], what: &'static str) -> Result<&'a str, CodecError> {
    std::str::from_utf8(raw).map_err(|_| CodecError::InvalidUtf8(what))
}

/// Incremental frame reader for one connection's receive stream.
///
/// Feed raw socket bytes in, pull complete messages out. Frames split
/// across reads and multiple frames delivered in one read both work; a
/// parse error inside a complete frame discards the whole buffer.
#[derive(Debug, Default)]
pub struct FrameParser {
    buffer: BytesMut,
}

impl FrameParser {
    pub fn new() -> Self {
        FrameParser {
            buffer: BytesMut::new(),
        }
    }

    /// Append received bytes to the rolling buffer.
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Try to read the next complete message.
    ///
    /// `Ok(None)` means more bytes are needed. An `Err` leaves the parser
    /// empty; the caller must close the connection.
    pub fn try_next(&mut self) -> Result<Option<(String, Args)>, CodecError> {
        if self.buffer.len() < 4 {
            return Ok(None);
        }
        let declared =
            u32::from_be_bytes([self.buffer[0], self.buffer[1], self.buffer[2], self.buffer[3]])
                as usize;
        if declared < HEADER_LEN {
            self.buffer.clear();
            return Err(CodecError::FrameTooShort(declared));
        }
        if self.buffer.len() < declared {
            return Ok(None);
        }
        let frame = self.buffer.split_to(declared);
        match parse_frame(&frame) {
            Ok(message) => Ok(Some(message)),
            Err(e) => {
                self.buffer.clear();
                Err(e)
            }
        }
    }
}
