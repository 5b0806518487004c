//! Length-prefixed frame codec.
//!
//! ```text
//! [u32 len][u32 source][u32 status][u32 pairCount]
//!   pairCount x ([i32 keyLen][i32 valueLen | -1][key bytes][value bytes])
//! ```
//!
//! All integers are big-endian. `len` counts every byte after itself.

use crate::message::{KeyValue, Message};
use crate::status::{Source, StatusType};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Largest accepted value of the length prefix.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

const LEN_PREFIX: usize = 4;
const HEADER_LEN: usize = 12;
const PAIR_HEADER_LEN: usize = 8;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("frame of {0} bytes exceeds the {MAX_FRAME_LEN} byte limit")]
    FrameTooLarge(usize),
    #[error("unknown source ordinal {0}")]
    UnknownSource(u32),
    #[error("unknown status ordinal {0}")]
    UnknownStatus(u32),
    #[error("negative length {0}")]
    NegativeLength(i32),
    #[error("malformed frame: {0}")]
    Malformed(String),
    #[error("invalid UTF-8 in frame: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// `tokio_util` codec for [`Message`] frames.
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameCodec;

fn encoded_len(msg: &Message) -> usize {
    HEADER_LEN
        + msg
            .pairs
            .iter()
            .map(|kv| {
                PAIR_HEADER_LEN + kv.key.len() + kv.value.as_ref().map(|v| v.len()).unwrap_or(0)
            })
            .sum::<usize>()
}

impl Encoder<Message> for FrameCodec {
    type Error = CodecError;

    fn encode(&mut self, msg: Message, dst: &mut BytesMut) -> Result<(), CodecError> {
        <Self as Encoder<&Message>>::encode(self, &msg, dst)
    }
}

impl<'a> Encoder<&'a Message> for FrameCodec {
    type Error = CodecError;

    fn encode(&mut self, msg: &'a Message, dst: &mut BytesMut) -> Result<(), CodecError> {
        let len = encoded_len(msg);
        if len > MAX_FRAME_LEN {
            return Err(CodecError::FrameTooLarge(len));
        }
        dst.reserve(LEN_PREFIX + len);
        dst.put_u32(len as u32);
        dst.put_u32(msg.source.ordinal());
        dst.put_u32(msg.status.ordinal());
        dst.put_u32(msg.pairs.len() as u32);
        for kv in &msg.pairs {
            dst.put_i32(kv.key.len() as i32);
            match &kv.value {
                Some(v) => dst.put_i32(v.len() as i32),
                None => dst.put_i32(-1),
            }
            dst.put_slice(kv.key.as_bytes());
            if let Some(v) = &kv.value {
                dst.put_slice(v.as_bytes());
            }
        }
        Ok(())
    }
}

impl Decoder for FrameCodec {
    type Item = Message;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>, CodecError> {
        if src.len() < LEN_PREFIX {
            return Ok(None);
        }
        let len = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if len > MAX_FRAME_LEN {
            return Err(CodecError::FrameTooLarge(len));
        }
        if src.len() < LEN_PREFIX + len {
            src.reserve(LEN_PREFIX + len - src.len());
            return Ok(None);
        }
        src.advance(LEN_PREFIX);
        let body = src.split_to(len).freeze();
        decode_body(body).map(Some)
    }
}

fn take_len(body: &mut Bytes) -> Result<i32, CodecError> {
    if body.remaining() < 4 {
        return Err(CodecError::Malformed("truncated pair header".into()));
    }
    Ok(body.get_i32())
}

fn take_string(body: &mut Bytes, len: usize) -> Result<String, CodecError> {
    if body.remaining() < len {
        return Err(CodecError::Malformed(format!(
            "pair wants {} bytes, {} left",
            len,
            body.remaining()
        )));
    }
    Ok(String::from_utf8(body.split_to(len).to_vec())?)
}

fn decode_body(mut body: Bytes) -> Result<Message, CodecError> {
    if body.remaining() < HEADER_LEN {
        return Err(CodecError::Malformed(format!(
            "header needs {} bytes, got {}",
            HEADER_LEN,
            body.remaining()
        )));
    }
    let source_raw = body.get_u32();
    let source = Source::from_ordinal(source_raw).ok_or(CodecError::UnknownSource(source_raw))?;
    let status_raw = body.get_u32();
    let status =
        StatusType::from_ordinal(status_raw).ok_or(CodecError::UnknownStatus(status_raw))?;
    let count = body.get_u32() as usize;
    if count > body.remaining() / PAIR_HEADER_LEN {
        return Err(CodecError::Malformed(format!(
            "{} pairs cannot fit in {} bytes",
            count,
            body.remaining()
        )));
    }

    let mut pairs = Vec::with_capacity(count);
    for _ in 0..count {
        let key_len = take_len(&mut body)?;
        let val_len = take_len(&mut body)?;
        if key_len < 0 {
            return Err(CodecError::NegativeLength(key_len));
        }
        if val_len < -1 {
            return Err(CodecError::NegativeLength(val_len));
        }
        let key = take_string(&mut body, key_len as usize)?;
        let value = if val_len == -1 {
            None
        } else {
            Some(take_string(&mut body, val_len as usize)?)
        };
        pairs.push(KeyValue { key, value });
    }

    if body.has_remaining() {
        return Err(CodecError::Malformed(format!(
            "{} trailing bytes after last pair",
            body.remaining()
        )));
    }

    Ok(Message {
        source,
        status,
        pairs,
    })
}

/// Encode one message into a standalone buffer.
pub fn encode_frame(msg: &Message) -> Result<Bytes, CodecError> {
    let mut buf = BytesMut::new();
    FrameCodec.encode(msg, &mut buf)?;
    Ok(buf.freeze())
}
