//! Length-prefixed framing for ZooKeeper packets.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::constants::{DEFAULT_MAX_PACKET_SIZE, SIZE_OF_LENGTH_FIELD};
use crate::error::{Result, ZkError};

/// Codec that splits a byte stream into packets.
///
/// Every packet is a 4-byte big-endian length followed by that many bytes.
/// Decoded items are the payload without the prefix; encoded items are
/// payloads that get a prefix prepended.
#[derive(Debug, Clone)]
pub struct PacketCodec {
    max_packet_size: usize,
}

impl PacketCodec {
    /// Creates a codec with the default packet size limit.
    pub fn new() -> Self {
        Self::with_max_packet_size(DEFAULT_MAX_PACKET_SIZE)
    }

    /// Creates a codec that rejects packets longer than `max_packet_size`.
    pub fn with_max_packet_size(max_packet_size: usize) -> Self {
        Self { max_packet_size }
    }

    /// Returns the packet size limit.
    pub fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }
}

impl Default for PacketCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Encoder<BytesMut> for PacketCodec {
    type Error = ZkError;

    fn encode(&mut self, item: BytesMut, dst: &mut BytesMut) -> Result<()> {
        if item.len() > self.max_packet_size {
            return Err(ZkError::MalformedRecord(format!(
                "packet of {} bytes exceeds limit of {}",
                item.len(),
                self.max_packet_size
            )));
        }
        dst.reserve(SIZE_OF_LENGTH_FIELD + item.len());
        dst.put_i32(item.len() as i32);
        dst.extend_from_slice(&item);
        Ok(())
    }
}

impl Decoder for PacketCodec {
    type Item = BytesMut;
    type Error = ZkError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if src.len() < SIZE_OF_LENGTH_FIELD {
            return Ok(None);
        }

        let length = i32::from_be_bytes([src[0], src[1], src[2], src[3]]);
        if length < 0 {
            return Err(ZkError::MalformedRecord(format!(
                "negative packet length: {}",
                length
            )));
        }
        let length = length as usize;
        if length > self.max_packet_size {
            return Err(ZkError::MalformedRecord(format!(
                "packet of {} bytes exceeds limit of {}",
                length, self.max_packet_size
            )));
        }

        let total = SIZE_OF_LENGTH_FIELD + length;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        src.advance(SIZE_OF_LENGTH_FIELD);
        Ok(Some(src.split_to(length)))
    }
}
