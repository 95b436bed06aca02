//! Record codec: one event → one length-delimited binary record.
//!
//! Layout, all integers big-endian:
//!
//! ```text
//! u16 routing-key length │ routing-key bytes │ i64 timestamp (epoch ms)
//! │ u32 payload length │ payload (bincode)
//! ```
//!
//! Records are self-delimiting, so a batch body is a plain concatenation
//! and [`decode_records`] walks it back without any outer framing.

use bytes::{Buf, BufMut};
use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;

use crate::buffer_pool::{BufferPool, PooledBuffer};
use crate::error::{Error, Result};

const KEY_LEN_FIELD: usize = 2;
const TIMESTAMP_FIELD: usize = 8;
const PAYLOAD_LEN_FIELD: usize = 4;

/// One serialized event, held in a pooled buffer.
///
/// The buffer travels with the record (serializer → partition → batch) and
/// returns to the arena when the record drops, on every outcome.
pub struct Record {
    buf: PooledBuffer,
    key_len: usize,
}

impl Record {
    /// The routing key this record was pushed under.
    pub fn routing_key(&self) -> &str {
        std::str::from_utf8(&self.buf[KEY_LEN_FIELD..KEY_LEN_FIELD + self.key_len])
            .unwrap_or_default()
    }

    /// Encoded length in bytes.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// The full encoded record.
    pub fn as_bytes(&self) -> &[u8] {
        self.buf.as_ref()
    }
}

impl std::fmt::Debug for Record {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Record")
            .field("routing_key", &self.routing_key())
            .field("len", &self.len())
            .finish()
    }
}

/// Serialize one event into a record drawn from the arena.
///
/// Rejects with [`Error::RecordTooLarge`] before any buffer is acquired
/// when the encoded length would exceed `max_record_size`, and with
/// [`Error::CapacityExceeded`] when the arena refuses a buffer. Pure with
/// respect to client state; runs on the caller's thread.
pub fn serialize_record<T: Serialize>(
    pool: &BufferPool,
    routing_key: &str,
    timestamp: DateTime<Utc>,
    event: &T,
    max_record_size: usize,
) -> Result<Record> {
    let payload_len = bincode::serialized_size(event)? as usize;
    let key_len = routing_key.len();
    let encoded = KEY_LEN_FIELD + key_len + TIMESTAMP_FIELD + PAYLOAD_LEN_FIELD + payload_len;

    if encoded > max_record_size
        || key_len > u16::MAX as usize
        || payload_len > u32::MAX as usize
    {
        return Err(Error::RecordTooLarge {
            size: encoded,
            max: max_record_size,
        });
    }

    let mut buf = pool
        .acquire(encoded)
        .ok_or(Error::CapacityExceeded { requested: encoded })?;

    buf.put_u16(key_len as u16);
    buf.put_slice(routing_key.as_bytes());
    buf.put_i64(timestamp.timestamp_millis());
    buf.put_u32(payload_len as u32);
    bincode::serialize_into((&mut *buf).writer(), event)?;
    debug_assert_eq!(buf.len(), encoded);

    Ok(Record { buf, key_len })
}

/// A record read back out of a batch body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedRecord {
    pub routing_key: String,
    pub timestamp_millis: i64,
    pub payload: Vec<u8>,
}

impl DecodedRecord {
    /// Timestamp as a UTC datetime (millisecond precision).
    pub fn timestamp(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.timestamp_millis)
            .single()
            .unwrap_or_default()
    }
}

/// Walk a concatenation of records back into decoded form.
pub fn decode_records(mut body: &[u8]) -> Result<Vec<DecodedRecord>> {
    let total = body.len();
    let mut records = Vec::new();

    while !body.is_empty() {
        let offset = total - body.len();
        let malformed = Error::MalformedRecord { offset };

        if body.len() < KEY_LEN_FIELD {
            return Err(malformed);
        }
        let key_len = body.get_u16() as usize;
        if body.len() < key_len + TIMESTAMP_FIELD + PAYLOAD_LEN_FIELD {
            return Err(malformed);
        }
        let routing_key = std::str::from_utf8(&body[..key_len])
            .map_err(|_| Error::MalformedRecord { offset })?
            .to_string();
        body.advance(key_len);
        let timestamp_millis = body.get_i64();
        let payload_len = body.get_u32() as usize;
        if body.len() < payload_len {
            return Err(Error::MalformedRecord { offset });
        }
        let payload = body[..payload_len].to_vec();
        body.advance(payload_len);

        records.push(DecodedRecord {
            routing_key,
            timestamp_millis,
            payload,
        });
    }

    Ok(records)
}
