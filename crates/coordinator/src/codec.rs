// Copyright 2024 tison <wander4096@gmail.com>
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Versioned binary key/value codec for offsets-topic records.
//!
//! Every serialized key or value begins with a big-endian `u16` schema
//! version; dispatch is on that field, never on a type tag carried
//! out-of-band. This is the same compaction-friendly shape as Kafka's
//! `__consumer_offsets` record format: the key is stable per logical entity
//! so the log compactor retains only the latest value.

use std::collections::BTreeMap;
use std::io;
use std::io::Cursor;
use std::io::Read;

use byteorder::BigEndian;
use byteorder::ReadBytesExt;
use byteorder::WriteBytesExt;

use crate::error::CodecError;

/// Sentinel `expireTimestamp` meaning "derive it from `commitTimestamp +
/// retentionMs`". Fixed and must be preserved bit-exactly; an implementer
/// must not invent a different value.
pub const DEFAULT_TIMESTAMP: i64 = -1;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OffsetKey {
    pub group: String,
    pub topic: String,
    pub partition: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupKey {
    pub group: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OffsetValue {
    pub offset: i64,
    pub metadata: String,
    pub commit_timestamp: i64,
    pub expire_timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberMetadata {
    pub member_id: String,
    pub client_id: String,
    pub client_host: String,
    pub session_timeout_ms: i32,
    pub subscription: Vec<u8>,
    pub assignment: Vec<u8>,
}

/// The decoded payload of a group value record, before the group id (which
/// lives in the key, not the value) is attached by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupValueRecord {
    pub protocol_type: Option<String>,
    pub generation_id: i32,
    pub protocol: Option<String>,
    pub leader_id: Option<String>,
    pub members: BTreeMap<String, MemberMetadata>,
}

pub enum DecodedKey {
    Offset(OffsetKey),
    Group(GroupKey),
}

fn read_str<R: Read>(r: &mut R) -> Result<String, CodecError> {
    let len = r.read_i16::<BigEndian>()?;
    if len < 0 {
        return Err(CodecError::Malformed(format!(
            "negative string length {len}"
        )));
    }
    let mut buf = vec![0u8; len as usize];
    r.read_exact(&mut buf)?;
    String::from_utf8(buf).map_err(|e| CodecError::Malformed(e.to_string()))
}

fn write_str<W: WriteBytesExt>(w: &mut W, s: &str) -> io::Result<()> {
    let bytes = s.as_bytes();
    let len: i16 = bytes
        .len()
        .try_into()
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "string too long to encode"))?;
    w.write_i16::<BigEndian>(len)?;
    w.write_all(bytes)
}

fn read_bytes<R: Read>(r: &mut R) -> Result<Vec<u8>, CodecError> {
    let len = r.read_i32::<BigEndian>()?;
    if len < 0 {
        return Err(CodecError::Malformed(format!("negative bytes length {len}")));
    }
    let mut buf = vec![0u8; len as usize];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

fn write_bytes<W: WriteBytesExt>(w: &mut W, bytes: &[u8]) -> io::Result<()> {
    let len: i32 = bytes
        .len()
        .try_into()
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "bytes too long to encode"))?;
    w.write_i32::<BigEndian>(len)?;
    w.write_all(bytes)
}

/// A group's `leaderId`/`protocol`/`protocolType` are optional before the
/// first rebalance completes. The wire format has no null-string marker in
/// this simplified envelope, so the empty string is the "absent" sentinel on
/// the wire, same as real `__consumer_offsets` records use for a group
/// without an elected leader yet.
fn write_optional_str<W: WriteBytesExt>(w: &mut W, s: &Option<String>) -> io::Result<()> {
    write_str(w, s.as_deref().unwrap_or(""))
}

fn read_optional_str<R: Read>(r: &mut R) -> Result<Option<String>, CodecError> {
    let s = read_str(r)?;
    Ok(if s.is_empty() { None } else { Some(s) })
}

pub fn decode_key(buf: &[u8]) -> Result<DecodedKey, CodecError> {
    let mut cur = Cursor::new(buf);
    let version = cur.read_u16::<BigEndian>()?;
    match version {
        0 | 1 => Ok(DecodedKey::Offset(OffsetKey {
            group: read_str(&mut cur)?,
            topic: read_str(&mut cur)?,
            partition: cur.read_i32::<BigEndian>()?,
        })),
        2 => Ok(DecodedKey::Group(GroupKey {
            group: read_str(&mut cur)?,
        })),
        other => Err(CodecError::UnsupportedVersion(other)),
    }
}

/// Writers always emit the latest key version for their kind (1 for
/// offsets, 2 for groups); reading accepts the older offset key version (0)
/// too since it has an identical wire shape.
pub fn encode_offset_key(key: &OffsetKey) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.write_u16::<BigEndian>(1).unwrap();
    write_str(&mut buf, &key.group).unwrap();
    write_str(&mut buf, &key.topic).unwrap();
    buf.write_i32::<BigEndian>(key.partition).unwrap();
    buf
}

pub fn encode_group_key(key: &GroupKey) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.write_u16::<BigEndian>(2).unwrap();
    write_str(&mut buf, &key.group).unwrap();
    buf
}

/// Decodes an offset value, normalizing `expire_timestamp` per schema
/// version: `v0` records have none and derive it from
/// `commit_timestamp + retention_ms`; `v1` records carry it explicitly but
/// may use [`DEFAULT_TIMESTAMP`] to ask for the same derivation.
pub fn decode_offset_value(buf: &[u8], retention_ms: i64) -> Result<OffsetValue, CodecError> {
    let mut cur = Cursor::new(buf);
    let version = cur.read_u16::<BigEndian>()?;
    match version {
        0 => {
            let offset = cur.read_i64::<BigEndian>()?;
            let metadata = read_str(&mut cur)?;
            let timestamp = cur.read_i64::<BigEndian>()?;
            Ok(OffsetValue {
                offset,
                metadata,
                commit_timestamp: timestamp,
                expire_timestamp: timestamp + retention_ms,
            })
        }
        1 => {
            let offset = cur.read_i64::<BigEndian>()?;
            let metadata = read_str(&mut cur)?;
            let commit_timestamp = cur.read_i64::<BigEndian>()?;
            let expire_timestamp = cur.read_i64::<BigEndian>()?;
            let expire_timestamp = if expire_timestamp == DEFAULT_TIMESTAMP {
                commit_timestamp + retention_ms
            } else {
                expire_timestamp
            };
            Ok(OffsetValue {
                offset,
                metadata,
                commit_timestamp,
                expire_timestamp,
            })
        }
        other => Err(CodecError::UnsupportedVersion(other)),
    }
}

/// Writers always emit `v1`, with the already-normalized `expire_timestamp`.
pub fn encode_offset_value(value: &OffsetValue) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.write_u16::<BigEndian>(1).unwrap();
    buf.write_i64::<BigEndian>(value.offset).unwrap();
    write_str(&mut buf, &value.metadata).unwrap();
    buf.write_i64::<BigEndian>(value.commit_timestamp).unwrap();
    buf.write_i64::<BigEndian>(value.expire_timestamp).unwrap();
    buf
}

fn read_member<R: Read>(r: &mut R) -> Result<(String, MemberMetadata), CodecError> {
    let member_id = read_str(r)?;
    let client_id = read_str(r)?;
    let client_host = read_str(r)?;
    let session_timeout_ms = r.read_i32::<BigEndian>()?;
    let subscription = read_bytes(r)?;
    let assignment = read_bytes(r)?;
    Ok((
        member_id.clone(),
        MemberMetadata {
            member_id,
            client_id,
            client_host,
            session_timeout_ms,
            subscription,
            assignment,
        },
    ))
}

fn write_member<W: WriteBytesExt>(w: &mut W, member: &MemberMetadata) -> io::Result<()> {
    write_str(w, &member.member_id)?;
    write_str(w, &member.client_id)?;
    write_str(w, &member.client_host)?;
    w.write_i32::<BigEndian>(member.session_timeout_ms)?;
    write_bytes(w, &member.subscription)?;
    write_bytes(w, &member.assignment)
}

/// Decodes a group value. Accepts `v0` (the format writers emit) and `v3`,
/// a forward-compatibility variant that appends a trailing
/// `current_state_timestamp: i64` after the member list; the extra field is
/// discarded on read since nothing in this core's data model carries it.
/// `v3` is decode-only: this codec never writes it.
pub fn decode_group_value(buf: &[u8]) -> Result<GroupValueRecord, CodecError> {
    let mut cur = Cursor::new(buf);
    let version = cur.read_u16::<BigEndian>()?;
    match version {
        0 | 3 => {
            let protocol_type = read_optional_str(&mut cur)?;
            let generation_id = cur.read_i32::<BigEndian>()?;
            let protocol = read_optional_str(&mut cur)?;
            let leader_id = read_optional_str(&mut cur)?;
            let member_count = cur.read_i32::<BigEndian>()?;
            if member_count < 0 {
                return Err(CodecError::Malformed(format!(
                    "negative member count {member_count}"
                )));
            }
            let mut members = BTreeMap::new();
            for _ in 0..member_count {
                let (member_id, member) = read_member(&mut cur)?;
                members.insert(member_id, member);
            }
            if version == 3 {
                let _current_state_timestamp = cur.read_i64::<BigEndian>()?;
            }
            Ok(GroupValueRecord {
                protocol_type,
                generation_id,
                protocol,
                leader_id,
                members,
            })
        }
        other => Err(CodecError::UnsupportedVersion(other)),
    }
}

pub fn encode_group_value(record: &GroupValueRecord) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.write_u16::<BigEndian>(0).unwrap();
    write_optional_str(&mut buf, &record.protocol_type).unwrap();
    buf.write_i32::<BigEndian>(record.generation_id).unwrap();
    write_optional_str(&mut buf, &record.protocol).unwrap();
    write_optional_str(&mut buf, &record.leader_id).unwrap();
    buf.write_i32::<BigEndian>(record.members.len() as i32)
        .unwrap();
    for member in record.members.values() {
        write_member(&mut buf, member).unwrap();
    }
    buf
}
