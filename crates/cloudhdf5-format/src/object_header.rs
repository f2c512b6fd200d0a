//! Object header blocks (versions 1 and 2) and the messages they carry.
//!
//! An object header is stored as a first block followed by any number of
//! continuation blocks. This module decodes one block at a time: the caller
//! fetches the first block using [`HeaderPrefix`], collects continuation
//! messages, and fetches each continuation block in turn. Tracking which
//! blocks were already visited is the caller's responsibility.

use crate::error::FormatError;
use crate::message_type::MessageType;
use crate::read::ByteReader;

pub const OHDR_SIGNATURE: [u8; 4] = *b"OHDR";
pub const OCHK_SIGNATURE: [u8; 4] = *b"OCHK";

/// Message flag: the message is shared and `data` holds a reference to it.
pub const MSG_FLAG_SHARED: u8 = 0x02;
/// Message flag: readers that do not understand the type must fail.
pub const MSG_FLAG_FAIL_IF_UNKNOWN: u8 = 0x80;

/// Header flag (v2): messages carry a 2-byte creation order.
const HDR_FLAG_CREATION_ORDER: u8 = 0x04;
/// Header flag (v2): attribute phase-change values stored.
const HDR_FLAG_PHASE_CHANGE: u8 = 0x10;
/// Header flag (v2): access/modification/change/birth times stored.
const HDR_FLAG_TIMES: u8 = 0x20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderMessage {
    pub msg_type: MessageType,
    pub flags: u8,
    pub data: Vec<u8>,
}

impl HeaderMessage {
    pub fn is_shared(&self) -> bool {
        self.flags & MSG_FLAG_SHARED != 0
    }
}

/// Layout of an object header's first block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderPrefix {
    pub version: u8,
    /// Header flags; always zero for version 1.
    pub flags: u8,
    /// Offset of the first message within the block.
    pub messages_start: usize,
    /// Offset just past the last message byte (before any checksum).
    pub messages_end: usize,
}

impl HeaderPrefix {
    /// Bytes that always cover the largest possible prefix.
    pub const FIRST_READ_LEN: usize = 4 + 1 + 1 + 16 + 4 + 8;

    /// Decode the prefix from bytes starting at the object header address.
    pub fn parse(data: &[u8]) -> Result<HeaderPrefix, FormatError> {
        let mut r = ByteReader::new(data);
        if data.len() >= 4 && data[..4] == OHDR_SIGNATURE {
            r.skip(4)?;
            let version = r.u8()?;
            if version != 2 {
                return Err(FormatError::UnsupportedVersion {
                    structure: "object header",
                    version,
                });
            }
            let flags = r.u8()?;
            if flags & HDR_FLAG_TIMES != 0 {
                r.skip(16)?;
            }
            if flags & HDR_FLAG_PHASE_CHANGE != 0 {
                r.skip(4)?;
            }
            let chunk0_size = r.uint(1 << (flags & 0x03))? as usize;
            let messages_start = r.position();
            Ok(HeaderPrefix {
                version,
                flags,
                messages_start,
                messages_end: messages_start + chunk0_size,
            })
        } else {
            let version = r.u8()?;
            if version != 1 {
                return Err(FormatError::UnsupportedVersion {
                    structure: "object header",
                    version,
                });
            }
            // reserved(1) + message count(2) + reference count(4)
            r.skip(7)?;
            let size = r.u32()? as usize;
            // Messages are 8-byte aligned after the 12-byte prefix.
            Ok(HeaderPrefix {
                version,
                flags: 0,
                messages_start: 16,
                messages_end: 16 + size,
            })
        }
    }

    /// Total length of the first block, including the v2 checksum.
    pub fn block_len(&self) -> usize {
        if self.version == 2 {
            self.messages_end + 4
        } else {
            self.messages_end
        }
    }

    /// Decode the messages of the first block.
    pub fn messages(&self, block: &[u8]) -> Result<Vec<HeaderMessage>, FormatError> {
        if block.len() < self.block_len() {
            return Err(FormatError::UnexpectedEof {
                expected: self.block_len(),
                available: block.len(),
            });
        }
        parse_messages(
            &block[..self.messages_end],
            self.messages_start,
            self.version,
            self.flags,
        )
    }

    /// Decode the messages of a continuation block of `block.len()` bytes.
    pub fn continuation_messages(&self, block: &[u8]) -> Result<Vec<HeaderMessage>, FormatError> {
        if self.version == 2 {
            let mut r = ByteReader::new(block);
            r.signature(&OCHK_SIGNATURE, "object header continuation")?;
            if block.len() < 8 {
                return Err(FormatError::UnexpectedEof {
                    expected: 8,
                    available: block.len(),
                });
            }
            parse_messages(&block[..block.len() - 4], 4, self.version, self.flags)
        } else {
            parse_messages(block, 0, self.version, self.flags)
        }
    }
}

fn parse_messages(
    body: &[u8],
    start: usize,
    version: u8,
    header_flags: u8,
) -> Result<Vec<HeaderMessage>, FormatError> {
    let mut r = ByteReader::at(body, start);
    let mut messages = Vec::new();
    let msg_header_len = if version == 1 {
        8
    } else if header_flags & HDR_FLAG_CREATION_ORDER != 0 {
        6
    } else {
        4
    };

    // Trailing gaps shorter than a message header are padding.
    while r.remaining() >= msg_header_len {
        let (raw_type, size, flags) = if version == 1 {
            let t = r.u16()?;
            let s = r.u16()? as usize;
            let f = r.u8()?;
            r.skip(3)?;
            (t, s, f)
        } else {
            let t = r.u8()? as u16;
            let s = r.u16()? as usize;
            let f = r.u8()?;
            if header_flags & HDR_FLAG_CREATION_ORDER != 0 {
                r.skip(2)?;
            }
            (t, s, f)
        };
        let data = r.bytes(size)?;
        if version == 1 {
            let pad = (8 - size % 8) % 8;
            r.skip(pad.min(r.remaining()))?;
        }

        let msg_type = MessageType::from_u16(raw_type);
        if matches!(msg_type, MessageType::Unknown(_)) && flags & MSG_FLAG_FAIL_IF_UNKNOWN != 0 {
            return Err(FormatError::UnsupportedMessage(raw_type));
        }
        if msg_type == MessageType::Nil {
            continue;
        }
        messages.push(HeaderMessage {
            msg_type,
            flags,
            data: data.to_vec(),
        });
    }
    Ok(messages)
}

/// Continuation message (type 0x0010): where the next header block lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Continuation {
    pub address: u64,
    pub length: u64,
}

impl Continuation {
    pub fn parse(data: &[u8], offset_size: u8, length_size: u8) -> Result<Continuation, FormatError> {
        let mut r = ByteReader::new(data);
        let address = r.offset(offset_size)?;
        let length = r.length(length_size)?;
        Ok(Continuation { address, length })
    }
}

/// Reference carried by a shared message in place of its content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SharedMessage {
    /// The content is the first message of the same type in another object header.
    ObjectHeader(u64),
    /// The content lives in the shared object header message heap.
    SharedHeap,
}

impl SharedMessage {
    pub fn parse(data: &[u8], offset_size: u8) -> Result<SharedMessage, FormatError> {
        let mut r = ByteReader::new(data);
        let version = r.u8()?;
        let kind = r.u8()?;
        match version {
            1 => {
                r.skip(6)?;
                Ok(SharedMessage::ObjectHeader(r.offset(offset_size)?))
            }
            2 => Ok(SharedMessage::ObjectHeader(r.offset(offset_size)?)),
            3 if kind == 1 => Ok(SharedMessage::SharedHeap),
            3 => Ok(SharedMessage::ObjectHeader(r.offset(offset_size)?)),
            v => Err(FormatError::UnsupportedVersion {
                structure: "shared message",
                version: v,
            }),
        }
    }
}

/// All messages of one object, assembled from every header block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectHeader {
    pub version: u8,
    pub messages: Vec<HeaderMessage>,
}

impl ObjectHeader {
    pub fn find(&self, msg_type: MessageType) -> Option<&HeaderMessage> {
        self.messages.iter().find(|m| m.msg_type == msg_type)
    }

    pub fn find_all(&self, msg_type: MessageType) -> impl Iterator<Item = &HeaderMessage> {
        self.messages.iter().filter(move |m| m.msg_type == msg_type)
    }

    pub fn has(&self, msg_type: MessageType) -> bool {
        self.find(msg_type).is_some()
    }
}
