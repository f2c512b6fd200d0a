//! Byte-level assembly of small HDF5 files for the integration tests.
//!
//! Objects are laid out bottom-up: children first, so a parent can embed
//! their addresses. The superblock is patched in last.

#![allow(dead_code)]

use std::collections::HashSet;
use std::io::{self, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use cloudhdf5::{Config, MemoryBackend, RangeBackend, Session};
use cloudhdf5_format::checksum::jenkins_lookup3;

pub const UNDEF: u64 = u64::MAX;

const SIGNATURE: [u8; 8] = [0x89, b'H', b'D', b'F', b'\r', b'\n', 0x1a, b'\n'];
const SUPERBLOCK_V0_LEN: usize = 96;
const SUPERBLOCK_V2_LEN: usize = 48;

const MSG_DATASPACE: u16 = 0x0001;
const MSG_LINK_INFO: u16 = 0x0002;
const MSG_DATATYPE: u16 = 0x0003;
const MSG_FILL_VALUE: u16 = 0x0005;
const MSG_LINK: u16 = 0x0006;
const MSG_LAYOUT: u16 = 0x0008;
const MSG_FILTERS: u16 = 0x000B;
const MSG_ATTRIBUTE: u16 = 0x000C;
const MSG_CONTINUATION: u16 = 0x0010;
const MSG_SYMBOL_TABLE: u16 = 0x0011;
const MSG_ATTRIBUTE_INFO: u16 = 0x0015;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Test defaults: small retry delays.
pub fn config() -> Config {
    Config {
        retry_backoff_ms: 1,
        ..Config::default()
    }
}

pub fn open(bytes: Vec<u8>) -> Session {
    init_logging();
    Session::from_bytes(bytes, config()).unwrap()
}

// ---------------------------------------------------------------------------
// Image
// ---------------------------------------------------------------------------

/// A file under construction. Addresses are relative to the superblock.
pub struct Image {
    bytes: Vec<u8>,
    base: usize,
    superblock_len: usize,
}

impl Image {
    pub fn v0() -> Self {
        Self::with_user_block(0, SUPERBLOCK_V0_LEN)
    }

    pub fn v2() -> Self {
        Self::with_user_block(0, SUPERBLOCK_V2_LEN)
    }

    /// `user_block` bytes of unrelated content precede the superblock.
    pub fn with_user_block(user_block: usize, superblock_len: usize) -> Self {
        let mut bytes = vec![0xA5; user_block];
        bytes.resize(user_block + superblock_len, 0);
        Image {
            bytes,
            base: user_block,
            superblock_len,
        }
    }

    /// Append 8-byte aligned; returns the address.
    pub fn put(&mut self, data: &[u8]) -> u64 {
        while (self.bytes.len() - self.base) % 8 != 0 {
            self.bytes.push(0);
        }
        let at = (self.bytes.len() - self.base) as u64;
        self.bytes.extend_from_slice(data);
        at
    }

    /// Reserve `len` zero bytes to be patched later.
    pub fn reserve(&mut self, len: usize) -> u64 {
        self.put(&vec![0; len])
    }

    pub fn patch(&mut self, address: u64, data: &[u8]) {
        let at = self.base + address as usize;
        self.bytes[at..at + data.len()].copy_from_slice(data);
    }

    /// Finish with a version 0 superblock whose root entry points at `root`.
    pub fn finish_v0(mut self, root: u64) -> Vec<u8> {
        assert_eq!(self.superblock_len, SUPERBLOCK_V0_LEN);
        let eof = (self.bytes.len() - self.base) as u64;
        let mut sb = SIGNATURE.to_vec();
        sb.extend_from_slice(&[0, 0, 0, 0, 0, 8, 8, 0]);
        sb.extend_from_slice(&4u16.to_le_bytes());
        sb.extend_from_slice(&16u16.to_le_bytes());
        sb.extend_from_slice(&0u32.to_le_bytes());
        for v in [0, UNDEF, eof, UNDEF, 0, root] {
            sb.extend_from_slice(&v.to_le_bytes());
        }
        sb.extend_from_slice(&[0; 24]);
        assert_eq!(sb.len(), SUPERBLOCK_V0_LEN);
        self.patch(0, &sb);
        self.bytes
    }

    pub fn finish_v2(mut self, root: u64) -> Vec<u8> {
        assert_eq!(self.superblock_len, SUPERBLOCK_V2_LEN);
        let eof = (self.bytes.len() - self.base) as u64;
        let mut sb = SIGNATURE.to_vec();
        sb.extend_from_slice(&[2, 8, 8, 0]);
        for v in [0, UNDEF, eof, root] {
            sb.extend_from_slice(&v.to_le_bytes());
        }
        let sum = jenkins_lookup3(&sb);
        sb.extend_from_slice(&sum.to_le_bytes());
        self.patch(0, &sb);
        self.bytes
    }
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Msg {
    kind: u16,
    data: Vec<u8>,
}

fn u64s(out: &mut Vec<u8>, values: &[u64]) {
    for v in values {
        out.extend_from_slice(&v.to_le_bytes());
    }
}

fn pad8(v: &mut Vec<u8>) {
    while v.len() % 8 != 0 {
        v.push(0);
    }
}

fn dataspace_bytes(dims: &[u64], max: Option<&[u64]>) -> Vec<u8> {
    let mut d = vec![1, dims.len() as u8, u8::from(max.is_some()), 0, 0, 0, 0, 0];
    u64s(&mut d, dims);
    if let Some(max) = max {
        u64s(&mut d, max);
    }
    d
}

pub fn dataspace(dims: &[u64], max: Option<&[u64]>) -> Msg {
    Msg {
        kind: MSG_DATASPACE,
        data: dataspace_bytes(dims, max),
    }
}

/// Version 2 dataspace of the null class: no elements at all.
pub fn null_dataspace() -> Msg {
    Msg {
        kind: MSG_DATASPACE,
        data: vec![2, 0, 0, 2],
    }
}

/// Little-endian IEEE single precision.
pub fn f32_type() -> Vec<u8> {
    let mut d = vec![0x11, 0x20, 0x1f, 0x00];
    d.extend_from_slice(&4u32.to_le_bytes());
    d.extend_from_slice(&0u16.to_le_bytes());
    d.extend_from_slice(&32u16.to_le_bytes());
    d.extend_from_slice(&[23, 8, 0, 23]);
    d.extend_from_slice(&127u32.to_le_bytes());
    d
}

/// Little-endian signed 32-bit integer.
pub fn i32_type() -> Vec<u8> {
    let mut d = vec![0x10, 0x08, 0x00, 0x00];
    d.extend_from_slice(&4u32.to_le_bytes());
    d.extend_from_slice(&0u16.to_le_bytes());
    d.extend_from_slice(&32u16.to_le_bytes());
    d
}

/// Null-terminated ASCII string of `size` bytes.
pub fn string_type(size: u32) -> Vec<u8> {
    let mut d = vec![0x13, 0x00, 0x00, 0x00];
    d.extend_from_slice(&size.to_le_bytes());
    d
}

pub fn datatype(encoded: Vec<u8>) -> Msg {
    Msg {
        kind: MSG_DATATYPE,
        data: encoded,
    }
}

pub fn contiguous(address: u64, size: u64) -> Msg {
    let mut d = vec![3, 1];
    u64s(&mut d, &[address, size]);
    Msg { kind: MSG_LAYOUT, data: d }
}

pub fn compact(data: &[u8]) -> Msg {
    let mut d = vec![3, 0];
    d.extend_from_slice(&(data.len() as u16).to_le_bytes());
    d.extend_from_slice(data);
    Msg { kind: MSG_LAYOUT, data: d }
}

/// Version 3 chunked layout indexed by a v1 B-tree.
pub fn chunked(btree: u64, chunk_dims: &[u32], element_size: u32) -> Msg {
    let mut d = vec![3, 2, chunk_dims.len() as u8 + 1];
    d.extend_from_slice(&btree.to_le_bytes());
    for c in chunk_dims.iter().chain([&element_size]) {
        d.extend_from_slice(&c.to_le_bytes());
    }
    Msg { kind: MSG_LAYOUT, data: d }
}

/// Chunk index of a version 4 chunked layout.
pub enum Index {
    /// One chunk; `filtered` carries its stored size and filter mask.
    Single { address: u64, filtered: Option<(u64, u32)> },
    Implicit(u64),
    FixedArray(u64),
    ExtensibleArray(u64),
    BTreeV2(u64),
}

/// Version 4 chunked layout.
pub fn chunked_v4(chunk_dims: &[u32], element_size: u32, index: Index) -> Msg {
    let flags = match index {
        Index::Single { filtered: Some(_), .. } => 0x02,
        _ => 0,
    };
    let mut d = vec![4, 2, flags, chunk_dims.len() as u8 + 1, 4];
    for c in chunk_dims.iter().chain([&element_size]) {
        d.extend_from_slice(&c.to_le_bytes());
    }
    let address = match index {
        Index::Single { address, filtered } => {
            d.push(1);
            if let Some((size, mask)) = filtered {
                d.extend_from_slice(&size.to_le_bytes());
                d.extend_from_slice(&mask.to_le_bytes());
            }
            address
        }
        Index::Implicit(address) => {
            d.push(2);
            address
        }
        Index::FixedArray(address) => {
            d.extend_from_slice(&[3, 10]);
            address
        }
        Index::ExtensibleArray(address) => {
            d.extend_from_slice(&[4, 32, 2, 2, 2, 10]);
            address
        }
        Index::BTreeV2(address) => {
            d.push(5);
            d.extend_from_slice(&BTREE_V2_NODE_SIZE.to_le_bytes());
            d.extend_from_slice(&[100, 40]);
            address
        }
    };
    d.extend_from_slice(&address.to_le_bytes());
    Msg { kind: MSG_LAYOUT, data: d }
}

pub fn deflate_pipeline(level: u32) -> Msg {
    let mut d = vec![1, 1, 0, 0, 0, 0, 0, 0];
    for v in [1u16, 0, 0, 1] {
        d.extend_from_slice(&v.to_le_bytes());
    }
    d.extend_from_slice(&level.to_le_bytes());
    d.extend_from_slice(&[0; 4]);
    Msg { kind: MSG_FILTERS, data: d }
}

pub fn fill_value(value: &[u8]) -> Msg {
    let mut d = vec![2, 2, 0, 1];
    d.extend_from_slice(&(value.len() as u32).to_le_bytes());
    d.extend_from_slice(value);
    Msg {
        kind: MSG_FILL_VALUE,
        data: d,
    }
}

pub fn hard_link(name: &str, address: u64) -> Msg {
    let mut d = vec![1, 0, name.len() as u8];
    d.extend_from_slice(name.as_bytes());
    d.extend_from_slice(&address.to_le_bytes());
    Msg { kind: MSG_LINK, data: d }
}

pub fn soft_link(name: &str, target: &str) -> Msg {
    let mut d = vec![1, 0x08, 1, name.len() as u8];
    d.extend_from_slice(name.as_bytes());
    d.extend_from_slice(&(target.len() as u16).to_le_bytes());
    d.extend_from_slice(target.as_bytes());
    Msg { kind: MSG_LINK, data: d }
}

pub fn external_link(name: &str, file: &str, object: &str) -> Msg {
    let mut info = vec![0];
    info.extend_from_slice(file.as_bytes());
    info.push(0);
    info.extend_from_slice(object.as_bytes());
    info.push(0);
    let mut d = vec![1, 0x08, 64, name.len() as u8];
    d.extend_from_slice(name.as_bytes());
    d.extend_from_slice(&(info.len() as u16).to_le_bytes());
    d.extend_from_slice(&info);
    Msg { kind: MSG_LINK, data: d }
}

pub fn symbol_table(btree: u64, heap: u64) -> Msg {
    let mut d = Vec::new();
    u64s(&mut d, &[btree, heap]);
    Msg {
        kind: MSG_SYMBOL_TABLE,
        data: d,
    }
}

pub fn link_info(heap: u64, name_index: u64) -> Msg {
    let mut d = vec![0, 0];
    u64s(&mut d, &[heap, name_index]);
    Msg { kind: MSG_LINK_INFO, data: d }
}

pub fn attribute_info(heap: u64, name_index: u64) -> Msg {
    let mut d = vec![0, 0];
    u64s(&mut d, &[heap, name_index]);
    Msg {
        kind: MSG_ATTRIBUTE_INFO,
        data: d,
    }
}

pub fn continuation(address: u64, length: u64) -> Msg {
    let mut d = Vec::new();
    u64s(&mut d, &[address, length]);
    Msg {
        kind: MSG_CONTINUATION,
        data: d,
    }
}

/// Version 1 attribute.
pub fn attribute(name: &str, encoded_type: Vec<u8>, dims: &[u64], raw: &[u8]) -> Msg {
    let space = dataspace_bytes(dims, None);
    let mut d = vec![1, 0];
    for n in [name.len() + 1, encoded_type.len(), space.len()] {
        d.extend_from_slice(&(n as u16).to_le_bytes());
    }
    d.extend_from_slice(name.as_bytes());
    d.push(0);
    pad8(&mut d);
    d.extend_from_slice(&encoded_type);
    pad8(&mut d);
    d.extend_from_slice(&space);
    pad8(&mut d);
    d.extend_from_slice(raw);
    Msg {
        kind: MSG_ATTRIBUTE,
        data: d,
    }
}

/// A scalar string attribute.
pub fn string_attribute(name: &str, value: &str) -> Msg {
    let mut raw = value.as_bytes().to_vec();
    raw.push(0);
    attribute(name, string_type(raw.len() as u32), &[], &raw)
}

// ---------------------------------------------------------------------------
// Object headers
// ---------------------------------------------------------------------------

/// Raw version 1 messages, as stored in a header or continuation block.
pub fn v1_messages(msgs: &[Msg]) -> Vec<u8> {
    let mut out = Vec::new();
    for m in msgs {
        let mut data = m.data.clone();
        pad8(&mut data);
        out.extend_from_slice(&m.kind.to_le_bytes());
        out.extend_from_slice(&(data.len() as u16).to_le_bytes());
        out.extend_from_slice(&[0; 4]);
        out.extend_from_slice(&data);
    }
    out
}

pub fn v1_header(msgs: &[Msg]) -> Vec<u8> {
    let body = v1_messages(msgs);
    let mut out = vec![1, 0];
    out.extend_from_slice(&(msgs.len() as u16).to_le_bytes());
    out.extend_from_slice(&1u32.to_le_bytes());
    out.extend_from_slice(&(body.len() as u32).to_le_bytes());
    out.extend_from_slice(&[0; 4]);
    out.extend_from_slice(&body);
    out
}

/// Version 2 header with a 4-byte chunk size and a valid checksum.
pub fn v2_header(msgs: &[Msg]) -> Vec<u8> {
    let mut body = Vec::new();
    for m in msgs {
        body.push(m.kind as u8);
        body.extend_from_slice(&(m.data.len() as u16).to_le_bytes());
        body.push(0);
        body.extend_from_slice(&m.data);
    }
    let mut out = b"OHDR".to_vec();
    out.extend_from_slice(&[2, 0x02]);
    out.extend_from_slice(&(body.len() as u32).to_le_bytes());
    out.extend_from_slice(&body);
    let sum = jenkins_lookup3(&out);
    out.extend_from_slice(&sum.to_le_bytes());
    out
}

// ---------------------------------------------------------------------------
// Legacy groups
// ---------------------------------------------------------------------------

pub enum Entry<'a> {
    Hard(&'a str, u64),
    Soft(&'a str, &'a str),
}

/// Write a symbol-table group holding `entries`, with `extra` messages
/// (attributes) in its header. Returns the header address.
pub fn legacy_group(img: &mut Image, entries: &[Entry<'_>], extra: &[Msg]) -> u64 {
    // Offset 0 of the heap is the empty name.
    let mut segment = vec![0u8; 8];
    let mut intern = |s: &str| {
        let at = segment.len() as u64;
        segment.extend_from_slice(s.as_bytes());
        segment.push(0);
        pad8(&mut segment);
        at
    };
    let mut records = Vec::new();
    let mut last_name = 0;
    for entry in entries {
        match entry {
            Entry::Hard(name, address) => {
                let at = intern(name);
                last_name = at;
                records.push((at, *address, 0u32, 0u64));
            }
            Entry::Soft(name, target) => {
                let at = intern(name);
                last_name = at;
                let target_at = intern(target);
                records.push((at, UNDEF, 2u32, target_at));
            }
        }
    }
    let segment_at = img.put(&segment);
    let mut heap = b"HEAP".to_vec();
    heap.extend_from_slice(&[0, 0, 0, 0]);
    u64s(&mut heap, &[segment.len() as u64, UNDEF, segment_at]);
    let heap_at = img.put(&heap);

    let mut snod = b"SNOD".to_vec();
    snod.extend_from_slice(&[1, 0]);
    snod.extend_from_slice(&(records.len() as u16).to_le_bytes());
    for (name, address, cache_type, scratch) in records {
        u64s(&mut snod, &[name, address]);
        snod.extend_from_slice(&cache_type.to_le_bytes());
        snod.extend_from_slice(&[0; 4]);
        snod.extend_from_slice(&(scratch as u32).to_le_bytes());
        snod.extend_from_slice(&[0; 12]);
    }
    let snod_at = img.put(&snod);

    let mut tree = b"TREE".to_vec();
    tree.extend_from_slice(&[0, 0]);
    tree.extend_from_slice(&1u16.to_le_bytes());
    u64s(&mut tree, &[UNDEF, UNDEF, 0, snod_at, last_name]);
    let tree_at = img.put(&tree);

    let mut msgs = vec![symbol_table(tree_at, heap_at)];
    msgs.extend_from_slice(extra);
    img.put(&v1_header(&msgs))
}

// ---------------------------------------------------------------------------
// Dense storage
// ---------------------------------------------------------------------------

const HEAP_BLOCK_SIZE: u64 = 512;
const BTREE_V2_NODE_SIZE: u32 = 512;

fn with_checksum(mut block: Vec<u8>) -> Vec<u8> {
    let sum = jenkins_lookup3(&block);
    block.extend_from_slice(&sum.to_le_bytes());
    block
}

/// Write a fractal heap whose root is one direct block holding `objects`.
/// Returns the header address and one managed heap id per object, each
/// `id_len` bytes long.
pub fn fractal_heap(img: &mut Image, id_len: u16, objects: &[Vec<u8>]) -> (u64, Vec<Vec<u8>>) {
    let header_at = img.reserve(146);

    // Signature, version, heap header address, 4-byte block offset.
    let mut block = b"FHDB".to_vec();
    block.push(0);
    u64s(&mut block, &[header_at]);
    block.extend_from_slice(&0u32.to_le_bytes());
    let mut ids = Vec::new();
    for object in objects {
        let mut id = vec![0];
        id.extend_from_slice(&(block.len() as u32).to_le_bytes());
        id.extend_from_slice(&(object.len() as u16).to_le_bytes());
        id.resize(id_len as usize, 0);
        ids.push(id);
        block.extend_from_slice(object);
    }
    assert!(block.len() as u64 <= HEAP_BLOCK_SIZE);
    block.resize(HEAP_BLOCK_SIZE as usize, 0);
    let block_at = img.put(&block);

    let mut h = b"FRHP".to_vec();
    h.push(0);
    h.extend_from_slice(&id_len.to_le_bytes());
    h.extend_from_slice(&0u16.to_le_bytes());
    h.push(0);
    h.extend_from_slice(&4096u32.to_le_bytes());
    h.extend_from_slice(&[0; 56]);
    u64s(&mut h, &[objects.len() as u64]);
    h.extend_from_slice(&[0; 32]);
    h.extend_from_slice(&4u16.to_le_bytes());
    u64s(&mut h, &[HEAP_BLOCK_SIZE, 65536]);
    h.extend_from_slice(&32u16.to_le_bytes());
    h.extend_from_slice(&1u16.to_le_bytes());
    u64s(&mut h, &[block_at]);
    h.extend_from_slice(&0u16.to_le_bytes());
    let h = with_checksum(h);
    assert_eq!(h.len(), 146);
    img.patch(header_at, &h);
    (header_at, ids)
}

/// Write a v2 B-tree of depth 0 holding `records` of `tree_type`.
pub fn btree_v2(img: &mut Image, tree_type: u8, records: &[Vec<u8>]) -> u64 {
    let record_size = records.first().map_or(1, Vec::len);
    let mut leaf = b"BTLF".to_vec();
    leaf.extend_from_slice(&[0, tree_type]);
    for r in records {
        assert_eq!(r.len(), record_size);
        leaf.extend_from_slice(r);
    }
    let mut leaf = with_checksum(leaf);
    assert!(leaf.len() <= BTREE_V2_NODE_SIZE as usize);
    leaf.resize(BTREE_V2_NODE_SIZE as usize, 0);
    let leaf_at = img.put(&leaf);

    let mut h = b"BTHD".to_vec();
    h.extend_from_slice(&[0, tree_type]);
    h.extend_from_slice(&BTREE_V2_NODE_SIZE.to_le_bytes());
    h.extend_from_slice(&(record_size as u16).to_le_bytes());
    h.extend_from_slice(&0u16.to_le_bytes());
    h.extend_from_slice(&[100, 40]);
    u64s(&mut h, &[leaf_at]);
    h.extend_from_slice(&(records.len() as u16).to_le_bytes());
    u64s(&mut h, &[records.len() as u64]);
    img.put(&with_checksum(h))
}

/// Write a new-style group whose links, and attributes when there are
/// any, live in fractal heaps indexed by name. Entries pair each message
/// with its name.
pub fn dense_group(img: &mut Image, links: &[(&str, Msg)], attributes: &[(&str, Msg)]) -> u64 {
    let objects: Vec<Vec<u8>> = links.iter().map(|(_, m)| m.data.clone()).collect();
    let (heap, ids) = fractal_heap(img, 7, &objects);
    let records: Vec<Vec<u8>> = links
        .iter()
        .zip(ids)
        .map(|((name, _), id)| {
            let mut r = jenkins_lookup3(name.as_bytes()).to_le_bytes().to_vec();
            r.extend_from_slice(&id);
            r
        })
        .collect();
    let index = btree_v2(img, 5, &records);
    let mut msgs = vec![link_info(heap, index)];

    if !attributes.is_empty() {
        let objects: Vec<Vec<u8>> = attributes.iter().map(|(_, m)| m.data.clone()).collect();
        let (heap, ids) = fractal_heap(img, 8, &objects);
        let records: Vec<Vec<u8>> = attributes
            .iter()
            .zip(ids)
            .enumerate()
            .map(|(order, ((name, _), id))| {
                let mut r = id;
                r.push(0);
                r.extend_from_slice(&(order as u32).to_le_bytes());
                r.extend_from_slice(&jenkins_lookup3(name.as_bytes()).to_le_bytes());
                r
            })
            .collect();
        let index = btree_v2(img, 8, &records);
        msgs.push(attribute_info(heap, index));
    }
    img.put(&v2_header(&msgs))
}

// ---------------------------------------------------------------------------
// Chunks
// ---------------------------------------------------------------------------

pub struct StoredChunk {
    /// Element offsets of the chunk's first element.
    pub offsets: Vec<u64>,
    pub address: u64,
    pub size: u32,
    pub filter_mask: u32,
}

/// Write a single-leaf v1 B-tree indexing `chunks`.
pub fn chunk_btree(img: &mut Image, dims: &[u64], chunks: &[StoredChunk]) -> u64 {
    let mut tree = b"TREE".to_vec();
    tree.extend_from_slice(&[1, 0]);
    tree.extend_from_slice(&(chunks.len() as u16).to_le_bytes());
    u64s(&mut tree, &[UNDEF, UNDEF]);
    for c in chunks {
        tree.extend_from_slice(&c.size.to_le_bytes());
        tree.extend_from_slice(&c.filter_mask.to_le_bytes());
        u64s(&mut tree, &c.offsets);
        u64s(&mut tree, &[0, c.address]);
    }
    tree.extend_from_slice(&[0; 8]);
    u64s(&mut tree, dims);
    u64s(&mut tree, &[0]);
    img.put(&tree)
}

/// Write an unpaged fixed array of filtered chunk entries, one per chunk
/// in row-major order; `None` marks a chunk never written.
pub fn fixed_array(img: &mut Image, chunks: &[Option<&StoredChunk>]) -> u64 {
    let header_at = img.reserve(28);
    let mut block = b"FADB".to_vec();
    block.extend_from_slice(&[0, 1]);
    u64s(&mut block, &[header_at]);
    for chunk in chunks {
        match chunk {
            Some(c) => {
                u64s(&mut block, &[c.address]);
                block.extend_from_slice(&c.size.to_le_bytes());
                block.extend_from_slice(&c.filter_mask.to_le_bytes());
            }
            None => block.extend_from_slice(&[0xFF; 16]),
        }
    }
    let block_at = img.put(&with_checksum(block));

    let mut h = b"FAHD".to_vec();
    h.extend_from_slice(&[0, 1, 16, 10]);
    u64s(&mut h, &[chunks.len() as u64, block_at]);
    img.patch(header_at, &with_checksum(h));
    header_at
}

/// Write an extensible array of unfiltered chunk addresses with two
/// elements in the index block and the rest in data blocks of two.
/// Matches the creation parameters `chunked_v4` records.
pub fn extensible_array(img: &mut Image, addresses: &[u64]) -> u64 {
    assert!(addresses.len() <= 4);
    let header_at = img.reserve(72);
    let slot = |i: usize| addresses.get(i).copied().unwrap_or(UNDEF);

    let mut data_block = UNDEF;
    if addresses.len() > 2 {
        let mut b = b"EADB".to_vec();
        b.extend_from_slice(&[0, 0]);
        u64s(&mut b, &[header_at]);
        b.extend_from_slice(&2u32.to_le_bytes());
        u64s(&mut b, &[slot(2), slot(3)]);
        data_block = img.put(&with_checksum(b));
    }

    // Two data block slots and thirty super block slots follow the
    // elements.
    let mut ib = b"EAIB".to_vec();
    ib.extend_from_slice(&[0, 0]);
    u64s(&mut ib, &[header_at, slot(0), slot(1), data_block, UNDEF]);
    u64s(&mut ib, &[UNDEF; 30]);
    let index_at = img.put(&with_checksum(ib));

    let mut h = b"EAHD".to_vec();
    h.extend_from_slice(&[0, 0, 8, 32, 2, 2, 2, 10]);
    h.extend_from_slice(&[0; 32]);
    u64s(&mut h, &[addresses.len() as u64, addresses.len() as u64, index_at]);
    img.patch(header_at, &with_checksum(h));
    header_at
}

pub fn deflate(data: &[u8]) -> Vec<u8> {
    let mut enc = flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
    enc.write_all(data).unwrap();
    enc.finish().unwrap()
}

pub fn f32_bytes(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

pub fn i32_bytes(values: &[i32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Row-major 2-D values of a `rows` x `cols` grid, `value(r, c)` each.
pub fn grid_values(rows: u64, cols: u64, value: impl Fn(u64, u64) -> f32) -> Vec<f32> {
    (0..rows).flat_map(|r| (0..cols).map(move |c| (r, c))).map(|(r, c)| value(r, c)).collect()
}

/// Extract the `[r0, r0 + h) x [c0, c0 + w)` block of a row-major grid.
pub fn block(values: &[f32], cols: u64, r0: u64, c0: u64, h: u64, w: u64) -> Vec<f32> {
    (r0..r0 + h)
        .flat_map(|r| (c0..c0 + w).map(move |c| (r, c)))
        .map(|(r, c)| values[(r * cols + c) as usize])
        .collect()
}

/// Write every `chunk` x `chunk` block of a square grid, deflated when
/// `compress` is set, skipping the chunks `keep` rejects.
pub fn write_chunks(
    img: &mut Image,
    values: &[f32],
    side: u64,
    chunk: u64,
    compress: bool,
    keep: impl Fn(u64, u64) -> bool,
) -> Vec<StoredChunk> {
    let mut out = Vec::new();
    for r in (0..side).step_by(chunk as usize) {
        for c in (0..side).step_by(chunk as usize) {
            if !keep(r / chunk, c / chunk) {
                continue;
            }
            let raw = f32_bytes(&block(values, side, r, c, chunk, chunk));
            let stored = if compress { deflate(&raw) } else { raw };
            let address = img.put(&stored);
            out.push(StoredChunk {
                offsets: vec![r, c],
                address,
                size: stored.len() as u32,
                filter_mask: 0,
            });
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

pub const COUNTS: [i32; 6] = [3, 1, 4, 1, 5, 9];
pub const GRID_SIDE: u64 = 4;
pub const SPARSE_FILL: f32 = -1.0;

pub fn grid_value(r: u64, c: u64) -> f32 {
    (r * GRID_SIDE + c) as f32 * 1.5
}

/// A version 0 file with symbol-table groups:
///
/// ```text
/// /              title = "legacy fixture"
/// /counts        i32[6] contiguous, units = "m"
/// /grid          f32[4,4] chunked 2x2, deflate
/// /sparse        f32[4,4] chunked 2x2, chunks (0,0) and (1,1) stored, fill -1
/// /sub/flags     i32[3] compact
/// /sub/alias     soft link to /counts
/// ```
pub struct Legacy {
    pub bytes: Vec<u8>,
    pub counts_data: u64,
    pub grid_chunks: Vec<u64>,
    pub root: u64,
}

pub fn legacy_file() -> Legacy {
    legacy_file_with_user_block(0)
}

pub fn legacy_file_with_user_block(user_block: usize) -> Legacy {
    let mut img = Image::with_user_block(user_block, SUPERBLOCK_V0_LEN);

    let counts_data = img.put(&i32_bytes(&COUNTS));
    let counts = img.put(&v1_header(&[
        dataspace(&[6], None),
        datatype(i32_type()),
        contiguous(counts_data, 24),
        string_attribute("units", "m"),
    ]));

    let values = grid_values(GRID_SIDE, GRID_SIDE, grid_value);
    let chunks = write_chunks(&mut img, &values, GRID_SIDE, 2, true, |_, _| true);
    let grid_chunks = chunks.iter().map(|c| c.address).collect();
    let grid_tree = chunk_btree(&mut img, &[GRID_SIDE, GRID_SIDE], &chunks);
    let grid = img.put(&v1_header(&[
        dataspace(&[GRID_SIDE, GRID_SIDE], None),
        datatype(f32_type()),
        deflate_pipeline(6),
        chunked(grid_tree, &[2, 2], 4),
    ]));

    let chunks = write_chunks(&mut img, &values, GRID_SIDE, 2, false, |r, c| r == c);
    let sparse_tree = chunk_btree(&mut img, &[GRID_SIDE, GRID_SIDE], &chunks);
    let sparse = img.put(&v1_header(&[
        dataspace(&[GRID_SIDE, GRID_SIDE], None),
        datatype(f32_type()),
        fill_value(&SPARSE_FILL.to_le_bytes()),
        chunked(sparse_tree, &[2, 2], 4),
    ]));

    let flags = img.put(&v1_header(&[
        dataspace(&[3], None),
        datatype(i32_type()),
        compact(&i32_bytes(&[7, 8, 9])),
    ]));
    let sub = legacy_group(&mut img, &[Entry::Hard("flags", flags), Entry::Soft("alias", "/counts")], &[]);

    let root = legacy_group(
        &mut img,
        &[
            Entry::Hard("counts", counts),
            Entry::Hard("grid", grid),
            Entry::Hard("sparse", sparse),
            Entry::Hard("sub", sub),
        ],
        &[string_attribute("title", "legacy fixture")],
    );
    Legacy {
        bytes: img.finish_v0(root),
        counts_data,
        grid_chunks,
        root,
    }
}

/// A version 2 file with compact link storage:
///
/// ```text
/// /a        i32[3] compact
/// /b        f32[2] compact
/// /x        hard link to /a, preceded by a soft link x -> /b
/// /g/a2     hard link to /a
/// /g/up     soft link to ../b
/// /loop     soft link to itself
/// /dangling soft link to a missing path
/// /ext      external link
/// ```
pub struct Modern {
    pub bytes: Vec<u8>,
    pub a: u64,
    pub b: u64,
}

pub fn modern_file() -> Modern {
    let mut img = Image::v2();
    let a = img.put(&v2_header(&[
        dataspace(&[3], None),
        datatype(i32_type()),
        compact(&i32_bytes(&[10, 20, 30])),
    ]));
    let b = img.put(&v2_header(&[
        dataspace(&[2], None),
        datatype(f32_type()),
        compact(&f32_bytes(&[0.5, 0.25])),
    ]));
    let g = img.put(&v2_header(&[hard_link("a2", a), soft_link("up", "../b")]));
    let root = img.put(&v2_header(&[
        soft_link("x", "/b"),
        hard_link("a", a),
        hard_link("b", b),
        hard_link("x", a),
        hard_link("g", g),
        soft_link("loop", "/loop"),
        soft_link("dangling", "/nowhere"),
        external_link("ext", "other.h5", "/data"),
    ]));
    Modern {
        bytes: img.finish_v2(root),
        a,
        b,
    }
}

/// A version 2 file whose root keeps links and attributes in dense
/// storage, with the grid of [`grid_value`] stored under every version 4
/// chunk index:
///
/// ```text
/// /             title = "indexed fixture", version = i32[2]
/// /reference    f32[4,4] contiguous
/// /single       f32[4,4] one 4x4 chunk
/// /packed       f32[4,4] one deflated 4x4 chunk
/// /implicit     f32[4,4] 2x2 chunks back to back
/// /fixed        f32[4,4] deflated 2x2 chunks in a fixed array, (1,1) unwritten, fill -1
/// /extensible   f32[4,4] rows unlimited, 2x2 chunks in an extensible array
/// /btree        f32[4,4] 2x2 chunks in a v2 B-tree, (0,1) unwritten, fill -1
/// /alias        soft link to /reference
/// ```
pub const INDEXED_VARIABLES: [&str; 7] = ["btree", "extensible", "fixed", "implicit", "packed", "reference", "single"];

/// The grid with chunk `(r, c)` of the 2x2 chunking replaced by fill.
pub fn grid_without_chunk(r: u64, c: u64) -> Vec<f32> {
    grid_values(GRID_SIDE, GRID_SIDE, |i, j| {
        if i / 2 == r && j / 2 == c {
            SPARSE_FILL
        } else {
            grid_value(i, j)
        }
    })
}

pub fn indexed_file() -> Vec<u8> {
    let mut img = Image::v2();
    let values = grid_values(GRID_SIDE, GRID_SIDE, grid_value);
    let raw = f32_bytes(&values);
    let space = || dataspace(&[GRID_SIDE, GRID_SIDE], None);

    let reference_data = img.put(&raw);
    let reference = img.put(&v2_header(&[
        space(),
        datatype(f32_type()),
        contiguous(reference_data, raw.len() as u64),
    ]));

    let single_data = img.put(&raw);
    let single = img.put(&v2_header(&[
        space(),
        datatype(f32_type()),
        chunked_v4(&[4, 4], 4, Index::Single {
            address: single_data,
            filtered: None,
        }),
    ]));

    let packed_bytes = deflate(&raw);
    let packed_data = img.put(&packed_bytes);
    let packed = img.put(&v2_header(&[
        space(),
        datatype(f32_type()),
        deflate_pipeline(6),
        chunked_v4(&[4, 4], 4, Index::Single {
            address: packed_data,
            filtered: Some((packed_bytes.len() as u64, 0)),
        }),
    ]));

    let mut run = Vec::new();
    for r in [0, 2] {
        for c in [0, 2] {
            run.extend(f32_bytes(&block(&values, GRID_SIDE, r, c, 2, 2)));
        }
    }
    let implicit_data = img.put(&run);
    let implicit = img.put(&v2_header(&[
        space(),
        datatype(f32_type()),
        chunked_v4(&[2, 2], 4, Index::Implicit(implicit_data)),
    ]));

    let chunks = write_chunks(&mut img, &values, GRID_SIDE, 2, true, |r, c| (r, c) != (1, 1));
    let slots = [Some(&chunks[0]), Some(&chunks[1]), Some(&chunks[2]), None];
    let fixed_index = fixed_array(&mut img, &slots);
    let fixed = img.put(&v2_header(&[
        space(),
        datatype(f32_type()),
        deflate_pipeline(6),
        fill_value(&SPARSE_FILL.to_le_bytes()),
        chunked_v4(&[2, 2], 4, Index::FixedArray(fixed_index)),
    ]));

    let chunks = write_chunks(&mut img, &values, GRID_SIDE, 2, false, |_, _| true);
    let addresses: Vec<u64> = chunks.iter().map(|c| c.address).collect();
    let extensible_index = extensible_array(&mut img, &addresses);
    let extensible = img.put(&v2_header(&[
        dataspace(&[GRID_SIDE, GRID_SIDE], Some(&[UNDEF, GRID_SIDE])),
        datatype(f32_type()),
        chunked_v4(&[2, 2], 4, Index::ExtensibleArray(extensible_index)),
    ]));

    let chunks = write_chunks(&mut img, &values, GRID_SIDE, 2, false, |r, c| (r, c) != (0, 1));
    let records: Vec<Vec<u8>> = chunks
        .iter()
        .map(|c| {
            let mut r = Vec::new();
            u64s(&mut r, &[c.address, c.offsets[0] / 2, c.offsets[1] / 2]);
            r
        })
        .collect();
    let btree_index = btree_v2(&mut img, 10, &records);
    let btree = img.put(&v2_header(&[
        space(),
        datatype(f32_type()),
        fill_value(&SPARSE_FILL.to_le_bytes()),
        chunked_v4(&[2, 2], 4, Index::BTreeV2(btree_index)),
    ]));

    let root = dense_group(
        &mut img,
        &[
            ("alias", soft_link("alias", "/reference")),
            ("btree", hard_link("btree", btree)),
            ("extensible", hard_link("extensible", extensible)),
            ("fixed", hard_link("fixed", fixed)),
            ("implicit", hard_link("implicit", implicit)),
            ("packed", hard_link("packed", packed)),
            ("reference", hard_link("reference", reference)),
            ("single", hard_link("single", single)),
        ],
        &[
            ("title", string_attribute("title", "indexed fixture")),
            ("version", attribute("version", i32_type(), &[2], &i32_bytes(&[1, 14]))),
        ],
    );
    img.finish_v2(root)
}

/// Header continuation chain that returns to its first block.
pub fn cycle_file() -> Vec<u8> {
    let mut img = Image::v0();
    let first = img.reserve(16 + 8 + 16);
    let second_body = v1_messages(&[continuation(first + 16, 24)]);
    let second = img.put(&second_body);
    img.patch(first, &v1_header(&[continuation(second, second_body.len() as u64)]));
    let root = legacy_group(&mut img, &[Entry::Hard("looped", first)], &[]);
    img.finish_v0(root)
}

// ---------------------------------------------------------------------------
// Backends
// ---------------------------------------------------------------------------

/// Memory backend that counts reads and fails or shortens the ones
/// starting at selected offsets.
pub struct FaultyBackend {
    inner: MemoryBackend,
    fail_at: Mutex<HashSet<u64>>,
    truncate_at: Mutex<HashSet<u64>>,
    reads: AtomicU64,
}

impl FaultyBackend {
    pub fn new(bytes: Vec<u8>) -> Arc<Self> {
        Arc::new(FaultyBackend {
            inner: MemoryBackend::new(bytes),
            fail_at: Mutex::new(HashSet::new()),
            truncate_at: Mutex::new(HashSet::new()),
            reads: AtomicU64::new(0),
        })
    }

    /// Fail every read that starts at byte `offset`.
    pub fn fail_reads_at(&self, offset: u64) {
        self.fail_at.lock().unwrap().insert(offset);
    }

    /// Answer every read that starts at byte `offset` one byte short.
    pub fn truncate_reads_at(&self, offset: u64) {
        self.truncate_at.lock().unwrap().insert(offset);
    }

    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }
}

impl RangeBackend for FaultyBackend {
    fn read_range(&self, offset: u64, len: u64) -> io::Result<Vec<u8>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.fail_at.lock().unwrap().contains(&offset) {
            return Err(io::Error::new(io::ErrorKind::ConnectionReset, "injected failure"));
        }
        let mut bytes = self.inner.read_range(offset, len)?;
        if self.truncate_at.lock().unwrap().contains(&offset) {
            bytes.pop();
        }
        Ok(bytes)
    }

    fn size(&self) -> io::Result<u64> {
        self.inner.size()
    }

    fn describe(&self) -> String {
        "faulty".to_string()
    }
}
