//! Resolving the object graph: headers, groups, variables and attributes.
//!
//! Every structure is fetched on demand through the session's metadata
//! cache. Object headers and resolved nodes are memoised by Address, so a
//! name reached twice, through any path, yields the same [`Node`].

use std::borrow::Cow;
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::Arc;

use cloudhdf5_format::attribute::{AttributeInfoMessage, AttributeMessage};
use cloudhdf5_format::btree_v1::BTreeV1Node;
use cloudhdf5_format::btree_v2::{
    AttributeNameRecord, BTreeV2Header, BTreeV2Node, LinkNameRecord, RECORD_ATTRIBUTE_NAME, RECORD_LINK_NAME,
};
use cloudhdf5_format::checksum::verify_trailing;
use cloudhdf5_format::data_layout::DataLayout;
use cloudhdf5_format::data_read;
use cloudhdf5_format::dataspace::Dataspace;
use cloudhdf5_format::datatype::Datatype;
use cloudhdf5_format::fill_value::FillValue;
use cloudhdf5_format::filter_pipeline::FilterPipeline;
use cloudhdf5_format::fractal_heap::{BlockStep, FractalHeapHeader, HeapId};
use cloudhdf5_format::link_info::LinkInfoMessage;
use cloudhdf5_format::link_message::{LinkMessage, LinkTarget};
use cloudhdf5_format::local_heap::{read_string, LocalHeap};
use cloudhdf5_format::message_type::MessageType;
use cloudhdf5_format::object_header::{Continuation, HeaderMessage, HeaderPrefix, ObjectHeader, SharedMessage};
use cloudhdf5_format::symbol_table::{SymbolTableEntry, SymbolTableMessage, SymbolTableNode};
use cloudhdf5_format::FormatError;
use log::debug;
use serde::Serialize;

use crate::error::{Context, Error, Result};
use crate::session::Inner;
use crate::types::{Array, DType};

/// Header blocks one object may span.
const MAX_HEADER_BLOCKS: usize = 4096;
/// Indirect blocks between a fractal heap root and a direct block.
const MAX_HEAP_DEPTH: usize = 32;
/// Entries read with the first fetch of a symbol table node.
const SNOD_FIRST_READ_ENTRIES: usize = 16;
/// Keys read with the first fetch of a v1 B-tree node.
const BTREE_V1_FIRST_READ_ENTRIES: usize = 32;

/// A resolved group or variable.
#[derive(Debug)]
pub(crate) struct Node {
    pub(crate) address: u64,
    pub(crate) kind: NodeKind,
    pub(crate) attributes: BTreeMap<String, Array>,
}

#[derive(Debug)]
pub(crate) enum NodeKind {
    Group(GroupNode),
    Variable(VariableNode),
}

/// Links of a group, by name.
#[derive(Debug, Default)]
pub(crate) struct GroupNode {
    pub(crate) links: BTreeMap<String, LinkTarget>,
}

#[derive(Debug)]
pub(crate) struct VariableNode {
    pub(crate) dataspace: Dataspace,
    pub(crate) datatype: Datatype,
    pub(crate) dtype: DType,
    pub(crate) layout: DataLayout,
    pub(crate) filters: FilterPipeline,
    pub(crate) fill: FillValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ObjectKind {
    Group,
    Variable,
}

/// One entry of a tree walk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WalkEntry {
    pub path: String,
    pub kind: ObjectKind,
    /// Object header Address.
    pub address: u64,
}

// ---------------------------------------------------------------------------
// Object headers
// ---------------------------------------------------------------------------

/// The object header at `address`, assembled once per session.
pub(crate) fn header(inner: &Inner, address: u64) -> Result<Arc<ObjectHeader>> {
    inner.ensure_open()?;
    inner.headers.get_or_try_init(&address, || assemble_header(inner, address))
}

fn continuations(inner: &Inner, messages: &[HeaderMessage]) -> std::result::Result<Vec<Continuation>, FormatError> {
    messages
        .iter()
        .filter(|m| m.msg_type == MessageType::Continuation)
        .map(|m| Continuation::parse(&m.data, inner.offset_size(), inner.length_size()))
        .collect()
}

/// Follow the continuation chain of one object header.
///
/// Each block Address may be visited once; a chain that returns to a
/// visited block is a `ContinuationCycle`.
fn assemble_header(inner: &Inner, address: u64) -> Result<ObjectHeader> {
    let what = || format!("object header at {address:#x}");
    let start = inner.absolute(address).context(what)?;
    let head = inner.read_clamped(start, HeaderPrefix::FIRST_READ_LEN as u64).context(what)?;
    let prefix = HeaderPrefix::parse(&head).context(what)?;
    let block = inner.read(start, prefix.block_len() as u64).context(what)?;
    if prefix.version == 2 && inner.verify() {
        verify_trailing(&block, "object header").context(what)?;
    }
    let mut messages = prefix.messages(&block).context(what)?;

    let mut visited = HashSet::from([address, address + prefix.messages_start as u64]);
    let mut pending: VecDeque<Continuation> = continuations(inner, &messages).context(what)?.into();
    while let Some(cont) = pending.pop_front() {
        if !visited.insert(cont.address) {
            return Err(FormatError::ContinuationCycle(cont.address)).context(what);
        }
        if visited.len() > MAX_HEADER_BLOCKS {
            return Err(FormatError::Malformed(format!("more than {MAX_HEADER_BLOCKS} header blocks"))).context(what);
        }
        let at = inner.absolute(cont.address).context(what)?;
        let block = inner.read(at, cont.length).context(what)?;
        if prefix.version == 2 && inner.verify() {
            verify_trailing(&block, "object header continuation").context(what)?;
        }
        let more = prefix.continuation_messages(&block).context(what)?;
        pending.extend(continuations(inner, &more).context(what)?);
        messages.extend(more);
    }
    debug!(
        "object header v{} at {address:#x}: {} messages in {} blocks",
        prefix.version,
        messages.len(),
        visited.len() - 1
    );
    Ok(ObjectHeader {
        version: prefix.version,
        messages,
    })
}

/// Content of a message, following it to another header when shared.
fn message_bytes<'a>(inner: &Inner, message: &'a HeaderMessage) -> Result<Cow<'a, [u8]>> {
    if !message.is_shared() {
        return Ok(Cow::Borrowed(&message.data));
    }
    match SharedMessage::parse(&message.data, inner.offset_size())? {
        SharedMessage::ObjectHeader(address) => {
            let target = header(inner, address)?;
            let found = target.find(message.msg_type).ok_or_else(|| {
                FormatError::Malformed(format!("shared {:?} message missing at {address:#x}", message.msg_type))
            })?;
            if found.is_shared() {
                return Err(FormatError::Malformed(format!("shared message at {address:#x} is itself shared")).into());
            }
            Ok(Cow::Owned(found.data.clone()))
        }
        SharedMessage::SharedHeap => {
            Err(FormatError::UnsupportedRead("messages in the shared object header message heap".into()).into())
        }
    }
}

fn required<'a>(header: &'a ObjectHeader, msg_type: MessageType) -> Result<&'a HeaderMessage> {
    header
        .find(msg_type)
        .ok_or_else(|| FormatError::Malformed(format!("variable without a {msg_type:?} message")).into())
}

// ---------------------------------------------------------------------------
// Nodes
// ---------------------------------------------------------------------------

/// The group or variable at `address`, resolved once per session.
pub(crate) fn node(inner: &Inner, address: u64) -> Result<Arc<Node>> {
    inner.ensure_open()?;
    inner.nodes.get_or_try_init(&address, || build_node(inner, address))
}

fn build_node(inner: &Inner, address: u64) -> Result<Node> {
    let what = || format!("object at {address:#x}");
    let header = header(inner, address)?;
    let attributes = if inner.config.enable_attributes {
        attributes(inner, &header).context(what)?
    } else {
        BTreeMap::new()
    };
    // Layout messages only appear in dataset headers.
    let kind = if header.has(MessageType::DataLayout) {
        NodeKind::Variable(variable_node(inner, &header).context(what)?)
    } else {
        NodeKind::Group(GroupNode {
            links: links(inner, &header).context(what)?,
        })
    };
    Ok(Node {
        address,
        kind,
        attributes,
    })
}

fn variable_node(inner: &Inner, header: &ObjectHeader) -> Result<VariableNode> {
    let (os, ls) = (inner.offset_size(), inner.length_size());
    let dataspace = Dataspace::parse(&message_bytes(inner, required(header, MessageType::Dataspace)?)?, ls)?;
    let (datatype, _) = Datatype::parse(&message_bytes(inner, required(header, MessageType::Datatype)?)?)?;
    let layout = DataLayout::parse(&message_bytes(inner, required(header, MessageType::DataLayout)?)?, os, ls)?;
    if let DataLayout::Chunked(chunked) = &layout {
        if chunked.chunk_dims.len() != dataspace.rank() {
            return Err(FormatError::Malformed(format!(
                "chunks of rank {} in a dataspace of rank {}",
                chunked.chunk_dims.len(),
                dataspace.rank()
            ))
            .into());
        }
        if chunked.element_size != datatype.size() {
            return Err(FormatError::Malformed(format!(
                "chunk element size {} for a {}-byte datatype",
                chunked.element_size,
                datatype.size()
            ))
            .into());
        }
    }
    let filters = match header.find(MessageType::FilterPipeline) {
        Some(m) => FilterPipeline::parse(&message_bytes(inner, m)?)?,
        None => FilterPipeline::default(),
    };
    let fill = if let Some(m) = header.find(MessageType::FillValue) {
        FillValue::parse(&message_bytes(inner, m)?)?
    } else if let Some(m) = header.find(MessageType::FillValueOld) {
        FillValue::parse_old(&message_bytes(inner, m)?)?
    } else {
        FillValue::default()
    };
    Ok(VariableNode {
        dtype: DType::from_datatype(&datatype),
        dataspace,
        datatype,
        layout,
        filters,
        fill,
    })
}

// ---------------------------------------------------------------------------
// Links
// ---------------------------------------------------------------------------

fn is_hard(target: &LinkTarget) -> bool {
    matches!(target, LinkTarget::Hard { .. })
}

/// Fold links from every storage form into one name map. A hard link
/// replaces a non-hard link of the same name and is never replaced itself.
fn merge_links(found: Vec<(String, LinkTarget)>) -> BTreeMap<String, LinkTarget> {
    let mut by_name = BTreeMap::new();
    for (name, target) in found {
        match by_name.entry(name) {
            Entry::Vacant(e) => {
                e.insert(target);
            }
            Entry::Occupied(mut e) => {
                if !is_hard(e.get()) && is_hard(&target) {
                    e.insert(target);
                } else {
                    debug!("duplicate link {:?} ignored", e.key());
                }
            }
        }
    }
    by_name
}

fn links(inner: &Inner, header: &ObjectHeader) -> Result<BTreeMap<String, LinkTarget>> {
    let os = inner.offset_size();
    let mut found = Vec::new();
    for m in header.find_all(MessageType::Link) {
        let link = LinkMessage::parse(&m.data, os)?;
        found.push((link.name, link.target));
    }
    if let Some(m) = header.find(MessageType::LinkInfo) {
        let info = LinkInfoMessage::parse(&m.data, os)?;
        if info.is_dense() {
            found.extend(dense_links(inner, &info)?);
        }
    }
    if let Some(m) = header.find(MessageType::SymbolTable) {
        let table = SymbolTableMessage::parse(&m.data, os)?;
        found.extend(legacy_links(inner, &table)?);
    }
    Ok(merge_links(found))
}

fn dense_links(inner: &Inner, info: &LinkInfoMessage) -> Result<Vec<(String, LinkTarget)>> {
    let (Some(heap_address), Some(index_address)) = (info.fractal_heap_address, info.btree_name_index_address)
    else {
        return Ok(Vec::new());
    };
    let heap = fractal_heap_header(inner, heap_address)?;
    let (index, records) = btree_v2_records(inner, index_address)?;
    if index.tree_type != RECORD_LINK_NAME {
        return Err(FormatError::Malformed(format!("link name index of record type {}", index.tree_type)).into());
    }
    records
        .iter()
        .map(|raw| {
            let record = LinkNameRecord::parse(raw)?;
            let bytes = heap_object(inner, &heap, &record.heap_id)?;
            let link = LinkMessage::parse(&bytes, inner.offset_size())?;
            Ok((link.name, link.target))
        })
        .collect()
}

fn legacy_links(inner: &Inner, table: &SymbolTableMessage) -> Result<Vec<(String, LinkTarget)>> {
    let (os, ls) = (inner.offset_size(), inner.length_size());
    let heap_at = inner.absolute(table.local_heap_address)?;
    let heap = inner.read_structure(
        heap_at,
        LocalHeap::header_len(os, ls),
        || format!("local heap at {:#x}", table.local_heap_address),
        |b| LocalHeap::parse(b, os, ls),
    )?;
    let segment = inner.read(inner.absolute(heap.data_segment_address)?, heap.data_segment_size)?;

    let leaves = btree_v1_leaves(inner, table.btree_address, cloudhdf5_format::btree_v1::NODE_TYPE_GROUP, 0)?;
    let snods: Vec<u64> = leaves.iter().flat_map(|n| n.children.iter().copied()).collect();
    let nodes = inner.fan_out(&snods, |&address| {
        let at = inner.absolute(address)?;
        inner.read_structure(
            at,
            SymbolTableNode::HEADER_LEN + SNOD_FIRST_READ_ENTRIES * SymbolTableEntry::encoded_len(os),
            || format!("symbol table node at {address:#x}"),
            |b| SymbolTableNode::parse(b, os),
        )
    })?;

    let mut out = Vec::new();
    for entry in nodes.iter().flat_map(|n| &n.entries) {
        let name = read_string(&segment, entry.link_name_offset)?;
        let target = match entry.soft_link_offset() {
            Some(offset) => LinkTarget::Soft {
                target_path: read_string(&segment, offset)?,
            },
            None => LinkTarget::Hard {
                object_header_address: entry.object_header_address,
            },
        };
        out.push((name, target));
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Attributes
// ---------------------------------------------------------------------------

fn decode_attribute(attr: &AttributeMessage) -> std::result::Result<Array, FormatError> {
    let n = attr
        .dataspace
        .num_elements()
        .checked_mul(attr.datatype.size() as u64)
        .ok_or_else(|| FormatError::Malformed(format!("attribute {} too large", attr.name)))?;
    let raw = usize::try_from(n)
        .ok()
        .and_then(|n| attr.raw_data.get(..n))
        .ok_or(FormatError::SizeMismatch {
            expected: n,
            actual: attr.raw_data.len() as u64,
        })?;
    Ok(Array::new(attr.dataspace.dimensions.clone(), data_read::decode(raw, &attr.datatype)?))
}

/// Decoded attributes of an object. Attributes whose values this reader
/// cannot decode are left out.
fn attributes(inner: &Inner, header: &ObjectHeader) -> Result<BTreeMap<String, Array>> {
    let mut messages = Vec::new();
    for m in header.find_all(MessageType::Attribute) {
        if m.is_shared() {
            debug!("skipping shared attribute message");
            continue;
        }
        match AttributeMessage::parse(&m.data, inner.length_size()) {
            Ok(a) => messages.push(a),
            Err(e) => debug!("skipping attribute: {e}"),
        }
    }
    if let Some(m) = header.find(MessageType::AttributeInfo) {
        let info = AttributeInfoMessage::parse(&m.data, inner.offset_size())?;
        if info.is_dense() {
            messages.extend(dense_attributes(inner, &info)?);
        }
    }
    let mut out = BTreeMap::new();
    for attr in messages {
        match decode_attribute(&attr) {
            Ok(value) => {
                out.insert(attr.name, value);
            }
            Err(e) => debug!("attribute {:?} not decoded: {e}", attr.name),
        }
    }
    Ok(out)
}

fn dense_attributes(inner: &Inner, info: &AttributeInfoMessage) -> Result<Vec<AttributeMessage>> {
    let (Some(heap_address), Some(index_address)) = (info.fractal_heap_address, info.btree_name_index_address)
    else {
        return Ok(Vec::new());
    };
    let heap = fractal_heap_header(inner, heap_address)?;
    let (index, records) = btree_v2_records(inner, index_address)?;
    if index.tree_type != RECORD_ATTRIBUTE_NAME {
        return Err(FormatError::Malformed(format!("attribute name index of record type {}", index.tree_type)).into());
    }
    let mut out = Vec::with_capacity(records.len());
    for raw in &records {
        let record = AttributeNameRecord::parse(raw)?;
        let bytes = heap_object(inner, &heap, &record.heap_id)?;
        match AttributeMessage::parse(&bytes, inner.length_size()) {
            Ok(a) => out.push(a),
            Err(e) => debug!("skipping dense attribute: {e}"),
        }
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Heaps and trees
// ---------------------------------------------------------------------------

fn fractal_heap_header(inner: &Inner, address: u64) -> Result<FractalHeapHeader> {
    let (os, ls) = (inner.offset_size(), inner.length_size());
    let verify = inner.verify();
    inner.read_structure(
        inner.absolute(address)?,
        FractalHeapHeader::max_len(os, ls),
        || format!("fractal heap at {address:#x}"),
        |b| FractalHeapHeader::parse(b, os, ls, verify),
    )
}

/// Bytes of one object stored in a fractal heap.
fn heap_object(inner: &Inner, heap: &FractalHeapHeader, id: &[u8]) -> Result<Vec<u8>> {
    let (os, ls) = (inner.offset_size(), inner.length_size());
    let (offset, length) = match heap.decode_id(id)? {
        HeapId::Tiny(bytes) => return Ok(bytes),
        HeapId::Managed { offset, length } => (offset, length),
    };
    let mut step = heap.root_step()?;
    for _ in 0..MAX_HEAP_DEPTH {
        match step {
            BlockStep::Direct { address, block_offset } => {
                let within = offset.checked_sub(block_offset).ok_or_else(|| {
                    FormatError::Malformed(format!("heap offset {offset} before its block at {block_offset}"))
                })?;
                return inner.read(inner.absolute(address)? + within, length);
            }
            BlockStep::Indirect { address, rows, .. } => {
                let len = heap.indirect_block_len(rows, os, ls);
                let bytes = inner.read(inner.absolute(address)?, len as u64)?;
                let block = heap
                    .parse_indirect(&bytes, rows, os, ls, inner.verify())
                    .context(|| format!("fractal heap indirect block at {address:#x}"))?;
                step = heap.child_step(&block, offset)?;
            }
        }
    }
    Err(FormatError::Malformed("fractal heap nested too deeply".into()).into())
}

/// Every record of a v2 B-tree, reading each level's nodes concurrently.
pub(crate) fn btree_v2_records(inner: &Inner, address: u64) -> Result<(BTreeV2Header, Vec<Vec<u8>>)> {
    let (os, ls) = (inner.offset_size(), inner.length_size());
    let verify = inner.verify();
    let header = inner.read_structure(
        inner.absolute(address)?,
        BTreeV2Header::encoded_len(os, ls),
        || format!("v2 B-tree header at {address:#x}"),
        |b| BTreeV2Header::parse(b, os, ls, verify),
    )?;
    let mut records = Vec::with_capacity(header.total_records as usize);
    if header.is_empty() {
        return Ok((header, records));
    }
    let mut level = vec![(header.root_address, header.depth, header.root_records)];
    while !level.is_empty() {
        let nodes = inner.fan_out(&level, |&(node_address, depth, count)| {
            let bytes = inner.read_clamped(inner.absolute(node_address)?, header.node_size as u64)?;
            BTreeV2Node::parse(&bytes, &header, depth, count, os, verify)
                .context(|| format!("v2 B-tree node at {node_address:#x}"))
        })?;
        let mut next = Vec::new();
        for (&(_, depth, _), node) in level.iter().zip(nodes) {
            records.extend(node.records);
            if depth > 0 {
                next.extend(node.children.iter().map(|c| (c.address, depth - 1, c.records)));
            }
        }
        level = next;
    }
    debug!("v2 B-tree at {address:#x}: {} records", records.len());
    Ok((header, records))
}

/// Leaf nodes of a v1 B-tree, reading each level's nodes concurrently.
///
/// `rank` is the dataset rank for chunk trees and zero for group trees.
pub(crate) fn btree_v1_leaves(inner: &Inner, address: u64, node_type: u8, rank: usize) -> Result<Vec<BTreeV1Node>> {
    let (os, ls) = (inner.offset_size(), inner.length_size());
    let first_read = BTreeV1Node::header_len(os) + BTREE_V1_FIRST_READ_ENTRIES * (8 + 8 * (rank + 1) + os as usize);
    let mut leaves = Vec::new();
    let mut level: Vec<(u64, Option<u8>)> = vec![(address, None)];
    let mut visited = HashSet::new();
    while !level.is_empty() {
        for &(a, _) in &level {
            if !visited.insert(a) {
                return Err(FormatError::Malformed(format!("v1 B-tree node {a:#x} reached twice")).into());
            }
        }
        let nodes = inner.fan_out(&level, |&(node_address, expected_level)| {
            let what = || format!("v1 B-tree node at {node_address:#x}");
            let node = inner.read_structure(inner.absolute(node_address)?, first_read, what, |b| {
                BTreeV1Node::parse(b, os, ls, rank)
            })?;
            if node.node_type != node_type {
                return Err(Error::from(FormatError::Malformed(format!(
                    "v1 B-tree node type {} where {node_type} expected",
                    node.node_type
                ))))
                .context(what);
            }
            if let Some(expected) = expected_level.filter(|&l| l != node.level) {
                return Err(Error::from(FormatError::Malformed(format!(
                    "v1 B-tree node at level {} where level {expected} expected",
                    node.level
                ))))
                .context(what);
            }
            Ok(node)
        })?;
        let mut next = Vec::new();
        for node in nodes {
            if node.is_leaf() {
                leaves.push(node);
            } else {
                let child_level = node.level - 1;
                next.extend(node.children.iter().map(|&c| (c, Some(child_level))));
            }
        }
        level = next;
    }
    Ok(leaves)
}

// ---------------------------------------------------------------------------
// Paths
// ---------------------------------------------------------------------------

pub(crate) fn join(parent: &str, name: &str) -> String {
    if parent.ends_with('/') {
        format!("{parent}{name}")
    } else {
        format!("{parent}/{name}")
    }
}

/// Split `path`, relative to `base` unless absolute, into normalised
/// segments.
fn segments(base: &str, path: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let joined = if path.starts_with('/') {
        path.to_string()
    } else {
        join(base, path)
    };
    for seg in joined.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                out.pop();
            }
            s => out.push(s.to_string()),
        }
    }
    out
}

fn canonical(segments: &[String]) -> String {
    format!("/{}", segments.join("/"))
}

/// Resolve an absolute path from the root group.
pub(crate) fn resolve_path(inner: &Inner, path: &str) -> Result<(String, Arc<Node>)> {
    resolve_from(inner, "/", path, 0)
}

fn resolve_from(inner: &Inner, base: &str, path: &str, depth: usize) -> Result<(String, Arc<Node>)> {
    let segs = segments(base, path);
    let mut current = node(inner, inner.superblock.root_group_address)?;
    for i in 0..segs.len() {
        let parent = canonical(&segs[..i]);
        let group = match &current.kind {
            NodeKind::Group(g) => g,
            NodeKind::Variable(_) => {
                return Err(Error::PathNotFound(format!("{} ({parent} is a variable)", canonical(&segs[..=i]))))
            }
        };
        let target = group
            .links
            .get(&segs[i])
            .ok_or_else(|| Error::PathNotFound(canonical(&segs[..=i])))?;
        current = follow(inner, &parent, &segs[i], target, depth)?;
    }
    Ok((canonical(&segs), current))
}

/// Resolve the link `name` of the group at `parent`.
pub(crate) fn follow(inner: &Inner, parent: &str, name: &str, target: &LinkTarget, depth: usize) -> Result<Arc<Node>> {
    let path = join(parent, name);
    match target {
        LinkTarget::Hard { object_header_address } => node(inner, *object_header_address),
        LinkTarget::Soft { target_path } => {
            if depth >= inner.config.max_link_depth {
                return Err(Error::PathNotFound(format!(
                    "{path}: more than {} soft links",
                    inner.config.max_link_depth
                )));
            }
            debug!("soft link {path} -> {target_path}");
            resolve_from(inner, parent, target_path, depth + 1).map(|(_, n)| n)
        }
        LinkTarget::External { filename, object_path } => Err(Error::PathNotFound(format!(
            "{path}: external link to {filename}:{object_path}"
        ))),
        LinkTarget::UserDefined { link_type } => Err(Error::PathNotFound(format!(
            "{path}: user-defined link of type {link_type}"
        ))),
    }
}
