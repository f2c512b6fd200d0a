//! Lazy group and variable handles.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

use cloudhdf5_format::data_layout::{ChunkIndexKind, DataLayout};
use cloudhdf5_format::datatype::Datatype;
use cloudhdf5_format::filter_pipeline::FilterKind;
use cloudhdf5_format::link_message::LinkTarget;
use cloudhdf5_format::selection::Hyperslab;
use log::debug;
use rayon::prelude::*;
use serde::Serialize;

use crate::error::{Error, ErrorKind, Result};
use crate::read;
use crate::session::Inner;
use crate::types::{Array, DType};
use crate::walker::{self, Node, NodeKind, ObjectKind, VariableNode, WalkEntry};

fn base_name(path: &str) -> &str {
    path.rsplit('/').next().filter(|s| !s.is_empty()).unwrap_or("/")
}

/// A child of a group.
#[derive(Clone)]
pub enum Object {
    Group(Group),
    Variable(Variable),
}

impl Object {
    fn new(inner: Arc<Inner>, path: String, node: Arc<Node>) -> Object {
        match node.kind {
            NodeKind::Group(_) => Object::Group(Group { inner, path, node }),
            NodeKind::Variable(_) => Object::Variable(Variable { inner, path, node }),
        }
    }

    pub fn kind(&self) -> ObjectKind {
        match self {
            Object::Group(_) => ObjectKind::Group,
            Object::Variable(_) => ObjectKind::Variable,
        }
    }

    pub fn path(&self) -> &str {
        match self {
            Object::Group(g) => g.path(),
            Object::Variable(v) => v.path(),
        }
    }
}

/// A group in the file tree.
///
/// Handles are cheap to clone; the resolved node is shared with every other
/// handle to the same object in the session.
#[derive(Clone)]
pub struct Group {
    inner: Arc<Inner>,
    path: String,
    node: Arc<Node>,
}

impl fmt::Debug for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Group")
            .field("path", &self.path)
            .field("address", &self.node.address)
            .finish()
    }
}

impl Group {
    pub(crate) fn new(inner: Arc<Inner>, path: String, node: Arc<Node>) -> Result<Group> {
        match node.kind {
            NodeKind::Group(_) => Ok(Group { inner, path, node }),
            NodeKind::Variable(_) => Err(Error::WrongKind { path, expected: "group" }),
        }
    }

    fn links(&self) -> &BTreeMap<String, LinkTarget> {
        match &self.node.kind {
            NodeKind::Group(g) => &g.links,
            // Construction guarantees a group node.
            NodeKind::Variable(_) => unreachable!("group handle over a variable node"),
        }
    }

    pub fn name(&self) -> &str {
        base_name(&self.path)
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Object header Address.
    pub fn address(&self) -> u64 {
        self.node.address
    }

    pub fn attributes(&self) -> &BTreeMap<String, Array> {
        &self.node.attributes
    }

    pub fn attribute(&self, name: &str) -> Option<&Array> {
        self.node.attributes.get(name)
    }

    /// Names of every link in the group, sorted.
    pub fn link_names(&self) -> Vec<&str> {
        self.links().keys().map(String::as_str).collect()
    }

    /// Resolve every link concurrently. Links that do not lead to an object
    /// in this file (dangling soft links, external links) are left out.
    fn children(&self, hard_only: bool) -> Result<Vec<Object>> {
        let links: Vec<(&String, &LinkTarget)> = self
            .links()
            .iter()
            .filter(|(_, t)| !hard_only || matches!(t, LinkTarget::Hard { .. }))
            .collect();
        let inner = &self.inner;
        let resolved = inner.pool.install(|| {
            links
                .par_iter()
                .map(|&(name, target)| {
                    let path = walker::join(&self.path, name);
                    match walker::follow(inner, &self.path, name, target, 0) {
                        Ok(node) => Ok(Some(Object::new(Arc::clone(inner), path, node))),
                        Err(e) if e.kind() == ErrorKind::PathNotFound => {
                            debug!("skipping {path}: {e}");
                            Ok(None)
                        }
                        Err(e) => Err(e),
                    }
                })
                .collect::<Result<Vec<_>>>()
        })?;
        Ok(resolved.into_iter().flatten().collect())
    }

    /// Every child object, in name order.
    pub fn objects(&self) -> Result<Vec<Object>> {
        self.children(false)
    }

    pub fn variables(&self) -> Result<Vec<Variable>> {
        Ok(self
            .children(false)?
            .into_iter()
            .filter_map(|o| match o {
                Object::Variable(v) => Some(v),
                Object::Group(_) => None,
            })
            .collect())
    }

    pub fn groups(&self) -> Result<Vec<Group>> {
        Ok(self
            .children(false)?
            .into_iter()
            .filter_map(|o| match o {
                Object::Group(g) => Some(g),
                Object::Variable(_) => None,
            })
            .collect())
    }

    /// The object behind the link `name`.
    pub fn child(&self, name: &str) -> Result<Object> {
        let target = self
            .links()
            .get(name)
            .ok_or_else(|| Error::PathNotFound(walker::join(&self.path, name)))?;
        let node = walker::follow(&self.inner, &self.path, name, target, 0)?;
        Ok(Object::new(Arc::clone(&self.inner), walker::join(&self.path, name), node))
    }

    /// Resolve `path` relative to this group, or from the root when it
    /// starts with `/`.
    pub fn group(&self, path: &str) -> Result<Group> {
        let (path, node) = walker::resolve_path(&self.inner, &self.relative(path))?;
        Group::new(Arc::clone(&self.inner), path, node)
    }

    pub fn variable(&self, path: &str) -> Result<Variable> {
        let (path, node) = walker::resolve_path(&self.inner, &self.relative(path))?;
        Variable::new(Arc::clone(&self.inner), path, node)
    }

    fn relative(&self, path: &str) -> String {
        if path.starts_with('/') {
            path.to_string()
        } else {
            walker::join(&self.path, path)
        }
    }

    /// Every object below this group, breadth first.
    ///
    /// Only hard links are followed, and an object reached by more than one
    /// path is listed under the first.
    pub fn walk(&self) -> Result<Vec<WalkEntry>> {
        let mut visited = HashSet::from([self.address()]);
        let mut entries = Vec::new();
        let mut level = vec![self.clone()];
        while !level.is_empty() {
            let found = self
                .inner
                .pool
                .install(|| level.par_iter().map(|g| g.children(true)).collect::<Result<Vec<_>>>())?;
            let mut next = Vec::new();
            for child in found.into_iter().flatten() {
                let address = match &child {
                    Object::Group(g) => g.address(),
                    Object::Variable(v) => v.address(),
                };
                if !visited.insert(address) {
                    continue;
                }
                entries.push(WalkEntry {
                    path: child.path().to_string(),
                    kind: child.kind(),
                    address,
                });
                if let Object::Group(g) = child {
                    next.push(g);
                }
            }
            level = next;
        }
        Ok(entries)
    }

    /// Whether both handles share one resolved node.
    pub fn ptr_eq(&self, other: &Group) -> bool {
        Arc::ptr_eq(&self.node, &other.node)
    }
}

/// Storage details of a variable, available without reading data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VariableMeta {
    pub path: String,
    pub dtype: DType,
    pub element_size: u32,
    pub shape: Vec<u64>,
    /// `None` entries are unlimited.
    pub max_shape: Option<Vec<Option<u64>>>,
    pub layout: &'static str,
    pub chunk_shape: Option<Vec<u64>>,
    pub chunk_index: Option<&'static str>,
    /// Filter names in pipeline order.
    pub filters: Vec<String>,
    /// Raw fill bytes when a fill value is defined.
    pub fill: Option<Vec<u8>>,
}

fn filter_name(kind: FilterKind) -> String {
    match kind {
        FilterKind::Deflate => "deflate".into(),
        FilterKind::Shuffle => "shuffle".into(),
        FilterKind::Fletcher32 => "fletcher32".into(),
        FilterKind::Szip => "szip".into(),
        FilterKind::Nbit => "nbit".into(),
        FilterKind::ScaleOffset => "scaleoffset".into(),
        FilterKind::Other(id) => format!("filter-{id}"),
    }
}

fn index_name(kind: &ChunkIndexKind) -> &'static str {
    match kind {
        ChunkIndexKind::BTreeV1 { .. } => "btree-v1",
        ChunkIndexKind::Single { .. } => "single",
        ChunkIndexKind::Implicit { .. } => "implicit",
        ChunkIndexKind::FixedArray { .. } => "fixed-array",
        ChunkIndexKind::ExtensibleArray { .. } => "extensible-array",
        ChunkIndexKind::BTreeV2 { .. } => "btree-v2",
    }
}

/// A typed, multidimensional variable.
#[derive(Clone)]
pub struct Variable {
    inner: Arc<Inner>,
    path: String,
    node: Arc<Node>,
}

impl fmt::Debug for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Variable")
            .field("path", &self.path)
            .field("dtype", &self.var().dtype)
            .field("shape", &self.shape())
            .finish()
    }
}

impl Variable {
    pub(crate) fn new(inner: Arc<Inner>, path: String, node: Arc<Node>) -> Result<Variable> {
        match node.kind {
            NodeKind::Variable(_) => Ok(Variable { inner, path, node }),
            NodeKind::Group(_) => Err(Error::WrongKind {
                path,
                expected: "variable",
            }),
        }
    }

    fn var(&self) -> &VariableNode {
        match &self.node.kind {
            NodeKind::Variable(v) => v,
            NodeKind::Group(_) => unreachable!("variable handle over a group node"),
        }
    }

    pub fn name(&self) -> &str {
        base_name(&self.path)
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn address(&self) -> u64 {
        self.node.address
    }

    /// Current extent; empty for scalars.
    pub fn shape(&self) -> &[u64] {
        &self.var().dataspace.dimensions
    }

    pub fn dtype(&self) -> &DType {
        &self.var().dtype
    }

    /// The full datatype description.
    pub fn datatype(&self) -> &Datatype {
        &self.var().datatype
    }

    pub fn attributes(&self) -> &BTreeMap<String, Array> {
        &self.node.attributes
    }

    pub fn attribute(&self, name: &str) -> Option<&Array> {
        self.node.attributes.get(name)
    }

    pub fn meta(&self) -> VariableMeta {
        let var = self.var();
        let (layout, chunk_shape, chunk_index) = match &var.layout {
            DataLayout::Compact { .. } => ("compact", None, None),
            DataLayout::Contiguous { .. } => ("contiguous", None, None),
            DataLayout::Chunked(c) => ("chunked", Some(c.chunk_dims.clone()), Some(index_name(&c.index))),
            DataLayout::Virtual => ("virtual", None, None),
        };
        VariableMeta {
            path: self.path.clone(),
            dtype: var.dtype.clone(),
            element_size: var.datatype.size(),
            shape: var.dataspace.dimensions.clone(),
            max_shape: var
                .dataspace
                .max_dimensions
                .as_ref()
                .map(|m| m.iter().map(|&d| (d != u64::MAX).then_some(d)).collect()),
            layout,
            chunk_shape,
            chunk_index,
            filters: var.filters.filters.iter().map(|f| filter_name(f.kind)).collect(),
            fill: var.fill.value.clone(),
        }
    }

    /// Read the whole variable, or the hyperslab `selection`.
    pub fn read(&self, selection: Option<&Hyperslab>) -> Result<Array> {
        self.inner.ensure_open()?;
        let full;
        let sel = match selection {
            Some(s) => s,
            None => {
                full = Hyperslab::full(self.shape());
                &full
            }
        };
        read::read(&self.inner, self.node.address, self.var(), sel)
    }

    /// Read `num_rows` rows from `start_row` along the first dimension, or
    /// every row from `start_row` on when `num_rows` is `None`.
    pub fn read_rows(&self, start_row: u64, num_rows: Option<u64>) -> Result<Array> {
        let shape = self.shape();
        let Some((&rows, rest)) = shape.split_first() else {
            return Err(Error::Selection(format!("{} is a scalar and has no rows", self.path)));
        };
        if start_row > rows {
            return Err(Error::Selection(format!(
                "{}: start row {start_row} past the last of {rows} rows",
                self.path
            )));
        }
        let mut start = vec![0; shape.len()];
        start[0] = start_row;
        let mut count = vec![num_rows.unwrap_or(rows - start_row)];
        count.extend_from_slice(rest);
        self.read(Some(&Hyperslab { start, count }))
    }

    pub fn ptr_eq(&self, other: &Variable) -> bool {
        Arc::ptr_eq(&self.node, &other.node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_from_paths() {
        assert_eq!(base_name("/"), "/");
        assert_eq!(base_name("/a/b"), "b");
        assert_eq!(base_name("/a"), "a");
    }

    #[test]
    fn filter_names() {
        assert_eq!(filter_name(FilterKind::Deflate), "deflate");
        assert_eq!(filter_name(FilterKind::Other(32015)), "filter-32015");
    }
}
