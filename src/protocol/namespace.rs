//! Lazily materialized proxy over the remote namespace.
//!
//! The instrument exposes a hierarchical namespace of command groups,
//! functions, settable properties, and read-only constants. Rather than
//! binding each name statically, this module resolves member access at
//! runtime against the [`ClassificationTables`](crate::protocol::tables::ClassificationTables)
//! and translates it into remote traffic:
//!
//! - reading a property or constant issues a `print(<path>)` query;
//! - writing a property issues `<path> = <value>`;
//! - calling a function issues `result = <path>(<args>)` followed by a
//!   `print(result)` query (a bare call that returns nothing would leave
//!   the query side blocked until the transport timeout, so the result is
//!   always staged in a transient remote variable first);
//! - descending into a command group materializes a child node.
//!
//! Nodes, function handles, and list handles are interned once per
//! `(parent, segment)` in an arena owned by the instrument core and
//! reused on every subsequent access. Scalar reads are deliberately *not*
//! cached: the remote value may change between accesses.

use crate::error::{SmuError, SmuResult};
use crate::instrument::Core;
use crate::protocol::path::CommandPath;
use crate::protocol::response::Value;
use crate::protocol::tables::NameKind;
use std::collections::HashMap;
use std::sync::Arc;

/// Index of a node in the arena. Two handles with the same id are the
/// same cached node.
pub(crate) type NodeId = usize;

/// Arena of materialized namespace nodes.
///
/// Children reference parents by index, so the tree carries no owning
/// cycles; the whole arena lives exactly as long as the instrument core.
#[derive(Debug)]
pub(crate) struct NodeArena {
    paths: Vec<CommandPath>,
    children: HashMap<(NodeId, String), NodeId>,
}

/// Id of the root node, pre-created in every arena.
pub(crate) const ROOT_NODE: NodeId = 0;

impl NodeArena {
    pub(crate) fn new() -> Self {
        NodeArena {
            paths: vec![CommandPath::root()],
            children: HashMap::new(),
        }
    }

    /// Return the cached child for `(parent, key)`, creating it on first
    /// access with `build` applied to the parent path.
    fn intern(
        &mut self,
        parent: NodeId,
        key: String,
        build: impl FnOnce(&CommandPath) -> CommandPath,
    ) -> NodeId {
        if let Some(&id) = self.children.get(&(parent, key.clone())) {
            return id;
        }
        let path = build(&self.paths[parent]);
        let id = self.paths.len();
        self.paths.push(path);
        self.children.insert((parent, key), id);
        id
    }

    fn path(&self, id: NodeId) -> CommandPath {
        self.paths[id].clone()
    }

    /// Number of materialized nodes (root included).
    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.paths.len()
    }
}

/// The result of classifying one member access.
#[derive(Debug, Clone)]
pub enum Member {
    /// A further namespace node.
    SubNamespace(RemoteNode),
    /// A callable remote function.
    Function(RemoteFunction),
    /// An element-addressable property.
    IndexedList(RemoteList),
    /// A read/write scalar; use [`RemoteNode::read`] / [`RemoteNode::write`].
    ScalarProperty,
    /// A read-only scalar; readable, never writable.
    ReadOnlyConstant,
}

/// A proxy for one position in the remote namespace.
///
/// Cheap to clone; clones refer to the same cached arena entry. Handle
/// equality (`==`) is node identity.
#[derive(Clone)]
pub struct RemoteNode {
    core: Arc<Core>,
    id: NodeId,
}

impl PartialEq for RemoteNode {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.core, &other.core) && self.id == other.id
    }
}

impl Eq for RemoteNode {}

impl std::fmt::Debug for RemoteNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteNode")
            .field("path", &self.path().as_str())
            .finish()
    }
}

impl RemoteNode {
    pub(crate) fn new(core: Arc<Core>, id: NodeId) -> Self {
        RemoteNode { core, id }
    }

    /// The command path this node stands for.
    pub fn path(&self) -> CommandPath {
        self.core.with_arena(|a| a.path(self.id))
    }

    fn child_path(&self, name: &str) -> String {
        self.path().child(name).to_string()
    }

    /// Resolve one member name against the classification tables.
    ///
    /// This is the single dispatch point: every typed accessor below goes
    /// through the same classification. An unknown name raises
    /// [`SmuError::UnresolvedMember`] and issues no remote traffic.
    pub fn resolve(&self, name: &str) -> SmuResult<Member> {
        match self.core.tables().classify(name) {
            Some(NameKind::Class) => Ok(Member::SubNamespace(self.intern_child(name))),
            Some(NameKind::Function) => Ok(Member::Function(RemoteFunction {
                node: self.intern_child(name),
            })),
            Some(NameKind::Property) if self.core.tables().is_indexed(name) => {
                Ok(Member::IndexedList(RemoteList {
                    node: self.intern_child(name),
                }))
            }
            Some(NameKind::Property) => Ok(Member::ScalarProperty),
            Some(NameKind::Constant) => Ok(Member::ReadOnlyConstant),
            None => Err(SmuError::UnresolvedMember {
                path: self.child_path(name),
            }),
        }
    }

    fn intern_child(&self, name: &str) -> RemoteNode {
        let id = self
            .core
            .with_arena(|a| a.intern(self.id, name.to_string(), |p| p.child(name)));
        RemoteNode::new(Arc::clone(&self.core), id)
    }

    /// Descend into a sub-group, e.g. `smua` -> `smua.measure`.
    pub fn child(&self, name: &str) -> SmuResult<RemoteNode> {
        match self.resolve(name)? {
            Member::SubNamespace(node) => Ok(node),
            _ => Err(SmuError::NotAGroup {
                path: self.child_path(name),
            }),
        }
    }

    /// Descend through a chain of group names: `descend("trigger.source")`.
    pub fn descend(&self, dotted: &str) -> SmuResult<RemoteNode> {
        dotted
            .split('.')
            .try_fold(self.clone(), |node, seg| node.child(seg))
    }

    /// Bracketed element of this group, e.g. `trigger.blender[1]`.
    ///
    /// Elements count from 1, matching the remote interpreter.
    pub fn at(&self, i: u32) -> RemoteNode {
        let id = self
            .core
            .with_arena(|a| a.intern(self.id, format!("[{}]", i), |p| p.index(i)));
        RemoteNode::new(Arc::clone(&self.core), id)
    }

    /// Read a property or constant. Always queries the instrument; scalar
    /// values are never cached locally.
    pub async fn read(&self, name: &str) -> SmuResult<Value> {
        match self.core.tables().classify(name) {
            Some(NameKind::Property) | Some(NameKind::Constant) => {
                let path = self.path().child(name);
                self.core.query_expr(path.as_str()).await
            }
            Some(_) => Err(SmuError::NotReadable {
                path: self.child_path(name),
            }),
            None => Err(SmuError::UnresolvedMember {
                path: self.child_path(name),
            }),
        }
    }

    /// Write a property. Writes to constants are rejected locally and
    /// never reach the transport.
    pub async fn write(&self, name: &str, value: impl Into<Value>) -> SmuResult<()> {
        match self.core.tables().classify(name) {
            Some(NameKind::Property) => {
                let path = self.path().child(name);
                let line = format!("{} = {}", path, value.into().encode());
                self.core.send(&line).await
            }
            Some(NameKind::Constant) => Err(SmuError::ReadOnly {
                path: self.child_path(name),
            }),
            Some(_) => Err(SmuError::NotWritable {
                path: self.child_path(name),
            }),
            None => Err(SmuError::UnresolvedMember {
                path: self.child_path(name),
            }),
        }
    }

    /// Handle for a remote function member.
    pub fn function(&self, name: &str) -> SmuResult<RemoteFunction> {
        match self.resolve(name)? {
            Member::Function(f) => Ok(f),
            _ => Err(SmuError::NotCallable {
                path: self.child_path(name),
            }),
        }
    }

    /// Handle for an element-addressable property member.
    pub fn list(&self, name: &str) -> SmuResult<RemoteList> {
        match self.resolve(name)? {
            Member::IndexedList(l) => Ok(l),
            _ => Err(SmuError::NotIndexable {
                path: self.child_path(name),
            }),
        }
    }
}

/// A callable member of the remote namespace.
///
/// Calling is a two-step exchange: the result is first staged in the
/// transient remote variable `result`, then queried back. Querying a bare
/// call directly would block until the read timeout whenever the function
/// returns nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFunction {
    node: RemoteNode,
}

impl RemoteFunction {
    /// The function's command path.
    pub fn path(&self) -> CommandPath {
        self.node.path()
    }

    /// Invoke the function with positional arguments.
    ///
    /// Arguments are encoded and comma-joined; textual identifiers travel
    /// unquoted.
    pub async fn call(&self, args: &[Value]) -> SmuResult<Value> {
        let rendered = args.iter().map(Value::encode).collect::<Vec<_>>().join(", ");
        let line = format!("result = {}({})", self.path(), rendered);
        self.node.core.send(&line).await?;
        self.node.core.query_expr("result").await
    }
}

/// An element-addressable property (`stimulus[1]` and friends).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteList {
    node: RemoteNode,
}

impl RemoteList {
    /// The list's command path (without an index).
    pub fn path(&self) -> CommandPath {
        self.node.path()
    }

    /// Read element `i` (1-based).
    pub async fn get(&self, i: u32) -> SmuResult<Value> {
        let path = self.path().index(i);
        self.node.core.query_expr(path.as_str()).await
    }

    /// Write element `i` (1-based).
    pub async fn set(&self, i: u32, value: impl Into<Value>) -> SmuResult<()> {
        let path = self.path().index(i);
        let line = format!("{} = {}", path, value.into().encode());
        self.node.core.send(&line).await
    }
}
