//! MIB registry: the agent's ordered instance space.
//!
//! The registry maps OIDs to managed objects of two kinds:
//!
//! - *Scalars* register at their base OID; the single instance lives at
//!   `base.0` and is served by a getter closure (plus an optional setter).
//! - *Table columns* register at the column OID; instances live at
//!   `base.1 ..= base.max_index` and are served by per-index closures.
//!
//! The union of all instances forms a totally ordered set under
//! lexicographic OID comparison, which `get_next` walks for GETNEXT and
//! GETBULK. Lookups take `&self`; mutation of managed state happens inside
//! setter closures, so the agent can serve reads under a shared lock and
//! takes the writer lock only for the SET apply phase.

pub mod standard;

use std::collections::BTreeMap;

use crate::error::ErrorStatus;
use crate::oid::Oid;
use crate::value::Value;

/// Getter for a scalar instance.
pub type ScalarGetter = Box<dyn Fn() -> Value + Send + Sync>;
/// Setter for a scalar instance.
pub type ScalarSetter = Box<dyn Fn(&Value) -> Result<(), ErrorStatus> + Send + Sync>;
/// Getter for a table column instance; `None` means the row does not exist.
pub type ColumnGetter = Box<dyn Fn(u32) -> Option<Value> + Send + Sync>;
/// Setter for a table column instance.
pub type ColumnSetter = Box<dyn Fn(u32, &Value) -> Result<(), ErrorStatus> + Send + Sync>;

/// Expected value kind of an entry, checked during SET validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Integer,
    OctetString,
    ObjectIdentifier,
    IpAddress,
    Counter32,
    Gauge32,
    TimeTicks,
    Opaque,
    Counter64,
}

impl ValueKind {
    /// Kind of a concrete value; exceptions and NULL have no kind.
    pub fn of(value: &Value) -> Option<ValueKind> {
        match value {
            Value::Integer(_) => Some(Self::Integer),
            Value::OctetString(_) => Some(Self::OctetString),
            Value::ObjectIdentifier(_) => Some(Self::ObjectIdentifier),
            Value::IpAddress(_) => Some(Self::IpAddress),
            Value::Counter32(_) => Some(Self::Counter32),
            Value::Gauge32(_) => Some(Self::Gauge32),
            Value::TimeTicks(_) => Some(Self::TimeTicks),
            Value::Opaque(_) => Some(Self::Opaque),
            Value::Counter64(_) => Some(Self::Counter64),
            _ => None,
        }
    }
}

/// A registered scalar object.
pub struct ScalarEntry {
    /// Base OID; the instance is `base.0`.
    pub oid: Oid,
    /// Expected value kind for SET validation.
    pub kind: ValueKind,
    /// Read-only objects reject SET with notWritable.
    pub read_only: bool,
    /// Produces the current value.
    pub getter: ScalarGetter,
    /// Applies a new value; required for writable objects.
    pub setter: Option<ScalarSetter>,
}

/// A registered table column.
pub struct TableColumn {
    /// Column OID; instances are `base.index` for `1..=max_index`.
    pub oid: Oid,
    /// Highest valid index.
    pub max_index: u32,
    /// Expected value kind for SET validation.
    pub kind: ValueKind,
    /// Read-only columns reject SET with notWritable.
    pub read_only: bool,
    /// Produces the value at an index; `None` marks a hole in the table.
    pub getter: ColumnGetter,
    /// Applies a new value at an index.
    pub setter: Option<ColumnSetter>,
}

enum MibNode {
    Scalar(ScalarEntry),
    Column(TableColumn),
}

impl MibNode {
    /// Base OID the node is keyed under.
    fn base(&self) -> &Oid {
        match self {
            MibNode::Scalar(entry) => &entry.oid,
            MibNode::Column(column) => &column.oid,
        }
    }

    /// Greatest instance OID this node can produce.
    fn last_instance(&self) -> Oid {
        match self {
            MibNode::Scalar(entry) => entry.oid.child(0),
            MibNode::Column(column) => column.oid.child(column.max_index),
        }
    }
}

/// Outcome of a `get` lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum GetOutcome {
    /// The instance exists and produced a value.
    Value(Value),
    /// The OID does not fall under any registered object.
    NoSuchObject,
    /// The OID falls under a registered object but names no instance.
    NoSuchInstance,
}

/// The MIB registry.
///
/// Keyed by base OID in lexicographic order. Registered bases must not
/// nest: an instance space where one base prefixes another would break the
/// total order that `get_next` walks.
#[derive(Default)]
pub struct MibRegistry {
    nodes: BTreeMap<Oid, MibNode>,
}

impl MibRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a scalar object.
    pub fn register_scalar(&mut self, entry: ScalarEntry) {
        self.nodes.insert(entry.oid.clone(), MibNode::Scalar(entry));
    }

    /// Register a table column.
    pub fn register_column(&mut self, column: TableColumn) {
        self.nodes
            .insert(column.oid.clone(), MibNode::Column(column));
    }

    /// Remove a registered object by base OID.
    pub fn unregister(&mut self, base: &Oid) -> bool {
        self.nodes.remove(base).is_some()
    }

    /// Number of registered objects (not instances).
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Look up the exact instance `oid`.
    pub fn get(&self, oid: &Oid) -> GetOutcome {
        // The owning base, if any, is the greatest registered base <= oid
        let Some((base, node)) = self.nodes.range(..=oid.clone()).next_back() else {
            return GetOutcome::NoSuchObject;
        };

        if !oid.starts_with(base) {
            // Not under the nearest base; it may still sit under a scalar
            // base whose key equals oid's prefix minus the instance arc
            return GetOutcome::NoSuchObject;
        }

        match node {
            MibNode::Scalar(entry) => {
                if oid.len() == base.len() + 1 && oid.arcs()[base.len()] == 0 {
                    GetOutcome::Value((entry.getter)())
                } else {
                    // Under the scalar base but not the .0 instance
                    GetOutcome::NoSuchInstance
                }
            }
            MibNode::Column(column) => {
                if oid.len() == base.len() + 1 {
                    let index = oid.arcs()[base.len()];
                    if (1..=column.max_index).contains(&index) {
                        match (column.getter)(index) {
                            Some(value) => GetOutcome::Value(value),
                            None => GetOutcome::NoSuchInstance,
                        }
                    } else {
                        GetOutcome::NoSuchInstance
                    }
                } else {
                    GetOutcome::NoSuchInstance
                }
            }
        }
    }

    /// Find the lexicographic successor instance of `oid` and its value.
    ///
    /// Returns `None` when no registered instance follows (endOfMibView).
    pub fn get_next(&self, oid: &Oid) -> Option<(Oid, Value)> {
        for (base, node) in &self.nodes {
            // Skip nodes whose entire instance range precedes oid
            if node.last_instance() <= *oid {
                continue;
            }

            match node {
                MibNode::Scalar(entry) => {
                    let instance = base.child(0);
                    if instance > *oid {
                        return Some((instance, (entry.getter)()));
                    }
                }
                MibNode::Column(column) => {
                    let start = first_index_after(base, column.max_index, oid);
                    for index in start..=column.max_index {
                        if let Some(value) = (column.getter)(index) {
                            return Some((base.child(index), value));
                        }
                    }
                }
            }
        }

        None
    }

    /// Phase one of SET: check that `oid` names a writable instance
    /// accepting `value`, without mutating anything.
    pub fn validate_set(&self, oid: &Oid, value: &Value) -> Result<(), ErrorStatus> {
        let Some(kind) = ValueKind::of(value) else {
            return Err(ErrorStatus::WrongValue);
        };

        let Some((base, node)) = self.nodes.range(..=oid.clone()).next_back() else {
            return Err(ErrorStatus::NoSuchName);
        };
        if !oid.starts_with(base) {
            return Err(ErrorStatus::NoSuchName);
        }

        match node {
            MibNode::Scalar(entry) => {
                if oid.len() != base.len() + 1 || oid.arcs()[base.len()] != 0 {
                    return Err(ErrorStatus::NoCreation);
                }
                if entry.read_only || entry.setter.is_none() {
                    return Err(ErrorStatus::NotWritable);
                }
                if kind != entry.kind {
                    return Err(ErrorStatus::WrongType);
                }
                Ok(())
            }
            MibNode::Column(column) => {
                if oid.len() != base.len() + 1 {
                    return Err(ErrorStatus::NoCreation);
                }
                let index = oid.arcs()[base.len()];
                if !(1..=column.max_index).contains(&index) {
                    return Err(ErrorStatus::NoCreation);
                }
                if column.read_only || column.setter.is_none() {
                    return Err(ErrorStatus::NotWritable);
                }
                if kind != column.kind {
                    return Err(ErrorStatus::WrongType);
                }
                if (column.getter)(index).is_none() {
                    return Err(ErrorStatus::NoCreation);
                }
                Ok(())
            }
        }
    }

    /// Phase two of SET: apply a validated assignment.
    ///
    /// A setter failure after successful validation surfaces as
    /// commitFailed.
    pub fn apply_set(&self, oid: &Oid, value: &Value) -> Result<(), ErrorStatus> {
        let Some((base, node)) = self.nodes.range(..=oid.clone()).next_back() else {
            return Err(ErrorStatus::CommitFailed);
        };

        match node {
            MibNode::Scalar(entry) => match &entry.setter {
                Some(setter) => setter(value).map_err(|_| ErrorStatus::CommitFailed),
                None => Err(ErrorStatus::CommitFailed),
            },
            MibNode::Column(column) => {
                let index = oid.arcs()[base.len()];
                match &column.setter {
                    Some(setter) => setter(index, value).map_err(|_| ErrorStatus::CommitFailed),
                    None => Err(ErrorStatus::CommitFailed),
                }
            }
        }
    }
}

/// Smallest column index whose instance OID is strictly greater than `oid`.
fn first_index_after(base: &Oid, max_index: u32, oid: &Oid) -> u32 {
    if oid < base || !oid.starts_with(base) {
        // oid precedes the whole column (the caller already filtered out
        // oids past the column's last instance)
        return 1;
    }
    if oid.len() == base.len() {
        // oid is exactly the column base; first instance follows
        return 1;
    }

    // oid = base.index[...]; base.index <= oid < base.(index+1)
    let index = oid.arcs()[base.len()];
    index.saturating_add(1).min(max_index.saturating_add(1))
}

impl std::fmt::Debug for MibRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MibRegistry")
            .field("objects", &self.nodes.len())
            .finish()
    }
}
