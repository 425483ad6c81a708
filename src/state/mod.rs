//! Shared run state: named, typed slots carried across agent turns.
//!
//! # Invariants
//! - List slots are append-only; scalar slots are last-write-wins.
//! - Only the declared owner of a slot may change it.
//! - A delta is validated as a whole before anything is written, so a turn's
//!   changes land completely or not at all.
//! - Every applied operation is recorded in the audit log with the turn and
//!   agent that produced it, and bumps the version.
//!
//! Snapshots share storage with the live state and are copied on the next
//! write, so handing one to a turn costs an `Arc` clone.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Attribution used for state installed from submission hints.
pub const SUBMISSION_AGENT: &str = "submission";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotKind {
    List,
    Scalar,
}

impl std::fmt::Display for SlotKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SlotKind::List => write!(f, "list"),
            SlotKind::Scalar => write!(f, "scalar"),
        }
    }
}

/// A slot an agent declares it owns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotDecl {
    pub name: String,
    pub kind: SlotKind,
}

impl SlotDecl {
    pub fn list(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: SlotKind::List,
        }
    }

    pub fn scalar(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: SlotKind::Scalar,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct SlotSpec {
    kind: SlotKind,
    /// `None` for read-only slots installed from submission hints.
    owner: Option<String>,
}

/// Slot layout of a run, derived from the agents' declarations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateSchema {
    slots: BTreeMap<String, SlotSpec>,
}

impl StateSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare `slot` as owned by `agent`. Returns the previous owner if the
    /// slot was already declared.
    pub fn declare(&mut self, agent: &str, slot: &SlotDecl) -> Option<String> {
        let previous = self.slots.insert(
            slot.name.clone(),
            SlotSpec {
                kind: slot.kind,
                owner: Some(agent.to_string()),
            },
        );
        previous.and_then(|p| p.owner)
    }

    pub fn kind_of(&self, slot: &str) -> Option<SlotKind> {
        self.slots.get(slot).map(|s| s.kind)
    }

    pub fn owner_of(&self, slot: &str) -> Option<&str> {
        self.slots.get(slot).and_then(|s| s.owner.as_deref())
    }
}

/// One operation of a delta.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum SlotOp {
    Append { slot: String, values: Vec<Value> },
    Set { slot: String, value: Value },
}

impl SlotOp {
    pub fn slot(&self) -> &str {
        match self {
            SlotOp::Append { slot, .. } | SlotOp::Set { slot, .. } => slot,
        }
    }

    fn required_kind(&self) -> SlotKind {
        match self {
            SlotOp::Append { .. } => SlotKind::List,
            SlotOp::Set { .. } => SlotKind::Scalar,
        }
    }
}

/// Changes an agent wants applied at the end of its turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateDelta {
    ops: Vec<SlotOp>,
}

impl StateDelta {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append several values to a list slot.
    pub fn append(mut self, slot: &str, values: Vec<Value>) -> Self {
        if !values.is_empty() {
            self.ops.push(SlotOp::Append {
                slot: slot.to_string(),
                values,
            });
        }
        self
    }

    /// Append one value to a list slot.
    pub fn push(self, slot: &str, value: Value) -> Self {
        self.append(slot, vec![value])
    }

    /// Overwrite a scalar slot.
    pub fn set(mut self, slot: &str, value: Value) -> Self {
        self.ops.push(SlotOp::Set {
            slot: slot.to_string(),
            value,
        });
        self
    }

    pub fn ops(&self) -> &[SlotOp] {
        &self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum ConflictReason {
    #[error("slot is not declared by any agent")]
    UnknownSlot,

    #[error("slot is owned by {}", .owner.as_deref().unwrap_or("nobody"))]
    NotOwner { owner: Option<String> },

    #[error("{op} on a {kind} slot")]
    KindMismatch { op: String, kind: SlotKind },
}

/// Raised when a delta breaks ownership or slot typing. Always fatal for the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("state conflict on slot `{slot}` by `{agent}`: {reason}")]
pub struct StateConflict {
    pub agent: String,
    pub slot: String,
    pub reason: ConflictReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOp {
    Append { count: usize },
    Set,
}

/// Who changed what, and when.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// State version after the operation
    pub version: u64,
    pub turn: u32,
    pub agent: String,
    pub slot: String,
    pub op: AuditOp,
}

/// Live state of one run. Owned by the run's driver task.
#[derive(Debug, Clone)]
pub struct SharedRunState {
    schema: StateSchema,
    slots: Arc<BTreeMap<String, Value>>,
    version: u64,
    audit: Vec<AuditEntry>,
}

impl SharedRunState {
    /// Fresh state: list slots start empty, scalar slots start unset.
    pub fn new(schema: StateSchema) -> Self {
        let slots = schema
            .slots
            .iter()
            .filter(|(_, spec)| spec.kind == SlotKind::List)
            .map(|(name, _)| (name.clone(), Value::Array(Vec::new())))
            .collect();
        Self {
            schema,
            slots: Arc::new(slots),
            version: 0,
            audit: Vec::new(),
        }
    }

    /// Install initial values from submission hints, attributed to turn 0.
    ///
    /// Declared list slots need an array; declared scalar slots take any
    /// value. Undeclared slots become read-only (arrays as lists).
    pub fn seed(&mut self, hints: &serde_json::Map<String, Value>) -> Result<(), StateConflict> {
        for (slot, value) in hints {
            if self.schema.kind_of(slot) == Some(SlotKind::List) && !value.is_array() {
                return Err(StateConflict {
                    agent: SUBMISSION_AGENT.to_string(),
                    slot: slot.clone(),
                    reason: ConflictReason::KindMismatch {
                        op: "set".to_string(),
                        kind: SlotKind::List,
                    },
                });
            }
        }

        for (slot, value) in hints {
            let kind = match self.schema.kind_of(slot) {
                Some(kind) => kind,
                None => {
                    let kind = if value.is_array() {
                        SlotKind::List
                    } else {
                        SlotKind::Scalar
                    };
                    self.schema
                        .slots
                        .insert(slot.clone(), SlotSpec { kind, owner: None });
                    kind
                }
            };
            Arc::make_mut(&mut self.slots).insert(slot.clone(), value.clone());
            self.version += 1;
            self.audit.push(AuditEntry {
                version: self.version,
                turn: 0,
                agent: SUBMISSION_AGENT.to_string(),
                slot: slot.clone(),
                op: match kind {
                    SlotKind::List => AuditOp::Append {
                        count: value.as_array().map(Vec::len).unwrap_or(0),
                    },
                    SlotKind::Scalar => AuditOp::Set,
                },
            });
        }
        Ok(())
    }

    pub fn read(&self, slot: &str) -> Option<&Value> {
        self.slots.get(slot)
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn audit_log(&self) -> &[AuditEntry] {
        &self.audit
    }

    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            slots: Arc::clone(&self.slots),
            version: self.version,
        }
    }

    fn check(&self, agent: &str, op: &SlotOp) -> Result<(), StateConflict> {
        let conflict = |reason| StateConflict {
            agent: agent.to_string(),
            slot: op.slot().to_string(),
            reason,
        };
        let spec = self
            .schema
            .slots
            .get(op.slot())
            .ok_or_else(|| conflict(ConflictReason::UnknownSlot))?;
        if spec.owner.as_deref() != Some(agent) {
            return Err(conflict(ConflictReason::NotOwner {
                owner: spec.owner.clone(),
            }));
        }
        if spec.kind != op.required_kind() {
            let op_name = match op {
                SlotOp::Append { .. } => "append",
                SlotOp::Set { .. } => "set",
            };
            return Err(conflict(ConflictReason::KindMismatch {
                op: op_name.to_string(),
                kind: spec.kind,
            }));
        }
        Ok(())
    }

    /// Validate and apply every operation of `delta`, or none of them.
    pub fn apply_delta(&mut self, turn: u32, agent: &str, delta: StateDelta) -> Result<(), StateConflict> {
        for op in delta.ops() {
            self.check(agent, op)?;
        }

        for op in delta.ops {
            let slots = Arc::make_mut(&mut self.slots);
            self.version += 1;
            let (slot, audit_op) = match op {
                SlotOp::Append { slot, values } => {
                    let count = values.len();
                    let entry = slots
                        .entry(slot.clone())
                        .or_insert_with(|| Value::Array(Vec::new()));
                    if let Value::Array(items) = entry {
                        items.extend(values);
                    }
                    (slot, AuditOp::Append { count })
                }
                SlotOp::Set { slot, value } => {
                    slots.insert(slot.clone(), value);
                    (slot, AuditOp::Set)
                }
            };
            self.audit.push(AuditEntry {
                version: self.version,
                turn,
                agent: agent.to_string(),
                slot,
                op: audit_op,
            });
        }
        Ok(())
    }
}

/// Immutable point-in-time view of the state, handed to one turn.
#[derive(Debug, Clone)]
pub struct StateSnapshot {
    slots: Arc<BTreeMap<String, Value>>,
    version: u64,
}

impl StateSnapshot {
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn get(&self, slot: &str) -> Option<&Value> {
        self.slots.get(slot)
    }

    /// Items of a list slot; empty if unset or not a list.
    pub fn list(&self, slot: &str) -> &[Value] {
        self.slots
            .get(slot)
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn flag(&self, slot: &str) -> bool {
        self.slots.get(slot).and_then(Value::as_bool).unwrap_or(false)
    }

    pub fn counter(&self, slot: &str) -> u64 {
        self.slots.get(slot).and_then(Value::as_u64).unwrap_or(0)
    }

    /// Decode every item of a list slot.
    pub fn decode_list<T: DeserializeOwned>(&self, slot: &str) -> Result<Vec<T>, serde_json::Error> {
        self.list(slot)
            .iter()
            .map(|v| serde_json::from_value(v.clone()))
            .collect()
    }

    /// Plain JSON view of every slot.
    pub fn to_json(&self) -> Value {
        Value::Object(
            self.slots
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }
}
