//! Wire-shaped payload types for the Veil native core.
//!
//! A `ComponentPayload` is the full serializable snapshot of one component
//! instance: its state cells with current values, the per-action operation
//! logs, and the effect dependency graph. The code generator consumes it as
//! a pure function; the JSON shape is what ships to tooling.

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::value::CellValue;

pub type CellId = String;

// ═══════════════════════════════════════════════════════════════════════════════
// OPERATIONS
// ═══════════════════════════════════════════════════════════════════════════════

/// One recorded mutation. `expr`/`push_expr` carry precompiled JavaScript
/// value-expressions: `expr` assigns the evaluated result, `push_expr`
/// appends it. `Unknown` absorbs unrecognized wire types so the generator
/// can degrade to a comment instead of failing the whole module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Operation {
    Set { slot: CellId, value: CellValue },
    Increment { slot: CellId, step: f64 },
    Decrement { slot: CellId, step: f64 },
    Toggle { slot: CellId },
    Push { slot: CellId, value: CellValue },
    Pop { slot: CellId },
    Update { slot: CellId, key: String, value: CellValue },
    Remove { slot: CellId, key: String },
    Merge { slot: CellId, value: CellValue },
    Expr { slot: CellId, expr: String },
    PushExpr { slot: CellId, expr: String },
    #[serde(other)]
    Unknown,
}

impl Operation {
    pub fn slot(&self) -> Option<&str> {
        match self {
            Operation::Set { slot, .. }
            | Operation::Increment { slot, .. }
            | Operation::Decrement { slot, .. }
            | Operation::Toggle { slot }
            | Operation::Push { slot, .. }
            | Operation::Pop { slot }
            | Operation::Update { slot, .. }
            | Operation::Remove { slot, .. }
            | Operation::Merge { slot, .. }
            | Operation::Expr { slot, .. }
            | Operation::PushExpr { slot, .. } => Some(slot),
            Operation::Unknown => None,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// RECORDS
// ═══════════════════════════════════════════════════════════════════════════════

fn is_false(b: &bool) -> bool {
    !*b
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateCellRecord {
    pub id: CellId,
    pub value: CellValue,
    #[serde(default)]
    pub global: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub computed: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<CellId>,
    /// Compiled JavaScript recomputation body for computed cells.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expr: Option<String>,
}

/// One traced action: computed exactly once per distinct name per component
/// instance; operations are append-only during the single recording pass and
/// immutable afterward.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionRecord {
    pub name: String,
    pub params: Vec<String>,
    pub operations: Vec<Operation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectRecord {
    pub id: String,
    pub dependencies: Vec<CellId>,
    /// Compiled JavaScript body run when any dependency changes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expr: Option<String>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// PAYLOAD
// ═══════════════════════════════════════════════════════════════════════════════

/// Action logs keyed by name. Serializes as a JSON object preserving the
/// recorded creation order, which the generator also emits in.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActionMap(pub Vec<(String, Vec<Operation>)>);

impl ActionMap {
    pub fn get(&self, name: &str) -> Option<&[Operation]> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, ops)| ops.as_slice())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for ActionMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, ops) in &self.0 {
            map.serialize_entry(name, ops)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for ActionMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct MapVisitor;

        impl<'de> Visitor<'de> for MapVisitor {
            type Value = ActionMap;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                write!(f, "a map of action name to operation list")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<ActionMap, A::Error> {
                let mut entries = Vec::new();
                while let Some((name, ops)) = access.next_entry::<String, Vec<Operation>>()? {
                    entries.push((name, ops));
                }
                Ok(ActionMap(entries))
            }
        }

        deserializer.deserialize_map(MapVisitor)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentPayload {
    pub id: String,
    pub states: Vec<StateCellRecord>,
    pub actions: ActionMap,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub effects: Vec<EffectRecord>,
}

impl ComponentPayload {
    /// Every operation slot must reference a state record in the same
    /// payload. Returns one message per violation.
    pub fn integrity_errors(&self) -> Vec<String> {
        let mut errors = Vec::new();
        for (name, ops) in &self.actions.0 {
            for (index, op) in ops.iter().enumerate() {
                if let Some(slot) = op.slot() {
                    if !self.states.iter().any(|s| s.id == slot) {
                        errors.push(format!(
                            "action '{}' operation {} references unknown cell '{}'",
                            name, index, slot
                        ));
                    }
                }
            }
        }
        for effect in &self.effects {
            for dep in &effect.dependencies {
                if !self.states.iter().any(|s| &s.id == dep) {
                    errors.push(format!(
                        "effect '{}' depends on unknown cell '{}'",
                        effect.id, dep
                    ));
                }
            }
        }
        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_wire_shape() {
        let op = Operation::Push {
            slot: "s1".to_string(),
            value: CellValue::from("x"),
        };
        assert_eq!(
            serde_json::to_string(&op).unwrap(),
            "{\"type\":\"push\",\"slot\":\"s1\",\"value\":\"x\"}"
        );

        let op = Operation::PushExpr {
            slot: "s1".to_string(),
            expr: "state['s0'].get()".to_string(),
        };
        assert!(serde_json::to_string(&op).unwrap().starts_with("{\"type\":\"push_expr\""));
    }

    #[test]
    fn test_unknown_operation_type_deserializes() {
        let op: Operation =
            serde_json::from_str("{\"type\":\"teleport\",\"slot\":\"s0\"}").unwrap();
        assert_eq!(op, Operation::Unknown);
    }

    #[test]
    fn test_action_map_preserves_insertion_order() {
        let map = ActionMap(vec![
            ("zebra".to_string(), vec![]),
            ("apple".to_string(), vec![]),
        ]);
        let json = serde_json::to_string(&map).unwrap();
        assert!(json.find("zebra").unwrap() < json.find("apple").unwrap());

        let back: ActionMap = serde_json::from_str(&json).unwrap();
        assert_eq!(back.0[0].0, "zebra");
        assert_eq!(back.0[1].0, "apple");
    }

    #[test]
    fn test_integrity_errors_catch_dangling_slots() {
        let payload = ComponentPayload {
            id: "c0".to_string(),
            states: vec![],
            actions: ActionMap(vec![(
                "boom".to_string(),
                vec![Operation::Toggle { slot: "s9".to_string() }],
            )]),
            effects: vec![],
        };
        let errors = payload.integrity_errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("unknown cell 's9'"));
    }
}
