//! Reactive state cells, host side.
//!
//! A `StateCell` is a single value with an identity. Mutation goes through
//! the `mutate` primitives below; the generated client cells implement the
//! same semantics method for method, which is what makes the recorded
//! operation log replayable.

use crate::payload::{CellId, Operation, StateCellRecord};
use crate::value::{resolve_args, CellValue};

#[derive(Debug, Clone)]
pub struct StateCell {
    id: CellId,
    bound_name: String,
    value: CellValue,
    global: bool,
    global_key: Option<String>,
    computed: bool,
    dependencies: Vec<CellId>,
    client_expr: Option<String>,
}

impl StateCell {
    pub(crate) fn new(id: CellId, bound_name: &str, value: CellValue) -> Self {
        StateCell {
            id,
            bound_name: bound_name.to_string(),
            value,
            global: false,
            global_key: None,
            computed: false,
            dependencies: Vec::new(),
            client_expr: None,
        }
    }

    pub(crate) fn global(mut self, key: &str) -> Self {
        self.global = true;
        self.global_key = Some(key.to_string());
        self
    }

    pub(crate) fn computed(mut self, dependencies: &[CellId], client_expr: &str) -> Self {
        self.computed = true;
        self.dependencies = dependencies.to_vec();
        self.client_expr = Some(client_expr.to_string());
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn bound_name(&self) -> &str {
        &self.bound_name
    }

    pub fn value(&self) -> &CellValue {
        &self.value
    }

    pub(crate) fn value_mut(&mut self) -> &mut CellValue {
        &mut self.value
    }

    pub fn record(&self) -> StateCellRecord {
        StateCellRecord {
            id: self.id.clone(),
            value: self.value.clone(),
            global: self.global,
            key: self.global_key.clone(),
            computed: self.computed,
            dependencies: self.dependencies.clone(),
            expr: self.client_expr.clone(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// MUTATION PRIMITIVES
// ═══════════════════════════════════════════════════════════════════════════════

/// Shared by direct host mutation and operation replay. The generated client
/// runtime mirrors each branch exactly.
pub mod mutate {
    use super::CellValue;

    pub fn set(value: &mut CellValue, v: CellValue) {
        *value = v;
    }

    pub fn increment(value: &mut CellValue, step: f64) {
        let current = value.as_f64().unwrap_or(0.0);
        *value = CellValue::num(current + step);
    }

    pub fn decrement(value: &mut CellValue, step: f64) {
        let current = value.as_f64().unwrap_or(0.0);
        *value = CellValue::num(current - step);
    }

    pub fn toggle(value: &mut CellValue) {
        *value = CellValue::Bool(!value.is_truthy());
    }

    pub fn push(value: &mut CellValue, v: CellValue) {
        let current = std::mem::replace(value, CellValue::Null);
        *value = match current {
            CellValue::Array(mut items) => {
                items.push(v);
                CellValue::Array(items)
            }
            CellValue::Null => CellValue::Array(vec![v]),
            other => CellValue::Array(vec![other, v]),
        };
    }

    pub fn pop(value: &mut CellValue) -> Option<CellValue> {
        match value {
            CellValue::Array(items) => items.pop(),
            _ => None,
        }
    }

    pub fn update(value: &mut CellValue, key: &str, v: CellValue) {
        match value {
            CellValue::Array(items) => {
                if let Ok(index) = key.parse::<usize>() {
                    if index < items.len() {
                        items[index] = v;
                    } else if index == items.len() {
                        items.push(v);
                    }
                }
            }
            CellValue::Object(fields) => {
                if let Some(slot) = fields.iter_mut().find(|(k, _)| k == key) {
                    slot.1 = v;
                } else {
                    fields.push((key.to_string(), v));
                }
            }
            other => {
                *other = CellValue::Object(vec![(key.to_string(), v)]);
            }
        }
    }

    pub fn remove(value: &mut CellValue, key: &str) {
        match value {
            CellValue::Array(items) => {
                if let Ok(index) = key.parse::<usize>() {
                    if index < items.len() {
                        items.remove(index);
                    }
                }
            }
            CellValue::Object(fields) => {
                fields.retain(|(k, _)| k != key);
            }
            _ => {}
        }
    }

    pub fn merge(value: &mut CellValue, v: CellValue) {
        let current = std::mem::replace(value, CellValue::Null);
        *value = match (current, v) {
            (CellValue::Array(mut items), CellValue::Array(incoming)) => {
                items.extend(incoming);
                CellValue::Array(items)
            }
            (CellValue::Object(mut fields), CellValue::Object(incoming)) => {
                for (k, v) in incoming {
                    if let Some(slot) = fields.iter_mut().find(|(fk, _)| fk == &k) {
                        slot.1 = v;
                    } else {
                        fields.push((k, v));
                    }
                }
                CellValue::Object(fields)
            }
            (_, incoming) => incoming,
        };
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// OPERATION REPLAY
// ═══════════════════════════════════════════════════════════════════════════════

/// Apply one operation to a value, resolving argument placeholders. This is
/// the host-side statement of the replay law: a fresh value run through an
/// action's operations must land where the traced cells landed.
///
/// `expr`/`push_expr` need the client runtime to evaluate their JavaScript
/// and are rejected here; `unknown` is skipped, matching the generator's
/// comment degradation.
pub fn replay_operation(
    value: &mut CellValue,
    op: &Operation,
    args: &[CellValue],
) -> Result<(), String> {
    match op {
        Operation::Set { value: v, .. } => mutate::set(value, resolve_args(v, args)),
        Operation::Increment { step, .. } => mutate::increment(value, *step),
        Operation::Decrement { step, .. } => mutate::decrement(value, *step),
        Operation::Toggle { .. } => mutate::toggle(value),
        Operation::Push { value: v, .. } => mutate::push(value, resolve_args(v, args)),
        Operation::Pop { .. } => {
            mutate::pop(value);
        }
        Operation::Update { key, value: v, .. } => {
            mutate::update(value, key, resolve_args(v, args))
        }
        Operation::Remove { key, .. } => mutate::remove(value, key),
        Operation::Merge { value: v, .. } => mutate::merge(value, resolve_args(v, args)),
        Operation::Expr { slot, .. } | Operation::PushExpr { slot, .. } => {
            return Err(format!(
                "operation on cell '{}' embeds client-side code and cannot replay on the host",
                slot
            ));
        }
        Operation::Unknown => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_increment_then_decrement_restores() {
        let mut value = CellValue::from(10i64);
        mutate::increment(&mut value, 3.0);
        mutate::decrement(&mut value, 3.0);
        assert_eq!(value, CellValue::from(10i64));
    }

    #[test]
    fn test_push_then_pop_restores() {
        let mut value = CellValue::Array(vec![CellValue::from("a")]);
        mutate::push(&mut value, CellValue::from("b"));
        let popped = mutate::pop(&mut value);
        assert_eq!(popped, Some(CellValue::from("b")));
        assert_eq!(value, CellValue::Array(vec![CellValue::from("a")]));
    }

    #[test]
    fn test_push_onto_null_builds_an_array() {
        let mut value = CellValue::Null;
        mutate::push(&mut value, CellValue::from(1i64));
        assert_eq!(value, CellValue::Array(vec![CellValue::from(1i64)]));
    }

    #[test]
    fn test_update_and_remove_on_objects() {
        let mut value = CellValue::Object(vec![("a".to_string(), CellValue::from(1i64))]);
        mutate::update(&mut value, "b", CellValue::from(2i64));
        mutate::update(&mut value, "a", CellValue::from(9i64));
        mutate::remove(&mut value, "b");
        assert_eq!(
            value,
            CellValue::Object(vec![("a".to_string(), CellValue::from(9i64))])
        );
    }

    #[test]
    fn test_merge_concatenates_arrays() {
        let mut value = CellValue::Array(vec![CellValue::from(1i64)]);
        mutate::merge(&mut value, CellValue::Array(vec![CellValue::from(2i64)]));
        assert_eq!(
            value,
            CellValue::Array(vec![CellValue::from(1i64), CellValue::from(2i64)])
        );
    }

    #[test]
    fn test_replay_resolves_argument_placeholders() {
        let mut value = CellValue::Array(vec![]);
        let op = Operation::Push {
            slot: "s0".to_string(),
            value: CellValue::Arg(0),
        };
        replay_operation(&mut value, &op, &[CellValue::from("hello")]).unwrap();
        assert_eq!(value, CellValue::Array(vec![CellValue::from("hello")]));
    }

    #[test]
    fn test_replay_rejects_client_only_operations() {
        let mut value = CellValue::Null;
        let op = Operation::Expr {
            slot: "s0".to_string(),
            expr: "state['s0'].get() + 1".to_string(),
        };
        assert!(replay_operation(&mut value, &op, &[]).is_err());
    }
}
