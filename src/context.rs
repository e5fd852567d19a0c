//! Component context: the action tracer.
//!
//! One context per rendered component instance. Cells are created during
//! the render pass; each named action is traced exactly once, the first
//! time it is registered, by running its handler against a recording scope
//! with placeholder arguments. The recorder is a local handle created and
//! consumed inside registration, so it is released on every exit path and
//! a recording handler can never reach the context to nest another
//! registration.

use std::collections::{HashMap, HashSet};

use crate::cell::{mutate, StateCell};
use crate::compile::ExpressionCompiler;
use crate::expr;
use crate::payload::{
    ActionMap, ActionRecord, CellId, ComponentPayload, EffectRecord, Operation,
};
use crate::rewrite;
use crate::script;
use crate::value::CellValue;

// ═══════════════════════════════════════════════════════════════════════════════
// RECORDER
// ═══════════════════════════════════════════════════════════════════════════════

/// Append-only operation buffer for one recording pass.
pub struct Recorder {
    ops: Vec<Operation>,
}

impl Recorder {
    fn new() -> Self {
        Recorder { ops: Vec::new() }
    }

    pub(crate) fn record(&mut self, op: Operation) {
        self.ops.push(op);
    }

    fn finish(self) -> Vec<Operation> {
        self.ops
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SCOPE AND CELL HANDLES
// ═══════════════════════════════════════════════════════════════════════════════

/// What an action handler sees while recording: the cells, the recorder,
/// and the placeholder arguments. Nothing else.
pub struct ActionScope<'a> {
    cells: &'a mut Vec<StateCell>,
    index: &'a HashMap<String, usize>,
    recorder: &'a mut Recorder,
    args: Vec<CellValue>,
}

impl ActionScope<'_> {
    /// Placeholder for the positional argument; recording it as a value
    /// produces an argument reference, never a literal.
    pub fn arg(&self, index: usize) -> CellValue {
        self.args.get(index).cloned().unwrap_or(CellValue::Null)
    }

    pub fn arg_count(&self) -> usize {
        self.args.len()
    }

    pub fn is_bound(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn cell(&mut self, name: &str) -> Result<CellRef<'_>, String> {
        let index = *self
            .index
            .get(name)
            .ok_or_else(|| format!("unknown state cell '{}'", name))?;
        Ok(CellRef {
            cell: &mut self.cells[index],
            recorder: Some(&mut *self.recorder),
        })
    }
}

/// Handle to one cell. With a recorder attached, mutation methods append
/// operations instead of mutating — except increment/decrement/toggle,
/// which also apply their effect so later reads in the same recording stay
/// coherent. Without a recorder, mutations apply directly.
pub struct CellRef<'a> {
    cell: &'a mut StateCell,
    recorder: Option<&'a mut Recorder>,
}

impl CellRef<'_> {
    pub fn id(&self) -> &str {
        self.cell.id()
    }

    pub fn get(&self) -> &CellValue {
        self.cell.value()
    }

    fn slot(&self) -> CellId {
        self.cell.id().to_string()
    }

    pub fn set(&mut self, value: CellValue) {
        let slot = self.slot();
        match &mut self.recorder {
            Some(recorder) => recorder.record(Operation::Set { slot, value }),
            None => mutate::set(self.cell.value_mut(), value),
        }
    }

    pub fn increment(&mut self, step: f64) {
        let slot = self.slot();
        if let Some(recorder) = &mut self.recorder {
            recorder.record(Operation::Increment { slot, step });
        }
        mutate::increment(self.cell.value_mut(), step);
    }

    pub fn decrement(&mut self, step: f64) {
        let slot = self.slot();
        if let Some(recorder) = &mut self.recorder {
            recorder.record(Operation::Decrement { slot, step });
        }
        mutate::decrement(self.cell.value_mut(), step);
    }

    pub fn toggle(&mut self) {
        let slot = self.slot();
        if let Some(recorder) = &mut self.recorder {
            recorder.record(Operation::Toggle { slot });
        }
        mutate::toggle(self.cell.value_mut());
    }

    pub fn push(&mut self, value: CellValue) {
        let slot = self.slot();
        match &mut self.recorder {
            Some(recorder) => recorder.record(Operation::Push { slot, value }),
            None => mutate::push(self.cell.value_mut(), value),
        }
    }

    /// While recording, the pop is deferred and no value is returned.
    pub fn pop(&mut self) -> Option<CellValue> {
        let slot = self.slot();
        match &mut self.recorder {
            Some(recorder) => {
                recorder.record(Operation::Pop { slot });
                None
            }
            None => mutate::pop(self.cell.value_mut()),
        }
    }

    pub fn update(&mut self, key: &str, value: CellValue) {
        let slot = self.slot();
        match &mut self.recorder {
            Some(recorder) => recorder.record(Operation::Update {
                slot,
                key: key.to_string(),
                value,
            }),
            None => mutate::update(self.cell.value_mut(), key, value),
        }
    }

    pub fn remove(&mut self, key: &str) {
        let slot = self.slot();
        match &mut self.recorder {
            Some(recorder) => recorder.record(Operation::Remove {
                slot,
                key: key.to_string(),
            }),
            None => mutate::remove(self.cell.value_mut(), key),
        }
    }

    pub fn merge(&mut self, value: CellValue) {
        let slot = self.slot();
        match &mut self.recorder {
            Some(recorder) => recorder.record(Operation::Merge { slot, value }),
            None => mutate::merge(self.cell.value_mut(), value),
        }
    }

    /// Record a set-from-compiled-expression operation. Outside a
    /// recording there is nothing to evaluate it with, so it is dropped.
    pub fn set_expr(&mut self, expr: &str) {
        let slot = self.slot();
        match &mut self.recorder {
            Some(recorder) => recorder.record(Operation::Expr {
                slot,
                expr: expr.to_string(),
            }),
            None => eprintln!(
                "[VeilNative] expression operation on '{}' outside recording was dropped",
                slot
            ),
        }
    }

    pub fn push_expr(&mut self, expr: &str) {
        let slot = self.slot();
        match &mut self.recorder {
            Some(recorder) => recorder.record(Operation::PushExpr {
                slot,
                expr: expr.to_string(),
            }),
            None => eprintln!(
                "[VeilNative] expression operation on '{}' outside recording was dropped",
                slot
            ),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// COMPONENT CONTEXT
// ═══════════════════════════════════════════════════════════════════════════════

pub struct ComponentContext {
    id: String,
    cells: Vec<StateCell>,
    index: HashMap<String, usize>,
    actions: Vec<ActionRecord>,
    action_index: HashMap<String, usize>,
    effects: Vec<EffectRecord>,
}

impl ComponentContext {
    pub fn new(id: &str) -> Self {
        ComponentContext {
            id: id.to_string(),
            cells: Vec::new(),
            index: HashMap::new(),
            actions: Vec::new(),
            action_index: HashMap::new(),
            effects: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Declare a state cell. Ids are assigned in creation order and never
    /// reused; re-declaring a name returns the existing cell.
    pub fn state(&mut self, name: &str, initial: CellValue) -> CellId {
        if let Some(&existing) = self.index.get(name) {
            return self.cells[existing].id().to_string();
        }
        let id = format!("s{}", self.cells.len());
        self.cells.push(StateCell::new(id.clone(), name, initial));
        self.index.insert(name.to_string(), self.cells.len() - 1);
        id
    }

    /// Declare a cell shared across components through a window-level
    /// registry keyed by `key`.
    pub fn global_state(&mut self, name: &str, key: &str, initial: CellValue) -> CellId {
        if let Some(&existing) = self.index.get(name) {
            return self.cells[existing].id().to_string();
        }
        let id = format!("s{}", self.cells.len());
        self.cells
            .push(StateCell::new(id.clone(), name, initial).global(key));
        self.index.insert(name.to_string(), self.cells.len() - 1);
        id
    }

    /// Declare a computed cell. `client_expr` is the compiled JavaScript
    /// recomputation body; `initial` is the server-evaluated seed.
    pub fn computed(
        &mut self,
        name: &str,
        dependencies: &[CellId],
        initial: CellValue,
        client_expr: &str,
    ) -> CellId {
        if let Some(&existing) = self.index.get(name) {
            return self.cells[existing].id().to_string();
        }
        let id = format!("s{}", self.cells.len());
        self.cells.push(
            StateCell::new(id.clone(), name, initial).computed(dependencies, client_expr),
        );
        self.index.insert(name.to_string(), self.cells.len() - 1);
        id
    }

    pub fn effect(&mut self, dependencies: &[CellId], client_expr: Option<&str>) -> String {
        let id = format!("e{}", self.effects.len());
        self.effects.push(EffectRecord {
            id: id.clone(),
            dependencies: dependencies.to_vec(),
            expr: client_expr.map(str::to_string),
        });
        id
    }

    pub fn cell_id(&self, name: &str) -> Option<&str> {
        self.index.get(name).map(|&i| self.cells[i].id())
    }

    pub fn value(&self, name: &str) -> Option<&CellValue> {
        self.index.get(name).map(|&i| self.cells[i].value())
    }

    /// Bound-name to cell-id map, as consumed by the expression compiler.
    pub fn bindings(&self) -> HashMap<String, CellId> {
        self.index
            .iter()
            .map(|(name, &i)| (name.clone(), self.cells[i].id().to_string()))
            .collect()
    }

    /// Direct-mode handle: mutations apply immediately.
    pub fn cell(&mut self, name: &str) -> Result<CellRef<'_>, String> {
        let index = *self
            .index
            .get(name)
            .ok_or_else(|| format!("unknown state cell '{}'", name))?;
        Ok(CellRef {
            cell: &mut self.cells[index],
            recorder: None,
        })
    }

    pub fn has_action(&self, name: &str) -> bool {
        self.action_index.contains_key(name)
    }

    /// Trace a native handler once. Returns false without invoking the
    /// handler when `name` already has a record (idempotent, first wins).
    /// On error the buffer is discarded and the error propagates unchanged.
    pub fn register_action<F>(&mut self, name: &str, arity: usize, handler: F) -> Result<bool, String>
    where
        F: FnOnce(&mut ActionScope) -> Result<(), String>,
    {
        if self.action_index.contains_key(name) {
            return Ok(false);
        }
        let mut recorder = Recorder::new();
        {
            let mut scope = ActionScope {
                cells: &mut self.cells,
                index: &self.index,
                recorder: &mut recorder,
                args: (0..arity).map(CellValue::Arg).collect(),
            };
            handler(&mut scope)?;
        }
        self.store_action(ActionRecord {
            name: name.to_string(),
            params: (0..arity).map(|i| format!("arg{}", i)).collect(),
            operations: recorder.finish(),
        });
        Ok(true)
    }

    /// Trace an action handed over as host source text: rewrite mutation
    /// syntax into explicit cell calls, re-parse, and interpret against the
    /// recording scope. A rewritten fragment that fails to parse falls back
    /// to the original source, where bound-variable assignments then fail
    /// loudly instead of silently misbehaving.
    pub fn register_action_source(&mut self, name: &str, source: &str) -> Result<bool, String> {
        if self.action_index.contains_key(name) {
            return Ok(false);
        }
        let parsed = script::parse_action_source(source)?;
        let bound: HashSet<String> = self.index.keys().cloned().collect();
        let outcome = rewrite::rewrite_source(source, &bound);
        if !outcome.changed && !self.cells.is_empty() {
            eprintln!(
                "[VeilNative] no mutation syntax rewritten for action '{}'; tracing source as-is",
                name
            );
        }

        let rewritten_body = if outcome.changed {
            script::parse_action_source(&outcome.source)
                .map(|p| p.body)
                .unwrap_or_else(|_| parsed.body.clone())
        } else {
            parsed.body.clone()
        };

        let statements = match expr::parse_statements(&rewritten_body) {
            Ok(statements) => statements,
            Err(err) => {
                eprintln!(
                    "[VeilNative] rewritten action '{}' failed to parse ({}); falling back to original source",
                    name, err
                );
                expr::parse_statements(&parsed.body)?
            }
        };

        let compiler =
            ExpressionCompiler::new(self.bindings()).with_params(parsed.params.clone());
        let mut recorder = Recorder::new();
        {
            let mut scope = ActionScope {
                cells: &mut self.cells,
                index: &self.index,
                recorder: &mut recorder,
                args: (0..parsed.params.len()).map(CellValue::Arg).collect(),
            };
            script::trace_statements(&statements, &mut scope, &compiler, &parsed.params)?;
        }
        self.store_action(ActionRecord {
            name: name.to_string(),
            params: parsed.params,
            operations: recorder.finish(),
        });
        Ok(true)
    }

    fn store_action(&mut self, record: ActionRecord) {
        self.action_index
            .insert(record.name.clone(), self.actions.len());
        self.actions.push(record);
    }

    pub fn action(&self, name: &str) -> Option<&ActionRecord> {
        self.action_index.get(name).map(|&i| &self.actions[i])
    }

    /// Snapshot for the code generator, cells and actions in recorded
    /// creation order.
    pub fn payload(&self) -> ComponentPayload {
        ComponentPayload {
            id: self.id.clone(),
            states: self.cells.iter().map(|c| c.record()).collect(),
            actions: ActionMap(
                self.actions
                    .iter()
                    .map(|a| (a.name.clone(), a.operations.clone()))
                    .collect(),
            ),
            effects: self.effects.clone(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// NAPI BRIDGE
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(feature = "napi")]
pub use bridge::trace_component_native;

#[cfg(feature = "napi")]
mod bridge {
    use super::*;
    use napi_derive::napi;
    use serde::Deserialize;

    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct TraceInput {
        id: String,
        #[serde(default)]
        states: Vec<TraceState>,
        #[serde(default)]
        actions: Vec<TraceAction>,
    }

    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct TraceState {
        name: String,
        value: CellValue,
        #[serde(default)]
        global: bool,
        #[serde(default)]
        key: Option<String>,
    }

    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct TraceAction {
        name: String,
        source: String,
    }

    /// JSON-string bridge for a Node-hosted server shell: build a context,
    /// trace every action, return the payload.
    #[napi]
    pub fn trace_component_native(input_json: String) -> napi::Result<String> {
        let input: TraceInput = serde_json::from_str(&input_json)
            .map_err(|e| napi::Error::from_reason(format!("trace input parse error: {}", e)))?;
        let mut context = ComponentContext::new(&input.id);
        for state in &input.states {
            if state.global {
                let key = state.key.clone().unwrap_or_else(|| state.name.clone());
                context.global_state(&state.name, &key, state.value.clone());
            } else {
                context.state(&state.name, state.value.clone());
            }
        }
        for action in &input.actions {
            context
                .register_action_source(&action.name, &action.source)
                .map_err(napi::Error::from_reason)?;
        }
        serde_json::to_string(&context.payload())
            .map_err(|e| napi::Error::from_reason(format!("payload serialize error: {}", e)))
    }
}
