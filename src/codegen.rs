//! Client module generator.
//!
//! A pure function of the component payload: emits a standalone JavaScript
//! module exposing `mount(root, initialState)` that rebuilds one reactive
//! container per cell, replays each action's operation log, and wires the
//! `data-veil-*` markers left in the rendered markup. Cells and actions are
//! emitted in recorded creation order. A malformed operation degrades to a
//! comment; it never aborts the module.

#[cfg(feature = "napi")]
use napi_derive::napi;

use crate::compile::{escape_js_string, fmt_number};
use crate::payload::{ComponentPayload, Operation};

#[derive(Debug, Clone)]
pub struct ClientModule {
    pub source: String,
    pub warnings: Vec<String>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// RUNTIME PRELUDE
// ═══════════════════════════════════════════════════════════════════════════════

/// Cell containers and the batched scheduler. The cell methods mirror the
/// host-side mutation primitives branch for branch; the replay law depends
/// on the two staying in lockstep.
const RUNTIME_PRELUDE: &str = r#"function __createCell(initial) {
  let value = initial;
  const subscribers = new Set();
  const isObj = (v) => v !== null && typeof v === "object" && !Array.isArray(v);
  const notify = () => {
    subscribers.forEach((fn) => {
      try { fn(value); } catch (e) { console.error("[Veil] subscriber failed:", e); }
    });
  };
  return {
    get() { return value; },
    set(v) { value = v; notify(); },
    increment(step) {
      const n = typeof value === "number" ? value : 0;
      value = n + (typeof step === "number" ? step : 1);
      notify();
    },
    decrement(step) {
      const n = typeof value === "number" ? value : 0;
      value = n - (typeof step === "number" ? step : 1);
      notify();
    },
    toggle() { value = !value; notify(); },
    push(v) {
      if (!Array.isArray(value)) value = value === null || value === undefined ? [] : [value];
      value.push(v);
      notify();
    },
    pop() {
      if (!Array.isArray(value) || value.length === 0) return undefined;
      const out = value.pop();
      notify();
      return out;
    },
    update(key, v) {
      if (Array.isArray(value)) {
        const i = Number(key);
        if (Number.isInteger(i) && i >= 0 && i <= value.length) value[i] = v;
      } else if (isObj(value)) {
        value[key] = v;
      } else {
        value = {};
        value[key] = v;
      }
      notify();
    },
    remove(key) {
      if (Array.isArray(value)) {
        const i = Number(key);
        if (Number.isInteger(i) && i >= 0 && i < value.length) value.splice(i, 1);
      } else if (isObj(value)) {
        delete value[key];
      }
      notify();
    },
    merge(v) {
      if (Array.isArray(value) && Array.isArray(v)) value = value.concat(v);
      else if (isObj(value) && isObj(v)) value = Object.assign({}, value, v);
      else value = v;
      notify();
    },
    subscribe(fn) {
      subscribers.add(fn);
      return () => subscribers.delete(fn);
    },
  };
}

function __createScheduler() {
  const queue = new Set();
  let scheduled = false;
  const flush = () => {
    scheduled = false;
    const jobs = Array.from(queue);
    queue.clear();
    jobs.forEach((fn) => {
      try { fn(); } catch (e) { console.error("[Veil] scheduled update failed:", e); }
    });
  };
  return (fn) => {
    queue.add(fn);
    if (scheduled) return;
    scheduled = true;
    if (typeof requestAnimationFrame === "function") requestAnimationFrame(flush);
    else setTimeout(flush, 0);
  };
}

function __resolveArgs(value, args) {
  if (Array.isArray(value)) return value.map((v) => __resolveArgs(v, args));
  if (value !== null && typeof value === "object") {
    if (Object.prototype.hasOwnProperty.call(value, "__arg")) return args[value.__arg];
    const out = {};
    for (const k of Object.keys(value)) out[k] = __resolveArgs(value[k], args);
    return out;
  }
  return value;
}

function __sameValue(a, b) {
  if (a === b) return true;
  try { return JSON.stringify(a) === JSON.stringify(b); } catch (e) { return false; }
}

function __toText(v) {
  if (v === null || v === undefined) return "";
  return typeof v === "object" ? JSON.stringify(v) : String(v);
}
"#;

// ═══════════════════════════════════════════════════════════════════════════════
// MODULE GENERATION
// ═══════════════════════════════════════════════════════════════════════════════

pub fn generate_client_module(payload: &ComponentPayload) -> ClientModule {
    let mut warnings = payload.integrity_errors();
    let mut out = String::new();

    out.push_str(&format!(
        "// [VeilNative] generated module for component \"{}\"\n",
        escape_js_string(&payload.id)
    ));
    out.push_str(&format!(
        "const COMPONENT_ID = \"{}\";\n\n",
        escape_js_string(&payload.id)
    ));
    out.push_str(RUNTIME_PRELUDE);
    out.push('\n');

    out.push_str("export function mount(root, initialState) {\n");
    out.push_str("  const schedule = __createScheduler();\n");
    out.push_str("  const cleanups = [];\n");
    out.push_str("  const state = {};\n");

    // ── state containers, creation order ──────────────────────────────────
    out.push_str("\n  // state containers\n");
    if payload.states.iter().any(|s| s.global) {
        out.push_str(
            "  const __globals = typeof window !== \"undefined\" ? (window.__VEIL_GLOBALS__ = window.__VEIL_GLOBALS__ || {}) : {};\n",
        );
    }
    for record in &payload.states {
        let literal = record.value.to_client_literal();
        if record.global {
            let key = escape_js_string(record.key.as_deref().unwrap_or(&record.id));
            out.push_str(&format!(
                "  state[\"{id}\"] = __globals[\"{key}\"] || (__globals[\"{key}\"] = __createCell({literal}));\n",
                id = record.id,
                key = key,
                literal = literal
            ));
            out.push_str(&format!(
                "  if (initialState && Object.prototype.hasOwnProperty.call(initialState, \"{id}\")) state[\"{id}\"].set(initialState[\"{id}\"]);\n",
                id = record.id
            ));
        } else {
            out.push_str(&format!(
                "  state[\"{id}\"] = __createCell((initialState && Object.prototype.hasOwnProperty.call(initialState, \"{id}\")) ? initialState[\"{id}\"] : {literal});\n",
                id = record.id,
                literal = literal
            ));
        }
    }

    // ── computed cells ────────────────────────────────────────────────────
    let computed: Vec<_> = payload.states.iter().filter(|s| s.computed).collect();
    if !computed.is_empty() {
        out.push_str("\n  // computed cells\n");
        for record in computed {
            let Some(expr) = &record.expr else {
                let message = format!(
                    "computed cell '{}' has no recomputation body; left static",
                    record.id
                );
                out.push_str(&format!("  /* {} */\n", message));
                warnings.push(message);
                continue;
            };
            let deps = js_string_array(&record.dependencies);
            out.push_str("  {\n");
            out.push_str("    const __recompute = () => {\n");
            out.push_str("      let next;\n");
            out.push_str(&format!(
                "      try {{ next = ({}); }} catch (e) {{ console.error(\"[Veil] recompute of {} failed:\", e); return; }}\n",
                expr, record.id
            ));
            out.push_str(&format!(
                "      if (__sameValue(next, state[\"{id}\"].get())) return;\n      state[\"{id}\"].set(next);\n",
                id = record.id
            ));
            out.push_str("    };\n");
            out.push_str(&format!(
                "    {}.forEach((dep) => {{ const cell = state[dep]; if (cell) cleanups.push(cell.subscribe(() => __recompute())); }});\n",
                deps
            ));
            out.push_str("  }\n");
        }
    }

    // ── actions ───────────────────────────────────────────────────────────
    out.push_str("\n  // actions\n  const actions = {};\n");
    let known: Vec<&str> = payload.states.iter().map(|s| s.id.as_str()).collect();
    for (name, ops) in &payload.actions.0 {
        out.push_str(&format!(
            "  actions[\"{}\"] = function (args) {{\n    args = Array.isArray(args) ? args : [];\n",
            escape_js_string(name)
        ));
        for (index, op) in ops.iter().enumerate() {
            out.push_str(&emit_operation(name, index, op, &known, &mut warnings));
        }
        out.push_str("  };\n");
    }

    // ── effects ───────────────────────────────────────────────────────────
    if !payload.effects.is_empty() {
        out.push_str("\n  // effects\n");
        for effect in &payload.effects {
            let body = match &effect.expr {
                Some(expr) => format!(
                    "try {{ {}; }} catch (e) {{ console.error(\"[Veil] effect {} failed:\", e); }}",
                    expr, effect.id
                ),
                None => format!("/* effect {} has no client body */", effect.id),
            };
            out.push_str("  {\n");
            out.push_str(&format!("    const __run = () => {{ {} }};\n", body));
            out.push_str(&format!(
                "    {}.forEach((dep) => {{ const cell = state[dep]; if (cell) cleanups.push(cell.subscribe(() => schedule(__run))); }});\n",
                js_string_array(&effect.dependencies)
            ));
            out.push_str("  }\n");
        }
    }

    // ── DOM wiring ────────────────────────────────────────────────────────
    out.push_str(DOM_WIRING);

    out.push_str("\n  const unmount = () => {\n");
    out.push_str("    cleanups.forEach((fn) => { try { fn(); } catch (e) {} });\n");
    out.push_str("    cleanups.length = 0;\n");
    out.push_str("  };\n");
    out.push_str("  return { state, unmount };\n");
    out.push_str("}\n");

    ClientModule { source: out, warnings }
}

/// Elements with an action marker get a click listener resolving optional
/// JSON arguments; elements with a bind marker (`componentId::cellId`) get
/// their text content subscribed through the batched scheduler.
const DOM_WIRING: &str = r#"
  // DOM wiring
  if (root && typeof root.querySelectorAll === "function") {
    root.querySelectorAll("[data-veil-action]").forEach((el) => {
      const name = el.getAttribute("data-veil-action");
      const fn = actions[name];
      if (!fn) return;
      let args = [];
      const raw = el.getAttribute("data-veil-args");
      if (raw) {
        try { args = JSON.parse(raw); } catch (e) { console.warn("[Veil] invalid data-veil-args for", name, e); }
      }
      const handler = () => fn(args);
      el.addEventListener("click", handler);
      cleanups.push(() => el.removeEventListener("click", handler));
    });
    root.querySelectorAll("[data-veil-bind]").forEach((el) => {
      const marker = el.getAttribute("data-veil-bind") || "";
      const sep = marker.indexOf("::");
      if (sep < 0 || marker.slice(0, sep) !== COMPONENT_ID) return;
      const cell = state[marker.slice(sep + 2)];
      if (!cell) return;
      const render = () => { el.textContent = __toText(cell.get()); };
      render();
      cleanups.push(cell.subscribe(() => schedule(render)));
    });
  }
"#;

fn emit_operation(
    action: &str,
    index: usize,
    op: &Operation,
    known_cells: &[&str],
    warnings: &mut Vec<String>,
) -> String {
    if let Some(slot) = op.slot() {
        if !known_cells.contains(&slot) {
            // Already collected by integrity_errors; keep the module alive.
            return format!(
                "    /* operation {} targets unknown cell \"{}\" and was skipped */\n",
                index,
                escape_js_string(slot)
            );
        }
    }
    match op {
        Operation::Set { slot, value } => format!(
            "    state[\"{}\"].set(__resolveArgs({}, args));\n",
            slot,
            value.to_client_literal()
        ),
        Operation::Increment { slot, step } => {
            format!("    state[\"{}\"].increment({});\n", slot, fmt_number(*step))
        }
        Operation::Decrement { slot, step } => {
            format!("    state[\"{}\"].decrement({});\n", slot, fmt_number(*step))
        }
        Operation::Toggle { slot } => format!("    state[\"{}\"].toggle();\n", slot),
        Operation::Push { slot, value } => format!(
            "    state[\"{}\"].push(__resolveArgs({}, args));\n",
            slot,
            value.to_client_literal()
        ),
        Operation::Pop { slot } => format!("    state[\"{}\"].pop();\n", slot),
        Operation::Update { slot, key, value } => format!(
            "    state[\"{}\"].update(\"{}\", __resolveArgs({}, args));\n",
            slot,
            escape_js_string(key),
            value.to_client_literal()
        ),
        Operation::Remove { slot, key } => format!(
            "    state[\"{}\"].remove(\"{}\");\n",
            slot,
            escape_js_string(key)
        ),
        Operation::Merge { slot, value } => format!(
            "    state[\"{}\"].merge(__resolveArgs({}, args));\n",
            slot,
            value.to_client_literal()
        ),
        Operation::Expr { slot, expr } => format!(
            "    try {{ state[\"{}\"].set(({})); }} catch (e) {{ console.error(\"[Veil] action \\\"{}\\\" operation {} failed:\", e); }}\n",
            slot,
            expr,
            escape_js_string(action),
            index
        ),
        Operation::PushExpr { slot, expr } => format!(
            "    try {{ state[\"{}\"].push(({})); }} catch (e) {{ console.error(\"[Veil] action \\\"{}\\\" operation {} failed:\", e); }}\n",
            slot,
            expr,
            escape_js_string(action),
            index
        ),
        Operation::Unknown => {
            warnings.push(format!(
                "action '{}' operation {} has an unrecognized type; emitted as a comment",
                action, index
            ));
            "    /* unsupported operation skipped */\n".to_string()
        }
    }
}

fn js_string_array(items: &[String]) -> String {
    let quoted: Vec<String> = items
        .iter()
        .map(|s| format!("\"{}\"", escape_js_string(s)))
        .collect();
    format!("[{}]", quoted.join(", "))
}

// ═══════════════════════════════════════════════════════════════════════════════
// NAPI BRIDGE
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(feature = "napi")]
#[napi]
pub fn generate_module_native(payload_json: String) -> napi::Result<String> {
    let payload: ComponentPayload = serde_json::from_str(&payload_json)
        .map_err(|e| napi::Error::from_reason(format!("payload parse error: {}", e)))?;
    let module = generate_client_module(&payload);
    for warning in &module.warnings {
        eprintln!("[VeilNative] {}", warning);
    }
    Ok(module.source)
}
