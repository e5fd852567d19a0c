//! End-to-end tracing tests: action registration, operation classification,
//! and the replay law across every operation type.

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    use crate::cell::replay_operation;
    use crate::context::ComponentContext;
    use crate::payload::Operation;
    use crate::value::CellValue;

    fn replay(
        initial: &[(&str, CellValue)],
        ops: &[Operation],
        args: &[CellValue],
    ) -> HashMap<String, CellValue> {
        let mut values: HashMap<String, CellValue> = initial
            .iter()
            .map(|(slot, value)| (slot.to_string(), value.clone()))
            .collect();
        for op in ops {
            if let Some(slot) = op.slot() {
                let value = values.get_mut(slot).expect("replay hit an unknown slot");
                replay_operation(value, op, args).expect("operation must replay host-side");
            }
        }
        values
    }

    // ── scenario A: count = count + 1 ─────────────────────────────────────

    #[test]
    fn test_increment_detection_and_replay() {
        let mut ctx = ComponentContext::new("c0");
        ctx.state("count", CellValue::from(5i64));
        assert!(ctx.register_action_source("inc", "count = count + 1").unwrap());

        let ops = ctx.action("inc").unwrap().operations.clone();
        assert_eq!(
            ops,
            vec![Operation::Increment { slot: "s0".to_string(), step: 1.0 }]
        );

        let result = replay(&[("s0", CellValue::from(5i64))], &ops, &[]);
        assert_eq!(result["s0"], CellValue::from(6i64));
        // increment applies during recording, so later reads stay coherent
        assert_eq!(ctx.value("count"), Some(&CellValue::from(6i64)));
    }

    // ── scenario B: items[] = 'x' ─────────────────────────────────────────

    #[test]
    fn test_append_records_push_and_replays() {
        let mut ctx = ComponentContext::new("c0");
        ctx.state("items", CellValue::Array(vec![]));
        ctx.register_action_source("add", "items[] = 'x'").unwrap();

        let ops = ctx.action("add").unwrap().operations.clone();
        assert_eq!(
            ops,
            vec![Operation::Push {
                slot: "s0".to_string(),
                value: CellValue::from("x"),
            }]
        );

        let result = replay(&[("s0", CellValue::Array(vec![]))], &ops, &[]);
        assert_eq!(result["s0"], CellValue::Array(vec![CellValue::from("x")]));
        // push is deferred while recording
        assert_eq!(ctx.value("items"), Some(&CellValue::Array(vec![])));
    }

    // ── scenario C: flag = !flag ──────────────────────────────────────────

    #[test]
    fn test_toggle_detection_and_replay() {
        let mut ctx = ComponentContext::new("c0");
        ctx.state("flag", CellValue::from(true));
        ctx.register_action_source("flip", "flag = !flag").unwrap();

        let ops = ctx.action("flip").unwrap().operations.clone();
        assert_eq!(ops, vec![Operation::Toggle { slot: "s0".to_string() }]);

        let result = replay(&[("s0", CellValue::from(true))], &ops, &[]);
        assert_eq!(result["s0"], CellValue::from(false));
        assert_eq!(ctx.value("flag"), Some(&CellValue::from(false)));
    }

    // ── scenario D: unbound identifiers stay verbatim ─────────────────────

    #[test]
    fn test_free_variable_compiles_verbatim() {
        let mut ctx = ComponentContext::new("c0");
        ctx.state("count", CellValue::from(0i64));
        ctx.register_action_source("mix", "count = count + y").unwrap();

        let ops = ctx.action("mix").unwrap().operations.clone();
        assert_eq!(
            ops,
            vec![Operation::Expr {
                slot: "s0".to_string(),
                expr: "state['s0'].get() + y".to_string(),
            }]
        );
    }

    // ── ordering and one-op-per-statement ─────────────────────────────────

    #[test]
    fn test_one_operation_per_statement_in_source_order() {
        let mut ctx = ComponentContext::new("c0");
        ctx.state("count", CellValue::from(0i64));
        ctx.state("items", CellValue::Array(vec![CellValue::from("seed")]));
        ctx.register_action_source(
            "batch",
            "count++; count = count + 2; items[] = 'a'; items.pop()",
        )
        .unwrap();

        let ops = ctx.action("batch").unwrap().operations.clone();
        assert_eq!(
            ops,
            vec![
                Operation::Increment { slot: "s0".to_string(), step: 1.0 },
                Operation::Increment { slot: "s0".to_string(), step: 2.0 },
                Operation::Push { slot: "s1".to_string(), value: CellValue::from("a") },
                Operation::Pop { slot: "s1".to_string() },
            ]
        );
    }

    // ── idempotent registration ───────────────────────────────────────────

    #[test]
    fn test_registration_is_idempotent_first_wins() {
        let mut ctx = ComponentContext::new("c0");
        ctx.state("count", CellValue::from(0i64));

        let mut runs = 0;
        let first = ctx
            .register_action("inc", 0, |scope| {
                runs += 1;
                scope.cell("count")?.increment(1.0);
                Ok(())
            })
            .unwrap();
        let second = ctx
            .register_action("inc", 0, |scope| {
                runs += 1;
                scope.cell("count")?.increment(100.0);
                Ok(())
            })
            .unwrap();

        assert!(first);
        assert!(!second);
        assert_eq!(runs, 1);
        assert_eq!(
            ctx.action("inc").unwrap().operations,
            vec![Operation::Increment { slot: "s0".to_string(), step: 1.0 }]
        );
    }

    #[test]
    fn test_source_registration_is_idempotent() {
        let mut ctx = ComponentContext::new("c0");
        ctx.state("count", CellValue::from(0i64));
        assert!(ctx.register_action_source("inc", "count++").unwrap());
        assert!(!ctx.register_action_source("inc", "count = count + 9").unwrap());
        assert_eq!(
            ctx.action("inc").unwrap().operations,
            vec![Operation::Increment { slot: "s0".to_string(), step: 1.0 }]
        );
    }

    // ── placeholders ──────────────────────────────────────────────────────

    #[test]
    fn test_parameter_records_argument_reference_not_literal() {
        let mut ctx = ComponentContext::new("c0");
        ctx.state("items", CellValue::Array(vec![]));
        ctx.register_action_source("log", "action log(message) { items[] = message }")
            .unwrap();

        let record = ctx.action("log").unwrap();
        assert_eq!(record.params, vec!["message"]);
        assert_eq!(
            record.operations,
            vec![Operation::Push { slot: "s0".to_string(), value: CellValue::Arg(0) }]
        );

        let result = replay(
            &[("s0", CellValue::Array(vec![]))],
            &record.operations,
            &[CellValue::from("hello")],
        );
        assert_eq!(result["s0"], CellValue::Array(vec![CellValue::from("hello")]));
    }

    #[test]
    fn test_native_placeholder_is_transparent() {
        let mut ctx = ComponentContext::new("c0");
        ctx.state("name", CellValue::from("old"));
        ctx.register_action("rename", 1, |scope| {
            let next = scope.arg(0);
            scope.cell("name")?.set(next);
            Ok(())
        })
        .unwrap();
        assert_eq!(
            ctx.action("rename").unwrap().operations,
            vec![Operation::Set { slot: "s0".to_string(), value: CellValue::Arg(0) }]
        );
    }

    // ── dynamic parameter arithmetic degrades to expr ─────────────────────

    #[test]
    fn test_parameter_arithmetic_compiles_to_expression() {
        let mut ctx = ComponentContext::new("c0");
        ctx.state("count", CellValue::from(0i64));
        ctx.register_action_source("add", "action add(amount) { count += amount }")
            .unwrap();

        let ops = ctx.action("add").unwrap().operations.clone();
        assert_eq!(
            ops,
            vec![Operation::Expr {
                slot: "s0".to_string(),
                expr: "state['s0'].get() + args[0]".to_string(),
            }]
        );
    }

    // ── pop while recording ───────────────────────────────────────────────

    #[test]
    fn test_pop_is_deferred_while_recording() {
        let mut ctx = ComponentContext::new("c0");
        ctx.state("items", CellValue::Array(vec![CellValue::from("a")]));
        ctx.register_action("take", 0, |scope| {
            assert!(scope.cell("items")?.pop().is_none());
            Ok(())
        })
        .unwrap();
        assert_eq!(
            ctx.action("take").unwrap().operations,
            vec![Operation::Pop { slot: "s0".to_string() }]
        );
        assert_eq!(
            ctx.value("items"),
            Some(&CellValue::Array(vec![CellValue::from("a")]))
        );
    }

    // ── inverse pairs ─────────────────────────────────────────────────────

    #[test]
    fn test_increment_then_decrement_replays_to_original() {
        let mut ctx = ComponentContext::new("c0");
        ctx.state("count", CellValue::from(10i64));
        ctx.register_action("wiggle", 0, |scope| {
            scope.cell("count")?.increment(3.0);
            scope.cell("count")?.decrement(3.0);
            Ok(())
        })
        .unwrap();

        let ops = ctx.action("wiggle").unwrap().operations.clone();
        let result = replay(&[("s0", CellValue::from(10i64))], &ops, &[]);
        assert_eq!(result["s0"], CellValue::from(10i64));
    }

    #[test]
    fn test_push_then_pop_replays_to_original() {
        let initial = CellValue::Array(vec![CellValue::from("keep")]);
        let mut ctx = ComponentContext::new("c0");
        ctx.state("items", initial.clone());
        ctx.register_action_source("churn", "items[] = 'x'\nitems.pop()").unwrap();

        let ops = ctx.action("churn").unwrap().operations.clone();
        let result = replay(&[("s0", initial.clone())], &ops, &[]);
        assert_eq!(result["s0"], initial);
    }

    // ── structured mutations ──────────────────────────────────────────────

    #[test]
    fn test_update_merge_remove_replay() {
        let initial = CellValue::Object(vec![
            ("name".to_string(), CellValue::from("old")),
            ("stale".to_string(), CellValue::from(true)),
        ]);
        let mut ctx = ComponentContext::new("c0");
        ctx.state("user", initial.clone());
        ctx.register_action_source(
            "touch",
            "user['name'] = 'ada'\nuser.merge({ role: 'admin' })\nuser.remove('stale')",
        )
        .unwrap();

        let ops = ctx.action("touch").unwrap().operations.clone();
        assert_eq!(ops.len(), 3);
        assert!(matches!(ops[0], Operation::Update { .. }));
        assert!(matches!(ops[1], Operation::Merge { .. }));
        assert!(matches!(ops[2], Operation::Remove { .. }));

        let result = replay(&[("s0", initial)], &ops, &[]);
        assert_eq!(
            result["s0"],
            CellValue::Object(vec![
                ("name".to_string(), CellValue::from("ada")),
                ("role".to_string(), CellValue::from("admin")),
            ])
        );
    }

    #[test]
    fn test_keyed_compound_assignment_degrades_to_expr() {
        let mut ctx = ComponentContext::new("c0");
        ctx.state(
            "scores",
            CellValue::Object(vec![("a".to_string(), CellValue::from(1i64))]),
        );
        ctx.register_action_source("bump", "scores['a'] += 1").unwrap();

        let ops = ctx.action("bump").unwrap().operations.clone();
        assert_eq!(ops.len(), 1);
        match &ops[0] {
            Operation::Expr { slot, expr } => {
                assert_eq!(slot, "s0");
                assert!(expr.contains("state['s0'].get()"));
                assert!(expr.contains("return __v"));
            }
            other => panic!("expected expr operation, found {:?}", other),
        }
    }

    // ── failure paths ─────────────────────────────────────────────────────

    #[test]
    fn test_handler_error_propagates_and_releases_recording() {
        let mut ctx = ComponentContext::new("c0");
        ctx.state("count", CellValue::from(0i64));

        let err = ctx.register_action("boom", 0, |scope| {
            scope.cell("count")?.increment(1.0);
            Err("handler exploded".to_string())
        });
        assert_eq!(err, Err("handler exploded".to_string()));
        assert!(!ctx.has_action("boom"));

        // A later registration under the same name records normally.
        ctx.register_action("boom", 0, |scope| {
            scope.cell("count")?.toggle();
            Ok(())
        })
        .unwrap();
        assert!(ctx.has_action("boom"));
    }

    #[test]
    fn test_unparseable_source_fails_loudly() {
        let mut ctx = ComponentContext::new("c0");
        ctx.state("count", CellValue::from(0i64));
        assert!(ctx.register_action_source("bad", "count\n= 1").is_err());
        assert!(!ctx.has_action("bad"));
    }

    // ── direct mode ───────────────────────────────────────────────────────

    #[test]
    fn test_direct_mutation_outside_recording() {
        let mut ctx = ComponentContext::new("c0");
        ctx.state("count", CellValue::from(1i64));
        ctx.cell("count").unwrap().increment(4.0);
        ctx.cell("count").unwrap().set(CellValue::from(9i64));
        assert_eq!(ctx.value("count"), Some(&CellValue::from(9i64)));
        // nothing was recorded
        assert!(ctx.payload().actions.is_empty());
    }

    // ── payload shape ─────────────────────────────────────────────────────

    #[test]
    fn test_payload_round_trip_preserves_order() {
        let mut ctx = ComponentContext::new("c3");
        ctx.state("count", CellValue::from(5i64));
        ctx.state("items", CellValue::Array(vec![]));
        ctx.register_action_source("zebra", "count++").unwrap();
        ctx.register_action_source("apple", "items[] = 1").unwrap();

        let payload = ctx.payload();
        assert_eq!(payload.states[0].id, "s0");
        assert_eq!(payload.states[1].id, "s1");
        assert_eq!(payload.actions.0[0].0, "zebra");
        assert_eq!(payload.actions.0[1].0, "apple");
        assert!(payload.integrity_errors().is_empty());

        let json = serde_json::to_string(&payload).unwrap();
        assert!(json.contains("\"type\":\"increment\""));
        let back: crate::payload::ComponentPayload = serde_json::from_str(&json).unwrap();
        assert_eq!(back, payload);
    }
}
