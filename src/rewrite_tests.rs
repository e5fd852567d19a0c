//! Rewriter breadth tests: full bodies, mixed mutation syntax, access
//! contexts that must survive untouched.

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use std::collections::HashSet;

    use crate::rewrite::rewrite_source;

    fn bound(names: &[&str]) -> HashSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_full_action_body_mixed_syntax() {
        let source = "action submit(note) {\n  count++\n  total += count\n  items[] = note\n  flag = !flag\n}";
        let out = rewrite_source(source, &bound(&["count", "total", "items", "flag"]));
        assert!(out.changed);
        assert_eq!(
            out.source,
            "action submit(note) {\n  count.increment(1)\n  total.set(total.get() + (count.get()))\n  items.push(note)\n  flag.set(!flag.get())\n}"
        );
    }

    #[test]
    fn test_semicolon_separated_steps() {
        let out = rewrite_source("count++; count--;", &bound(&["count"]));
        assert_eq!(out.source, "count.increment(1); count.decrement(1);");
    }

    #[test]
    fn test_explicit_calls_left_alone_but_arguments_rewritten() {
        let out = rewrite_source("other.set(count + 1)", &bound(&["other", "count"]));
        assert!(out.changed);
        assert_eq!(out.source, "other.set(count.get() + 1)");
    }

    #[test]
    fn test_already_explicit_source_is_flagged_unchanged() {
        let out = rewrite_source("items.pop()", &bound(&["items"]));
        assert!(!out.changed);
        assert_eq!(out.source, "items.pop()");
    }

    #[test]
    fn test_keyed_compound_assignment() {
        let out = rewrite_source("scores['a'] += 1", &bound(&["scores"]));
        assert_eq!(
            out.source,
            "scores.update('a', scores.get()['a'] + (1))"
        );
    }

    #[test]
    fn test_reads_inside_ternary_rewritten() {
        let out = rewrite_source(
            "label = count > 9 ? 'many' : 'few'",
            &bound(&["label", "count"]),
        );
        assert_eq!(
            out.source,
            "label.set(count.get() > 9 ? 'many' : 'few')"
        );
    }

    #[test]
    fn test_static_path_context_untouched() {
        let out = rewrite_source("total = Math::max(total, 0)", &bound(&["total"]));
        // The read inside the call argument is rewritten; the assignment
        // target becomes a set; the static path stays.
        assert_eq!(out.source, "total.set(Math::max(total.get(), 0))");
    }

    #[test]
    fn test_expression_position_increment_left_for_parser() {
        let out = rewrite_source("offset = count++", &bound(&["offset", "count"]));
        assert_eq!(out.source, "offset.set(count++)");
    }

    #[test]
    fn test_tokenizer_failure_returns_original_flagged() {
        let out = rewrite_source("count ~ 1", &bound(&["count"]));
        assert!(!out.changed);
        assert_eq!(out.source, "count ~ 1");
    }

    #[test]
    fn test_property_assignment_becomes_update() {
        let out = rewrite_source("user.name = 'ada'", &bound(&["user"]));
        assert_eq!(out.source, "user.update('name', 'ada')");
    }

    #[test]
    fn test_property_compound_assignment() {
        let out = rewrite_source("user.age += 1", &bound(&["user"]));
        assert_eq!(out.source, "user.update('age', user.get().age + (1))");
    }

    #[test]
    fn test_divide_and_modulo_compound() {
        let out = rewrite_source("count /= 2\ncount %= 3", &bound(&["count"]));
        assert_eq!(
            out.source,
            "count.set(count.get() / (2))\ncount.set(count.get() % (3))"
        );
    }
}
