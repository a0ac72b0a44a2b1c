//! End-to-end tests against an in-memory exporter.

use std::collections::HashMap;
use std::sync::{Arc, Barrier, Mutex, MutexGuard, OnceLock, PoisonError};

use opentelemetry::trace::{SpanId, Status};
use opentelemetry::{global, Value};
use opentelemetry_sdk::trace::{InMemorySpanExporter, SdkTracerProvider, SpanData};
use otelme::{tell, Error};

/// Installs a global provider exporting into memory, once per process, and
/// serializes tests so each sees only its own spans.
fn exporter() -> (&'static InMemorySpanExporter, MutexGuard<'static, ()>) {
    static LOCK: Mutex<()> = Mutex::new(());
    static EXPORTER: OnceLock<InMemorySpanExporter> = OnceLock::new();

    let guard = LOCK.lock().unwrap_or_else(PoisonError::into_inner);
    let exporter = EXPORTER.get_or_init(|| {
        let exporter = InMemorySpanExporter::default();
        let provider = SdkTracerProvider::builder()
            .with_simple_exporter(exporter.clone())
            .build();
        global::set_tracer_provider(provider);
        exporter
    });
    exporter.reset();
    (exporter, guard)
}

fn finished(exporter: &InMemorySpanExporter) -> Vec<SpanData> {
    exporter.get_finished_spans().expect("exporter lock")
}

/// Last recorded value for `key`, since `set_attribute` may append.
fn attr(span: &SpanData, key: &str) -> Option<Value> {
    span.attributes
        .iter()
        .rev()
        .find(|kv| kv.key.as_str() == key)
        .map(|kv| kv.value.clone())
}

#[test]
fn pipe_records_an_attribute_and_passes_through() {
    let (exporter, _guard) = exporter();

    tell("aspan").in_scope(|| {
        assert_eq!(tell("a") | "b", "b");
    });

    let spans = finished(exporter);
    assert_eq!(spans.len(), 1);
    assert_eq!(spans[0].name, "aspan");
    assert_eq!(attr(&spans[0], "a"), Some(Value::from("b")));
}

#[test]
fn pipe_works_right_handed() {
    let (exporter, _guard) = exporter();

    tell("right-handed").in_scope(|| {
        assert_eq!(7i64 | tell("val"), 7);
    });

    let spans = finished(exporter);
    assert_eq!(spans[0].name, "right-handed");
    assert_eq!(attr(&spans[0], "val"), Some(Value::I64(7)));
}

#[test]
fn add_snapshots_a_term_inside_a_larger_expression() {
    let (exporter, _guard) = exporter();

    tell("arithmetic").in_scope(|| {
        assert_eq!(tell("nine") + 9 - 2, 7);
        assert_eq!(tell("seven") + 7, 7);
        assert_eq!(tell("shoved") << 3, 3);
    });

    let spans = finished(exporter);
    let span = &spans[0];
    assert_eq!(attr(span, "nine"), Some(Value::I64(9)));
    assert_eq!(attr(span, "seven"), Some(Value::I64(7)));
    assert_eq!(attr(span, "shoved"), Some(Value::I64(3)));
}

#[test]
fn attribute_spellings_are_equivalent() {
    let (exporter, _guard) = exporter();

    tell("spellings").in_scope(|| {
        tell("a") | 1i64;
        tell("b") << 1i64;
        tell("c") + 1i64;
    });

    let spans = finished(exporter);
    for key in ["a", "b", "c"] {
        assert_eq!(attr(&spans[0], key), Some(Value::I64(1)));
    }
}

#[test]
fn splat_records_an_event_with_the_mapping_pairs() {
    let (exporter, _guard) = exporter();

    let details = HashMap::from([("userId", "123"), ("userEmail", "snek@example.com")]);
    tell("spatter").in_scope(|| {
        let returned = tell("user.signup") * &details;
        assert_eq!(returned, &details);
    });

    let spans = finished(exporter);
    let span = &spans[0];
    assert_eq!(span.name, "spatter");
    let event = span.events.first().expect("one event");
    assert_eq!(event.name, "user.signup");
    assert_eq!(event.attributes.len(), 2);
    for (key, value) in &details {
        let recorded = event
            .attributes
            .iter()
            .find(|kv| kv.key.as_str() == *key)
            .expect("event attribute");
        assert_eq!(recorded.value, Value::from(*value));
    }
}

#[test]
fn fan_out_prefixes_each_pair_as_an_attribute() {
    let (exporter, _guard) = exporter();

    tell("spatter").in_scope(|| {
        tell("user.signup") >> [("userId", "123"), ("userEmail", "snek@example.com")];
    });

    let spans = finished(exporter);
    let span = &spans[0];
    assert_eq!(attr(span, "user.signup.userId"), Some(Value::from("123")));
    assert_eq!(
        attr(span, "user.signup.userEmail"),
        Some(Value::from("snek@example.com"))
    );
}

#[test]
fn counts_accumulate_within_a_span() {
    let (exporter, _guard) = exporter();

    tell("summation").in_scope(|| {
        assert_eq!(tell("seven").count(7), 7);
        assert_eq!(tell("zero").count(1), 1);
        assert_eq!(tell("zero").count(1), 2);
        assert_eq!(tell("neg").count(-1), -1);
    });

    let spans = finished(exporter);
    let span = &spans[0];
    assert_eq!(attr(span, "seven"), Some(Value::I64(7)));
    assert_eq!(attr(span, "zero"), Some(Value::I64(2)));
    assert_eq!(attr(span, "neg"), Some(Value::I64(-1)));
}

#[test]
fn counts_do_not_leak_between_spans() {
    let (exporter, _guard) = exporter();

    tell("first").in_scope(|| tell("n").count(1));
    tell("second").in_scope(|| tell("n").count(1));

    let spans = finished(exporter);
    assert_eq!(attr(&spans[0], "n"), Some(Value::I64(1)));
    assert_eq!(attr(&spans[1], "n"), Some(Value::I64(1)));
}

#[test]
fn nested_scopes_parent_correctly_and_exit_independently() {
    let (exporter, _guard) = exporter();

    let outer = tell("outer").enter();
    let inner = tell("inner").enter();
    drop(inner);
    // Outer is current again and still open.
    tell("after_inner") | true;
    drop(outer);

    let spans = finished(exporter);
    assert_eq!(spans.len(), 2);
    let inner = spans.iter().find(|s| s.name == "inner").expect("inner");
    let outer = spans.iter().find(|s| s.name == "outer").expect("outer");
    assert_eq!(inner.parent_span_id, outer.span_context.span_id());
    assert_eq!(outer.parent_span_id, SpanId::INVALID);
    assert_eq!(attr(outer, "after_inner"), Some(Value::Bool(true)));
    assert_eq!(attr(inner, "after_inner"), None);
}

#[test]
fn panicking_bodies_close_the_span_with_error_status() {
    let (exporter, _guard) = exporter();

    let result = std::panic::catch_unwind(|| {
        tell("zeroed").in_scope(|| {
            panic!("division by zero");
        })
    });
    assert!(result.is_err());

    let spans = finished(exporter);
    assert_eq!(spans[0].name, "zeroed");
    assert!(matches!(spans[0].status, Status::Error { .. }));
}

#[test]
fn operators_are_silent_without_an_open_scope() {
    let (exporter, _guard) = exporter();

    assert_eq!(tell("a") | 5i64, 5);
    assert_eq!(tell("a") + 5i64, 5);
    let mapping = [("k", "v")];
    assert_eq!(tell("a") * mapping, mapping);
    assert_eq!(tell("a").count(3), 3);

    assert!(finished(exporter).is_empty());
}

#[test]
fn out_of_order_exits_are_surfaced_and_recovered_from() {
    let (exporter, _guard) = exporter();

    let outer = tell("outer").enter();
    let inner = tell("inner").enter();
    assert!(matches!(outer.exit(), Err(Error::ScopeMismatch { .. })));
    assert!(inner.exit().is_ok());

    // Both spans were still ended and the stack is clean again.
    assert_eq!(finished(exporter).len(), 2);
    tell("fresh").in_scope(|| {});
    let spans = finished(exporter);
    let fresh = spans.iter().find(|s| s.name == "fresh").expect("fresh");
    assert_eq!(fresh.parent_span_id, SpanId::INVALID);
}

#[test]
fn active_span_reaches_the_current_span() {
    let (exporter, _guard) = exporter();

    tell("manual").in_scope(|| {
        otelme::active_span(|span| span.add_event("checkpoint", vec![]));
    });

    let spans = finished(exporter);
    let event = spans[0].events.first().expect("one event");
    assert_eq!(event.name, "checkpoint");
}

#[test]
fn threads_do_not_observe_each_others_scopes() {
    let (exporter, _guard) = exporter();

    let barrier = Arc::new(Barrier::new(2));
    let workers: Vec<_> = ["alpha", "beta"]
        .into_iter()
        .map(|who| {
            let barrier = Arc::clone(&barrier);
            std::thread::spawn(move || {
                let scope = tell("work").enter();
                // Both scopes are open at the same time.
                barrier.wait();
                tell("who") | who;
                barrier.wait();
                drop(scope);
            })
        })
        .collect();
    for worker in workers {
        worker.join().expect("worker panicked");
    }

    let spans = finished(exporter);
    assert_eq!(spans.len(), 2);
    assert!(spans.iter().all(|s| s.name == "work"));
    assert!(spans.iter().all(|s| s.parent_span_id == SpanId::INVALID));
    assert_ne!(
        spans[0].span_context.span_id(),
        spans[1].span_context.span_id()
    );
    let whos: Vec<_> = spans.iter().filter_map(|s| attr(s, "who")).collect();
    assert!(whos.contains(&Value::from("alpha")));
    assert!(whos.contains(&Value::from("beta")));
}

mod decorated {
    use super::*;

    #[otelme::tell]
    fn wave(value: i64) {
        tell("val") | value;
    }

    #[otelme::tell("gee")]
    fn gust(value: &str) -> usize {
        tell("val") | value;
        value.len()
    }

    #[otelme::tell(name = "renamed")]
    fn original_identifier() {}

    #[test]
    fn bare_decoration_names_the_span_after_the_function() {
        let (exporter, _guard) = exporter();

        wave(7);

        let spans = finished(exporter);
        assert_eq!(spans[0].name, "wave");
        assert_eq!(attr(&spans[0], "val"), Some(Value::I64(7)));
    }

    #[test]
    fn explicit_names_override_the_identifier() {
        let (exporter, _guard) = exporter();

        assert_eq!(gust("whiz"), 4);
        original_identifier();

        let spans = finished(exporter);
        assert_eq!(spans[0].name, "gee");
        assert_eq!(attr(&spans[0], "val"), Some(Value::from("whiz")));
        assert_eq!(spans[1].name, "renamed");
    }

    #[test]
    fn each_invocation_gets_its_own_span() {
        let (exporter, _guard) = exporter();

        wave(1);
        wave(2);

        let spans = finished(exporter);
        assert_eq!(spans.len(), 2);
        assert_ne!(
            spans[0].span_context.span_id(),
            spans[1].span_context.span_id()
        );
    }
}
