use std::time::{Duration, Instant};

use doc_engine::{Document, FormulaEngine, FormulaError, Value};

const DEPENDENCIES: &str = include_str!("fixtures/formula_dependencies.json");
const CIRCULAR: &str = include_str!("fixtures/circular_formulas.json");

fn load(text: &str) -> Document {
    Document::from_json(text).expect("fixture parses")
}

fn number(engine: &mut FormulaEngine, document: &Document, field_id: &str) -> f64 {
    engine
        .field_value(document, field_id)
        .and_then(|value| value.as_number())
        .unwrap_or(f64::NAN)
}

#[test]
fn dependency_chain_resolves_in_order() {
    let document = load(DEPENDENCIES);
    let mut engine = FormulaEngine::new(&document);
    assert_eq!(number(&mut engine, &document, "f1"), 14.0);
    assert_eq!(number(&mut engine, &document, "f5"), 3.0);
    assert_eq!(number(&mut engine, &document, "f4"), 6.0);
    assert_eq!(number(&mut engine, &document, "f3"), 9.0);
    for id in ["f1", "f3", "f4", "f5"] {
        assert!(engine.diagnostic(id).is_none(), "{id} should resolve cleanly");
    }
}

#[test]
fn self_reference_defaults_quickly() {
    let document = load(CIRCULAR);
    let mut engine = FormulaEngine::new(&document);
    let started = Instant::now();
    assert_eq!(number(&mut engine, &document, "self"), 0.0);
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(
        engine.diagnostic("self"),
        Some(&FormulaError::CircularReference("self".into()))
    );
    assert_eq!(number(&mut engine, &document, "self_reader"), 10.0);
    assert!(engine.diagnostic("self_reader").is_none());
}

#[test]
fn indirect_cycle_feeds_defaults_to_readers() {
    let document = load(CIRCULAR);
    let mut engine = FormulaEngine::new(&document);
    let started = Instant::now();
    assert_eq!(number(&mut engine, &document, "pair_sum"), 0.0);
    assert_eq!(number(&mut engine, &document, "pair_a"), 0.0);
    assert_eq!(number(&mut engine, &document, "pair_b"), 0.0);
    assert!(engine.diagnostic("pair_sum").is_none());
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn long_chain_cycle_defaults_every_member() {
    let document = load(CIRCULAR);
    let mut engine = FormulaEngine::new(&document);
    let started = Instant::now();
    for id in ["ring_2", "ring_3", "ring_4", "ring_5"] {
        assert_eq!(number(&mut engine, &document, id), 0.0, "{id}");
        assert!(engine.is_cyclic(id));
    }
    assert_eq!(
        engine.field_value(&document, "label"),
        Some(Value::Text("ring: 0".into()))
    );
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn cycles_inside_function_calls_are_detected() {
    let document = load(CIRCULAR);
    let mut engine = FormulaEngine::new(&document);
    for id in ["wrapped_a", "wrapped_b", "mapped_a", "mapped_b"] {
        assert!(engine.is_cyclic(id), "{id} should be on a cycle");
        assert_eq!(number(&mut engine, &document, id), 0.0, "{id}");
        assert!(matches!(
            engine.diagnostic(id),
            Some(FormulaError::CircularReference(_))
        ));
    }
    assert!(!engine.is_cyclic("mapped_c"));
}

#[test]
fn whole_document_resolves_within_bound() {
    let document = load(CIRCULAR);
    let started = Instant::now();
    let mut engine = FormulaEngine::new(&document);
    let resolved = engine.resolved_document(&document);
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(resolved.field("self").expect("self").value, Value::Number(0.0));
    assert_eq!(resolved.field("mapped_c").expect("mapped_c").value, Value::Number(4.0));
}

#[test]
fn repeated_reads_are_identical() {
    let document = load(CIRCULAR);
    let mut engine = FormulaEngine::new(&document);
    let first: Vec<Option<Value>> = document
        .fields
        .iter()
        .map(|field| engine.field_value(&document, &field.id))
        .collect();
    let second: Vec<Option<Value>> = document
        .fields
        .iter()
        .map(|field| engine.field_value(&document, &field.id))
        .collect();
    assert_eq!(first, second);
    let bits = |values: &[Option<Value>]| -> Vec<Option<u64>> {
        values
            .iter()
            .map(|value| value.as_ref().and_then(Value::as_number).map(f64::to_bits))
            .collect()
    };
    assert_eq!(bits(&first), bits(&second));
}

#[test]
fn invalidation_does_not_revive_broken_cycles() {
    let mut document = load(DEPENDENCIES);
    let mut engine = FormulaEngine::new(&document);
    assert_eq!(number(&mut engine, &document, "f1"), 14.0);

    document.field_mut("f6").expect("f6").value = Value::Number(11.0);
    let mut invalidated = engine.invalidate("f6");
    invalidated.sort();
    assert_eq!(invalidated, vec!["f1", "f3", "f4", "f5"]);
    assert_eq!(number(&mut engine, &document, "f5"), 13.0);
    assert_eq!(number(&mut engine, &document, "f1"), 34.0);

    let circular = load(CIRCULAR);
    let mut engine = FormulaEngine::new(&circular);
    assert_eq!(number(&mut engine, &circular, "pair_a"), 0.0);
    engine.invalidate("pair_b");
    assert_eq!(number(&mut engine, &circular, "pair_a"), 0.0);
    assert_eq!(number(&mut engine, &circular, "pair_a"), 0.0);
}
