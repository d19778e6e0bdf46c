mod common;

use cardtree_core::model::CardValue;
use cardtree_core::registry::{self, RegistryError};
use cardtree_core::{FormulaError, Number, Value};
use chrono::NaiveDate;
use common::planning;

fn date(year: i32, month: u32, day: u32) -> Value {
    Value::Date(NaiveDate::from_ymd_opt(year, month, day).unwrap())
}

#[test]
fn date_plus_numeric_product_rounds_to_whole_days() {
    let mut fx = planning();
    let story = fx.story;
    registry::create_formula(
        fx.service.project_mut(),
        "due date",
        "'start date' + (estimate * 2)",
        &[story],
    )
    .unwrap();
    let card = fx.card("story1", "Story");

    fx.set(card, "start date", "20 Dec 2009");
    fx.set(card, "estimate", "2.32");

    assert_eq!(
        fx.service.evaluate_formula("due date", card).unwrap(),
        Some(date(2009, 12, 25))
    );
    assert_eq!(fx.display(card, "due date").as_deref(), Some("25 Dec 2009"));
}

#[test]
fn date_minus_quotient_rounds_to_whole_days() {
    let mut fx = planning();
    let story = fx.story;
    registry::create_formula(
        fx.service.project_mut(),
        "kickoff",
        "'start date' - (size / estimate)",
        &[story],
    )
    .unwrap();
    let card = fx.card("story1", "Story");

    fx.set(card, "start date", "2009-12-20");
    fx.set(card, "estimate", "2.32");
    fx.set(card, "size", "5");

    assert_eq!(fx.display(card, "kickoff").as_deref(), Some("18 Dec 2009"));
}

#[test]
fn nil_operand_makes_the_result_nil() {
    let mut fx = planning();
    let story = fx.story;
    registry::create_formula(
        fx.service.project_mut(),
        "due date",
        "'start date' + (estimate * 2)",
        &[story],
    )
    .unwrap();
    let card = fx.card("story1", "Story");
    fx.set(card, "start date", "20 Dec 2009");

    assert_eq!(fx.service.evaluate_formula("due date", card).unwrap(), None);
    assert_eq!(fx.display(card, "due date"), None);

    fx.set(card, "estimate", "1");
    assert_eq!(fx.display(card, "due date").as_deref(), Some("22 Dec 2009"));

    fx.set(card, "estimate", "(not set)");
    assert_eq!(fx.display(card, "due date"), None);
}

#[test]
fn division_by_zero_is_nil() {
    let mut fx = planning();
    let story = fx.story;
    registry::create_formula(fx.service.project_mut(), "ratio", "size / estimate", &[story])
        .unwrap();
    let card = fx.card("story1", "Story");
    fx.set(card, "size", "3");
    fx.set(card, "estimate", "0");

    assert_eq!(fx.service.evaluate_formula("ratio", card).unwrap(), None);
}

#[test]
fn numeric_results_drop_redundant_trailing_zeros() {
    let mut fx = planning();
    let story = fx.story;
    registry::create_formula(fx.service.project_mut(), "double", "estimate * 2", &[story])
        .unwrap();
    let card = fx.card("story1", "Story");

    fx.set(card, "estimate", "8.00");
    assert_eq!(fx.display(card, "double").as_deref(), Some("16"));

    fx.set(card, "estimate", "1.25");
    assert_eq!(fx.display(card, "double").as_deref(), Some("2.5"));
    assert_eq!(
        fx.service.evaluate_formula("double", card).unwrap(),
        Some(Value::Number(Number::parse("2.5").unwrap()))
    );
}

#[test]
fn date_difference_counts_days() {
    let mut fx = planning();
    let story = fx.story;
    let project = fx.service.project_mut();
    registry::create_property(
        project,
        "end date",
        cardtree_core::PropertyKind::Date,
        &[story],
    )
    .unwrap();
    registry::create_formula(project, "duration", "'end date' - 'start date'", &[story]).unwrap();
    let card = fx.card("story1", "Story");

    fx.set(card, "start date", "20 Dec 2009");
    fx.set(card, "end date", "31 Dec 2009");

    assert_eq!(fx.display(card, "duration").as_deref(), Some("11"));
}

#[test]
fn formula_not_applicable_to_the_card_evaluates_to_none() {
    let mut fx = planning();
    let story = fx.story;
    registry::create_formula(fx.service.project_mut(), "double", "estimate * 2", &[story])
        .unwrap();
    let task = fx.card("task1", "Task");
    fx.set(task, "estimate", "3");

    assert_eq!(fx.service.evaluate_formula("double", task).unwrap(), None);
}

#[test]
fn definition_rejects_bad_references_and_types() {
    let mut fx = planning();
    let (story, task) = (fx.story, fx.task);
    let project = fx.service.project_mut();

    assert!(matches!(
        registry::create_formula(project, "f1", "missing * 2", &[story]),
        Err(RegistryError::Formula(FormulaError::UndefinedProperty(_)))
    ));
    assert!(matches!(
        registry::create_formula(project, "f2", "'start date' + 1", &[task]),
        Err(RegistryError::Formula(FormulaError::NotApplicable { .. }))
    ));
    assert!(matches!(
        registry::create_formula(project, "f3", "owner * 2", &[story]),
        Err(RegistryError::Formula(FormulaError::UnsupportedOperand { .. }))
    ));
    assert!(matches!(
        registry::create_formula(project, "f4", "'start date' + 'start date'", &[story]),
        Err(RegistryError::Formula(FormulaError::TypeMismatch { op: '+', .. }))
    ));
    assert!(matches!(
        registry::create_formula(project, "f5", "f5 + 1", &[story]),
        Err(RegistryError::Formula(FormulaError::CircularReference(_)))
    ));
    assert!(project.property_by_name("f1").is_none());
}

#[test]
fn formulas_read_other_formulas() {
    let mut fx = planning();
    let story = fx.story;
    let project = fx.service.project_mut();
    registry::create_formula(project, "double", "estimate * 2", &[story]).unwrap();
    registry::create_formula(project, "quadruple", "double * 2", &[story]).unwrap();
    let card = fx.card("story1", "Story");

    fx.set(card, "estimate", "1.5");

    assert_eq!(fx.display(card, "double").as_deref(), Some("3"));
    assert_eq!(fx.display(card, "quadruple").as_deref(), Some("6"));
}

#[test]
fn day_offsets_round_once_per_formula() {
    let mut fx = planning();
    let story = fx.story;
    registry::create_formula(
        fx.service.project_mut(),
        "review date",
        "'start date' + estimate - 1.3",
        &[story],
    )
    .unwrap();
    let card = fx.card("story1", "Story");

    fx.set(card, "start date", "20 Dec 2009");
    fx.set(card, "estimate", "2.6");

    assert_eq!(
        fx.service.evaluate_formula("review date", card).unwrap(),
        Some(date(2009, 12, 21))
    );
}

#[test]
fn deeply_nested_formula_is_rejected_at_definition() {
    let mut fx = planning();
    let story = fx.story;
    let source = format!("{}estimate{}", "(".repeat(20_000), ")".repeat(20_000));

    let err = registry::create_formula(fx.service.project_mut(), "deep", &source, &[story])
        .unwrap_err();

    assert!(matches!(
        err,
        RegistryError::Formula(FormulaError::NestingTooDeep { .. })
    ));
    assert!(fx.service.project().property_by_name("deep").is_none());
}

#[test]
fn property_reads_follow_the_property_kind() {
    let mut fx = planning();
    let story = fx.story;
    registry::create_formula(fx.service.project_mut(), "double", "estimate * 2", &[story])
        .unwrap();
    let card = fx.card("story1", "Story");
    fx.set(card, "estimate", "1.5");
    fx.set(card, "size", "5");
    fx.set(card, "status", "Done");
    fx.set(card, "owner", "ana");

    let project = fx.service.project();
    let read = |name: &str| {
        project
            .property_by_name(name)
            .unwrap()
            .value_for(project, card)
    };

    assert_eq!(read("double"), Some(CardValue::Number(Number::from_integer(3))));
    assert_eq!(read("size"), Some(CardValue::Number(Number::from_integer(5))));
    assert_eq!(read("status"), Some(CardValue::Position(3)));
    assert_eq!(read("owner"), Some(CardValue::Text("ana".to_string())));
    assert_eq!(read("start date"), None);
}
