mod common;

use cardtree_core::aggregate::{AggregateDef, AggregateScope, AggregateType, Condition};
use cardtree_core::registry;
use cardtree_core::scheduler::{self, Trigger};
use cardtree_core::{EngineError, PropertyDefId};
use common::{planning, Planning, ITERATION_REL};
use std::collections::BTreeSet;

/// `dev size = size * 2`, `dave size = 3 * 'dev size'` on Story and an
/// iteration-level sum of `dave size`.
fn chained() -> Planning {
    let mut fx = planning();
    let (story, iteration, tree) = (fx.story, fx.iteration, fx.tree);
    let project = fx.service.project_mut();
    registry::create_formula(project, "dev size", "size * 2", &[story]).unwrap();
    registry::create_formula(project, "dave size", "3 * 'dev size'", &[story]).unwrap();
    let target = project.property_by_name("dave size").unwrap().id;
    registry::create_aggregate(
        project,
        "iteration dave size",
        AggregateDef {
            aggregate_type: AggregateType::Sum,
            tree,
            scoping_card_type: iteration,
            scope: AggregateScope::CardType { card_type: story },
            target: Some(target),
            condition: None,
        },
    )
    .unwrap();
    fx
}

fn id(fx: &Planning, name: &str) -> PropertyDefId {
    fx.service.project().property_by_name(name).unwrap().id
}

#[test]
fn plan_orders_definitions_after_their_inputs() {
    let mut fx = chained();
    let iteration = fx.card("iteration1", "Iteration");
    let story = fx.card("story1", "Story");
    fx.reparent(story, ITERATION_REL, iteration);

    let plan = scheduler::plan(
        fx.service.project(),
        &[Trigger::PropertyValues {
            cards: BTreeSet::from([story]),
            properties: BTreeSet::from([id(&fx, "size")]),
        }],
    );

    assert_eq!(plan.steps[2].cards, BTreeSet::from([iteration]));
    assert_eq!(
        plan.properties(),
        vec![
            id(&fx, "dev size"),
            id(&fx, "dave size"),
            id(&fx, "iteration dave size")
        ]
    );
}

#[test]
fn unrelated_changes_plan_nothing() {
    let mut fx = chained();
    let story = fx.card("story1", "Story");

    let plan = scheduler::plan(
        fx.service.project(),
        &[Trigger::PropertyValues {
            cards: BTreeSet::from([story]),
            properties: BTreeSet::from([id(&fx, "owner")]),
        }],
    );

    assert!(plan.is_empty());
}

#[test]
fn value_changes_cascade_through_formulas_and_aggregates() {
    let mut fx = chained();
    let iteration = fx.card("iteration1", "Iteration");
    let story1 = fx.card("story1", "Story");
    let story2 = fx.card("story2", "Story");
    fx.reparent(story1, ITERATION_REL, iteration);
    fx.reparent(story2, ITERATION_REL, iteration);

    fx.set(story1, "size", "2");
    fx.set(story2, "size", "1");

    assert_eq!(fx.display(story1, "dev size").as_deref(), Some("4"));
    assert_eq!(fx.display(story1, "dave size").as_deref(), Some("12"));
    assert_eq!(
        fx.display(iteration, "iteration dave size").as_deref(),
        Some("18")
    );

    fx.set(story2, "size", "(not set)");
    assert_eq!(fx.display(story2, "dave size"), None);
    assert_eq!(
        fx.display(iteration, "iteration dave size").as_deref(),
        Some("12")
    );
}

#[test]
fn deleting_a_formula_component_is_blocked() {
    let mut fx = chained();

    let err = fx.service.delete_property("dev size").unwrap_err();
    match &err {
        EngineError::BlockedOperation {
            property, blocking, ..
        } => {
            assert_eq!(property, "dev size");
            assert_eq!(blocking, "dave size");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(
        err.to_string(),
        "cannot proceed: dev size is used as a component of formula dave size"
    );
    assert!(fx.service.project().property_by_name("dev size").is_some());
}

#[test]
fn deleting_an_aggregate_target_is_blocked() {
    let mut fx = chained();

    let err = fx.service.delete_property("dave size").unwrap_err();

    assert_eq!(
        err.to_string(),
        "cannot proceed: dave size is the target of aggregate iteration dave size"
    );
}

#[test]
fn deleting_a_condition_input_is_blocked() {
    let mut fx = planning();
    let (story, task, tree) = (fx.story, fx.task, fx.tree);
    registry::create_aggregate(
        fx.service.project_mut(),
        "open tasks",
        AggregateDef {
            aggregate_type: AggregateType::Count,
            tree,
            scoping_card_type: story,
            scope: AggregateScope::CardType { card_type: task },
            target: None,
            condition: Some(Condition::parse("status != Done").unwrap()),
        },
    )
    .unwrap();

    let err = fx.service.delete_property("status").unwrap_err();

    assert!(matches!(
        err,
        EngineError::BlockedOperation { ref blocking, .. } if blocking == "open tasks"
    ));
}

#[test]
fn unused_properties_delete_and_clear_their_values() {
    let mut fx = chained();
    let story = fx.card("story1", "Story");
    fx.set(story, "owner", "member");
    let owner = id(&fx, "owner");

    fx.service.delete_property("owner").unwrap();

    let project = fx.service.project();
    assert!(project.property_by_name("owner").is_none());
    assert!(project.card(story).unwrap().value(owner).is_none());
    assert!(project
        .card_type_by_name("Story")
        .is_some_and(|story_type| !story_type.has_property(owner)));
}

#[test]
fn dissociation_is_blocked_only_where_a_formula_applies() {
    let mut fx = chained();
    let story = fx.card("story1", "Story");
    let task = fx.card("task1", "Task");
    fx.set(story, "size", "3");
    fx.set(task, "size", "5");

    let err = fx.service.dissociate("size", "Story").unwrap_err();
    assert!(matches!(err, EngineError::BlockedOperation { .. }));

    let cleared = fx.service.dissociate("size", "Task").unwrap();
    assert_eq!(cleared, vec![task]);
    assert_eq!(fx.display(task, "size"), None);
    assert_eq!(fx.display(story, "size").as_deref(), Some("3"));
    assert_eq!(fx.display(story, "dave size").as_deref(), Some("18"));
}

#[test]
fn recompute_all_restores_cached_values() {
    let mut fx = chained();
    let story = fx.card("story1", "Story");
    fx.set(story, "size", "5");
    let dave = id(&fx, "dave size");
    fx.service.project_mut().set_value(story, dave, None);

    let report = fx.service.recompute_all().unwrap();

    assert!(report.changed_cards.contains(&story));
    assert_eq!(fx.display(story, "dave size").as_deref(), Some("30"));
}

fn size_change(card: cardtree_core::CardId, size: PropertyDefId) -> Vec<Trigger> {
    vec![Trigger::PropertyValues {
        cards: BTreeSet::from([card]),
        properties: BTreeSet::from([size]),
    }]
}

#[test]
fn affected_formulas_follow_current_associations() {
    let mut fx = planning();
    let (story, task) = (fx.story, fx.task);
    let doubled = registry::create_formula(
        fx.service.project_mut(),
        "doubled",
        "size * 2",
        &[story, task],
    )
    .unwrap();
    let card = fx.card("task1", "Task");
    let size = id(&fx, "size");

    let before = scheduler::plan(fx.service.project(), &size_change(card, size));
    assert_eq!(before.properties(), vec![doubled]);
    assert_eq!(before.steps[0].cards, BTreeSet::from([card]));

    registry::dissociate(fx.service.project_mut(), doubled, task).unwrap();

    let after = scheduler::plan(fx.service.project(), &size_change(card, size));
    assert!(after.is_empty());
}

#[test]
fn retyped_cards_leave_formulas_of_their_old_type() {
    let mut fx = planning();
    let story = fx.story;
    let doubled =
        registry::create_formula(fx.service.project_mut(), "doubled", "size * 2", &[story])
            .unwrap();
    let card = fx.card("story1", "Story");
    fx.set(card, "size", "3");
    let size = id(&fx, "size");
    assert_eq!(
        scheduler::plan(fx.service.project(), &size_change(card, size)).properties(),
        vec![doubled]
    );

    fx.service.change_card_type(card, "Task").unwrap();

    assert!(scheduler::plan(fx.service.project(), &size_change(card, size)).is_empty());
    assert_eq!(fx.display(card, "doubled"), None);
    assert_eq!(fx.display(card, "size").as_deref(), Some("3"));
}
