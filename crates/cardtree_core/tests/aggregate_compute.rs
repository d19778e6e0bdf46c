mod common;

use cardtree_core::aggregate::{
    self, AggregateDef, AggregateError, AggregateScope, AggregateType, Condition, ConditionError,
    LiveOnlyConstruct,
};
use cardtree_core::model::CardTypeId;
use cardtree_core::registry::{self, RegistryError};
use cardtree_core::CardId;
use common::{planning, Planning, ITERATION_REL, STORY_REL};

fn def(
    fx: &Planning,
    aggregate_type: AggregateType,
    scoping: CardTypeId,
    scope: AggregateScope,
    target: Option<&str>,
    condition: Option<&str>,
) -> AggregateDef {
    let project = fx.service.project();
    AggregateDef {
        aggregate_type,
        tree: fx.tree,
        scoping_card_type: scoping,
        scope,
        target: target.map(|name| project.property_by_name(name).unwrap().id),
        condition: condition.map(|source| Condition::parse(source).unwrap()),
    }
}

fn add_aggregate(fx: &mut Planning, name: &str, def: AggregateDef) {
    registry::create_aggregate(fx.service.project_mut(), name, def).unwrap();
}

/// iteration1 > story1 > (task1, task2), story2 with no tasks.
struct Board {
    fx: Planning,
    iteration1: CardId,
    story1: CardId,
    story2: CardId,
    task1: CardId,
    task2: CardId,
}

fn board() -> Board {
    let mut fx = planning();
    let task_scope = AggregateScope::CardType { card_type: fx.task };
    let sum = def(&fx, AggregateType::Sum, fx.story, task_scope, Some("size"), None);
    add_aggregate(&mut fx, "task size", sum);

    let iteration1 = fx.card("iteration1", "Iteration");
    let story1 = fx.card("story1", "Story");
    let story2 = fx.card("story2", "Story");
    let task1 = fx.card("task1", "Task");
    let task2 = fx.card("task2", "Task");
    fx.reparent(story1, ITERATION_REL, iteration1);
    fx.reparent(story2, ITERATION_REL, iteration1);
    fx.reparent(task1, STORY_REL, story1);
    fx.reparent(task2, STORY_REL, story1);
    fx.set(task1, "size", "2");
    fx.set(task2, "size", "3");

    Board {
        fx,
        iteration1,
        story1,
        story2,
        task1,
        task2,
    }
}

#[test]
fn sum_follows_value_and_structure_changes() {
    let mut b = board();
    assert_eq!(b.fx.display(b.story1, "task size").as_deref(), Some("5"));

    b.fx.set(b.task2, "size", "8");
    assert_eq!(b.fx.display(b.story1, "task size").as_deref(), Some("10"));

    b.fx.reparent(b.task2, STORY_REL, b.story2);
    assert_eq!(b.fx.display(b.story1, "task size").as_deref(), Some("2"));
    assert_eq!(b.fx.display(b.story2, "task size").as_deref(), Some("8"));
}

#[test]
fn empty_sum_is_nil_and_empty_count_is_zero() {
    let mut b = board();
    let story_scope = AggregateScope::CardType {
        card_type: b.fx.story,
    };
    let count = def(&b.fx, AggregateType::Count, b.fx.story, AggregateScope::AllDescendants, None, None);
    add_aggregate(&mut b.fx, "descendant count", count);
    let iteration_count = def(&b.fx, AggregateType::Count, b.fx.iteration, story_scope, None, None);
    add_aggregate(&mut b.fx, "story count", iteration_count);
    b.fx.service.recompute_all().unwrap();

    assert_eq!(b.fx.display(b.story2, "task size"), None);
    assert_eq!(b.fx.display(b.story2, "descendant count").as_deref(), Some("0"));
    assert_eq!(b.fx.display(b.story1, "descendant count").as_deref(), Some("2"));
    assert_eq!(b.fx.display(b.iteration1, "story count").as_deref(), Some("2"));
}

#[test]
fn average_min_and_max_read_numeric_text() {
    let mut b = board();
    let task_scope = AggregateScope::CardType { card_type: b.fx.task };
    for (name, aggregate_type) in [
        ("average estimate", AggregateType::Average),
        ("min estimate", AggregateType::Min),
        ("max estimate", AggregateType::Max),
    ] {
        let aggregate = def(&b.fx, aggregate_type, b.fx.story, task_scope.clone(), Some("estimate"), None);
        add_aggregate(&mut b.fx, name, aggregate);
    }

    b.fx.set(b.task1, "estimate", "1");
    b.fx.set(b.task2, "estimate", "2.5");

    assert_eq!(b.fx.display(b.story1, "average estimate").as_deref(), Some("1.75"));
    assert_eq!(b.fx.display(b.story1, "min estimate").as_deref(), Some("1"));
    assert_eq!(b.fx.display(b.story1, "max estimate").as_deref(), Some("2.5"));
}

#[test]
fn conditions_filter_counted_cards() {
    let mut b = board();
    let task_scope = AggregateScope::CardType { card_type: b.fx.task };
    let done = def(
        &b.fx,
        AggregateType::Sum,
        b.fx.story,
        task_scope,
        Some("size"),
        Some("status = Done"),
    );
    add_aggregate(&mut b.fx, "done size", done);

    b.fx.set(b.task1, "status", "Done");
    b.fx.set(b.task2, "status", "In Progress");
    assert_eq!(b.fx.display(b.story1, "done size").as_deref(), Some("2"));

    b.fx.set(b.task2, "status", "done");
    assert_eq!(b.fx.display(b.story1, "done size").as_deref(), Some("5"));
}

#[test]
fn type_pseudo_property_selects_card_types() {
    let mut b = board();
    let minutia = b.fx.card("minutia1", "Minutia");
    b.fx.reparent(minutia, common::TASK_REL, b.task1);
    let tasks_only = def(
        &b.fx,
        AggregateType::Count,
        b.fx.story,
        AggregateScope::AllDescendants,
        None,
        Some("type = Task"),
    );
    add_aggregate(&mut b.fx, "task count", tasks_only);
    b.fx.service.recompute_all().unwrap();

    assert_eq!(b.fx.display(b.story1, "task count").as_deref(), Some("2"));
}

#[test]
fn scoping_card_outside_the_tree_is_nil() {
    let mut b = board();
    let loose = b.fx.card("loose story", "Story");

    assert_eq!(b.fx.display(loose, "task size"), None);
    let project = b.fx.service.project();
    let property = project.property_by_name("task size").unwrap();
    let ctx = b.fx.service.config().live_context();
    assert_eq!(aggregate::compute(project, property, loose, &ctx).unwrap(), None);
}

#[test]
fn recompute_aggregate_returns_changed_scoping_cards() {
    let mut b = board();
    let task_scope = AggregateScope::CardType { card_type: b.fx.task };
    let late = def(&b.fx, AggregateType::Max, b.fx.story, task_scope, Some("size"), None);
    add_aggregate(&mut b.fx, "largest task", late);

    let changed = b.fx.service.recompute_aggregate("largest task").unwrap();
    assert_eq!(changed, vec![b.story1]);
    assert_eq!(b.fx.display(b.story1, "largest task").as_deref(), Some("3"));

    assert!(b.fx.service.recompute_aggregate("largest task").unwrap().is_empty());
}

#[test]
fn historical_evaluation_rejects_live_only_constructs() {
    let mut b = board();
    let task_scope = AggregateScope::CardType { card_type: b.fx.task };
    let mine = def(
        &b.fx,
        AggregateType::Count,
        b.fx.story,
        task_scope,
        None,
        Some("owner = CURRENT USER"),
    );
    add_aggregate(&mut b.fx, "my tasks", mine);
    b.fx.set(b.task1, "owner", "member");

    let project = b.fx.service.project();
    let property = project.property_by_name("my tasks").unwrap();
    let live = b.fx.service.config().live_context();
    let number = aggregate::compute(project, property, b.story1, &live)
        .unwrap()
        .unwrap();
    assert_eq!(number.to_fixed(0).as_deref(), Some("1"));

    let historical = b.fx.service.config().historical_context();
    let err = aggregate::compute(project, property, b.story1, &historical).unwrap_err();
    match err {
        AggregateError::Condition(ConditionError::DisallowedConstructs(violations)) => {
            assert_eq!(violations.len(), 1);
            assert_eq!(violations[0].construct, LiveOnlyConstruct::CurrentUser);
            assert_eq!(
                violations[0].to_string(),
                "CURRENT USER is not supported in a historical condition"
            );
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn definitions_require_numeric_targets_below_the_scoping_level() {
    let mut fx = planning();
    let task_scope = AggregateScope::CardType { card_type: fx.task };

    let text_target = def(&fx, AggregateType::Sum, fx.story, task_scope.clone(), Some("status"), None);
    assert!(matches!(
        registry::create_aggregate(fx.service.project_mut(), "bad1", text_target),
        Err(RegistryError::InvalidDefinition(_))
    ));

    let no_target = def(&fx, AggregateType::Sum, fx.story, task_scope.clone(), None, None);
    assert!(matches!(
        registry::create_aggregate(fx.service.project_mut(), "bad2", no_target),
        Err(RegistryError::InvalidDefinition(_))
    ));

    let upward = def(&fx, AggregateType::Count, fx.task, AggregateScope::CardType { card_type: fx.story }, None, None);
    assert!(matches!(
        registry::create_aggregate(fx.service.project_mut(), "bad3", upward),
        Err(RegistryError::InvalidDefinition(_))
    ));

    let leaf = def(&fx, AggregateType::Count, fx.minutia, AggregateScope::AllDescendants, None, None);
    assert!(matches!(
        registry::create_aggregate(fx.service.project_mut(), "bad4", leaf),
        Err(RegistryError::InvalidDefinition(_))
    ));

    let unknown = def(&fx, AggregateType::Count, fx.story, task_scope, None, Some("colour = red"));
    assert!(matches!(
        registry::create_aggregate(fx.service.project_mut(), "bad5", unknown),
        Err(RegistryError::Condition(ConditionError::UnknownProperty(_)))
    ));
}
