mod common;

use cardtree_core::registry;
use cardtree_core::tree;
use cardtree_core::{CardId, EngineError};
use common::{planning, Planning, ITERATION_REL, RELEASE_REL, STORY_REL, TASK_REL};

struct Scenario {
    fx: Planning,
    release1: CardId,
    iteration1: CardId,
    story1: CardId,
    story2: CardId,
    task1: CardId,
    task2: CardId,
    minutia1: CardId,
    minutia2: CardId,
}

fn scenario() -> Scenario {
    let mut fx = planning();
    let release1 = fx.card("release1", "Release");
    let iteration1 = fx.card("iteration1", "Iteration");
    let story1 = fx.card("story1", "Story");
    let story2 = fx.card("story2", "Story");
    let task1 = fx.card("task1", "Task");
    let task2 = fx.card("task2", "Task");
    let minutia1 = fx.card("minutia1", "Minutia");
    let minutia2 = fx.card("minutia2", "Minutia");

    fx.reparent(iteration1, RELEASE_REL, release1);
    fx.reparent(story1, ITERATION_REL, iteration1);
    fx.reparent(story2, ITERATION_REL, iteration1);
    fx.reparent(task1, STORY_REL, story1);
    fx.reparent(task2, STORY_REL, story1);
    fx.reparent(minutia1, TASK_REL, task2);
    fx.reparent(minutia2, TASK_REL, task2);

    Scenario {
        fx,
        release1,
        iteration1,
        story1,
        story2,
        task1,
        task2,
        minutia1,
        minutia2,
    }
}

#[test]
fn reparenting_fills_in_every_ancestor_relationship() {
    let s = scenario();

    assert_eq!(s.fx.parent(s.minutia1, TASK_REL), Some(s.task2));
    assert_eq!(s.fx.parent(s.minutia1, STORY_REL), Some(s.story1));
    assert_eq!(s.fx.parent(s.minutia1, ITERATION_REL), Some(s.iteration1));
    assert_eq!(s.fx.parent(s.minutia1, RELEASE_REL), Some(s.release1));
    assert_eq!(
        s.fx.display(s.minutia1, STORY_REL).as_deref(),
        Some("#3 story1")
    );
}

#[test]
fn moving_a_task_carries_its_subtree() {
    let mut s = scenario();

    let results = s
        .fx
        .service
        .reparent(&[s.task2], STORY_REL, "#4")
        .unwrap();
    assert!(results[0].is_ok());

    assert_eq!(s.fx.parent(s.task2, STORY_REL), Some(s.story2));
    for minutia in [s.minutia1, s.minutia2] {
        assert_eq!(s.fx.parent(minutia, STORY_REL), Some(s.story2));
        assert_eq!(s.fx.parent(minutia, TASK_REL), Some(s.task2));
        assert_eq!(s.fx.parent(minutia, ITERATION_REL), Some(s.iteration1));
    }
    assert_eq!(s.fx.parent(s.task1, STORY_REL), Some(s.story1));

    let project = s.fx.service.project();
    assert_eq!(tree::children(project, s.fx.tree, s.story2), vec![s.task2]);
    assert_eq!(tree::children(project, s.fx.tree, s.story1), vec![s.task1]);
}

#[test]
fn not_set_clears_the_level_and_keeps_lower_links() {
    let mut s = scenario();

    let results = s
        .fx
        .service
        .reparent(&[s.task2], STORY_REL, "(not set)")
        .unwrap();
    assert!(results[0].is_ok());

    assert_eq!(s.fx.parent(s.task2, STORY_REL), None);
    assert_eq!(s.fx.parent(s.task2, ITERATION_REL), Some(s.iteration1));
    assert_eq!(s.fx.parent(s.minutia1, STORY_REL), None);
    assert_eq!(s.fx.parent(s.minutia1, TASK_REL), Some(s.task2));
    assert!(s.fx.in_tree(s.task2));
}

#[test]
fn not_set_on_a_card_outside_the_tree_is_a_no_op() {
    let mut s = scenario();
    let loose = s.fx.card("loose", "Task");

    let results = s.fx.service.reparent(&[loose], STORY_REL, "").unwrap();

    assert!(results[0].is_ok());
    assert!(!s.fx.in_tree(loose));
}

#[test]
fn batch_reports_non_applicable_cards_and_applies_the_rest() {
    let mut s = scenario();

    let results = s
        .fx
        .service
        .reparent(&[s.task1, s.story1], STORY_REL, "story2")
        .unwrap();

    assert!(results[0].is_ok());
    assert_eq!(results[1].card, s.story1);
    assert!(matches!(
        results[1].errors.as_slice(),
        [EngineError::Validation(_)]
    ));
    assert_eq!(s.fx.parent(s.task1, STORY_REL), Some(s.story2));
    assert_eq!(s.fx.parent(s.story1, ITERATION_REL), Some(s.iteration1));
}

#[test]
fn target_of_the_wrong_card_type_is_a_per_card_error() {
    let mut s = scenario();

    let results = s
        .fx
        .service
        .reparent(&[s.task1], STORY_REL, "iteration1")
        .unwrap();

    assert!(matches!(
        results[0].errors.as_slice(),
        [EngineError::Validation(_)]
    ));
    assert_eq!(s.fx.parent(s.task1, STORY_REL), Some(s.story1));
}

#[test]
fn unknown_target_card_aborts_the_batch() {
    let mut s = scenario();

    let err = s
        .fx
        .service
        .reparent(&[s.task1], STORY_REL, "#999")
        .unwrap_err();

    assert!(matches!(err, EngineError::InvalidValue(_)));
    assert_eq!(s.fx.parent(s.task1, STORY_REL), Some(s.story1));
}

#[test]
fn retyping_a_story_into_a_task_rehangs_its_descendants() {
    let mut s = scenario();
    s.fx.set(s.story1, "start date", "20 Dec 2009");

    s.fx.service.change_card_type(s.story1, "Task").unwrap();

    assert_eq!(s.fx.display(s.story1, "start date"), None);
    assert_eq!(s.fx.parent(s.story1, ITERATION_REL), Some(s.iteration1));
    assert_eq!(s.fx.parent(s.story1, STORY_REL), None);
    // Tasks are no longer below the retyped card.
    assert_eq!(s.fx.parent(s.task1, STORY_REL), None);
    assert_eq!(s.fx.parent(s.task1, ITERATION_REL), Some(s.iteration1));
    assert!(s.fx.in_tree(s.task1));
    // Minutiae are deeper than a task and follow the card.
    assert_eq!(s.fx.parent(s.minutia1, TASK_REL), Some(s.story1));
    assert_eq!(s.fx.parent(s.minutia1, STORY_REL), None);
}

#[test]
fn retyping_to_a_type_outside_the_tree_removes_only_that_card() {
    let mut s = scenario();
    registry::create_card_type(s.fx.service.project_mut(), "Defect").unwrap();

    s.fx.service.change_card_type(s.task2, "Defect").unwrap();

    assert!(!s.fx.in_tree(s.task2));
    assert_eq!(s.fx.parent(s.task2, STORY_REL), None);
    assert!(s.fx.in_tree(s.minutia1));
    assert_eq!(s.fx.parent(s.minutia1, TASK_REL), None);
    assert_eq!(s.fx.parent(s.minutia1, STORY_REL), Some(s.story1));
}

#[test]
fn retyping_out_of_the_tree_keeps_only_ancestry_above_the_card() {
    let mut s = scenario();
    registry::create_card_type(s.fx.service.project_mut(), "Defect").unwrap();

    s.fx.service.change_card_type(s.story1, "Defect").unwrap();

    assert!(!s.fx.in_tree(s.story1));
    for card in [s.task1, s.task2, s.minutia1, s.minutia2] {
        assert!(s.fx.in_tree(card));
        assert_eq!(s.fx.parent(card, STORY_REL), None);
        assert_eq!(s.fx.parent(card, ITERATION_REL), Some(s.iteration1));
        assert_eq!(s.fx.parent(card, RELEASE_REL), Some(s.release1));
    }
    // The minutiae no longer hang below task2 either.
    assert_eq!(s.fx.parent(s.minutia1, TASK_REL), None);
    assert_eq!(s.fx.parent(s.minutia2, TASK_REL), None);
    let level = |card| {
        tree::level_in_complete_tree(s.fx.service.project(), s.fx.tree, card)
    };
    assert_eq!(level(s.minutia1), Some(5));
}

#[test]
fn detaching_keeps_descendants_in_the_tree() {
    let mut s = scenario();

    s.fx.service.detach(common::TREE, s.story1).unwrap();

    assert!(!s.fx.in_tree(s.story1));
    assert!(s.fx.in_tree(s.task1));
    assert_eq!(s.fx.parent(s.task1, STORY_REL), None);
    assert_eq!(s.fx.parent(s.task1, ITERATION_REL), Some(s.iteration1));
    assert_eq!(s.fx.parent(s.minutia1, TASK_REL), Some(s.task2));
}
