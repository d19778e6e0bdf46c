#![allow(dead_code)]

use cardtree_core::model::{EnumerationValue, TreeId};
use cardtree_core::registry;
use cardtree_core::{
    BulkUpdateOptions, CardId, CardTypeId, EngineConfig, ProjectService, PropertyKind,
    PropertyUpdate,
};
use chrono::NaiveDate;
use uuid::Uuid;

pub const TREE: &str = "Planning";
pub const RELEASE_REL: &str = "Planning - Release";
pub const ITERATION_REL: &str = "Planning - Iteration";
pub const STORY_REL: &str = "Planning - Story";
pub const TASK_REL: &str = "Planning - Task";

/// Release > Iteration > Story > Task > Minutia with a few properties.
pub struct Planning {
    pub service: ProjectService,
    pub tree: TreeId,
    pub release: CardTypeId,
    pub iteration: CardTypeId,
    pub story: CardTypeId,
    pub task: CardTypeId,
    pub minutia: CardTypeId,
}

pub fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2009, 12, 20).unwrap()
}

pub fn config() -> EngineConfig {
    EngineConfig {
        today: Some(today()),
        current_user: Some("member".to_string()),
        ..Default::default()
    }
}

pub fn enum_values(values: &[&str]) -> Vec<EnumerationValue> {
    values
        .iter()
        .map(|value| EnumerationValue {
            id: Uuid::nil(),
            value: value.to_string(),
            position: 0,
        })
        .collect()
}

/// Planning tree with:
/// - `size`: managed numeric on Story and Task
/// - `estimate`: numeric free text on Story and Task
/// - `start date`: date on Story
/// - `status`: managed text (New, In Progress, Done) on Story and Task
/// - `owner`: free text on Story and Task
pub fn planning() -> Planning {
    let mut service = ProjectService::create("planning", config()).unwrap();
    let project = service.project_mut();

    let release = registry::create_card_type(project, "Release").unwrap();
    let iteration = registry::create_card_type(project, "Iteration").unwrap();
    let story = registry::create_card_type(project, "Story").unwrap();
    let task = registry::create_card_type(project, "Task").unwrap();
    let minutia = registry::create_card_type(project, "Minutia").unwrap();
    let tree =
        registry::configure_tree(project, TREE, &[release, iteration, story, task, minutia])
            .unwrap();

    registry::create_property(
        project,
        "size",
        PropertyKind::Enumerated {
            numeric: true,
            values: enum_values(&["1", "2", "3", "5", "8"]),
        },
        &[story, task],
    )
    .unwrap();
    registry::create_property(project, "estimate", PropertyKind::NumericFreeText, &[story, task])
        .unwrap();
    registry::create_property(project, "start date", PropertyKind::Date, &[story]).unwrap();
    registry::create_property(
        project,
        "status",
        PropertyKind::Enumerated {
            numeric: false,
            values: enum_values(&["New", "In Progress", "Done"]),
        },
        &[story, task],
    )
    .unwrap();
    registry::create_property(project, "owner", PropertyKind::FreeText, &[story, task]).unwrap();

    Planning {
        service,
        tree,
        release,
        iteration,
        story,
        task,
        minutia,
    }
}

impl Planning {
    pub fn card(&mut self, name: &str, card_type: &str) -> CardId {
        self.service.create_card(name, card_type).unwrap()
    }

    /// Writes one value and asserts it applied.
    pub fn set(&mut self, card: CardId, property: &str, value: &str) {
        let results = self
            .service
            .apply_bulk_update(
                &[card],
                &[PropertyUpdate::new(property, value)],
                BulkUpdateOptions::default(),
            )
            .unwrap();
        assert!(
            results.iter().all(|result| result.is_ok()),
            "setting {property} = {value} failed: {:?}",
            results
        );
    }

    pub fn reparent(&mut self, card: CardId, relationship: &str, parent: CardId) {
        let number = self.service.project().card(parent).unwrap().number;
        let results = self
            .service
            .reparent(&[card], relationship, &format!("#{number}"))
            .unwrap();
        assert!(results.iter().all(|result| result.is_ok()), "{results:?}");
    }

    pub fn display(&self, card: CardId, property: &str) -> Option<String> {
        self.service.display_value(card, property)
    }

    pub fn parent(&self, card: CardId, relationship: &str) -> Option<CardId> {
        self.service
            .project()
            .value_by_name(card, relationship)
            .and_then(|value| value.as_card())
    }

    pub fn in_tree(&self, card: CardId) -> bool {
        self.service.project().belonging(self.tree, card).is_some()
    }
}
