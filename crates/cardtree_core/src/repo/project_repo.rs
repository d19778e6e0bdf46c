//! Project repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Load one project handle with every definition, card, tree membership
//!   and dependent record.
//! - Commit a handle in one transaction, writing a card version row for
//!   each card changed since the last save.
//!
//! # Invariants
//! - A failed save leaves both the database and the handle untouched.
//! - Enumeration values are stored in their own table; `definition_json`
//!   never carries them.
//! - Card rows are upserted, never dropped and recreated, so version
//!   history survives saves.

use crate::db::migrations::{latest_version, schema_version};
use crate::db::DbError;
use crate::model::card::{Card, CardId};
use crate::model::card_type::CardType;
use crate::model::dependents::{
    CardDefaults, HistorySubscription, ProjectVariable, SavedView, Transition,
};
use crate::model::project::{ProjectId, ProjectState};
use crate::model::property::{EnumerationValue, PropertyDefinition, PropertyKind};
use crate::model::tree::{TreeBelonging, TreeConfiguration, TreeLevel};
use log::{error, info};
use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Instant;
use uuid::Uuid;

pub type RepoResult<T> = Result<T, RepoError>;

#[derive(Debug)]
pub enum RepoError {
    Db(DbError),
    /// JSON column could not be encoded or decoded.
    Serialization(serde_json::Error),
    /// Connection schema is not at the expected migrated version.
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
    MissingRequiredTable(&'static str),
    /// Persisted data cannot be converted to a valid project.
    InvalidData(String),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::Serialization(err) => write!(f, "invalid stored json: {err}"),
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "project repository requires schema version {expected_version}, got {actual_version}"
            ),
            Self::MissingRequiredTable(table) => {
                write!(f, "project repository requires table `{table}`")
            }
            Self::InvalidData(message) => write!(f, "invalid project data: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::Serialization(err) => Some(err),
            Self::UninitializedConnection { .. } => None,
            Self::MissingRequiredTable(_) => None,
            Self::InvalidData(_) => None,
        }
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<serde_json::Error> for RepoError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization(value)
    }
}

/// Repository interface for whole-project persistence.
pub trait ProjectRepository {
    /// Loads one project, or `None` when it was never saved.
    fn load_project(&self, id: ProjectId) -> RepoResult<Option<ProjectState>>;
    /// Resolves a project id from its identifier.
    fn find_project(&self, identifier: &str) -> RepoResult<Option<ProjectId>>;
    /// Commits the handle. Returns the cards that received a new version.
    fn save_project(&self, project: &mut ProjectState) -> RepoResult<Vec<CardId>>;
    /// Stored versions of one card, oldest first.
    fn card_versions(&self, card: CardId) -> RepoResult<Vec<Card>>;
}

/// SQLite-backed project repository.
pub struct SqliteProjectRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteProjectRepository<'conn> {
    /// Creates repository from migrated connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_connection_ready(conn)?;
        Ok(Self { conn })
    }
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "record_kind", content = "payload", rename_all = "snake_case")]
enum DependentRecord {
    Transition(Transition),
    CardDefaults(CardDefaults),
    Subscription(HistorySubscription),
    SavedView(SavedView),
    Variable(ProjectVariable),
}

impl DependentRecord {
    fn kind(&self) -> &'static str {
        match self {
            Self::Transition(_) => "transition",
            Self::CardDefaults(_) => "card_defaults",
            Self::Subscription(_) => "subscription",
            Self::SavedView(_) => "saved_view",
            Self::Variable(_) => "variable",
        }
    }
}

impl ProjectRepository for SqliteProjectRepository<'_> {
    fn load_project(&self, id: ProjectId) -> RepoResult<Option<ProjectState>> {
        let started_at = Instant::now();
        let header = self
            .conn
            .query_row(
                "SELECT identifier, precision FROM projects WHERE project_uuid = ?1;",
                [id.to_string()],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
            )
            .optional()?;
        let Some((identifier, precision)) = header else {
            return Ok(None);
        };
        let precision = u32::try_from(precision)
            .map_err(|_| RepoError::InvalidData(format!("invalid precision {precision}")))?;

        let mut project = ProjectState::with_id(id, identifier, precision);
        project.properties = load_properties(self.conn, id)?;
        project.card_types = load_card_types(self.conn, id)?;
        project.trees = load_trees(self.conn, id)?;
        for card in load_cards(self.conn, id)? {
            project.restore_card(card);
        }
        for belonging in load_belongings(self.conn, id)? {
            project
                .belongings
                .insert((belonging.tree, belonging.card), belonging);
        }
        for record in load_dependents(self.conn, id)? {
            match record {
                DependentRecord::Transition(value) => project.transitions.push(value),
                DependentRecord::CardDefaults(value) => project.card_defaults.push(value),
                DependentRecord::Subscription(value) => project.subscriptions.push(value),
                DependentRecord::SavedView(value) => project.saved_views.push(value),
                DependentRecord::Variable(value) => project.variables.push(value),
            }
        }

        info!(
            "event=project_load module=repo status=ok project_id={} cards={} properties={} duration_ms={}",
            id,
            project.cards.len(),
            project.properties.len(),
            started_at.elapsed().as_millis()
        );
        Ok(Some(project))
    }

    fn find_project(&self, identifier: &str) -> RepoResult<Option<ProjectId>> {
        let raw: Option<String> = self
            .conn
            .query_row(
                "SELECT project_uuid FROM projects WHERE identifier = ?1;",
                [identifier.trim()],
                |row| row.get(0),
            )
            .optional()?;
        raw.map(|value| parse_uuid(&value, "projects.project_uuid"))
            .transpose()
    }

    fn save_project(&self, project: &mut ProjectState) -> RepoResult<Vec<CardId>> {
        let started_at = Instant::now();
        info!(
            "event=project_save module=repo status=start project_id={} unsaved_cards={}",
            project.id,
            project.unsaved_cards().len()
        );

        let result = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)
            .map_err(RepoError::from)
            .and_then(|tx| {
                write_project(&tx, project)?;
                tx.commit()?;
                Ok(())
            });
        if let Err(err) = result {
            error!(
                "event=project_save module=repo status=error project_id={} duration_ms={} error={}",
                project.id,
                started_at.elapsed().as_millis(),
                err
            );
            return Err(err);
        }

        let saved = project.save_changes();
        info!(
            "event=project_save module=repo status=ok project_id={} versions_written={} duration_ms={}",
            project.id,
            saved.len(),
            started_at.elapsed().as_millis()
        );
        Ok(saved)
    }

    fn card_versions(&self, card: CardId) -> RepoResult<Vec<Card>> {
        let mut stmt = self.conn.prepare(
            "SELECT snapshot_json FROM card_versions WHERE card_uuid = ?1 ORDER BY version ASC;",
        )?;
        let rows = stmt
            .query_map([card.to_string()], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        rows.iter().map(|raw| from_json(raw)).collect()
    }
}

fn write_project(tx: &Transaction<'_>, project: &ProjectState) -> RepoResult<()> {
    let project_id = project.id.to_string();
    tx.execute(
        "INSERT INTO projects (project_uuid, identifier, precision)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(project_uuid) DO UPDATE SET
             identifier = excluded.identifier,
             precision = excluded.precision;",
        params![project_id, project.identifier, i64::from(project.precision)],
    )?;

    for sql in [
        "DELETE FROM tree_belongings WHERE tree_uuid IN
             (SELECT tree_uuid FROM tree_configurations WHERE project_uuid = ?1);",
        "DELETE FROM card_type_properties WHERE card_type_uuid IN
             (SELECT card_type_uuid FROM card_types WHERE project_uuid = ?1);",
        "DELETE FROM enumeration_values WHERE property_uuid IN
             (SELECT property_uuid FROM property_definitions WHERE project_uuid = ?1);",
        "DELETE FROM card_types WHERE project_uuid = ?1;",
        "DELETE FROM property_definitions WHERE project_uuid = ?1;",
        "DELETE FROM tree_configurations WHERE project_uuid = ?1;",
        "DELETE FROM dependent_records WHERE project_uuid = ?1;",
    ] {
        tx.execute(sql, [&project_id])?;
    }

    for (order, property) in project.properties.iter().enumerate() {
        let mut stored_kind = property.kind.clone();
        let values = match &mut stored_kind {
            PropertyKind::Enumerated { values, .. } => std::mem::take(values),
            _ => Vec::new(),
        };
        tx.execute(
            "INSERT INTO property_definitions
                 (property_uuid, project_uuid, name, kind, definition_json, sort_order)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6);",
            params![
                property.id.to_string(),
                project_id,
                property.name,
                property.kind().as_str(),
                to_json(&stored_kind)?,
                sort_order(order),
            ],
        )?;
        for value in values {
            tx.execute(
                "INSERT INTO enumeration_values (value_uuid, property_uuid, value, position)
                 VALUES (?1, ?2, ?3, ?4);",
                params![
                    value.id.to_string(),
                    property.id.to_string(),
                    value.value,
                    i64::from(value.position),
                ],
            )?;
        }
    }

    for (order, card_type) in project.card_types.iter().enumerate() {
        tx.execute(
            "INSERT INTO card_types (card_type_uuid, project_uuid, name, sort_order)
             VALUES (?1, ?2, ?3, ?4);",
            params![
                card_type.id.to_string(),
                project_id,
                card_type.name,
                sort_order(order)
            ],
        )?;
        for (property_order, property) in card_type.property_ids.iter().enumerate() {
            tx.execute(
                "INSERT INTO card_type_properties (card_type_uuid, property_uuid, sort_order)
                 VALUES (?1, ?2, ?3);",
                params![
                    card_type.id.to_string(),
                    property.to_string(),
                    sort_order(property_order)
                ],
            )?;
        }
    }

    for (order, tree) in project.trees.iter().enumerate() {
        tx.execute(
            "INSERT INTO tree_configurations (tree_uuid, project_uuid, name, levels_json, sort_order)
             VALUES (?1, ?2, ?3, ?4, ?5);",
            params![
                tree.id.to_string(),
                project_id,
                tree.name,
                to_json(&tree.levels)?,
                sort_order(order)
            ],
        )?;
    }

    write_cards(tx, project)?;

    for belonging in project.belongings.values() {
        tx.execute(
            "INSERT INTO tree_belongings (tree_uuid, card_uuid, parent_uuid, level)
             VALUES (?1, ?2, ?3, ?4);",
            params![
                belonging.tree.to_string(),
                belonging.card.to_string(),
                belonging.parent.map(|parent| parent.to_string()),
                sort_order(belonging.level),
            ],
        )?;
    }

    let records = project
        .transitions
        .iter()
        .cloned()
        .map(DependentRecord::Transition)
        .chain(project.card_defaults.iter().cloned().map(DependentRecord::CardDefaults))
        .chain(project.subscriptions.iter().cloned().map(DependentRecord::Subscription))
        .chain(project.saved_views.iter().cloned().map(DependentRecord::SavedView))
        .chain(project.variables.iter().cloned().map(DependentRecord::Variable));
    for record in records {
        tx.execute(
            "INSERT INTO dependent_records (project_uuid, record_kind, payload_json)
             VALUES (?1, ?2, ?3);",
            params![project_id, record.kind(), to_json(&record)?],
        )?;
    }
    Ok(())
}

/// Upserts every card, snapshots unsaved ones and drops removed cards.
fn write_cards(tx: &Transaction<'_>, project: &ProjectState) -> RepoResult<()> {
    let project_id = project.id.to_string();
    let stored_ids: Vec<String> = {
        let mut stmt = tx.prepare("SELECT card_uuid FROM cards WHERE project_uuid = ?1;")?;
        let rows = stmt
            .query_map([&project_id], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        rows
    };
    let live: BTreeSet<String> = project.cards.keys().map(Uuid::to_string).collect();
    for stale in stored_ids.iter().filter(|id| !live.contains(*id)) {
        tx.execute("DELETE FROM cards WHERE card_uuid = ?1;", [stale])?;
    }

    let unsaved = project.unsaved_cards();
    for card in project.cards.values() {
        let mut snapshot = card.clone();
        let changed = unsaved.contains(&card.id);
        if changed {
            snapshot.version = card.version.saturating_add(1);
        }
        tx.execute(
            "INSERT INTO cards
                 (card_uuid, project_uuid, number, name, card_type_uuid, values_json, tags_json, version)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(card_uuid) DO UPDATE SET
                 number = excluded.number,
                 name = excluded.name,
                 card_type_uuid = excluded.card_type_uuid,
                 values_json = excluded.values_json,
                 tags_json = excluded.tags_json,
                 version = excluded.version;",
            params![
                snapshot.id.to_string(),
                project_id,
                i64::from(snapshot.number),
                snapshot.name,
                snapshot.card_type.to_string(),
                to_json(&snapshot.values)?,
                to_json(&snapshot.tags)?,
                i64::from(snapshot.version),
            ],
        )?;
        if changed {
            tx.execute(
                "INSERT OR REPLACE INTO card_versions (card_uuid, version, snapshot_json)
                 VALUES (?1, ?2, ?3);",
                params![
                    snapshot.id.to_string(),
                    i64::from(snapshot.version),
                    to_json(&snapshot)?
                ],
            )?;
        }
    }
    Ok(())
}

fn load_properties(conn: &Connection, project: ProjectId) -> RepoResult<Vec<PropertyDefinition>> {
    let mut stmt = conn.prepare(
        "SELECT property_uuid, name, definition_json
         FROM property_definitions
         WHERE project_uuid = ?1
         ORDER BY sort_order ASC;",
    )?;
    let rows = stmt
        .query_map([project.to_string()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut values_stmt = conn.prepare(
        "SELECT value_uuid, value, position
         FROM enumeration_values
         WHERE property_uuid = ?1
         ORDER BY position ASC;",
    )?;
    let mut properties = Vec::with_capacity(rows.len());
    for (raw_id, name, definition_json) in rows {
        let mut kind: PropertyKind = from_json(&definition_json)?;
        if let PropertyKind::Enumerated { values, .. } = &mut kind {
            let raw_values = values_stmt
                .query_map([&raw_id], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            for (value_id, value, position) in raw_values {
                values.push(EnumerationValue {
                    id: parse_uuid(&value_id, "enumeration_values.value_uuid")?,
                    value,
                    position: u32::try_from(position).map_err(|_| {
                        RepoError::InvalidData(format!("invalid enumeration position {position}"))
                    })?,
                });
            }
        }
        properties.push(PropertyDefinition {
            id: parse_uuid(&raw_id, "property_definitions.property_uuid")?,
            name,
            kind,
        });
    }
    Ok(properties)
}

fn load_card_types(conn: &Connection, project: ProjectId) -> RepoResult<Vec<CardType>> {
    let mut stmt = conn.prepare(
        "SELECT card_type_uuid, name FROM card_types WHERE project_uuid = ?1 ORDER BY sort_order ASC;",
    )?;
    let rows = stmt
        .query_map([project.to_string()], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut properties_stmt = conn.prepare(
        "SELECT property_uuid FROM card_type_properties
         WHERE card_type_uuid = ?1
         ORDER BY sort_order ASC;",
    )?;
    let mut card_types = Vec::with_capacity(rows.len());
    for (raw_id, name) in rows {
        let property_ids = properties_stmt
            .query_map([&raw_id], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?
            .iter()
            .map(|raw| parse_uuid(raw, "card_type_properties.property_uuid"))
            .collect::<RepoResult<Vec<_>>>()?;
        card_types.push(CardType {
            id: parse_uuid(&raw_id, "card_types.card_type_uuid")?,
            name,
            property_ids,
        });
    }
    Ok(card_types)
}

fn load_trees(conn: &Connection, project: ProjectId) -> RepoResult<Vec<TreeConfiguration>> {
    let mut stmt = conn.prepare(
        "SELECT tree_uuid, name, levels_json
         FROM tree_configurations
         WHERE project_uuid = ?1
         ORDER BY sort_order ASC;",
    )?;
    let rows = stmt
        .query_map([project.to_string()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter()
        .map(|(raw_id, name, levels_json)| {
            let levels: Vec<TreeLevel> = from_json(&levels_json)?;
            Ok(TreeConfiguration {
                id: parse_uuid(&raw_id, "tree_configurations.tree_uuid")?,
                name,
                levels,
            })
        })
        .collect()
}

fn load_cards(conn: &Connection, project: ProjectId) -> RepoResult<Vec<Card>> {
    let mut stmt = conn.prepare(
        "SELECT card_uuid, number, name, card_type_uuid, values_json, tags_json, version
         FROM cards
         WHERE project_uuid = ?1
         ORDER BY number ASC;",
    )?;
    let rows = stmt
        .query_map([project.to_string()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, i64>(6)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter()
        .map(
            |(raw_id, number, name, raw_type, values_json, tags_json, version)| {
                Ok(Card {
                    id: parse_uuid(&raw_id, "cards.card_uuid")?,
                    number: to_u32(number, "cards.number")?,
                    name,
                    card_type: parse_uuid(&raw_type, "cards.card_type_uuid")?,
                    values: from_json(&values_json)?,
                    tags: from_json(&tags_json)?,
                    version: to_u32(version, "cards.version")?,
                })
            },
        )
        .collect()
}

fn load_belongings(conn: &Connection, project: ProjectId) -> RepoResult<Vec<TreeBelonging>> {
    let mut stmt = conn.prepare(
        "SELECT b.tree_uuid, b.card_uuid, b.parent_uuid, b.level
         FROM tree_belongings b
         JOIN tree_configurations t ON t.tree_uuid = b.tree_uuid
         WHERE t.project_uuid = ?1;",
    )?;
    let rows = stmt
        .query_map([project.to_string()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, i64>(3)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter()
        .map(|(raw_tree, raw_card, raw_parent, level)| {
            Ok(TreeBelonging {
                tree: parse_uuid(&raw_tree, "tree_belongings.tree_uuid")?,
                card: parse_uuid(&raw_card, "tree_belongings.card_uuid")?,
                parent: raw_parent
                    .map(|raw| parse_uuid(&raw, "tree_belongings.parent_uuid"))
                    .transpose()?,
                level: usize::try_from(level).map_err(|_| {
                    RepoError::InvalidData(format!("invalid tree level {level}"))
                })?,
            })
        })
        .collect()
}

fn load_dependents(conn: &Connection, project: ProjectId) -> RepoResult<Vec<DependentRecord>> {
    let mut stmt = conn.prepare(
        "SELECT payload_json FROM dependent_records WHERE project_uuid = ?1 ORDER BY record_id ASC;",
    )?;
    let rows = stmt
        .query_map([project.to_string()], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    rows.iter().map(|raw| from_json(raw)).collect()
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> RepoResult<String> {
    Ok(serde_json::to_string(value)?)
}

fn from_json<T: DeserializeOwned>(raw: &str) -> RepoResult<T> {
    Ok(serde_json::from_str(raw)?)
}

fn sort_order(index: usize) -> i64 {
    i64::try_from(index).unwrap_or(i64::MAX)
}

fn to_u32(value: i64, column: &'static str) -> RepoResult<u32> {
    u32::try_from(value)
        .map_err(|_| RepoError::InvalidData(format!("invalid value {value} in {column}")))
}

fn parse_uuid(value: &str, column: &'static str) -> RepoResult<Uuid> {
    Uuid::parse_str(value)
        .map_err(|_| RepoError::InvalidData(format!("invalid uuid `{value}` in {column}")))
}

fn ensure_connection_ready(conn: &Connection) -> RepoResult<()> {
    let expected_version = latest_version();
    let actual_version = schema_version(conn)?;
    if actual_version != expected_version {
        return Err(RepoError::UninitializedConnection {
            expected_version,
            actual_version,
        });
    }
    for table in [
        "projects",
        "card_types",
        "property_definitions",
        "card_type_properties",
        "enumeration_values",
        "tree_configurations",
        "cards",
        "tree_belongings",
        "card_versions",
        "dependent_records",
    ] {
        let exists: i64 = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1);",
            [table],
            |row| row.get(0),
        )?;
        if exists != 1 {
            return Err(RepoError::MissingRequiredTable(table));
        }
    }
    Ok(())
}
