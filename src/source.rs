//! Entity source: where source entries are read from and where their
//! target-locale counterparts are written.
//!
//! Entities that are translations of each other share a localization group.
//! The job engine only sees the [`EntitySource`] trait; [`MemoryEntitySource`]
//! keeps everything in memory and can be loaded from and saved to a JSON file.

use crate::locale::Locale;
use crate::schema::ContentType;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::info;

pub type EntityId = i64;

/// Another entity in the same localization group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalizationRef {
    pub id: EntityId,
    pub locale: Locale,
}

/// One content entry in one locale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    pub id: EntityId,
    pub content_type: String,
    pub locale: Locale,
    pub published: bool,
    /// The other locales of this entry, excluding itself
    pub localizations: Vec<LocalizationRef>,
    pub data: Map<String, Value>,
}

impl Entity {
    pub fn has_localization(&self, locale: &Locale) -> bool {
        self.localization(locale).is_some()
    }

    pub fn localization(&self, locale: &Locale) -> Option<EntityId> {
        self.localizations
            .iter()
            .find(|l| &l.locale == locale)
            .map(|l| l.id)
    }
}

/// Which entities of a locale to count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CountFilter {
    All,
    /// Only entities that already have a counterpart in the given locale
    LocalizedIn(Locale),
}

#[async_trait]
pub trait EntitySource: Send + Sync {
    async fn content_type(&self, uid: &str) -> Result<Option<ContentType>>;

    /// One source-locale entity with no target-locale counterpart, if any is left
    async fn find_untranslated(
        &self,
        content_type: &str,
        source: &Locale,
        target: &Locale,
    ) -> Result<Option<Entity>>;

    async fn list_untranslated_ids(
        &self,
        content_type: &str,
        source: &Locale,
        target: &Locale,
    ) -> Result<Vec<EntityId>>;

    async fn count(&self, content_type: &str, locale: &Locale, filter: CountFilter) -> Result<u64>;

    async fn find_by_id(&self, content_type: &str, id: EntityId) -> Result<Option<Entity>>;

    /// The counterpart of entity `id` in `locale`
    async fn find_localization(
        &self,
        content_type: &str,
        id: EntityId,
        locale: &Locale,
    ) -> Result<Option<Entity>>;

    /// Whether an entity in `locale` already uses `value` for the uid `field`
    async fn uid_exists(
        &self,
        content_type: &str,
        field: &str,
        value: &str,
        locale: &Locale,
    ) -> Result<bool>;

    /// Create the `locale` counterpart of `source` in the same localization group.
    async fn create_localization(
        &self,
        source: &Entity,
        locale: &Locale,
        data: Map<String, Value>,
        publish: bool,
    ) -> Result<Entity>;
}

/// Stored form of an entity. `group` defaults to the entity's own id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityRecord {
    pub id: EntityId,
    pub content_type: String,
    pub locale: Locale,
    #[serde(default)]
    pub published: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<EntityId>,
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl EntityRecord {
    fn group_id(&self) -> EntityId {
        self.group.unwrap_or(self.id)
    }
}

/// Entity to insert into a [`MemoryEntitySource`]
#[derive(Debug, Clone)]
pub struct NewEntity {
    content_type: String,
    locale: Locale,
    published: bool,
    localization_of: Option<EntityId>,
    data: Map<String, Value>,
}

impl NewEntity {
    /// `data` must be a JSON object; anything else is stored as an empty object
    pub fn new(content_type: impl Into<String>, locale: Locale, data: Value) -> Self {
        let data = match data {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            content_type: content_type.into(),
            locale,
            published: false,
            localization_of: None,
            data,
        }
    }

    pub fn published(mut self) -> Self {
        self.published = true;
        self
    }

    /// Put the entity in the localization group of `id`
    pub fn localization_of(mut self, id: EntityId) -> Self {
        self.localization_of = Some(id);
        self
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Snapshot {
    #[serde(default)]
    content_types: Vec<ContentType>,
    #[serde(default)]
    entities: Vec<EntityRecord>,
}

#[derive(Debug, Default)]
struct State {
    content_types: BTreeMap<String, ContentType>,
    entities: BTreeMap<EntityId, EntityRecord>,
    next_id: EntityId,
}

impl State {
    fn view(&self, record: &EntityRecord) -> Entity {
        let group = record.group_id();
        let localizations = self
            .entities
            .values()
            .filter(|other| other.id != record.id && other.group_id() == group)
            .map(|other| LocalizationRef {
                id: other.id,
                locale: other.locale.clone(),
            })
            .collect();

        Entity {
            id: record.id,
            content_type: record.content_type.clone(),
            locale: record.locale.clone(),
            published: record.published,
            localizations,
            data: record.data.clone(),
        }
    }

    fn group_has_locale(&self, group: EntityId, locale: &Locale) -> bool {
        self.entities
            .values()
            .any(|e| e.group_id() == group && &e.locale == locale)
    }

    fn in_locale<'a>(
        &'a self,
        content_type: &'a str,
        locale: &'a Locale,
    ) -> impl Iterator<Item = &'a EntityRecord> + 'a {
        self.entities
            .values()
            .filter(move |e| e.content_type == content_type && &e.locale == locale)
    }

    fn untranslated<'a>(
        &'a self,
        content_type: &'a str,
        source: &'a Locale,
        target: &'a Locale,
    ) -> impl Iterator<Item = &'a EntityRecord> + 'a {
        self.in_locale(content_type, source)
            .filter(move |e| !self.group_has_locale(e.group_id(), target))
    }

    fn insert(&mut self, mut record: EntityRecord) -> EntityId {
        if record.id == 0 {
            self.next_id += 1;
            record.id = self.next_id;
        } else {
            self.next_id = self.next_id.max(record.id);
        }
        let id = record.id;
        self.entities.insert(id, record);
        id
    }
}

/// In-memory [`EntitySource`], optionally backed by a JSON content file.
#[derive(Debug, Default)]
pub struct MemoryEntitySource {
    state: Mutex<State>,
}

impl MemoryEntitySource {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Load content types and entities from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read content file {}", path.display()))?;
        let snapshot: Snapshot = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse content file {}", path.display()))?;

        let source = Self::new();
        {
            let mut state = source.state();
            for content_type in snapshot.content_types {
                state.content_types.insert(content_type.uid.clone(), content_type);
            }
            for record in snapshot.entities {
                if record.id <= 0 {
                    bail!("Entity ids in {} must be positive", path.display());
                }
                state.insert(record);
            }
            info!(
                content_types = state.content_types.len(),
                entities = state.entities.len(),
                "Loaded content from {}",
                path.display()
            );
        }
        Ok(source)
    }

    /// Write the current content back to a JSON file
    pub fn save(&self, path: &Path) -> Result<()> {
        let snapshot = {
            let state = self.state();
            Snapshot {
                content_types: state.content_types.values().cloned().collect(),
                entities: state.entities.values().cloned().collect(),
            }
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(&snapshot).context("Failed to serialize content")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write content file {}", path.display()))?;
        Ok(())
    }

    pub fn add_content_type(&self, content_type: ContentType) {
        self.state()
            .content_types
            .insert(content_type.uid.clone(), content_type);
    }

    pub fn insert(&self, entity: NewEntity) -> EntityId {
        let mut state = self.state();
        let group = entity
            .localization_of
            .and_then(|id| state.entities.get(&id))
            .map(EntityRecord::group_id);
        state.insert(EntityRecord {
            id: 0,
            content_type: entity.content_type,
            locale: entity.locale,
            published: entity.published,
            group,
            data: entity.data,
        })
    }

    /// All entities of a content type in one locale, ordered by id
    pub fn entities(&self, content_type: &str, locale: &Locale) -> Vec<Entity> {
        let state = self.state();
        state
            .in_locale(content_type, locale)
            .map(|record| state.view(record))
            .collect()
    }
}

#[async_trait]
impl EntitySource for MemoryEntitySource {
    async fn content_type(&self, uid: &str) -> Result<Option<ContentType>> {
        Ok(self.state().content_types.get(uid).cloned())
    }

    async fn find_untranslated(
        &self,
        content_type: &str,
        source: &Locale,
        target: &Locale,
    ) -> Result<Option<Entity>> {
        let state = self.state();
        let found = state
            .untranslated(content_type, source, target)
            .next()
            .map(|record| state.view(record));
        Ok(found)
    }

    async fn list_untranslated_ids(
        &self,
        content_type: &str,
        source: &Locale,
        target: &Locale,
    ) -> Result<Vec<EntityId>> {
        let state = self.state();
        let ids = state
            .untranslated(content_type, source, target)
            .map(|record| record.id)
            .collect();
        Ok(ids)
    }

    async fn count(&self, content_type: &str, locale: &Locale, filter: CountFilter) -> Result<u64> {
        let state = self.state();
        let count = match &filter {
            CountFilter::All => state.in_locale(content_type, locale).count(),
            CountFilter::LocalizedIn(other) => state
                .in_locale(content_type, locale)
                .filter(|e| state.group_has_locale(e.group_id(), other))
                .count(),
        };
        Ok(count as u64)
    }

    async fn find_by_id(&self, content_type: &str, id: EntityId) -> Result<Option<Entity>> {
        let state = self.state();
        let found = state
            .entities
            .get(&id)
            .filter(|record| record.content_type == content_type)
            .map(|record| state.view(record));
        Ok(found)
    }

    async fn find_localization(
        &self,
        content_type: &str,
        id: EntityId,
        locale: &Locale,
    ) -> Result<Option<Entity>> {
        let state = self.state();
        let Some(group) = state
            .entities
            .get(&id)
            .filter(|record| record.content_type == content_type)
            .map(EntityRecord::group_id)
        else {
            return Ok(None);
        };

        let found = state
            .in_locale(content_type, locale)
            .find(|e| e.group_id() == group)
            .map(|record| state.view(record));
        Ok(found)
    }

    async fn uid_exists(
        &self,
        content_type: &str,
        field: &str,
        value: &str,
        locale: &Locale,
    ) -> Result<bool> {
        let state = self.state();
        let exists = state
            .in_locale(content_type, locale)
            .any(|e| e.data.get(field).and_then(Value::as_str) == Some(value));
        Ok(exists)
    }

    async fn create_localization(
        &self,
        source: &Entity,
        locale: &Locale,
        data: Map<String, Value>,
        publish: bool,
    ) -> Result<Entity> {
        let mut state = self.state();
        let group = state
            .entities
            .get(&source.id)
            .map(EntityRecord::group_id)
            .with_context(|| format!("Source entity {} does not exist", source.id))?;

        if state.group_has_locale(group, locale) {
            bail!("Entity {} already has a '{}' localization", source.id, locale);
        }

        let id = state.insert(EntityRecord {
            id: 0,
            content_type: source.content_type.clone(),
            locale: locale.clone(),
            published: publish,
            group: Some(group),
            data,
        });

        let record = state
            .entities
            .get(&id)
            .with_context(|| format!("Entity {} vanished after insert", id))?;
        Ok(state.view(record))
    }
}
