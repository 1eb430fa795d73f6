//! Translation service: builds the target-locale data of one entity.
//!
//! Walks the content type schema to find translatable text (including inside
//! components), sends one provider request per text format, re-links
//! relations to their target-locale counterparts, regenerates uids and drops
//! attributes marked for deletion.

use crate::error::TranslateError;
use crate::locale::Locale;
use crate::provider::{Priority, ProviderError, TranslateRequest, TranslationProvider};
use crate::schema::{AttributeKind, ContentType, Schema, TextFormat, TranslateMode};
use crate::source::{Entity, EntitySource};
use anyhow::{Context, Result};
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};
use tracing::debug;

/// Pointers into the entity document, gathered in one pass over the schema.
#[derive(Debug, Default)]
struct FieldPlan {
    texts: BTreeMap<TextFormat, Vec<String>>,
    relations: Vec<RelationField>,
    uids: Vec<UidField>,
    /// (parent pointer, attribute name)
    deletes: Vec<(String, String)>,
}

#[derive(Debug)]
struct RelationField {
    pointer: String,
    target: String,
    many: bool,
}

#[derive(Debug)]
struct UidField {
    parent: String,
    name: String,
    target_field: Option<String>,
    top_level: bool,
}

fn escape_pointer(name: &str) -> String {
    name.replace('~', "~0").replace('/', "~1")
}

fn slug_separator() -> &'static Regex {
    static SEPARATOR: OnceLock<Regex> = OnceLock::new();
    SEPARATOR.get_or_init(|| Regex::new(r"[^\p{L}\p{N}]+").expect("valid slug regex"))
}

/// Lowercase slug with runs of non-alphanumerics collapsed to '-'
pub fn slugify(text: &str) -> String {
    slug_separator()
        .replace_all(&text.to_lowercase(), "-")
        .trim_matches('-')
        .to_string()
}

fn invalid(pointer: &str, reason: &str) -> TranslateError {
    TranslateError::InvalidFieldValue {
        pointer: pointer.to_string(),
        reason: reason.to_string(),
    }
}

fn walk(
    schema: &Schema,
    object: &Map<String, Value>,
    prefix: &str,
    top_level: bool,
    plan: &mut FieldPlan,
) -> Result<(), TranslateError> {
    for (name, attribute) in &schema.attributes {
        let pointer = format!("{}/{}", prefix, escape_pointer(name));
        let mode = attribute.mode();

        if mode == TranslateMode::Delete {
            plan.deletes.push((prefix.to_string(), name.clone()));
            continue;
        }

        let value = object.get(name).unwrap_or(&Value::Null);
        match &attribute.kind {
            AttributeKind::Text { format } => {
                if mode != TranslateMode::Translate {
                    continue;
                }
                match value {
                    Value::String(text) if !text.is_empty() => {
                        plan.texts.entry(*format).or_default().push(pointer);
                    }
                    Value::String(_) | Value::Null => {}
                    _ => return Err(invalid(&pointer, "expected text")),
                }
            }
            AttributeKind::Component { schema, repeatable } => {
                if mode != TranslateMode::Translate {
                    continue;
                }
                match (value, repeatable) {
                    (Value::Null, _) => {}
                    (Value::Array(items), true) => {
                        for (index, item) in items.iter().enumerate() {
                            let item = item
                                .as_object()
                                .ok_or_else(|| invalid(&pointer, "expected component objects"))?;
                            walk(schema, item, &format!("{}/{}", pointer, index), false, plan)?;
                        }
                    }
                    (Value::Object(item), false) => walk(schema, item, &pointer, false, plan)?,
                    _ => return Err(invalid(&pointer, "unexpected component shape")),
                }
            }
            AttributeKind::Relation { target, many } => {
                if !value.is_null() {
                    plan.relations.push(RelationField {
                        pointer,
                        target: target.clone(),
                        many: *many,
                    });
                }
            }
            AttributeKind::Uid { target_field } => plan.uids.push(UidField {
                parent: prefix.to_string(),
                name: name.clone(),
                target_field: target_field.clone(),
                top_level,
            }),
            AttributeKind::Other => {}
        }
    }
    Ok(())
}

fn remove_field(document: &mut Value, parent: &str, name: &str) {
    if let Some(object) = document.pointer_mut(parent).and_then(Value::as_object_mut) {
        object.remove(name);
    }
}

/// Entity translation on top of a provider and an entity source.
#[derive(Clone)]
pub struct TranslationService {
    provider: Arc<dyn TranslationProvider>,
    source: Arc<dyn EntitySource>,
}

impl TranslationService {
    pub fn new(provider: Arc<dyn TranslationProvider>, source: Arc<dyn EntitySource>) -> Self {
        Self { provider, source }
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    /// Translate a single text for an interactive caller.
    pub async fn translate_text(
        &self,
        text: &str,
        format: TextFormat,
        source_locale: &Locale,
        target_locale: &Locale,
    ) -> Result<String, TranslateError> {
        let translated = self
            .provider
            .translate(TranslateRequest {
                fragments: vec![text.to_string()],
                format,
                source_locale: source_locale.clone(),
                target_locale: target_locale.clone(),
                priority: Priority::Direct,
            })
            .await?;

        let actual = translated.len();
        translated
            .into_iter()
            .next()
            .filter(|_| actual == 1)
            .ok_or(TranslateError::Provider(ProviderError::LengthMismatch {
                expected: 1,
                actual,
            }))
    }

    /// Build the data of the `target` locale counterpart of `entity`.
    ///
    /// # Arguments
    /// * `content_type` - Schema of the entity
    /// * `entity` - Source-locale entity
    /// * `target` - Locale to translate into
    ///
    /// # Returns
    /// The new entity data, ready for `EntitySource::create_localization`
    pub async fn build_localization(
        &self,
        content_type: &ContentType,
        entity: &Entity,
        target: &Locale,
    ) -> Result<Map<String, Value>> {
        let mut plan = FieldPlan::default();
        walk(&content_type.schema, &entity.data, "", true, &mut plan)?;
        let mut document = Value::Object(entity.data.clone());

        for (format, pointers) in &plan.texts {
            self.translate_fields(&mut document, pointers, *format, &entity.locale, target)
                .await?;
        }

        for relation in &plan.relations {
            let Some(value) = document.pointer(&relation.pointer).cloned() else {
                continue;
            };
            let localized = self
                .localize_relation(&value, relation, target)
                .await
                .with_context(|| format!("failed to localize relation {}", relation.pointer))?;
            if let Some(slot) = document.pointer_mut(&relation.pointer) {
                *slot = localized;
            }
        }

        for uid in &plan.uids {
            self.regenerate_uid(&mut document, uid, &content_type.uid, target)
                .await?;
        }

        for (parent, name) in &plan.deletes {
            remove_field(&mut document, parent, name);
        }

        match document {
            Value::Object(data) => Ok(data),
            _ => Ok(Map::new()),
        }
    }

    async fn translate_fields(
        &self,
        document: &mut Value,
        pointers: &[String],
        format: TextFormat,
        source_locale: &Locale,
        target_locale: &Locale,
    ) -> Result<(), TranslateError> {
        let fragments: Vec<String> = pointers
            .iter()
            .map(|p| {
                document
                    .pointer(p)
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string()
            })
            .collect();

        debug!(
            format = format.as_str(),
            fields = fragments.len(),
            provider = self.provider.name(),
            "Translating fields"
        );

        let translated = self
            .provider
            .translate(TranslateRequest {
                fragments,
                format,
                source_locale: source_locale.clone(),
                target_locale: target_locale.clone(),
                priority: Priority::Batch,
            })
            .await?;

        if translated.len() != pointers.len() {
            return Err(ProviderError::LengthMismatch {
                expected: pointers.len(),
                actual: translated.len(),
            }
            .into());
        }

        for (pointer, text) in pointers.iter().zip(translated) {
            if let Some(slot) = document.pointer_mut(pointer) {
                *slot = Value::String(text);
            }
        }
        Ok(())
    }

    async fn localize_relation(
        &self,
        value: &Value,
        relation: &RelationField,
        locale: &Locale,
    ) -> Result<Value> {
        let related = self
            .source
            .content_type(&relation.target)
            .await?
            .ok_or_else(|| TranslateError::MissingContentType(relation.target.clone()))?;
        if !related.localized {
            return Ok(value.clone());
        }

        if relation.many {
            let Value::Array(items) = value else {
                return Err(invalid(&relation.pointer, "expected a list of relations").into());
            };
            let mut localized = Vec::with_capacity(items.len());
            for item in items {
                if let Some(item) = self.localize_reference(item, relation, locale).await? {
                    localized.push(item);
                }
            }
            Ok(Value::Array(localized))
        } else {
            Ok(self
                .localize_reference(value, relation, locale)
                .await?
                .unwrap_or(Value::Null))
        }
    }

    /// Swap one reference (an id or an object with an id) for its `locale`
    /// counterpart. `None` when there is no counterpart.
    async fn localize_reference(
        &self,
        item: &Value,
        relation: &RelationField,
        locale: &Locale,
    ) -> Result<Option<Value>> {
        let id = item
            .as_i64()
            .or_else(|| item.get("id").and_then(Value::as_i64))
            .ok_or_else(|| invalid(&relation.pointer, "relation without id"))?;

        let Some(counterpart) = self
            .source
            .find_localization(&relation.target, id, locale)
            .await?
        else {
            debug!(
                relation = %relation.pointer,
                id,
                locale = %locale,
                "Dropping relation without target-locale counterpart"
            );
            return Ok(None);
        };

        let localized = match item {
            Value::Object(fields) => {
                let mut fields = fields.clone();
                fields.insert("id".to_string(), Value::from(counterpart.id));
                Value::Object(fields)
            }
            _ => Value::from(counterpart.id),
        };
        Ok(Some(localized))
    }

    async fn regenerate_uid(
        &self,
        document: &mut Value,
        uid: &UidField,
        content_type: &str,
        locale: &Locale,
    ) -> Result<()> {
        let base = uid
            .target_field
            .as_ref()
            .and_then(|field| {
                document
                    .pointer(&format!("{}/{}", uid.parent, escape_pointer(field)))
                    .and_then(Value::as_str)
            })
            .map(slugify)
            .filter(|slug| !slug.is_empty());

        let Some(base) = base else {
            remove_field(document, &uid.parent, &uid.name);
            return Ok(());
        };

        let mut candidate = base.clone();
        if uid.top_level {
            let mut suffix = 0;
            while self
                .source
                .uid_exists(content_type, &uid.name, &candidate, locale)
                .await?
            {
                suffix += 1;
                candidate = format!("{}-{}", base, suffix);
            }
        }

        if let Some(object) = document.pointer_mut(&uid.parent).and_then(Value::as_object_mut) {
            object.insert(uid.name.clone(), Value::String(candidate));
        }
        Ok(())
    }
}
