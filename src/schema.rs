//! Content schema descriptor.
//!
//! A content type is described as attribute name -> kind, where components
//! carry their nested schema. The translation service walks this descriptor
//! to decide which fields are translated, copied, dropped, re-linked or
//! regenerated; the job engine itself only checks `localized`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A content type known to the entity source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentType {
    /// Unique content type reference (e.g. "blogPost")
    pub uid: String,
    /// Whether entries of this type exist per locale
    #[serde(default)]
    pub localized: bool,
    #[serde(default)]
    pub schema: Schema,
}

impl ContentType {
    pub fn new(uid: impl Into<String>, localized: bool, schema: Schema) -> Self {
        Self {
            uid: uid.into(),
            localized,
            schema,
        }
    }
}

/// Attributes of a content type or component, ordered by name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    #[serde(default)]
    pub attributes: BTreeMap<String, Attribute>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an attribute (builder style)
    pub fn with(mut self, name: impl Into<String>, attribute: Attribute) -> Self {
        self.attributes.insert(name.into(), attribute);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    pub kind: AttributeKind,
    /// Overrides the default handling for this attribute's kind
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translate: Option<TranslateMode>,
}

impl Attribute {
    pub fn text(format: TextFormat) -> Self {
        Self::of(AttributeKind::Text { format })
    }

    pub fn uid(target_field: Option<&str>) -> Self {
        Self::of(AttributeKind::Uid {
            target_field: target_field.map(str::to_string),
        })
    }

    pub fn relation(target: impl Into<String>, many: bool) -> Self {
        Self::of(AttributeKind::Relation {
            target: target.into(),
            many,
        })
    }

    pub fn component(schema: Schema, repeatable: bool) -> Self {
        Self::of(AttributeKind::Component { schema, repeatable })
    }

    pub fn other() -> Self {
        Self::of(AttributeKind::Other)
    }

    pub fn with_mode(mut self, mode: TranslateMode) -> Self {
        self.translate = Some(mode);
        self
    }

    fn of(kind: AttributeKind) -> Self {
        Self {
            kind,
            translate: None,
        }
    }

    /// Effective handling unless the attribute says otherwise: text is
    /// translated and components are walked, everything else is carried
    /// over. Carried-over relations are still re-linked to the target locale
    /// and uids are regenerated.
    pub fn mode(&self) -> TranslateMode {
        self.translate.unwrap_or(match self.kind {
            AttributeKind::Text { .. } | AttributeKind::Component { .. } => TranslateMode::Translate,
            _ => TranslateMode::Copy,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum AttributeKind {
    /// Translatable text in the given format
    Text {
        #[serde(default)]
        format: TextFormat,
    },
    /// Identifier-like slug derived from another field
    #[serde(rename_all = "camelCase")]
    Uid {
        #[serde(default)]
        target_field: Option<String>,
    },
    /// Reference(s) to entities of another content type
    Relation {
        target: String,
        #[serde(default)]
        many: bool,
    },
    /// Nested object (or list of objects when repeatable)
    Component {
        schema: Schema,
        #[serde(default)]
        repeatable: bool,
    },
    /// Anything else (numbers, booleans, media, json); copied as-is
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranslateMode {
    Translate,
    Copy,
    Delete,
}

/// Format of a text fragment, passed through to the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextFormat {
    #[default]
    Plain,
    Markdown,
    Html,
}

impl TextFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            TextFormat::Plain => "plain",
            TextFormat::Markdown => "markdown",
            TextFormat::Html => "html",
        }
    }
}
