//! Locale type: validated locale code used for source and target locales.
//!
//! Locales are opaque to the job engine; they are only compared and passed
//! through to the entity source and the translation provider. Validation
//! rejects codes that no provider could understand.

use anyhow::{bail, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

/// A validated locale code (e.g. "en", "de", "pt-BR", "zh-Hans").
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Locale {
    code: String,
}

fn locale_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z]{2,3}(-[A-Za-z0-9]{2,8})*$").expect("valid locale regex")
    })
}

impl Locale {
    /// Parse and validate a locale code.
    ///
    /// # Returns
    /// * `Ok(Locale)` for a language subtag optionally followed by region or script subtags
    /// * `Err` for empty or malformed codes
    pub fn parse(code: &str) -> Result<Locale> {
        let code = code.trim();
        if code.is_empty() {
            bail!("Locale code must not be empty");
        }
        if !locale_pattern().is_match(code) {
            bail!("Invalid locale code: '{}'", code);
        }
        Ok(Locale {
            code: code.to_string(),
        })
    }

    /// The locale code as given (e.g. "pt-BR").
    pub fn code(&self) -> &str {
        &self.code
    }

    /// The primary language subtag, lowercased (e.g. "pt" for "pt-BR").
    pub fn language(&self) -> String {
        self.code
            .split('-')
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase()
    }
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.code)
    }
}

impl FromStr for Locale {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Locale::parse(s)
    }
}

impl TryFrom<String> for Locale {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self> {
        Locale::parse(&value)
    }
}

impl From<Locale> for String {
    fn from(locale: Locale) -> Self {
        locale.code
    }
}
