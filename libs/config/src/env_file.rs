//! `.env` style key-value files
//!
//! ```text
//! # comment
//! rabbitmq_host="rabbit.internal"
//! rabbitmq_password=${RABBIT_PASSWORD}
//! literal="pa$word"
//! ```

use anyhow::{Context, Result};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

/// Replacement shown for sensitive values
pub const REDACTED: &str = "***";

const SENSITIVE_MARKERS: [&str; 4] = ["password", "key", "secret", "connection"];

/// Whether a key's value must not appear in logs
pub fn is_sensitive_key(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    SENSITIVE_MARKERS.iter().any(|marker| key.contains(marker))
}

/// Parsed key-value pairs, keys kept as written
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvFile {
    entries: BTreeMap<String, String>,
}

impl EnvFile {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read env file {:?}", path))?;
        let env = Self::parse(&contents).with_context(|| format!("Failed to parse env file {:?}", path))?;
        debug!(path = ?path, entries = env.len(), "Env file loaded");
        Ok(env)
    }

    /// Parse `KEY=value` lines. Blank lines, `#` comments and lines without
    /// `=` are skipped. Quoted values (single or double) are taken literally;
    /// bare values get `${VAR}` expansion and keep any other `$` as written.
    pub fn parse(contents: &str) -> Result<Self> {
        let mut entries = BTreeMap::new();

        for (number, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, raw)) = line.split_once('=') else {
                continue;
            };
            let key = key.trim().trim_start_matches("export ").trim();
            if key.is_empty() {
                continue;
            }

            let raw = raw.trim();
            let value = match strip_quotes(raw, '\'').or_else(|| strip_quotes(raw, '"')) {
                Some(literal) => literal.to_string(),
                None => expand_braced(raw)
                    .with_context(|| format!("line {}: cannot expand value of '{}'", number + 1, key))?,
            };

            entries.insert(key.to_string(), value);
        }

        Ok(Self { entries })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Value for `key`, or `default` when absent or empty
    pub fn get_or(&self, key: &str, default: &str) -> String {
        match self.get(key) {
            Some(value) if !value.is_empty() => value.to_string(),
            _ => default.to_string(),
        }
    }

    /// `true` when the value is `true` in any case; `default` when absent
    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.get(key) {
            Some(value) => value.trim().eq_ignore_ascii_case("true"),
            None => default,
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &BTreeMap<String, String> {
        &self.entries
    }

    /// Copy safe to log: sensitive values replaced by [`REDACTED`]
    pub fn redacted(&self) -> BTreeMap<String, String> {
        self.entries
            .iter()
            .map(|(k, v)| {
                let shown = if is_sensitive_key(k) { REDACTED.to_string() } else { v.clone() };
                (k.clone(), shown)
            })
            .collect()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for EnvFile {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

/// Expand `${VAR}` references only; a `$` not followed by `{` is kept
fn expand_braced(raw: &str) -> Result<String, shellexpand::LookupError<std::env::VarError>> {
    let mut escaped = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        escaped.push(c);
        if c == '$' && chars.peek() != Some(&'{') {
            escaped.push('$');
        }
    }
    shellexpand::env(&escaped).map(Cow::into_owned)
}

fn strip_quotes(value: &str, quote: char) -> Option<&str> {
    if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
        Some(&value[1..value.len() - 1])
    } else {
        None
    }
}
