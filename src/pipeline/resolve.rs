//! Placeholder resolver: classifies each token against the binding set.
//!
//! Classification depends only on the key and the bindings:
//!
//! 1. key bound → [`Resolution::Defined`]
//! 2. key starts with the ignorable prefix → [`Resolution::OptionalUndefined`]
//! 3. otherwise → [`Resolution::RequiredUndefined`]
//!
//! Required-but-unbound keys are reported in [`Diagnostics`] once each; they
//! never stop the pipeline here. Whether they should is decided by
//! [`crate::config::UndefinedGate`] in [`crate::render`].

use crate::error::{RecoverletteError, Warning};
use crate::pipeline::scan::Token;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Key → replacement value. Keys are stored trimmed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bindings(BTreeMap<String, String>);

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `key` (trimmed) to `value`, replacing any earlier binding.
    pub fn insert(&mut self, key: impl AsRef<str>, value: impl Into<String>) {
        self.0.insert(key.as_ref().trim().to_string(), value.into());
    }

    /// Parse a `KEY=VALUE` definition. The first `=` splits; both sides
    /// are trimmed, so values may themselves contain `=`.
    pub fn parse_define(definition: &str) -> Result<(String, String), RecoverletteError> {
        let (key, value) = definition.split_once('=').ok_or_else(|| {
            RecoverletteError::InvalidConfig(format!(
                "invalid definition '{definition}': expected KEY=VALUE"
            ))
        })?;
        let key = key.trim();
        if key.is_empty() {
            return Err(RecoverletteError::InvalidConfig(format!(
                "invalid definition '{definition}': key is empty"
            )));
        }
        Ok((key.to_string(), value.trim().to_string()))
    }

    /// Build bindings from `KEY=VALUE` strings; later definitions win.
    pub fn from_defines<I, S>(defines: I) -> Result<Self, RecoverletteError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut bindings = Self::new();
        for define in defines {
            let (key, value) = Self::parse_define(define.as_ref())?;
            bindings.insert(key, value);
        }
        Ok(bindings)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for Bindings {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut bindings = Self::new();
        for (k, v) in iter {
            bindings.insert(k, v);
        }
        bindings
    }
}

/// Outcome of classifying one token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Resolution {
    /// Replace the token with this value.
    Defined(String),
    /// Unbound, but marked ignorable: delete the token.
    OptionalUndefined,
    /// Unbound: leave the token text in place and warn.
    RequiredUndefined,
}

impl Resolution {
    /// Text that replaces the token, or `None` to leave it verbatim.
    pub fn replacement(&self) -> Option<&str> {
        match self {
            Resolution::Defined(value) => Some(value),
            Resolution::OptionalUndefined => Some(""),
            Resolution::RequiredUndefined => None,
        }
    }
}

/// A token paired with its classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedToken {
    pub token: Token,
    pub resolution: Resolution,
}

/// Classify one key.
pub fn classify(key: &str, bindings: &Bindings, ignorable_prefix: Option<&str>) -> Resolution {
    if let Some(value) = bindings.get(key) {
        return Resolution::Defined(value.to_string());
    }
    match ignorable_prefix {
        Some(prefix) if key.starts_with(prefix) => Resolution::OptionalUndefined,
        _ => Resolution::RequiredUndefined,
    }
}

/// Classify every token and collect diagnostics.
pub fn resolve<I>(
    tokens: I,
    bindings: &Bindings,
    ignorable_prefix: Option<&str>,
) -> (Vec<ResolvedToken>, Diagnostics)
where
    I: IntoIterator<Item = Token>,
{
    let mut diagnostics = Diagnostics::default();
    let resolved = tokens
        .into_iter()
        .map(|token| {
            let resolution = classify(&token.key, bindings, ignorable_prefix);
            diagnostics.record(&token.key, &resolution);
            ResolvedToken { token, resolution }
        })
        .collect();
    (resolved, diagnostics)
}

/// Per-key occurrence counts and the deduplicated list of required keys that
/// had no value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostics {
    /// Sorted, each key once.
    pub required_undefined: Vec<String>,
    pub defined: usize,
    pub optional_undefined: usize,
    pub unresolved: usize,
    /// Occurrences per key, sorted by key.
    pub occurrences: BTreeMap<String, usize>,
}

impl Diagnostics {
    fn record(&mut self, key: &str, resolution: &Resolution) {
        *self.occurrences.entry(key.to_string()).or_default() += 1;
        match resolution {
            Resolution::Defined(_) => self.defined += 1,
            Resolution::OptionalUndefined => self.optional_undefined += 1,
            Resolution::RequiredUndefined => {
                self.unresolved += 1;
                if let Err(pos) = self.required_undefined.binary_search_by(|k| k.as_str().cmp(key)) {
                    self.required_undefined.insert(pos, key.to_string());
                }
            }
        }
    }

    pub fn has_required_undefined(&self) -> bool {
        !self.required_undefined.is_empty()
    }

    /// One warning per undefined required key.
    pub fn warnings(&self) -> Vec<Warning> {
        self.required_undefined
            .iter()
            .map(|key| Warning::UndefinedPlaceholder { key: key.clone() })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::scan::Fragment;

    fn token(key: &str) -> Token {
        Token {
            paragraph: 0,
            key: key.into(),
            raw: format!("{{{{{key}}}}}"),
            start: 0,
            end: key.len() + 4,
            span: vec![Fragment { run: 0, offset: 0, len: key.len() + 4 }],
        }
    }

    #[test]
    fn classification_rules() {
        let bindings: Bindings = [("COMPANY", "Acme"), ("ADDL_BOUND", "yes")].into_iter().collect();
        let p = Some("ADDL_");
        assert_eq!(classify("COMPANY", &bindings, p), Resolution::Defined("Acme".into()));
        assert_eq!(classify("ADDL_BOUND", &bindings, p), Resolution::Defined("yes".into()));
        assert_eq!(classify("ADDL_NOTE", &bindings, p), Resolution::OptionalUndefined);
        assert_eq!(classify("TITLE", &bindings, p), Resolution::RequiredUndefined);
        assert_eq!(classify("ADDL_NOTE", &bindings, None), Resolution::RequiredUndefined);
    }

    #[test]
    fn required_undefined_reported_once_and_sorted() {
        let tokens = ["TITLE", "DATE", "TITLE", "COMPANY", "ADDL_X", "DATE"].map(token);
        let bindings: Bindings = [("COMPANY", "Acme")].into_iter().collect();
        let (resolved, diag) = resolve(tokens, &bindings, Some("ADDL_"));

        assert_eq!(resolved.len(), 6);
        assert_eq!(diag.required_undefined, vec!["DATE", "TITLE"]);
        assert_eq!(diag.unresolved, 4);
        assert_eq!(diag.defined, 1);
        assert_eq!(diag.optional_undefined, 1);
        assert_eq!(diag.occurrences["TITLE"], 2);
        assert_eq!(diag.warnings().len(), 2);
    }

    #[test]
    fn replacement_text_per_resolution() {
        assert_eq!(Resolution::Defined("v".into()).replacement(), Some("v"));
        assert_eq!(Resolution::OptionalUndefined.replacement(), Some(""));
        assert_eq!(Resolution::RequiredUndefined.replacement(), None);
    }

    #[test]
    fn parse_define_splits_on_first_equals_and_trims() {
        assert_eq!(
            Bindings::parse_define(" URL = https://x.test/?a=b ").unwrap(),
            ("URL".to_string(), "https://x.test/?a=b".to_string())
        );
        assert_eq!(
            Bindings::parse_define("EMPTY=").unwrap(),
            ("EMPTY".to_string(), String::new())
        );
        assert!(Bindings::parse_define("NOEQUALS").is_err());
        assert!(Bindings::parse_define("  =value").is_err());
    }

    #[test]
    fn later_defines_override_earlier_ones() {
        let b = Bindings::from_defines(["A=1", "B=2", "A=3"]).unwrap();
        assert_eq!(b.get("A"), Some("3"));
        assert_eq!(b.len(), 2);
    }
}
