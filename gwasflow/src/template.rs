//! Command template substitution.
//!
//! Stage commands are strings with `{placeholder}` markers that are
//! substituted with declared input/output paths and run-scoped variables
//! (project directory, timestamp, sample list) before dispatch. Literal
//! braces are written `{{` and `}}`.

use crate::errors::ConfigurationError;
use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

/// Matches escape sequences, `{name}` placeholders, and stray braces.
fn token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\{\{|\}\}|\{([A-Za-z_][A-Za-z0-9_]*)\}|\{|\}")
            .expect("token regex is valid")
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Placeholder(String),
}

/// A stage command with `{placeholder}` substitution markers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplate {
    raw: String,
}

impl CommandTemplate {
    /// Creates a template from its raw text.
    #[must_use]
    pub fn new(raw: impl Into<String>) -> Self {
        Self { raw: raw.into() }
    }

    /// The raw template text.
    #[must_use]
    pub fn raw(&self) -> &str {
        &self.raw
    }

    fn segments(&self, stage: &str) -> Result<Vec<Segment>, ConfigurationError> {
        let mut segments = Vec::new();
        let mut last = 0;

        for caps in token_re().captures_iter(&self.raw) {
            let m = caps.get(0).unwrap_or_else(|| unreachable!());
            if m.start() > last {
                segments.push(Segment::Literal(self.raw[last..m.start()].to_string()));
            }
            match m.as_str() {
                "{{" => segments.push(Segment::Literal("{".to_string())),
                "}}" => segments.push(Segment::Literal("}".to_string())),
                "{" | "}" => {
                    return Err(ConfigurationError::UnknownPlaceholder {
                        stage: stage.to_string(),
                        placeholder: format!("unbalanced '{}'", m.as_str()),
                    });
                }
                _ => {
                    let name = caps
                        .get(1)
                        .map(|g| g.as_str().to_string())
                        .unwrap_or_default();
                    segments.push(Segment::Placeholder(name));
                }
            }
            last = m.end();
        }
        if last < self.raw.len() {
            segments.push(Segment::Literal(self.raw[last..].to_string()));
        }
        Ok(segments)
    }

    /// Returns the placeholder names referenced by the template.
    pub fn referenced(&self, stage: &str) -> Result<Vec<String>, ConfigurationError> {
        Ok(self
            .segments(stage)?
            .into_iter()
            .filter_map(|s| match s {
                Segment::Placeholder(name) => Some(name),
                Segment::Literal(_) => None,
            })
            .collect())
    }

    /// Checks that every placeholder is resolvable from `known` keys.
    pub fn validate(&self, stage: &str, known: &TemplateKeys) -> Result<(), ConfigurationError> {
        for name in self.referenced(stage)? {
            if !known.contains(&name) {
                return Err(ConfigurationError::UnknownPlaceholder {
                    stage: stage.to_string(),
                    placeholder: name,
                });
            }
        }
        Ok(())
    }

    /// Substitutes every placeholder, yielding the runnable command.
    pub fn render(&self, stage: &str, vars: &TemplateVars) -> Result<String, ConfigurationError> {
        let mut out = String::with_capacity(self.raw.len());
        for segment in self.segments(stage)? {
            match segment {
                Segment::Literal(text) => out.push_str(&text),
                Segment::Placeholder(name) => match vars.get(&name) {
                    Some(value) => out.push_str(value),
                    None => {
                        return Err(ConfigurationError::UnknownPlaceholder {
                            stage: stage.to_string(),
                            placeholder: name,
                        });
                    }
                },
            }
        }
        Ok(out)
    }
}

impl From<String> for CommandTemplate {
    fn from(raw: String) -> Self {
        Self::new(raw)
    }
}

impl From<&str> for CommandTemplate {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

/// The set of placeholder names a template may reference.
#[derive(Debug, Clone, Default)]
pub struct TemplateKeys {
    keys: Vec<String>,
}

impl TemplateKeys {
    /// Creates an empty key set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a key.
    pub fn add(&mut self, key: impl Into<String>) {
        self.keys.push(key.into());
    }

    /// Returns true if `key` is resolvable.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.keys.iter().any(|k| k == key)
    }
}

/// Resolved placeholder values for one stage dispatch.
#[derive(Debug, Clone, Default)]
pub struct TemplateVars {
    values: HashMap<String, String>,
}

impl TemplateVars {
    /// Creates an empty variable set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a variable.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    /// Looks up a variable.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&String> {
        self.values.get(key)
    }

    /// The key names currently set, as a validation key set.
    #[must_use]
    pub fn keys(&self) -> TemplateKeys {
        let mut keys = TemplateKeys::new();
        for key in self.values.keys() {
            keys.add(key);
        }
        keys
    }
}
