//! `{key}` prompt templates rendered from a stage's context snapshot.

use crate::context::StageContext;
use crate::stages::StageError;
use regex::Regex;
use serde_json::Value;
use std::fmt;
use std::sync::LazyLock;

/// `{{` and `}}` are escaped braces; `{ident}` is a placeholder.
#[allow(clippy::expect_used)]
static TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{|\}\}|\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("placeholder pattern is valid")
});

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Placeholder(String),
}

/// A parsed prompt template.
///
/// Braces that do not form a placeholder are kept literally, so code
/// samples embedded in a prompt survive rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    source: String,
    segments: Vec<Segment>,
}

impl PromptTemplate {
    /// Parses `source`.
    #[must_use]
    pub fn parse(source: impl Into<String>) -> Self {
        let source = source.into();
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut last = 0;

        for caps in TOKEN.captures_iter(&source) {
            let Some(whole) = caps.get(0) else { continue };
            literal.push_str(&source[last..whole.start()]);
            last = whole.end();
            match caps.get(1) {
                Some(name) => {
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Placeholder(name.as_str().to_string()));
                }
                None => literal.push_str(&whole.as_str()[..1]),
            }
        }
        literal.push_str(&source[last..]);
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Self { source, segments }
    }

    /// The template text as written.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Distinct placeholder names in order of first use.
    #[must_use]
    pub fn placeholders(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for segment in &self.segments {
            if let Segment::Placeholder(name) = segment {
                if !names.contains(&name.as_str()) {
                    names.push(name);
                }
            }
        }
        names
    }

    /// Renders the template against a stage's snapshot.
    ///
    /// # Errors
    ///
    /// Fails with the context's `UndeclaredInput` or `MissingInput` error
    /// when a placeholder cannot be resolved.
    pub fn render(&self, ctx: &StageContext) -> Result<String, StageError> {
        let mut out = String::with_capacity(self.source.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Placeholder(key) => match ctx.require(key)? {
                    Value::String(s) => out.push_str(s),
                    other => out.push_str(&other.to_string()),
                },
            }
        }
        Ok(out)
    }
}

impl fmt::Display for PromptTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl From<&str> for PromptTemplate {
    fn from(source: &str) -> Self {
        Self::parse(source)
    }
}

impl From<String> for PromptTemplate {
    fn from(source: String) -> Self {
        Self::parse(source)
    }
}
