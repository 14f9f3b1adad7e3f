//! Template Rendering
//!
//! Replaces `{{ name }}` placeholders with PHP literals in a single pass.
//! Substituted text is never rescanned, so a value that happens to contain
//! `{{ ... }}` cannot inject another token.

use crate::literal::PhpLiteral;
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading or rendering a template
#[derive(Debug, Error)]
pub enum TemplateError {
    /// The template file could not be read
    #[error("Failed to read template {path}: {source}")]
    Unreadable {
        /// Template location
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The template references a token that was not supplied
    #[error("Template references unknown token: {0}")]
    MissingToken(String),
}

/// Where the template text comes from
#[derive(Debug, Clone)]
pub enum TemplateSource {
    /// Read from disk at launch time
    File(PathBuf),
    /// Template text held in memory (e.g. bundled with `include_str!`)
    Inline(Cow<'static, str>),
}

impl TemplateSource {
    /// Load the template text
    pub fn load(&self) -> Result<Cow<'_, str>, TemplateError> {
        match self {
            TemplateSource::File(path) => std::fs::read_to_string(path)
                .map(Cow::Owned)
                .map_err(|source| TemplateError::Unreadable {
                    path: path.clone(),
                    source,
                }),
            TemplateSource::Inline(text) => Ok(Cow::Borrowed(text.as_ref())),
        }
    }
}

impl From<PathBuf> for TemplateSource {
    fn from(path: PathBuf) -> Self {
        TemplateSource::File(path)
    }
}

impl From<&'static str> for TemplateSource {
    fn from(text: &'static str) -> Self {
        TemplateSource::Inline(Cow::Borrowed(text))
    }
}

/// Token name → PHP literal mapping used to render a template
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptTokens {
    tokens: BTreeMap<String, PhpLiteral>,
}

impl ScriptTokens {
    /// Create an empty token set
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a token, replacing any previous value
    pub fn insert(&mut self, name: impl Into<String>, literal: PhpLiteral) -> &mut Self {
        self.tokens.insert(name.into(), literal);
        self
    }

    /// Builder-style variant of [`ScriptTokens::insert`]
    pub fn with(mut self, name: impl Into<String>, literal: PhpLiteral) -> Self {
        self.insert(name, literal);
        self
    }

    /// Look up a token
    pub fn get(&self, name: &str) -> Option<&PhpLiteral> {
        self.tokens.get(name)
    }

    /// Whether the token is set
    pub fn contains(&self, name: &str) -> bool {
        self.tokens.contains_key(name)
    }

    /// Number of tokens
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Whether no tokens are set
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Iterate over tokens in name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &PhpLiteral)> {
        self.tokens.iter().map(|(k, v)| (k.as_str(), v))
    }
}

fn is_token_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Render a template by substituting every `{{ name }}` placeholder.
///
/// Braces that do not enclose a token name are copied through unchanged.
/// Tokens the template does not reference are ignored.
pub fn render(template: &str, tokens: &ScriptTokens) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];

        if let Some(end) = after.find("}}") {
            let name = after[..end].trim();
            if is_token_name(name) {
                let literal = tokens
                    .get(name)
                    .ok_or_else(|| TemplateError::MissingToken(name.to_string()))?;
                out.push_str(literal.as_str());
                rest = &after[end + 2..];
                continue;
            }
        }

        out.push_str("{{");
        rest = after;
    }

    out.push_str(rest);
    Ok(out)
}
