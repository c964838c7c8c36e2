use crate::error::{AutopaceError, Result};
use serde::{Deserialize, Serialize};

/// Opaque card identifier handed out by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CardId(pub u64);

impl std::fmt::Display for CardId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A card as shown by the reviewer: its note fields in note order and the
/// ordinal of the template it was rendered from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Card {
    pub id: CardId,
    pub ord: usize,
    pub fields: Vec<(String, String)>,
}

impl Card {
    pub fn new(id: CardId, ord: usize) -> Self {
        Self {
            id,
            ord,
            fields: Vec::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push((name.into(), value.into()));
        self
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(n, _)| n.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardTemplate {
    pub name: String,
    pub question_format: String,
    pub answer_format: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteType {
    pub name: String,
    pub templates: Vec<CardTemplate>,
}

impl NoteType {
    /// Template the given card was rendered from.
    pub fn template_for(&self, card: &Card) -> Result<&CardTemplate> {
        self.templates
            .get(card.ord)
            .ok_or(AutopaceError::TemplateNotFound(card.ord))
    }
}
