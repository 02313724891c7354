use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A project that day blocks can be booked against.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub client_id: Option<Uuid>,
    #[serde(default)]
    pub archived: bool,
}

impl Project {
    /// Name shown on a block: the description when present and non-empty,
    /// otherwise the project name.
    pub fn display_name(&self) -> &str {
        match self.description.as_deref() {
            Some(description) if !description.is_empty() => description,
            _ => &self.name,
        }
    }
}
