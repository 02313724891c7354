use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::project::Project;

/// A project deadline pinned to a calendar date, rendered as a marker row
/// above the planning grid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeadlineTask {
    pub id: Uuid,
    pub project_id: Uuid,
    pub date: NaiveDate,
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<Project>,
}
