use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::project::Project;

/// Marker the server stores at the front of the free-text `task` field when
/// a project booking doubles as an out-of-office day.
pub const OUT_OF_OFFICE_MARKER: &str = "[OUT_OF_OFFICE]";

/// One occupied day block for one user on one calendar date.
///
/// `id` is `None` on optimistic records that have not round-tripped through
/// the server yet. The `(user_id, date, block_index)` triple addresses a
/// single cell of the planning grid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlanningTask {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    pub user_id: Uuid,
    pub date: NaiveDate,
    pub block_index: u32,
    pub project_id: Option<Uuid>,
    pub task: Option<String>,
    #[serde(default = "default_span")]
    pub span: u32,
    /// Populated by the server on reads; never sent back on writes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<Project>,
}

fn default_span() -> u32 {
    1
}

/// How a block should be presented, parsed once from the raw record.
///
/// The server has no separate column for out-of-office state; it rides in
/// the `task` text behind [`OUT_OF_OFFICE_MARKER`]. Everything downstream
/// of [`PlanningTask::kind`] works with the parsed variant instead of the
/// sentinel string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssignmentKind {
    /// No project attached: vacation, sick leave, any whole-block status.
    /// The label is the raw task text and is rendered in place of a
    /// project name.
    Status { label: String },
    /// Project work performed while marked out of office.
    ProjectOutOfOffice { note: Option<String> },
    /// An ordinary project booking.
    Project { note: Option<String> },
}

impl PlanningTask {
    /// Classify the record. Projectless records are status events; records
    /// with a project are split on whether the task text carries the
    /// out-of-office marker, which is stripped from the returned note.
    pub fn kind(&self) -> AssignmentKind {
        let text = self.task.as_deref().unwrap_or("");
        if self.project_id.is_none() {
            return AssignmentKind::Status {
                label: text.to_string(),
            };
        }
        match text.strip_prefix(OUT_OF_OFFICE_MARKER) {
            Some(rest) => AssignmentKind::ProjectOutOfOffice {
                note: non_empty(rest),
            },
            None => AssignmentKind::Project {
                note: non_empty(text),
            },
        }
    }
}

fn non_empty(text: &str) -> Option<String> {
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

/// Input for creating a planning task, shaped like the POST body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CreatePlanningTask {
    pub user_id: Uuid,
    pub date: NaiveDate,
    pub block_index: u32,
    pub project_id: Option<Uuid>,
    pub task: Option<String>,
    #[serde(default = "default_span")]
    pub span: u32,
}

impl CreatePlanningTask {
    /// The record inserted into the cache before the server has assigned
    /// an id.
    pub fn to_provisional(&self) -> PlanningTask {
        PlanningTask {
            id: None,
            user_id: self.user_id,
            date: self.date,
            block_index: self.block_index,
            project_id: self.project_id,
            task: self.task.clone(),
            span: self.span,
            project: None,
        }
    }
}

/// Patch for an existing planning task. `None` fields are left out of the
/// request body and left untouched by the merge.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePlanningTask {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_index: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span: Option<u32>,
}

impl UpdatePlanningTask {
    /// Shallow-merge the patch onto an existing record: fields present in
    /// the patch win, everything else carries over unchanged.
    pub fn apply_to(&self, task: &PlanningTask) -> PlanningTask {
        PlanningTask {
            id: task.id,
            user_id: self.user_id.unwrap_or(task.user_id),
            date: self.date.unwrap_or(task.date),
            block_index: self.block_index.unwrap_or(task.block_index),
            project_id: self.project_id.or(task.project_id),
            task: self.task.clone().or_else(|| task.task.clone()),
            span: self.span.unwrap_or(task.span),
            project: task.project.clone(),
        }
    }
}
