//! Projection of raw planning tasks into render-ready block assignments.

use std::collections::HashMap;
use std::fmt;

use api::models::planning_task::{AssignmentKind, PlanningTask};
use chrono::NaiveDate;
use uuid::Uuid;

/// Appended to the project display name when a booking doubles as an
/// out-of-office day.
const OUT_OF_OFFICE_SUFFIX: &str = " (Out of Office)";

/// Grid cell address: one user, one date, one block slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockKey {
    pub user_id: Uuid,
    pub date: NaiveDate,
    pub block_index: u32,
}

impl BlockKey {
    pub fn new(user_id: Uuid, date: NaiveDate, block_index: u32) -> Self {
        Self {
            user_id,
            date,
            block_index,
        }
    }

    fn for_task(task: &PlanningTask) -> Self {
        Self::new(task.user_id, task.date, task.block_index)
    }
}

/// The canonical join string used by the grid.
impl fmt::Display for BlockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}-{}",
            self.user_id,
            self.date.format("%Y-%m-%d"),
            self.block_index
        )
    }
}

/// What one occupied cell renders.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockAssignment {
    pub id: Option<Uuid>,
    pub project_id: Option<Uuid>,
    /// Shown in the project slot of the cell: the resolved project display
    /// name, or the raw status text for blocks without a project.
    pub project_name: String,
    pub task: Option<String>,
    pub span: u32,
}

/// Build the per-cell assignment map for a quarter's tasks.
///
/// Pure and order-preserving: a task that repeats an already-seen cell
/// address replaces the earlier one.
pub fn block_assignments(tasks: &[PlanningTask]) -> HashMap<BlockKey, BlockAssignment> {
    let mut assignments = HashMap::with_capacity(tasks.len());
    for task in tasks {
        assignments.insert(BlockKey::for_task(task), assignment_for(task));
    }
    assignments
}

fn assignment_for(task: &PlanningTask) -> BlockAssignment {
    let display_name = task
        .project
        .as_ref()
        .map(|project| project.display_name())
        .unwrap_or("");

    let (project_name, note) = match task.kind() {
        AssignmentKind::Status { label } => (label, None),
        AssignmentKind::ProjectOutOfOffice { note } => {
            (format!("{display_name}{OUT_OF_OFFICE_SUFFIX}"), note)
        }
        AssignmentKind::Project { note } => (display_name.to_string(), note),
    };

    BlockAssignment {
        id: task.id,
        project_id: task.project_id,
        project_name,
        task: note,
        span: task.span,
    }
}

#[cfg(test)]
mod tests {
    use api::models::project::Project;

    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 14).unwrap()
    }

    fn project(name: &str, description: Option<&str>) -> Project {
        Project {
            id: Uuid::new_v4(),
            name: name.to_string(),
            description: description.map(str::to_string),
            client_id: None,
            archived: false,
        }
    }

    fn task_on_block(block_index: u32, project: Option<Project>, text: Option<&str>) -> PlanningTask {
        PlanningTask {
            id: Some(Uuid::new_v4()),
            user_id: Uuid::new_v4(),
            date: date(),
            block_index,
            project_id: project.as_ref().map(|p| p.id),
            task: text.map(str::to_string),
            span: 1,
            project,
        }
    }

    #[test]
    fn ordinary_booking_resolves_the_display_name() {
        let task = task_on_block(0, Some(project("Acme", Some("Acme rebrand"))), Some("wireframes"));
        let assignments = block_assignments(std::slice::from_ref(&task));

        let assignment = &assignments[&BlockKey::for_task(&task)];
        assert_eq!(assignment.project_name, "Acme rebrand");
        assert_eq!(assignment.task.as_deref(), Some("wireframes"));
        assert_eq!(assignment.id, task.id);
        assert_eq!(assignment.project_id, task.project_id);
        assert_eq!(assignment.span, 1);
    }

    #[test]
    fn status_event_shows_the_raw_text_in_the_project_slot() {
        let task = task_on_block(1, None, Some("Vacation"));
        let assignments = block_assignments(std::slice::from_ref(&task));

        let assignment = &assignments[&BlockKey::for_task(&task)];
        assert_eq!(assignment.project_name, "Vacation");
        assert_eq!(assignment.task, None);
        assert_eq!(assignment.project_id, None);
    }

    #[test]
    fn status_event_keeps_marker_text_verbatim() {
        // The marker is only meaningful on project bookings; projectless
        // records carry their text through untouched.
        let task = task_on_block(1, None, Some("[OUT_OF_OFFICE]"));
        let assignments = block_assignments(std::slice::from_ref(&task));

        let assignment = &assignments[&BlockKey::for_task(&task)];
        assert_eq!(assignment.project_name, "[OUT_OF_OFFICE]");
        assert_eq!(assignment.task, None);
    }

    #[test]
    fn out_of_office_booking_gets_the_suffix() {
        let task = task_on_block(
            0,
            Some(project("Acme", None)),
            Some("[OUT_OF_OFFICE]support rotation"),
        );
        let assignments = block_assignments(std::slice::from_ref(&task));

        let assignment = &assignments[&BlockKey::for_task(&task)];
        assert_eq!(assignment.project_name, "Acme (Out of Office)");
        assert_eq!(assignment.task.as_deref(), Some("support rotation"));
    }

    #[test]
    fn bare_out_of_office_marker_leaves_no_note() {
        let task = task_on_block(0, Some(project("Acme", None)), Some("[OUT_OF_OFFICE]"));
        let assignments = block_assignments(std::slice::from_ref(&task));

        let assignment = &assignments[&BlockKey::for_task(&task)];
        assert_eq!(assignment.project_name, "Acme (Out of Office)");
        assert_eq!(assignment.task, None);
    }

    #[test]
    fn unresolved_project_renders_an_empty_name() {
        let mut task = task_on_block(0, Some(project("Acme", None)), None);
        task.project = None;
        let assignments = block_assignments(std::slice::from_ref(&task));

        assert_eq!(assignments[&BlockKey::for_task(&task)].project_name, "");
    }

    #[test]
    fn repeated_cell_address_keeps_the_last_record() {
        let first = task_on_block(2, None, Some("Vacation"));
        let mut second = task_on_block(2, None, Some("Sick leave"));
        second.user_id = first.user_id;

        let assignments = block_assignments(&[first.clone(), second]);
        assert_eq!(assignments.len(), 1);
        assert_eq!(
            assignments[&BlockKey::for_task(&first)].project_name,
            "Sick leave"
        );
    }

    #[test]
    fn distinct_block_indexes_do_not_collide() {
        let first = task_on_block(0, None, Some("Vacation"));
        let mut second = task_on_block(1, None, Some("Vacation"));
        second.user_id = first.user_id;

        assert_eq!(block_assignments(&[first, second]).len(), 2);
    }

    #[test]
    fn derivation_is_pure() {
        let tasks = vec![
            task_on_block(0, Some(project("Acme", None)), Some("[OUT_OF_OFFICE]")),
            task_on_block(1, None, Some("Vacation")),
        ];
        assert_eq!(block_assignments(&tasks), block_assignments(&tasks));
    }

    #[test]
    fn block_key_renders_the_canonical_join_string() {
        let user_id = Uuid::parse_str("9b2cdbf0-3b0c-4f9e-9f5a-0a4c9a4f1b57").unwrap();
        let key = BlockKey::new(user_id, date(), 2);
        assert_eq!(
            key.to_string(),
            "9b2cdbf0-3b0c-4f9e-9f5a-0a4c9a4f1b57-2025-03-14-2"
        );
    }
}
