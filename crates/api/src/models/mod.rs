pub mod deadline_task;
pub mod planning_task;
pub mod project;
pub mod quarter;
pub mod user;
