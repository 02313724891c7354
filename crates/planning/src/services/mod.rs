pub mod assignments;
pub mod cache;
pub mod config;
pub mod planning_data;
pub mod task_mutation;
