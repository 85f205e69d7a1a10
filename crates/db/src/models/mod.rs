pub mod branch_language;
pub mod processing_log;
pub mod repository;
pub mod repository_branch;
pub mod update_task;
