//! Record models

pub mod deployment;
pub mod project;

pub use deployment::{Deployment, LogEntry};
pub use project::{NewProject, Project};
