//! Event bus channel naming

/// Channel name patterns
pub struct Channels;

impl Channels {
    const BUILD_LOGS_PREFIX: &'static str = "logs:";

    /// Build log channel for a project
    pub fn build_logs(project_id: &str) -> String {
        format!("{}{}", Self::BUILD_LOGS_PREFIX, project_id)
    }
}
