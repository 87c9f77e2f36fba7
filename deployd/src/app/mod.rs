//! Process lifecycle: the long-running host and the one-shot build job

pub mod build;
pub mod options;
pub mod run;
pub mod state;
