//! Build execution: source checkout, build commands, artifact upload

pub mod env;
pub mod executor;
pub mod fsm;
pub mod git;
pub mod outcome;

pub use env::BuildEnv;
pub use executor::{BuildExecutor, BuildPlan};
pub use fsm::{DeploymentStatus, StatusEvent, StatusFsm};
pub use git::RepoSource;
pub use outcome::{BuildFailure, BuildOutcome};
