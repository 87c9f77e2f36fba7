//! cloudeploy library
//!
//! Core of a static-site deployment pipeline: the build executor, the
//! deployment orchestrator and the edge router.

pub mod app;
pub mod artifacts;
pub mod bus;
pub mod deploy;
pub mod edge;
pub mod errors;
pub mod filesys;
pub mod jobs;
pub mod logs;
pub mod models;
pub mod orchestrator;
pub mod registry;
pub mod server;
pub mod storage;
pub mod store;
pub mod utils;
