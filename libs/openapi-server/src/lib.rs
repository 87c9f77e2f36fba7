//! Wire models for the cloudeploy orchestrator HTTP surface

pub mod models;
