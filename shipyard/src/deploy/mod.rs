//! Deployment module

pub mod emitter;
pub mod engine;
pub mod fsm;
pub mod health;

pub use engine::{DeploymentEngine, DeploymentHandle};
