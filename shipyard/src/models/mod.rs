//! Data models

pub mod event;
pub mod job;
pub mod project;
