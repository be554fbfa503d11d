//! Shipyard Library
//!
//! Core modules of the Shipyard deployment daemon.

pub mod app;
pub mod deploy;
pub mod errors;
pub mod events;
pub mod filesys;
pub mod http;
pub mod jobs;
pub mod logs;
pub mod models;
pub mod ops;
pub mod registry;
pub mod remote;
pub mod server;
pub mod storage;
pub mod utils;
pub mod workers;
