//! Shipyard API models
//!
//! Wire types shared by the daemon's HTTP handlers and any client of the API.

pub mod models;
