//! Integration tests for the shipyard daemon

mod common;
mod test_engine;
mod test_fsm;
mod test_jobs;
mod test_ops;
mod test_registry;
mod test_server;
