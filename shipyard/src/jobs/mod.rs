pub mod registry;

pub use registry::{JobPermit, JobRegistry};
