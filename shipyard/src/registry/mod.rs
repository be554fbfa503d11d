pub mod projects;

pub use projects::ProjectRegistry;
