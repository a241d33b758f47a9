//! The tracker: who advertises which file, and how peers talk to it.

pub mod client;
pub mod registry;
pub mod service;

pub use client::TrackerClient;
pub use registry::Registry;
pub use service::{TrackerService, pick_holder, run_tracker};
