//! rmsyncd — assembles the rmsync crates into a polling daemon.
//!
//! The binary in `main.rs` is a thin CLI over [`bootstrap`]; the pieces live
//! here so integration tests can drive them directly.

pub mod bootstrap;
pub mod static_driver;

pub use bootstrap::{build_orchestrator, check_admission};
pub use static_driver::{STATIC_SUBTYPE, StaticDriver};
