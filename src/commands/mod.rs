//! CLI command implementations
//!
//! Commands that touch a part go through [`ops`], which drives everything
//! through a powered `Session` so the rails never stay up after a failure.
//! `list` and `info` work from the database alone.

pub mod info;
mod list;
pub mod ops;

pub use list::{list_devices, list_programmers};
