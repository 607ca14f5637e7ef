//! schedscope manager library
//!
//! Command implementations, terminal rendering and the web dashboard
//! behind the `schedscope` binary.

pub mod commands;
pub mod dashboard;
pub mod display;
