// src/commands/mod.rs
//! Command handlers for the conda-mirror CLI

mod mirror;

pub use mirror::cmd_mirror;
