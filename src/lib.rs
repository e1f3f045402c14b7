#![allow(unused_assignments)] // thiserror/miette proc macros trigger false positives

pub mod build;
pub mod cli;
pub mod collect;
pub mod config;
pub mod error;
pub mod host;
pub mod launcher;
pub mod paths;
pub mod policy;
pub mod progress;
pub mod source;
pub mod validate;
