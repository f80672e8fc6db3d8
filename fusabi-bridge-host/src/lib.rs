//! Bridge host library
//!
//! This module exports the internal components of the host for testing purposes.

pub mod catalog;
pub mod config;
pub mod coordinator;
pub mod protocol;
