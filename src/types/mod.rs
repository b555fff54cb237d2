//! Shared type definitions
//!
//! This module contains the data types shared between the session and the CLI.

pub mod config;
pub mod model;
