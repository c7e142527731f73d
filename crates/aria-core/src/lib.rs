//! Core types, config, errors, and the realtime wire protocol for Aria.

pub mod config;
pub mod error;
pub mod protocol;
pub mod types;
