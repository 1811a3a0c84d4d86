//! Core types, config, errors, queue and stores for radio24.

pub mod config;
pub mod error;
pub mod program;
pub mod protocol;
pub mod queue;
pub mod shutdown;
pub mod submission;
pub mod token;
