//! OptionSync Library
//!
//! Keeps an option-chain dashboard session in sync with the analytics server

pub mod client;
pub mod config;
pub mod error;
pub mod persistence;
pub mod sync;
pub mod types;

#[cfg(feature = "dashboard")]
pub mod dashboard;
