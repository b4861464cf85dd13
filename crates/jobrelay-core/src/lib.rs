//! # jobrelay-core
//!
//! Core crate for JobRelay. Contains the configuration schemas and the
//! unified error system shared by the engine and the command-line tool.
//!
//! This crate has **no** internal dependencies on other JobRelay crates.

pub mod config;
pub mod error;
pub mod result;

pub use error::AppError;
pub use result::AppResult;
