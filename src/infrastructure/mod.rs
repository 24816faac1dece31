//! Infrastructure layer modules
//!
//! This module contains shared infrastructure components:
//! - `config`: Application configuration and settings
//! - `error`: Status endpoint error types
//! - `postgres`: PostgreSQL pool manager

pub mod config;
pub mod error;
pub mod postgres;
