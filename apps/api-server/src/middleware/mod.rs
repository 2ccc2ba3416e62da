//! Middleware modules.

pub mod error;
pub mod rate_limit;
pub mod subject;
