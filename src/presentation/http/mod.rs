//! HTTP Surface
//!
//! Router assembly and the operational handlers.

pub mod handlers;
pub mod routes;
