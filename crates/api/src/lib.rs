//! HTTP API for the credit engine: authentication, routing, and mapping
//! between JSON bodies and engine operations.

pub mod app;
pub mod authz;
pub mod context;
pub mod middleware;
