//! HTTP API for the account service: routing, auth middleware, and
//! request/response mapping.

pub mod app;
pub mod context;
pub mod middleware;
