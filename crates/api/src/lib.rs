//! HTTP API: router, cookie/device extraction, the auth middleware chain
//! and the protected lecture/group/user routes.

pub mod app;
pub mod authz;
pub mod context;
pub mod cookies;
pub mod middleware;
