//! HTTP handlers for the generated CRUD operations.

pub mod crud;
pub use crud::{correlation_id, RouteContext, SharedContext};
