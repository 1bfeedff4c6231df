//! Route registration: generated CRUD routes and common routes.

pub mod common;
pub mod registrar;

pub use common::common_routes;
pub use registrar::{plugin_fn, CrudRouter, FnPlugin, Plugin};
