//! Request parsing and field-rule validation shared by the CRUD handlers.

mod query;
mod validation;
pub use query::{parse_id, parse_list_query, parse_projection, strip_fields, FieldPolicy};
pub use validation::RequestValidator;
