//! Response validation
//!
//! Schemas check a raw response before it is returned to the caller:
//!
//! - [`JsonSchema`]: structural checks (type, required, nested properties,
//!   array items, enum values)
//! - [`Typed`]: deserialization into a Rust type, reporting the failing path
//! - [`AnyJson`]: any well-formed JSON body

mod types;
mod validate;

pub use types::{JsonSchema, JsonType, JsonTypeOrArray, SchemaProperty};
pub use validate::{validate, AnyJson, Schema, Typed};
