//! Response validation
//!
//! A [`Schema`] turns a successful [`RawResponse`] into a typed value. The
//! pipeline runs it once per logical request, after the breaker has recorded
//! the attempt; a mismatch is terminal and never retried.

use super::types::{JsonSchema, JsonType, SchemaProperty};
use crate::error::ValidationError;
use crate::http::RawResponse;
use crate::types::JsonValue;
use serde::de::DeserializeOwned;
use std::marker::PhantomData;

/// Validates a raw response and produces a typed value
pub trait Schema: Send + Sync {
    /// Value handed back to the caller
    type Output: Send;

    /// Check the response shape and convert it
    fn validate(&self, raw: &RawResponse) -> Result<Self::Output, ValidationError>;
}

/// Validate `raw` against `schema`
pub fn validate<S: Schema + ?Sized>(raw: &RawResponse, schema: &S) -> Result<S::Output, ValidationError> {
    schema.validate(raw)
}

fn parse_body(raw: &RawResponse) -> Result<JsonValue, ValidationError> {
    if raw.body.is_empty() {
        return Ok(JsonValue::Null);
    }
    serde_json::from_slice(&raw.body)
        .map_err(|e| ValidationError::new("$", format!("response body is not valid JSON: {e}")))
}

/// Accepts any JSON body
#[derive(Debug, Clone, Copy, Default)]
pub struct AnyJson;

impl Schema for AnyJson {
    type Output = JsonValue;

    fn validate(&self, raw: &RawResponse) -> Result<JsonValue, ValidationError> {
        parse_body(raw)
    }
}

impl Schema for JsonSchema {
    type Output = JsonValue;

    fn validate(&self, raw: &RawResponse) -> Result<JsonValue, ValidationError> {
        let value = parse_body(raw)?;
        check(&value, &self.root, "$")?;
        Ok(value)
    }
}

fn check(value: &JsonValue, schema: &SchemaProperty, path: &str) -> Result<(), ValidationError> {
    let actual = JsonType::of(value);

    if let Some(expected) = &schema.json_type {
        if !expected.accepts(actual) {
            return Err(ValidationError::new(
                path,
                format!("expected {expected}, found {actual}"),
            ));
        }
    }

    if let Some(allowed) = &schema.enum_values {
        if !allowed.contains(value) {
            return Err(ValidationError::new(path, format!("value {value} is not one of the allowed values")));
        }
    }

    match value {
        JsonValue::Object(map) => {
            for name in &schema.required {
                if !map.contains_key(name) {
                    return Err(ValidationError::new(
                        path,
                        format!("missing required property '{name}'"),
                    ));
                }
            }
            for (name, field) in map {
                let field_path = format!("{path}.{name}");
                match schema.properties.get(name) {
                    Some(property) => check(field, property, &field_path)?,
                    None if schema.additional_properties == Some(false) => {
                        return Err(ValidationError::new(field_path, "unexpected property"));
                    }
                    None => {}
                }
            }
        }
        JsonValue::Array(items) => {
            if let Some(item_schema) = &schema.items {
                for (i, item) in items.iter().enumerate() {
                    check(item, item_schema, &format!("{path}[{i}]"))?;
                }
            }
        }
        _ => {}
    }

    Ok(())
}

/// Deserializes the body into `T`, reporting the path of the first mismatch
pub struct Typed<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> Typed<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for Typed<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for Typed<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Typed")
            .field("type", &std::any::type_name::<T>())
            .finish()
    }
}

impl<T: DeserializeOwned + Send> Schema for Typed<T> {
    type Output = T;

    fn validate(&self, raw: &RawResponse) -> Result<T, ValidationError> {
        let mut deserializer = serde_json::Deserializer::from_slice(&raw.body);
        serde_path_to_error::deserialize(&mut deserializer).map_err(|err| {
            let path = err.path().to_string();
            let path = match path.as_str() {
                "." => "$".to_string(),
                p if p.starts_with('[') => format!("${p}"),
                p => format!("$.{p}"),
            };
            ValidationError::new(path, err.into_inner().to_string())
        })
    }
}
