use model::{
    core::value::Value, records::result::EnrichedFields, schema::output::OutputSchema,
};
use serde_json::{Map, Value as JsonValue};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("required field '{0}' is missing")]
    MissingField(String),

    #[error("required field '{0}' is blank")]
    BlankField(String),

    /// Field names are matched exactly; `Category` never stands in for `category`.
    #[error("field '{got}' differs from expected '{expected}' only by case")]
    CaseMismatch { expected: String, got: String },

    #[error("unexpected field '{0}'")]
    UnknownField(String),
}

/// Checks an enrichment response against the schema and converts the
/// schema's fields to cell values, keyed by field name.
///
/// Extra fields are dropped when the schema allows them. Absent or null
/// optional fields are left out, so they are not written.
pub fn validate_response(
    schema: &OutputSchema,
    response: &Map<String, JsonValue>,
) -> Result<EnrichedFields, ValidationError> {
    for key in response.keys() {
        if schema.field(key).is_some() {
            continue;
        }
        if let Some(field) = schema
            .fields
            .iter()
            .find(|f| f.name.eq_ignore_ascii_case(key))
        {
            return Err(ValidationError::CaseMismatch {
                expected: field.name.clone(),
                got: key.clone(),
            });
        }
        if !schema.allow_extra_fields {
            return Err(ValidationError::UnknownField(key.clone()));
        }
    }

    let mut fields = EnrichedFields::new();
    for field in &schema.fields {
        let value = response.get(&field.name).map(Value::from_json);
        match value {
            Some(v) if !v.is_blank() => {
                fields.insert(field.name.clone(), v);
            }
            Some(_) if field.required => return Err(ValidationError::BlankField(field.name.clone())),
            None if field.required => return Err(ValidationError::MissingField(field.name.clone())),
            _ => {}
        }
    }
    Ok(fields)
}

/// Maps validated fields onto their output columns.
pub fn to_columns(schema: &OutputSchema, fields: &EnrichedFields) -> BTreeMap<String, Value> {
    fields
        .iter()
        .filter_map(|(name, value)| {
            schema
                .field(name)
                .map(|f| (f.column().to_string(), value.clone()))
        })
        .collect()
}
