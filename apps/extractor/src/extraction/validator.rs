//! Validator: raw model output → coerced record or the first hard failure.
//!
//! Steps, in order:
//! 1. Strip code fences and parse a JSON object (`MalformedJSON`).
//! 2. Every required field present and non-null (`MissingField`).
//! 3. Coerce each present field by its `FieldCheck` (`TypeMismatch`,
//!    `InvalidCategoricalValue`, `InvalidFormat`). Scalar strings that do not
//!    parse as the field's number or boolean become `null` instead; a required
//!    field then fails with `MissingField`.
//! 4. Numeric range: clamp to the nearest bound and record an `OutOfRange` warning.
//! 5. Unknown fields are dropped; absent optional fields become `null`.
//!
//! Steps 1-3 fail fast. The output record always has the schema's keys in schema order.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use thiserror::Error;

use crate::llm_client::strip_json_fences;
use crate::schema::model::format_bound;
use crate::schema::{
    FieldCheck, FieldRule, NumericRange, Property, PropertyType, ScalarType, Schema, StringFormat,
    ValidationRules,
};

static FIRST_DIGITS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").unwrap());
static EMAIL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap());

const TRUE_TOKENS: &[&str] = &["true", "yes", "si", "sí", "1", "verdadero"];
const FALSE_TOKENS: &[&str] = &["false", "no", "0", "falso"];

// ────────────────────────────────────────────────────────────────────────────
// Output types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationErrorKind {
    #[serde(rename = "MalformedJSON")]
    MalformedJson,
    MissingField,
    TypeMismatch,
    InvalidCategoricalValue,
    InvalidFormat,
}

/// Hard validation failure. `field` is a path such as `idiomas[0].nivel`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{message}")]
pub struct ValidationError {
    pub kind: ValidationErrorKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    pub message: String,
}

impl ValidationError {
    pub fn malformed(detail: impl std::fmt::Display) -> Self {
        Self {
            kind: ValidationErrorKind::MalformedJson,
            field: None,
            message: format!("response is not a JSON object: {detail}"),
        }
    }

    pub fn missing_field(field: &str) -> Self {
        Self {
            kind: ValidationErrorKind::MissingField,
            field: Some(field.to_string()),
            message: format!("required field '{field}' is missing or null"),
        }
    }

    fn at(kind: ValidationErrorKind, field: &str, message: String) -> Self {
        Self {
            kind,
            field: Some(field.to_string()),
            message,
        }
    }

    fn type_mismatch(field: &str, expected: &str, got: &Value) -> Self {
        Self::at(
            ValidationErrorKind::TypeMismatch,
            field,
            format!("field '{field}' expected {expected}, got {}", describe(got)),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WarningKind {
    OutOfRange,
}

/// Soft failure: the record is kept with an adjusted value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationWarning {
    pub kind: WarningKind,
    pub field: String,
    pub message: String,
    pub original: Value,
    pub adjusted: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidRecord {
    pub data: Map<String, Value>,
    pub warnings: Vec<ValidationWarning>,
}

// ────────────────────────────────────────────────────────────────────────────
// Entry points
// ────────────────────────────────────────────────────────────────────────────

pub fn validate(raw_json: &str, schema: &Schema) -> Result<ValidRecord, ValidationError> {
    validate_with_rules(raw_json, &schema.to_validation_rules())
}

pub fn validate_with_rules(
    raw_json: &str,
    rules: &ValidationRules,
) -> Result<ValidRecord, ValidationError> {
    let parsed: Value =
        serde_json::from_str(strip_json_fences(raw_json)).map_err(ValidationError::malformed)?;
    let mut object = match parsed {
        Value::Object(object) => object,
        other => {
            return Err(ValidationError::malformed(format!(
                "top-level value is {}",
                describe(&other)
            )))
        }
    };

    for rule in rules.required() {
        if object.get(&rule.name).map_or(true, Value::is_null) {
            return Err(ValidationError::missing_field(&rule.name));
        }
    }

    let mut data = Map::with_capacity(rules.fields.len());
    let mut warnings = Vec::new();

    for rule in &rules.fields {
        let value = match object.remove(&rule.name) {
            None | Some(Value::Null) => Value::Null,
            Some(raw) => coerce_field(rule, raw, &mut warnings)?,
        };
        if value.is_null() && rule.required {
            return Err(ValidationError::missing_field(&rule.name));
        }
        data.insert(rule.name.clone(), value);
    }

    Ok(ValidRecord { data, warnings })
}

// ────────────────────────────────────────────────────────────────────────────
// Per-variant coercion
// ────────────────────────────────────────────────────────────────────────────

fn coerce_field(
    rule: &FieldRule,
    raw: Value,
    warnings: &mut Vec<ValidationWarning>,
) -> Result<Value, ValidationError> {
    let path = rule.name.as_str();
    match &rule.check {
        FieldCheck::Text { format } => coerce_text(path, raw, *format),
        FieldCheck::Integer { range } => match coerce_integer(path, &raw)? {
            Some(n) => Ok(clamp_integer(path, n, range, warnings)),
            None => Ok(Value::Null),
        },
        FieldCheck::Float { range } => match coerce_float(path, &raw)? {
            Some(n) => Ok(clamp_float(path, n, range, warnings)),
            None => Ok(Value::Null),
        },
        FieldCheck::Boolean => Ok(coerce_bool(path, &raw)?.map_or(Value::Null, Value::Bool)),
        FieldCheck::OneOf { allowed } => coerce_one_of(path, raw, allowed),
        FieldCheck::TextList => coerce_list(path, raw, |item_path, item| {
            coerce_text(item_path, item, None)
        }),
        FieldCheck::IntegerList => coerce_list(path, raw, |item_path, item| {
            Ok(coerce_integer(item_path, &item)?.map_or(Value::Null, Value::from))
        }),
        FieldCheck::ObjectList { properties } => coerce_list(path, raw, |item_path, item| {
            coerce_object(item_path, item, properties)
        }),
        FieldCheck::Object { properties } if properties.is_empty() => match raw {
            Value::Object(_) => Ok(raw),
            other => Err(ValidationError::type_mismatch(path, "an object", &other)),
        },
        FieldCheck::Object { properties } => coerce_object(path, raw, properties),
    }
}

fn coerce_text(path: &str, raw: Value, format: Option<StringFormat>) -> Result<Value, ValidationError> {
    let text = match raw {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => return Ok(Value::Null),
        other => return Err(ValidationError::type_mismatch(path, "a string", &other)),
    };

    if let Some(StringFormat::Email) = format {
        if !text.is_empty() && !EMAIL.is_match(&text) {
            return Err(ValidationError::at(
                ValidationErrorKind::InvalidFormat,
                path,
                format!("field '{path}' is not a valid email address: '{text}'"),
            ));
        }
    }
    Ok(Value::String(text))
}

/// Integers accept JSON numbers without a fractional part and strings whose
/// first digit run is the value (`"5 años"`, `"8/10"`). Empty or digit-free
/// strings are null, so a required field reports `MissingField`.
fn coerce_integer(path: &str, raw: &Value) -> Result<Option<i64>, ValidationError> {
    match raw {
        Value::Null => Ok(None),
        Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => Ok(Some(i)),
            (None, Some(f)) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => Ok(Some(f as i64)),
            _ => Err(ValidationError::type_mismatch(path, "an integer", raw)),
        },
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                return Ok(None);
            }
            if let Ok(i) = s.parse::<i64>() {
                return Ok(Some(i));
            }
            Ok(FIRST_DIGITS
                .find(s)
                .and_then(|m| m.as_str().parse::<i64>().ok()))
        }
        _ => Err(ValidationError::type_mismatch(path, "an integer", raw)),
    }
}

/// Strings accept a decimal comma. Unparseable strings are null.
fn coerce_float(path: &str, raw: &Value) -> Result<Option<f64>, ValidationError> {
    match raw {
        Value::Null => Ok(None),
        Value::Number(n) => n
            .as_f64()
            .map(Some)
            .ok_or_else(|| ValidationError::type_mismatch(path, "a number", raw)),
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                return Ok(None);
            }
            Ok(s.replace(',', ".")
                .parse::<f64>()
                .ok()
                .filter(|f| f.is_finite()))
        }
        _ => Err(ValidationError::type_mismatch(path, "a number", raw)),
    }
}

/// Unrecognised tokens are null.
fn coerce_bool(path: &str, raw: &Value) -> Result<Option<bool>, ValidationError> {
    match raw {
        Value::Null => Ok(None),
        Value::Bool(b) => Ok(Some(*b)),
        Value::Number(n) if n.as_i64() == Some(1) => Ok(Some(true)),
        Value::Number(n) if n.as_i64() == Some(0) => Ok(Some(false)),
        Value::String(s) => {
            let token = s.trim().to_lowercase();
            if TRUE_TOKENS.contains(&token.as_str()) {
                Ok(Some(true))
            } else if FALSE_TOKENS.contains(&token.as_str()) {
                Ok(Some(false))
            } else {
                Ok(None)
            }
        }
        _ => Err(ValidationError::type_mismatch(path, "a boolean", raw)),
    }
}

fn coerce_one_of(path: &str, raw: Value, allowed: &[String]) -> Result<Value, ValidationError> {
    match raw {
        Value::String(s) if allowed.iter().any(|a| *a == s) => Ok(Value::String(s)),
        other => Err(ValidationError::at(
            ValidationErrorKind::InvalidCategoricalValue,
            path,
            format!(
                "field '{path}' must be one of [{}], got {}",
                allowed.join(", "),
                describe(&other)
            ),
        )),
    }
}

fn coerce_list<F>(path: &str, raw: Value, mut item: F) -> Result<Value, ValidationError>
where
    F: FnMut(&str, Value) -> Result<Value, ValidationError>,
{
    let items = match raw {
        Value::Array(items) => items,
        other => return Err(ValidationError::type_mismatch(path, "a list", &other)),
    };

    let mut out = Vec::with_capacity(items.len());
    for (index, value) in items.into_iter().enumerate() {
        if value.is_null() {
            continue;
        }
        let coerced = item(&format!("{path}[{index}]"), value)?;
        if !coerced.is_null() {
            out.push(coerced);
        }
    }
    Ok(Value::Array(out))
}

/// Validates an object against declared properties: missing properties become
/// null, undeclared keys are dropped.
fn coerce_object(path: &str, raw: Value, properties: &[Property]) -> Result<Value, ValidationError> {
    let mut object = match raw {
        Value::Object(object) => object,
        other => return Err(ValidationError::type_mismatch(path, "an object", &other)),
    };

    let mut out = Map::with_capacity(properties.len());
    for property in properties {
        let prop_path = format!("{path}.{}", property.name);
        let value = match object.remove(&property.name) {
            None | Some(Value::Null) => Value::Null,
            Some(value) => match &property.kind {
                PropertyType::Scalar(ScalarType::String) => coerce_text(&prop_path, value, None)?,
                PropertyType::Scalar(ScalarType::Integer) => {
                    coerce_integer(&prop_path, &value)?.map_or(Value::Null, Value::from)
                }
                PropertyType::Scalar(ScalarType::Float) => {
                    coerce_float(&prop_path, &value)?.map_or(Value::Null, float_value)
                }
                PropertyType::Scalar(ScalarType::Boolean) => {
                    coerce_bool(&prop_path, &value)?.map_or(Value::Null, Value::Bool)
                }
                PropertyType::Enum(allowed) => coerce_one_of(&prop_path, value, allowed)?,
            },
        };
        out.insert(property.name.clone(), value);
    }
    Ok(Value::Object(out))
}

// ────────────────────────────────────────────────────────────────────────────
// Range checks
// ────────────────────────────────────────────────────────────────────────────

fn clamp_integer(
    path: &str,
    value: i64,
    range: &NumericRange,
    warnings: &mut Vec<ValidationWarning>,
) -> Value {
    if range.is_unbounded() {
        return Value::from(value);
    }
    match range.clamp(value as f64) {
        Some(bound) => {
            let adjusted = if bound < value as f64 {
                bound.floor() as i64
            } else {
                bound.ceil() as i64
            };
            warnings.push(out_of_range(path, Value::from(value), Value::from(adjusted), range));
            Value::from(adjusted)
        }
        None => Value::from(value),
    }
}

fn clamp_float(
    path: &str,
    value: f64,
    range: &NumericRange,
    warnings: &mut Vec<ValidationWarning>,
) -> Value {
    match range.clamp(value) {
        Some(bound) => {
            warnings.push(out_of_range(path, float_value(value), float_value(bound), range));
            float_value(bound)
        }
        None => float_value(value),
    }
}

fn out_of_range(path: &str, original: Value, adjusted: Value, range: &NumericRange) -> ValidationWarning {
    let bounds = |b: Option<f64>| b.map(format_bound).unwrap_or_else(|| "-".to_string());
    ValidationWarning {
        kind: WarningKind::OutOfRange,
        field: path.to_string(),
        message: format!(
            "field '{path}' value {original} outside [{}, {}], clamped to {adjusted}",
            bounds(range.min),
            bounds(range.max)
        ),
        original,
        adjusted,
    }
}

fn float_value(f: f64) -> Value {
    Number::from_f64(f).map_or(Value::Null, Value::Number)
}

fn describe(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => format!("boolean {b}"),
        Value::Number(n) => format!("number {n}"),
        Value::String(s) => format!("string \"{s}\""),
        Value::Array(_) => "a list".to_string(),
        Value::Object(_) => "an object".to_string(),
    }
}
