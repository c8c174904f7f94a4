//! Schema model: typed variables parsed from a YAML definition.
//!
//! ```yaml
//! version: 1
//! variables:
//!   - name: años_experiencia
//!     type: integer
//!     min: 0
//!     max: 50
//!     required: false
//!   - name: idiomas
//!     type: list[object]
//!     properties:
//!       idioma: string
//!       nivel: [basico, intermedio, avanzado]
//! ```

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value as YamlValue};
use thiserror::Error;

// ────────────────────────────────────────────────────────────────────────────
// Errors
// ────────────────────────────────────────────────────────────────────────────

/// Fatal for a batch: nothing is scheduled when the schema does not parse.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SchemaError {
    #[error("invalid schema YAML: {0}")]
    Yaml(String),

    #[error("schema must declare a 'version'")]
    MissingVersion,

    #[error("schema must declare a non-empty 'variables' list")]
    MissingVariables,

    #[error("variable #{index} is missing '{attribute}'")]
    MissingAttribute {
        index: usize,
        attribute: &'static str,
    },

    #[error("duplicate variable name '{0}'")]
    DuplicateName(String),

    #[error("variable '{name}' has unknown type '{type_tag}'")]
    UnknownType { name: String, type_tag: String },

    #[error("categorical variable '{0}' needs a non-empty 'allowed_values'")]
    EmptyAllowedValues(String),

    #[error("variable '{name}' has min {min} greater than max {max}")]
    InvertedRange { name: String, min: f64, max: f64 },

    #[error("variable '{name}' of type {type_tag} cannot declare min/max")]
    RangeOnNonNumeric { name: String, type_tag: &'static str },

    #[error("variable '{0}' of type list_of_object needs 'properties'")]
    MissingProperties(String),

    #[error("variable '{name}' has invalid property '{property}': {reason}")]
    InvalidProperty {
        name: String,
        property: String,
        reason: String,
    },

    #[error("variable '{name}' has unsupported format '{format}'")]
    UnsupportedFormat { name: String, format: String },
}

// ────────────────────────────────────────────────────────────────────────────
// Model
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarType {
    String,
    Integer,
    Float,
    Boolean,
}

impl ScalarType {
    pub fn tag(&self) -> &'static str {
        match self {
            ScalarType::String => "string",
            ScalarType::Integer => "integer",
            ScalarType::Float => "float",
            ScalarType::Boolean => "boolean",
        }
    }

    fn from_tag(tag: &str) -> Option<Self> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "string" => Some(ScalarType::String),
            "integer" => Some(ScalarType::Integer),
            "float" => Some(ScalarType::Float),
            "boolean" => Some(ScalarType::Boolean),
            _ => None,
        }
    }
}

/// Type of a nested property inside `list_of_object` / `object` variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyType {
    Scalar(ScalarType),
    /// Closed set of allowed strings, matched case-sensitively.
    Enum(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
    pub name: String,
    pub kind: PropertyType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringFormat {
    Email,
}

impl StringFormat {
    pub fn tag(&self) -> &'static str {
        match self {
            StringFormat::Email => "email",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum VariableType {
    String { format: Option<StringFormat> },
    Integer,
    Float,
    Boolean,
    Categorical { allowed_values: Vec<String> },
    ListOfString,
    ListOfInteger,
    ListOfObject { properties: Vec<Property> },
    /// Free-form object; nested `properties` are optional.
    Object { properties: Vec<Property> },
}

impl VariableType {
    /// Canonical type tag, as written by `Schema::to_canonical_yaml`.
    pub fn tag(&self) -> &'static str {
        match self {
            VariableType::String { .. } => "string",
            VariableType::Integer => "integer",
            VariableType::Float => "float",
            VariableType::Boolean => "boolean",
            VariableType::Categorical { .. } => "categorical",
            VariableType::ListOfString => "list_of_string",
            VariableType::ListOfInteger => "list_of_integer",
            VariableType::ListOfObject { .. } => "list_of_object",
            VariableType::Object { .. } => "object",
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, VariableType::Integer | VariableType::Float)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SchemaVariable {
    pub name: String,
    pub var_type: VariableType,
    pub required: bool,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub description: Option<String>,
}

/// Ordered variables plus a version. Variable order drives prompt and record order.
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    pub version: u32,
    pub variables: Vec<SchemaVariable>,
}

// ────────────────────────────────────────────────────────────────────────────
// Raw YAML shape
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RawSchema {
    version: Option<u32>,
    variables: Option<Vec<RawVariable>>,
}

#[derive(Debug, Deserialize)]
struct RawVariable {
    name: Option<String>,
    #[serde(rename = "type")]
    type_tag: Option<String>,
    #[serde(default)]
    required: bool,
    min: Option<f64>,
    max: Option<f64>,
    allowed_values: Option<Vec<String>>,
    properties: Option<Mapping>,
    format: Option<String>,
    description: Option<String>,
}

#[derive(Debug, Serialize)]
struct CanonicalSchema {
    version: u32,
    variables: Vec<CanonicalVariable>,
}

#[derive(Debug, Serialize)]
struct CanonicalVariable {
    name: String,
    #[serde(rename = "type")]
    type_tag: &'static str,
    required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    min: Option<YamlValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max: Option<YamlValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    allowed_values: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    properties: Option<Mapping>,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
}

// ────────────────────────────────────────────────────────────────────────────
// Parsing
// ────────────────────────────────────────────────────────────────────────────

impl Schema {
    /// Parses a YAML schema definition and checks its invariants.
    pub fn parse(raw: &str) -> Result<Self, SchemaError> {
        let raw: RawSchema =
            serde_yaml::from_str(raw).map_err(|e| SchemaError::Yaml(e.to_string()))?;

        let version = raw.version.ok_or(SchemaError::MissingVersion)?;
        let raw_variables = raw
            .variables
            .filter(|v| !v.is_empty())
            .ok_or(SchemaError::MissingVariables)?;

        let mut seen = HashSet::new();
        let mut variables = Vec::with_capacity(raw_variables.len());

        for (index, raw_var) in raw_variables.into_iter().enumerate() {
            let variable = parse_variable(index, raw_var)?;
            if !seen.insert(variable.name.clone()) {
                return Err(SchemaError::DuplicateName(variable.name));
            }
            variables.push(variable);
        }

        Ok(Schema { version, variables })
    }

    /// Serializes to the canonical YAML form. `Schema::parse` of the output
    /// yields a schema equal to `self`.
    pub fn to_canonical_yaml(&self) -> Result<String, SchemaError> {
        let canonical = CanonicalSchema {
            version: self.version,
            variables: self.variables.iter().map(canonical_variable).collect(),
        };
        serde_yaml::to_string(&canonical).map_err(|e| SchemaError::Yaml(e.to_string()))
    }

    pub fn variable(&self, name: &str) -> Option<&SchemaVariable> {
        self.variables.iter().find(|v| v.name == name)
    }

    pub fn required_names(&self) -> impl Iterator<Item = &str> {
        self.variables
            .iter()
            .filter(|v| v.required)
            .map(|v| v.name.as_str())
    }
}

fn parse_variable(index: usize, raw: RawVariable) -> Result<SchemaVariable, SchemaError> {
    let name = raw
        .name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .ok_or(SchemaError::MissingAttribute {
            index,
            attribute: "name",
        })?;
    let type_tag = raw.type_tag.ok_or(SchemaError::MissingAttribute {
        index,
        attribute: "type",
    })?;

    let var_type = match type_tag.trim().to_ascii_lowercase().as_str() {
        "string" => VariableType::String {
            format: parse_format(&name, raw.format.as_deref())?,
        },
        "integer" => VariableType::Integer,
        "float" => VariableType::Float,
        "boolean" => VariableType::Boolean,
        "categorical" => {
            let allowed_values = raw.allowed_values.unwrap_or_default();
            if allowed_values.is_empty() {
                return Err(SchemaError::EmptyAllowedValues(name));
            }
            VariableType::Categorical { allowed_values }
        }
        "list_of_string" | "list[string]" => VariableType::ListOfString,
        "list_of_integer" | "list[integer]" => VariableType::ListOfInteger,
        "list_of_object" | "list[object]" => {
            let mapping = raw
                .properties
                .ok_or_else(|| SchemaError::MissingProperties(name.clone()))?;
            VariableType::ListOfObject {
                properties: parse_properties(&name, &mapping)?,
            }
        }
        "object" => VariableType::Object {
            properties: match &raw.properties {
                Some(mapping) => parse_properties(&name, mapping)?,
                None => Vec::new(),
            },
        },
        _ => {
            return Err(SchemaError::UnknownType {
                name,
                type_tag: type_tag.clone(),
            })
        }
    };

    if (raw.min.is_some() || raw.max.is_some()) && !var_type.is_numeric() {
        return Err(SchemaError::RangeOnNonNumeric {
            name,
            type_tag: var_type.tag(),
        });
    }
    if let (Some(min), Some(max)) = (raw.min, raw.max) {
        if min > max {
            return Err(SchemaError::InvertedRange { name, min, max });
        }
    }

    Ok(SchemaVariable {
        name,
        var_type,
        required: raw.required,
        min: raw.min,
        max: raw.max,
        description: raw.description.filter(|d| !d.trim().is_empty()),
    })
}

fn parse_format(name: &str, format: Option<&str>) -> Result<Option<StringFormat>, SchemaError> {
    match format.map(|f| f.trim().to_ascii_lowercase()) {
        None => Ok(None),
        Some(f) if f == "email" => Ok(Some(StringFormat::Email)),
        Some(f) => Err(SchemaError::UnsupportedFormat {
            name: name.to_string(),
            format: f,
        }),
    }
}

fn parse_properties(name: &str, mapping: &Mapping) -> Result<Vec<Property>, SchemaError> {
    let invalid = |property: String, reason: &str| SchemaError::InvalidProperty {
        name: name.to_string(),
        property,
        reason: reason.to_string(),
    };

    let mut seen = HashSet::new();
    let mut properties = Vec::with_capacity(mapping.len());

    for (key, value) in mapping {
        let key = key
            .as_str()
            .ok_or_else(|| invalid(format!("{key:?}"), "property names must be strings"))?
            .to_string();

        let kind = match value {
            YamlValue::String(tag) => ScalarType::from_tag(tag)
                .map(PropertyType::Scalar)
                .ok_or_else(|| invalid(key.clone(), "expected string, integer, float or boolean"))?,
            YamlValue::Sequence(items) => {
                let allowed: Option<Vec<String>> = items
                    .iter()
                    .map(|item| item.as_str().map(str::to_string))
                    .collect();
                match allowed {
                    Some(allowed) if !allowed.is_empty() => PropertyType::Enum(allowed),
                    _ => return Err(invalid(key, "enum values must be a non-empty list of strings")),
                }
            }
            _ => return Err(invalid(key, "expected a type tag or a list of allowed values")),
        };

        if !seen.insert(key.clone()) {
            return Err(invalid(key, "duplicate property"));
        }
        properties.push(Property { name: key, kind });
    }

    Ok(properties)
}

// ────────────────────────────────────────────────────────────────────────────
// Canonical serialization
// ────────────────────────────────────────────────────────────────────────────

fn canonical_variable(variable: &SchemaVariable) -> CanonicalVariable {
    let (allowed_values, properties, format) = match &variable.var_type {
        VariableType::String { format } => (None, None, format.map(|f| f.tag())),
        VariableType::Categorical { allowed_values } => (Some(allowed_values.clone()), None, None),
        VariableType::ListOfObject { properties } => (None, Some(properties_mapping(properties)), None),
        VariableType::Object { properties } if !properties.is_empty() => {
            (None, Some(properties_mapping(properties)), None)
        }
        _ => (None, None, None),
    };

    CanonicalVariable {
        name: variable.name.clone(),
        type_tag: variable.var_type.tag(),
        required: variable.required,
        min: variable.min.map(bound_value),
        max: variable.max.map(bound_value),
        allowed_values,
        properties,
        format,
        description: variable.description.clone(),
    }
}

fn properties_mapping(properties: &[Property]) -> Mapping {
    let mut mapping = Mapping::new();
    for property in properties {
        let value = match &property.kind {
            PropertyType::Scalar(scalar) => YamlValue::String(scalar.tag().to_string()),
            PropertyType::Enum(allowed) => YamlValue::Sequence(
                allowed.iter().cloned().map(YamlValue::String).collect(),
            ),
        };
        mapping.insert(YamlValue::String(property.name.clone()), value);
    }
    mapping
}

/// Integral bounds are written without a fractional part (`50`, not `50.0`).
fn bound_value(bound: f64) -> YamlValue {
    if bound.fract() == 0.0 && bound.abs() < i64::MAX as f64 {
        YamlValue::Number((bound as i64).into())
    } else {
        YamlValue::Number(bound.into())
    }
}

/// Formats a bound for human-facing text (prompts, warnings).
pub fn format_bound(bound: f64) -> String {
    if bound.fract() == 0.0 && bound.abs() < i64::MAX as f64 {
        format!("{}", bound as i64)
    } else {
        format!("{bound}")
    }
}
