//! Per-field validation rules derived from a `Schema`.
//!
//! The validator dispatches on `FieldCheck`, one coercion function per variant.

use crate::schema::model::{Property, Schema, StringFormat, VariableType};

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct NumericRange {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl NumericRange {
    pub fn is_unbounded(&self) -> bool {
        self.min.is_none() && self.max.is_none()
    }

    /// Returns the nearest in-range value when `value` falls outside the range.
    pub fn clamp(&self, value: f64) -> Option<f64> {
        match (self.min, self.max) {
            (Some(min), _) if value < min => Some(min),
            (_, Some(max)) if value > max => Some(max),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldCheck {
    Text { format: Option<StringFormat> },
    Integer { range: NumericRange },
    Float { range: NumericRange },
    Boolean,
    OneOf { allowed: Vec<String> },
    TextList,
    IntegerList,
    ObjectList { properties: Vec<Property> },
    Object { properties: Vec<Property> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldRule {
    pub name: String,
    pub required: bool,
    pub check: FieldCheck,
}

/// Rules in schema order.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationRules {
    pub fields: Vec<FieldRule>,
}

impl ValidationRules {
    pub fn required(&self) -> impl Iterator<Item = &FieldRule> {
        self.fields.iter().filter(|f| f.required)
    }
}

impl Schema {
    /// Pure projection of the schema into the validator's rule set.
    pub fn to_validation_rules(&self) -> ValidationRules {
        let fields = self
            .variables
            .iter()
            .map(|variable| {
                let range = NumericRange {
                    min: variable.min,
                    max: variable.max,
                };
                let check = match &variable.var_type {
                    VariableType::String { format } => FieldCheck::Text { format: *format },
                    VariableType::Integer => FieldCheck::Integer { range },
                    VariableType::Float => FieldCheck::Float { range },
                    VariableType::Boolean => FieldCheck::Boolean,
                    VariableType::Categorical { allowed_values } => FieldCheck::OneOf {
                        allowed: allowed_values.clone(),
                    },
                    VariableType::ListOfString => FieldCheck::TextList,
                    VariableType::ListOfInteger => FieldCheck::IntegerList,
                    VariableType::ListOfObject { properties } => FieldCheck::ObjectList {
                        properties: properties.clone(),
                    },
                    VariableType::Object { properties } => FieldCheck::Object {
                        properties: properties.clone(),
                    },
                };
                FieldRule {
                    name: variable.name.clone(),
                    required: variable.required,
                    check,
                }
            })
            .collect();

        ValidationRules { fields }
    }
}
