//! Declarative, typed stage parameters.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// The value type of a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterKind {
    /// `true`/`false`.
    Bool,
    /// Signed integer.
    Integer,
    /// Floating point number.
    Double,
    /// Free text.
    String,
    /// Index into a list of choices.
    Choice,
    /// Existing file read by the stage.
    InputFile,
    /// Existing directory read by the stage.
    InputPath,
    /// File written by the stage.
    OutputFile,
    /// Directory written by the stage.
    OutputPath,
    /// Arbitrary JSON.
    Json,
}

impl ParameterKind {
    /// Returns true for file and directory parameters.
    #[must_use]
    pub const fn is_path(&self) -> bool {
        self.is_input() || self.is_output()
    }

    /// Returns true for parameters naming something the stage reads.
    #[must_use]
    pub const fn is_input(&self) -> bool {
        matches!(self, Self::InputFile | Self::InputPath)
    }

    /// Returns true for parameters naming something the stage writes.
    #[must_use]
    pub const fn is_output(&self) -> bool {
        matches!(self, Self::OutputFile | Self::OutputPath)
    }

    /// Widget name reported to clients.
    #[must_use]
    pub const fn widget(&self) -> &'static str {
        match self {
            Self::Bool => "BooleanWidget",
            Self::Integer => "IntWidget",
            Self::Double => "DoubleWidget",
            Self::String => "StringWidget",
            Self::Choice => "ChoiceWidget",
            Self::InputFile => "InputFileWidget",
            Self::InputPath => "InputPathWidget",
            Self::OutputFile => "OutputFileWidget",
            Self::OutputPath => "OutputPathWidget",
            Self::Json => "JsonWidget",
        }
    }

    /// Parameter type name reported to clients.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Bool => "BooleanParameter",
            Self::Integer => "IntegerParameter",
            Self::Double => "DoubleParameter",
            Self::String => "StringParameter",
            Self::Choice => "ChoiceParameter",
            Self::InputFile => "InputFileParameter",
            Self::InputPath => "InputPathParameter",
            Self::OutputFile => "OutputFileParameter",
            Self::OutputPath => "OutputPathParameter",
            Self::Json => "JsonParameter",
        }
    }

    /// Value used when a declaration gives no default.
    #[must_use]
    pub fn zero_value(&self) -> Value {
        match self {
            Self::Bool => Value::Bool(false),
            Self::Integer | Self::Choice => json!(0),
            Self::Double => json!(0.0),
            Self::String | Self::InputFile | Self::InputPath | Self::OutputFile | Self::OutputPath => {
                Value::String(String::new())
            }
            Self::Json => Value::Null,
        }
    }

    /// Returns true if `value` has the right JSON type for this kind.
    #[must_use]
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            Self::Bool => value.is_boolean(),
            Self::Integer | Self::Choice => value.is_i64() || value.is_u64(),
            Self::Double => value.is_number(),
            Self::String | Self::InputFile | Self::InputPath | Self::OutputFile | Self::OutputPath => {
                value.is_string()
            }
            Self::Json => true,
        }
    }
}

impl fmt::Display for ParameterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

/// How a parameter is grouped in user interfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ParameterCategory {
    /// An ordinary setting.
    #[default]
    Parameter,
    /// Names data the stage requires.
    RequiredArray,
    /// Names data the stage creates.
    CreatedArray,
    /// Anything else.
    Uncategorized,
}

impl fmt::Display for ParameterCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parameter => write!(f, "Parameter"),
            Self::RequiredArray => write!(f, "RequiredArray"),
            Self::CreatedArray => write!(f, "CreatedArray"),
            Self::Uncategorized => write!(f, "Uncategorized"),
        }
    }
}

/// Declaration of one stage parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    /// Key used in pipeline JSON.
    pub property_name: String,
    /// Label shown to users.
    pub human_label: String,
    /// UI grouping.
    #[serde(default)]
    pub category: ParameterCategory,
    /// Order within the category; -1 when ungrouped.
    #[serde(default = "default_group_index")]
    pub group_index: i32,
    /// Computed by the stage; not settable from pipeline JSON.
    #[serde(default)]
    pub read_only: bool,
    /// Value type.
    pub kind: ParameterKind,
    /// Initial value.
    #[serde(default)]
    pub default: Value,
    /// Labels for [`ParameterKind::Choice`].
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub choices: Vec<String>,
}

const fn default_group_index() -> i32 {
    -1
}

impl Parameter {
    /// Creates a parameter with the kind's zero value as default.
    #[must_use]
    pub fn new(property_name: impl Into<String>, human_label: impl Into<String>, kind: ParameterKind) -> Self {
        Self {
            property_name: property_name.into(),
            human_label: human_label.into(),
            category: ParameterCategory::Parameter,
            group_index: -1,
            read_only: false,
            kind,
            default: kind.zero_value(),
            choices: Vec::new(),
        }
    }

    /// Sets the default value.
    #[must_use]
    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = value.into();
        self
    }

    /// Sets the category.
    #[must_use]
    pub const fn with_category(mut self, category: ParameterCategory) -> Self {
        self.category = category;
        self
    }

    /// Sets the group index.
    #[must_use]
    pub const fn with_group_index(mut self, index: i32) -> Self {
        self.group_index = index;
        self
    }

    /// Sets the choice labels.
    #[must_use]
    pub fn with_choices<I, S>(mut self, choices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.choices = choices.into_iter().map(Into::into).collect();
        self
    }

    /// Marks the parameter read-only.
    #[must_use]
    pub const fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Checks `value` against the declaration.
    pub fn check(&self, value: &Value) -> Result<(), ParameterError> {
        if !self.kind.accepts(value) {
            return Err(ParameterError::TypeMismatch {
                property: self.property_name.clone(),
                expected: self.kind,
                found: json_type_name(value).to_string(),
            });
        }
        if self.kind == ParameterKind::Choice && !self.choices.is_empty() {
            let in_range = value
                .as_u64()
                .and_then(|i| usize::try_from(i).ok())
                .is_some_and(|i| i < self.choices.len());
            if !in_range {
                return Err(ParameterError::InvalidChoice {
                    property: self.property_name.clone(),
                    value: value.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Entry of a `ListFilterParameters` response.
    #[must_use]
    pub fn to_descriptor_json(&self) -> Value {
        json!({
            "FilterParameterName": self.kind.type_name(),
            "Widget": self.kind.widget(),
            "Category": self.category.to_string(),
            "GroupIndex": self.group_index,
            "HumanLabel": self.human_label,
            "PropertyName": self.property_name,
            "ReadOnly": self.read_only,
        })
    }
}

const fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Errors raised when reading or writing parameter values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParameterError {
    /// The stage declares no such property.
    #[error("Unknown parameter '{property}'")]
    Unknown {
        /// Requested property.
        property: String,
    },

    /// The value has the wrong JSON type.
    #[error("Parameter '{property}' expects {expected}, got {found}")]
    TypeMismatch {
        /// Property name.
        property: String,
        /// Declared kind.
        expected: ParameterKind,
        /// JSON type received.
        found: String,
    },

    /// The property is computed by the stage.
    #[error("Parameter '{property}' is read-only")]
    ReadOnly {
        /// Property name.
        property: String,
    },

    /// A choice index is out of range.
    #[error("Parameter '{property}' has no choice {value}")]
    InvalidChoice {
        /// Property name.
        property: String,
        /// Rejected value.
        value: String,
    },
}

/// Parameter declarations together with their current values.
///
/// Values always satisfy their declaration; [`set`](Self::set) rejects
/// anything else.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterSet {
    parameters: Vec<Parameter>,
    values: Map<String, Value>,
}

impl ParameterSet {
    /// Creates a set with every value at its default.
    #[must_use]
    pub fn new(parameters: Vec<Parameter>) -> Self {
        let values = parameters
            .iter()
            .map(|p| (p.property_name.clone(), p.default.clone()))
            .collect();
        Self { parameters, values }
    }

    /// Declarations in order.
    #[must_use]
    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    /// Declaration of one property.
    #[must_use]
    pub fn declaration(&self, property: &str) -> Option<&Parameter> {
        self.parameters.iter().find(|p| p.property_name == property)
    }

    /// Current value of a property.
    #[must_use]
    pub fn get(&self, property: &str) -> Option<&Value> {
        self.values.get(property)
    }

    /// Replaces a value after checking it against the declaration.
    pub fn set(&mut self, property: &str, value: Value) -> Result<(), ParameterError> {
        let declaration = self
            .declaration(property)
            .ok_or_else(|| ParameterError::Unknown {
                property: property.to_string(),
            })?;
        if declaration.read_only {
            return Err(ParameterError::ReadOnly {
                property: property.to_string(),
            });
        }
        declaration.check(&value)?;
        self.values.insert(property.to_string(), value);
        Ok(())
    }

    /// Writes a computed value, bypassing the read-only check.
    pub fn set_computed(&mut self, property: &str, value: Value) -> Result<(), ParameterError> {
        let declaration = self
            .declaration(property)
            .ok_or_else(|| ParameterError::Unknown {
                property: property.to_string(),
            })?;
        declaration.check(&value)?;
        self.values.insert(property.to_string(), value);
        Ok(())
    }

    /// Boolean value, `false` when unset.
    #[must_use]
    pub fn bool(&self, property: &str) -> bool {
        self.get(property).and_then(Value::as_bool).unwrap_or(false)
    }

    /// Integer value, 0 when unset.
    #[must_use]
    pub fn i64(&self, property: &str) -> i64 {
        self.get(property).and_then(Value::as_i64).unwrap_or(0)
    }

    /// Floating point value, 0.0 when unset.
    #[must_use]
    pub fn f64(&self, property: &str) -> f64 {
        self.get(property).and_then(Value::as_f64).unwrap_or(0.0)
    }

    /// String value, empty when unset.
    #[must_use]
    pub fn str(&self, property: &str) -> &str {
        self.get(property).and_then(Value::as_str).unwrap_or("")
    }

    /// Path value, `None` when empty.
    #[must_use]
    pub fn path(&self, property: &str) -> Option<PathBuf> {
        let raw = self.str(property);
        (!raw.is_empty()).then(|| PathBuf::from(raw))
    }

    /// Values as a JSON object in declaration order.
    #[must_use]
    pub fn to_json_map(&self) -> Map<String, Value> {
        self.parameters
            .iter()
            .filter_map(|p| {
                self.values
                    .get(&p.property_name)
                    .map(|v| (p.property_name.clone(), v.clone()))
            })
            .collect()
    }
}
