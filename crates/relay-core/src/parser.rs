//! Structured command parsing.
//!
//! Turns text such as `!order item:pizza quantity:2 address:123 Main St`
//! into typed fields checked against a [`MessageTemplate`], and infers
//! templates from example strings.
//!
//! A value runs from its `key:` up to the next whitespace-preceded `key:`
//! and stops at the first punctuation character. Number fields also accept
//! `.`, `+` and `-`, array fields also accept `,`.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

static COMMAND_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^!(\w+)").expect("Invalid regex"));

static KEY_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|\s)(\w+):").expect("Invalid regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Number,
    Boolean,
    Array,
}

impl FieldType {
    fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Array => "array",
        }
    }

    fn accepts(&self, c: char) -> bool {
        if c.is_alphanumeric() || c == '_' || c.is_whitespace() {
            return true;
        }
        match self {
            Self::Number => matches!(c, '.' | '+' | '-'),
            Self::Array => c == ',',
            Self::String | Self::Boolean => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    /// Regex searched in the value's text form
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
}

impl FieldSpec {
    pub fn new(field_type: FieldType) -> Self {
        Self {
            field_type,
            required: false,
            pattern: None,
        }
    }

    pub fn string() -> Self {
        Self::new(FieldType::String)
    }

    pub fn number() -> Self {
        Self::new(FieldType::Number)
    }

    pub fn boolean() -> Self {
        Self::new(FieldType::Boolean)
    }

    pub fn array() -> Self {
        Self::new(FieldType::Array)
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateField {
    pub name: String,
    #[serde(flatten)]
    pub spec: FieldSpec,
}

/// Declarative schema for one structured command
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageTemplate {
    /// Command name (without `!`) this template answers to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// Declaration order matters for error reporting
    #[serde(default)]
    pub fields: Vec<TemplateField>,
    #[serde(default)]
    pub examples: Vec<String>,
}

impl MessageTemplate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    /// Add a field, replacing any earlier declaration with the same name
    pub fn field(mut self, name: impl Into<String>, spec: FieldSpec) -> Self {
        let name = name.into();
        match self.fields.iter_mut().find(|f| f.name == name) {
            Some(existing) => existing.spec = spec,
            None => self.fields.push(TemplateField { name, spec }),
        }
        self
    }

    pub fn example(mut self, example: impl Into<String>) -> Self {
        self.examples.push(example.into());
        self
    }

    pub fn field_spec(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name).map(|f| &f.spec)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    Number(f64),
    List(Vec<String>),
    Text(String),
}

impl FieldValue {
    fn coerce(raw: &str, field_type: FieldType) -> Self {
        match field_type {
            FieldType::String => Self::Text(raw.to_string()),
            FieldType::Number => Self::Number(parse_number(raw).unwrap_or(f64::NAN)),
            FieldType::Boolean => Self::Bool(raw == "true"),
            FieldType::Array => Self::List(
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect(),
            ),
        }
    }

    fn has_type(&self, field_type: FieldType) -> bool {
        match (self, field_type) {
            (Self::Text(_), FieldType::String) => true,
            (Self::Number(n), FieldType::Number) => !n.is_nan(),
            (Self::Bool(_), FieldType::Boolean) => true,
            (Self::List(_), FieldType::Array) => true,
            _ => false,
        }
    }

    /// Text form used for pattern checks
    pub fn to_text(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::Number(n) => n.to_string(),
            Self::Bool(b) => b.to_string(),
            Self::List(items) => items.join(","),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }
}

/// Result of parsing one message against a template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedMessage {
    pub command: Option<String>,
    /// Every extracted field, including `command` when a `!command` led the text
    pub fields: BTreeMap<String, FieldValue>,
    pub is_valid: bool,
    pub errors: Vec<String>,
}

impl ParsedMessage {
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }
}

fn parse_number(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|n| n.is_finite())
}

fn leading_command(text: &str) -> Option<&str> {
    COMMAND_PATTERN
        .captures(text.trim_start())
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// `(key, raw region)` pairs in order of appearance
fn key_regions(text: &str) -> Vec<(&str, &str)> {
    let keys: Vec<(&str, usize, usize)> = KEY_PATTERN
        .captures_iter(text)
        .filter_map(|c| {
            let whole = c.get(0)?;
            let key = c.get(1)?;
            Some((key.as_str(), whole.start(), whole.end()))
        })
        .collect();

    keys.iter()
        .enumerate()
        .map(|(i, (key, _, value_start))| {
            let value_end = keys.get(i + 1).map(|next| next.1).unwrap_or(text.len());
            (*key, &text[*value_start..value_end])
        })
        .collect()
}

fn clean_value(region: &str, field_type: FieldType) -> &str {
    let end = region
        .char_indices()
        .find(|(_, c)| !field_type.accepts(*c))
        .map(|(i, _)| i)
        .unwrap_or(region.len());
    region[..end].trim()
}

/// Parse `text` against `template`, collecting every violation
pub fn parse_message(text: &str, template: &MessageTemplate) -> ParsedMessage {
    let mut fields = BTreeMap::new();

    for (key, region) in key_regions(text) {
        let field_type = template
            .field_spec(key)
            .map(|spec| spec.field_type)
            .unwrap_or(FieldType::String);
        let raw = clean_value(region, field_type);
        if raw.is_empty() {
            continue;
        }
        fields.insert(key.to_string(), FieldValue::coerce(raw, field_type));
    }

    let command = leading_command(text).map(str::to_string);
    if let Some(command) = &command {
        fields.insert("command".to_string(), FieldValue::Text(command.clone()));
    }

    let mut errors = Vec::new();

    for field in template.fields.iter().filter(|f| f.spec.required) {
        if !fields.contains_key(&field.name) {
            errors.push(format!("Required field \"{}\" is missing", field.name));
        }
    }

    for field in &template.fields {
        let Some(value) = fields.get(&field.name) else {
            continue;
        };

        if !value.has_type(field.spec.field_type) {
            errors.push(format!(
                "Field \"{}\" should be a {}",
                field.name,
                field.spec.field_type.as_str()
            ));
        }

        if let Some(pattern) = &field.spec.pattern {
            match Regex::new(pattern) {
                Ok(re) if re.is_match(&value.to_text()) => {}
                Ok(_) => errors.push(format!(
                    "Field \"{}\" does not match pattern {}",
                    field.name, pattern
                )),
                Err(_) => errors.push(format!(
                    "Field \"{}\" has an invalid pattern {}",
                    field.name, pattern
                )),
            }
        }
    }

    ParsedMessage {
        command,
        fields,
        is_valid: errors.is_empty(),
        errors,
    }
}

fn infer_type(raw: &str) -> FieldType {
    if raw == "true" || raw == "false" {
        FieldType::Boolean
    } else if parse_number(raw).is_some() {
        FieldType::Number
    } else {
        FieldType::String
    }
}

/// Infer a template from example messages; the first example to mention a
/// field decides its type
pub fn generate_template<S: AsRef<str>>(examples: &[S]) -> MessageTemplate {
    let mut template = MessageTemplate::new();

    for example in examples {
        let text = example.as_ref();

        if let Some(command) = leading_command(text) {
            if template.field_spec("command").is_none() {
                template = template.field("command", FieldSpec::string().required());
                template.command = Some(command.to_string());
            }
        }

        for (key, region) in key_regions(text) {
            if template.field_spec(key).is_some() {
                continue;
            }
            let raw = clean_value(region, FieldType::Number);
            if raw.is_empty() {
                continue;
            }
            template = template.field(key, FieldSpec::new(infer_type(raw)));
        }

        template.examples.push(text.to_string());
    }

    template
}
