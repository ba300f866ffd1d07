//! Bidirectional field templates
//!
//! Templates use `{field}` / `{field:spec}` placeholders, with `{{` and `}}`
//! as literal braces. Specs follow the familiar
//! `[[fill]align][0][width][.precision][type]` mini-language with `d`, `f`
//! and `s` types.
//!
//! [`FieldFormatter::format`] turns fields into a path, and
//! [`FieldFormatter::parse`] recovers fields from a path. Per-field options
//! can supply a custom parse regex, a display spec, a type coercion and a
//! closed set of choices.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::identifier::{FieldValue, Fields};

/// Entries kept per cache before it is flushed
const CACHE_LIMIT: usize = 4096;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum FormatError {
    #[error("Missing field '{field}' in template '{template}'")]
    MissingField { field: String, template: String },

    #[error("Invalid template '{template}': {reason}")]
    InvalidTemplate { template: String, reason: String },

    #[error("Invalid format spec '{spec}' for field '{field}'")]
    InvalidSpec { field: String, spec: String },

    #[error("Field '{field}' value '{value}' cannot be converted to {target}")]
    Coercion {
        field: String,
        value: String,
        target: &'static str,
    },

    #[error("Field '{field}' value '{value}' is not one of: {choices}")]
    Choice {
        field: String,
        value: String,
        choices: String,
    },

    #[error("Invalid regex for field '{field}': {reason}")]
    InvalidRegex { field: String, reason: String },
}

/// Declared type of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Int,
    Float,
    Str,
}

impl FieldType {
    fn name(&self) -> &'static str {
        match self {
            FieldType::Int => "int",
            FieldType::Float => "float",
            FieldType::Str => "str",
        }
    }

    /// Converts a value to this type
    pub fn coerce(&self, field: &str, value: &FieldValue) -> Result<FieldValue, FormatError> {
        let fail = || FormatError::Coercion {
            field: field.to_string(),
            value: value.to_string(),
            target: self.name(),
        };

        match (self, value) {
            (FieldType::Int, FieldValue::Int(_)) => Ok(value.clone()),
            (FieldType::Int, FieldValue::Float(f)) => Ok(FieldValue::Int(f.trunc() as i64)),
            (FieldType::Int, FieldValue::Str(s)) => {
                s.trim().parse().map(FieldValue::Int).map_err(|_| fail())
            }
            (FieldType::Float, FieldValue::Int(i)) => Ok(FieldValue::Float(*i as f64)),
            (FieldType::Float, FieldValue::Float(_)) => Ok(value.clone()),
            (FieldType::Float, FieldValue::Str(s)) => {
                s.trim().parse().map(FieldValue::Float).map_err(|_| fail())
            }
            (FieldType::Str, FieldValue::Str(_)) => Ok(value.clone()),
            (FieldType::Str, other) => Ok(FieldValue::Str(other.to_string())),
        }
    }
}

/// Per-field formatting options from the pool configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldOptions {
    /// Pattern used when parsing this field out of a path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regex: Option<String>,

    /// Display spec applied when formatting, e.g. `04d`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,

    /// Type coercion applied after parse and before format
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub field_type: Option<FieldType>,

    /// Human readable label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    /// Closed set of permitted values
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub choices: Option<Vec<String>>,
}

/// Field options keyed by field name
pub type FieldConfig = BTreeMap<String, FieldOptions>;

/// One piece of a tokenized template
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Literal(String),
    Placeholder { name: String, spec: Option<String> },
}

/// Splits a template into literal text and placeholders
pub fn tokenize(template: &str) -> Result<Vec<Segment>, FormatError> {
    let invalid = |reason: &str| FormatError::InvalidTemplate {
        template: template.to_string(),
        reason: reason.to_string(),
    };

    let chars: Vec<char> = template.chars().collect();
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '{' if chars.get(i + 1) == Some(&'{') => {
                literal.push('{');
                i += 2;
            }
            '}' if chars.get(i + 1) == Some(&'}') => {
                literal.push('}');
                i += 2;
            }
            '}' => return Err(invalid("single '}' encountered")),
            '{' => {
                let close = chars[i + 1..]
                    .iter()
                    .position(|&c| c == '}')
                    .ok_or_else(|| invalid("unterminated placeholder"))?;
                let body: String = chars[i + 1..i + 1 + close].iter().collect();

                let (name, spec) = match body.find(':') {
                    Some(idx) => (&body[..idx], Some(body[idx + 1..].to_string())),
                    None => (body.as_str(), None),
                };
                // conversions such as `!r` carry no meaning for paths
                let name = name.split('!').next().unwrap_or_default().trim();
                if name.is_empty() {
                    return Err(invalid("empty placeholder"));
                }

                if !literal.is_empty() {
                    segments.push(Segment::Literal(std::mem::take(&mut literal)));
                }
                segments.push(Segment::Placeholder {
                    name: name.to_string(),
                    spec: spec.filter(|s| !s.is_empty()),
                });
                i += close + 2;
            }
            c => {
                literal.push(c);
                i += 1;
            }
        }
    }

    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }

    Ok(segments)
}

/// Returns the distinct placeholder names of a template, in order
pub fn placeholders(template: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    if let Ok(segments) = tokenize(template) {
        for segment in segments {
            if let Segment::Placeholder { name, .. } = segment {
                if !names.contains(&name) {
                    names.push(name);
                }
            }
        }
    }
    names
}

/// Parsed display spec
#[derive(Debug, Clone, PartialEq)]
struct FormatSpec {
    fill: char,
    align: Option<char>,
    zero: bool,
    width: usize,
    precision: Option<usize>,
    kind: Option<char>,
}

impl FormatSpec {
    fn parse(field: &str, spec: &str) -> Result<Self, FormatError> {
        let invalid = || FormatError::InvalidSpec {
            field: field.to_string(),
            spec: spec.to_string(),
        };

        let chars: Vec<char> = spec.chars().collect();
        let mut parsed = FormatSpec {
            fill: ' ',
            align: None,
            zero: false,
            width: 0,
            precision: None,
            kind: None,
        };
        let mut i = 0;

        let is_align = |c: char| matches!(c, '<' | '>' | '^' | '=');
        if chars.len() >= 2 && is_align(chars[1]) {
            parsed.fill = chars[0];
            parsed.align = Some(chars[1]);
            i = 2;
        } else if !chars.is_empty() && is_align(chars[0]) {
            parsed.align = Some(chars[0]);
            i = 1;
        }

        if chars.get(i) == Some(&'0') {
            parsed.zero = true;
            i += 1;
        }

        let start = i;
        while i < chars.len() && chars[i].is_ascii_digit() {
            i += 1;
        }
        if i > start {
            let digits: String = chars[start..i].iter().collect();
            parsed.width = digits.parse().map_err(|_| invalid())?;
        }

        if chars.get(i) == Some(&'.') {
            i += 1;
            let start = i;
            while i < chars.len() && chars[i].is_ascii_digit() {
                i += 1;
            }
            if i == start {
                return Err(invalid());
            }
            let digits: String = chars[start..i].iter().collect();
            parsed.precision = Some(digits.parse().map_err(|_| invalid())?);
        }

        match chars.get(i) {
            None => {}
            Some(c @ ('d' | 'f' | 's')) if i + 1 == chars.len() => parsed.kind = Some(*c),
            Some(_) => return Err(invalid()),
        }

        Ok(parsed)
    }

    fn is_numeric(&self) -> bool {
        matches!(self.kind, Some('d') | Some('f'))
    }

    fn render(&self, field: &str, value: &FieldValue) -> Result<String, FormatError> {
        let coerce_err = |target: &'static str| FormatError::Coercion {
            field: field.to_string(),
            value: value.to_string(),
            target,
        };

        let body = match (self.kind, value) {
            (None | Some('d'), FieldValue::Int(i)) => i.to_string(),
            (Some('d'), _) => return Err(coerce_err("int")),
            (Some('f'), FieldValue::Int(i)) => {
                format!("{:.*}", self.precision.unwrap_or(6), *i as f64)
            }
            (Some('f'), FieldValue::Float(f)) => format!("{:.*}", self.precision.unwrap_or(6), f),
            (Some('f'), FieldValue::Str(_)) => return Err(coerce_err("float")),
            (None, FieldValue::Float(f)) => match self.precision {
                Some(p) => format!("{:.*}", p, f),
                None => value.to_string(),
            },
            (_, FieldValue::Str(s)) => match self.precision {
                Some(p) => s.chars().take(p).collect(),
                None => s.clone(),
            },
            (_, other) => other.to_string(),
        };

        let len = body.chars().count();
        if len >= self.width {
            return Ok(body);
        }

        let numeric = self.is_numeric() || !matches!(value, FieldValue::Str(_));
        let (fill, align) = match (self.align, self.zero) {
            (Some(a), _) => (self.fill, a),
            (None, true) if numeric => ('0', '='),
            (None, true) => ('0', '<'),
            (None, false) if numeric => (' ', '>'),
            (None, false) => (' ', '<'),
        };

        let pad = self.width - len;
        let padding: String = std::iter::repeat(fill).take(pad).collect();
        Ok(match align {
            '<' => format!("{}{}", body, padding),
            '^' => {
                let left: String = std::iter::repeat(fill).take(pad / 2).collect();
                let right: String = std::iter::repeat(fill).take(pad - pad / 2).collect();
                format!("{}{}{}", left, body, right)
            }
            '=' => match body.strip_prefix('-') {
                Some(rest) => format!("-{}{}", padding, rest),
                None => format!("{}{}", padding, body),
            },
            _ => format!("{}{}", padding, body),
        })
    }
}

/// Compiled reverse-parse pattern for one template
#[derive(Debug)]
struct ParsePattern {
    regex: Regex,
    /// (capture group name, field name, effective spec kind)
    groups: Vec<(String, String, Option<char>)>,
}

/// Typed template engine configured per storage tier
#[derive(Debug)]
pub struct FieldFormatter {
    config: FieldConfig,
    format_cache: RwLock<HashMap<(String, String), Result<String, FormatError>>>,
    parse_cache: RwLock<HashMap<(String, String), Option<Fields>>>,
    pattern_cache: RwLock<HashMap<String, Option<Arc<ParsePattern>>>>,
}

impl FieldFormatter {
    /// Creates a formatter, validating every custom regex and display spec
    pub fn new(config: FieldConfig) -> Result<Self, FormatError> {
        for (field, options) in &config {
            if let Some(pattern) = &options.regex {
                Regex::new(&format!("^(?:{})$", pattern)).map_err(|e| {
                    FormatError::InvalidRegex {
                        field: field.clone(),
                        reason: e.to_string(),
                    }
                })?;
            }
            if let Some(spec) = &options.format {
                FormatSpec::parse(field, spec)?;
            }
        }

        Ok(Self {
            config,
            format_cache: RwLock::new(HashMap::new()),
            parse_cache: RwLock::new(HashMap::new()),
            pattern_cache: RwLock::new(HashMap::new()),
        })
    }

    /// Returns the field configuration
    pub fn config(&self) -> &FieldConfig {
        &self.config
    }

    /// Applies the configured type coercions in place
    pub fn ensure_typed(&self, fields: &mut Fields) -> Result<(), FormatError> {
        for (name, value) in fields.iter_mut() {
            if let Some(field_type) = self.config.get(name).and_then(|o| o.field_type) {
                *value = field_type.coerce(name, value)?;
            }
        }
        Ok(())
    }

    fn check_choices(&self, name: &str, value: &FieldValue) -> Result<(), FormatError> {
        let Some(choices) = self.config.get(name).and_then(|o| o.choices.as_ref()) else {
            return Ok(());
        };

        let text = value.to_string();
        if choices.iter().any(|c| *c == text) {
            Ok(())
        } else {
            Err(FormatError::Choice {
                field: name.to_string(),
                value: text,
                choices: choices.join(", "),
            })
        }
    }

    fn render_placeholder(
        &self,
        name: &str,
        spec: Option<&str>,
        value: &FieldValue,
    ) -> Result<String, FormatError> {
        let value = match self.config.get(name).and_then(|o| o.field_type) {
            Some(field_type) => field_type.coerce(name, value)?,
            None => value.clone(),
        };
        self.check_choices(name, &value)?;

        let spec = spec.or_else(|| self.config.get(name).and_then(|o| o.format.as_deref()));
        match spec {
            Some(spec) => FormatSpec::parse(name, spec)?.render(name, &value),
            None => Ok(value.to_string()),
        }
    }

    fn format_uncached(&self, template: &str, fields: &Fields) -> Result<String, FormatError> {
        let mut out = String::new();

        for segment in tokenize(template)? {
            match segment {
                Segment::Literal(text) => out.push_str(&text),
                Segment::Placeholder { name, spec } => {
                    let value = fields.get(&name).ok_or_else(|| FormatError::MissingField {
                        field: name.clone(),
                        template: template.to_string(),
                    })?;
                    out.push_str(&self.render_placeholder(&name, spec.as_deref(), value)?);
                }
            }
        }

        Ok(out)
    }

    /// Formats a template with the given fields
    ///
    /// Every placeholder present in the template is required; fields that
    /// the template doesn't mention are ignored.
    pub fn format(&self, template: &str, fields: &Fields) -> Result<String, FormatError> {
        let key = (
            template.to_string(),
            serde_json::to_string(fields).unwrap_or_default(),
        );

        if let Some(hit) = self.format_cache.read().get(&key) {
            return hit.clone();
        }

        let result = self.format_uncached(template, fields);

        let mut cache = self.format_cache.write();
        if cache.len() >= CACHE_LIMIT {
            cache.clear();
        }
        cache.insert(key, result.clone());

        result
    }

    fn compile(&self, template: &str) -> Option<Arc<ParsePattern>> {
        if let Some(hit) = self.pattern_cache.read().get(template) {
            return hit.clone();
        }

        let compiled = match self.build_pattern(template) {
            Ok(pattern) => Some(Arc::new(pattern)),
            Err(e) => {
                debug!(template, error = %e, "template cannot be parsed against");
                None
            }
        };

        let mut cache = self.pattern_cache.write();
        if cache.len() >= CACHE_LIMIT {
            cache.clear();
        }
        cache.insert(template.to_string(), compiled.clone());
        compiled
    }

    fn build_pattern(&self, template: &str) -> Result<ParsePattern, FormatError> {
        let mut pattern = String::from("^");
        let mut groups = Vec::new();

        for segment in tokenize(template)? {
            match segment {
                Segment::Literal(text) => pattern.push_str(&regex::escape(&text)),
                Segment::Placeholder { name, spec } => {
                    let options = self.config.get(&name);
                    let spec = spec.or_else(|| options.and_then(|o| o.format.clone()));
                    let kind = match &spec {
                        Some(spec) => FormatSpec::parse(&name, spec)?.kind,
                        None => None,
                    };

                    let inner = match (options.and_then(|o| o.regex.as_deref()), kind) {
                        (Some(custom), _) => format!("(?:{})", custom),
                        (None, Some('d')) => r"[-+]?\d+".to_string(),
                        (None, Some('f')) => r"[-+]?\d*\.?\d+".to_string(),
                        (None, _) => ".+?".to_string(),
                    };

                    let group = format!("g{}", groups.len());
                    pattern.push_str(&format!("(?P<{}>{})", group, inner));
                    groups.push((group, name, kind));
                }
            }
        }
        pattern.push('$');

        let regex = Regex::new(&pattern).map_err(|e| FormatError::InvalidTemplate {
            template: template.to_string(),
            reason: e.to_string(),
        })?;

        Ok(ParsePattern { regex, groups })
    }

    fn parse_uncached(&self, input: &str, template: &str) -> Option<Fields> {
        let pattern = self.compile(template)?;
        let captures = pattern.regex.captures(input)?;

        let mut fields = Fields::new();
        for (group, name, kind) in &pattern.groups {
            let raw = captures.name(group)?.as_str();

            let value = match self.config.get(name).and_then(|o| o.field_type) {
                Some(field_type) => field_type.coerce(name, &FieldValue::from(raw)).ok()?,
                None => match kind {
                    Some('d') => FieldValue::Int(raw.parse().ok()?),
                    Some('f') => FieldValue::Float(raw.parse().ok()?),
                    _ => FieldValue::from(raw),
                },
            };

            // a field repeated in the template must resolve to one value
            match fields.get(name) {
                Some(existing) if *existing != value => return None,
                _ => {
                    fields.insert(name.clone(), value);
                }
            }
        }

        Some(fields)
    }

    /// Recovers fields from a formatted string, or `None` if it doesn't match
    pub fn parse(&self, input: &str, template: &str) -> Option<Fields> {
        let key = (template.to_string(), input.to_string());

        if let Some(hit) = self.parse_cache.read().get(&key) {
            return hit.clone();
        }

        let result = self.parse_uncached(input, template);

        let mut cache = self.parse_cache.write();
        if cache.len() >= CACHE_LIMIT {
            cache.clear();
        }
        cache.insert(key, result.clone());

        result
    }
}
