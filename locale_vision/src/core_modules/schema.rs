// THEORY:
// An `ExtractionSchema` is an ordered list of `(field, pattern)` entries applied
// to the transcription of a document. The rules are deliberately simple:
//
// 1.  **Schema order**: entries are tried in the order they were declared. A field
//     may appear in several entries; the first entry that matches fixes its value
//     and later entries for that field are skipped.
// 2.  **Capture**: if a pattern has a capture group, group 1 is the value;
//     otherwise the whole match is.
// 3.  **Unmatched fields**: a field that no entry matched is `Absent` unless the
//     schema declares a placeholder for it, in which case it is reported as a
//     `Placeholder`. A placeholder is never presented as an extracted value.
//
// Fields appear in the result in the order they first appear in the schema.

use crate::error::SchemaError;
use regex::Regex;
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// How the K-1 fields without a real heuristic are reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StubFieldPolicy {
    /// Unmatched stub fields are absent.
    #[default]
    Absent,
    /// Unmatched stub fields carry their fixed placeholder values.
    Placeholders,
}

impl FromStr for StubFieldPolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "absent" => Ok(StubFieldPolicy::Absent),
            "placeholders" | "placeholder" => Ok(StubFieldPolicy::Placeholders),
            other => Err(format!("expected `absent` or `placeholders`, got `{other}`")),
        }
    }
}

/// The value reported for one schema field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Extracted(String),
    Placeholder(String),
    Absent,
}

impl FieldValue {
    /// The text found in the document, if any. Placeholders are not extracted text.
    pub fn extracted(&self) -> Option<&str> {
        match self {
            FieldValue::Extracted(value) => Some(value),
            _ => None,
        }
    }
}

// Extracted values serialize as plain strings, absent ones as null, and
// placeholders as `{"placeholder": value}` so consumers can never mistake them.
impl Serialize for FieldValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            FieldValue::Extracted(value) => serializer.serialize_str(value),
            FieldValue::Absent => serializer.serialize_none(),
            FieldValue::Placeholder(value) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("placeholder", value)?;
                map.end()
            }
        }
    }
}

/// Every schema field with its value, in schema order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExtractedFields(Vec<(String, FieldValue)>);

impl ExtractedFields {
    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.0.iter().find(|(name, _)| name == field).map(|(_, value)| value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.0.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for ExtractedFields {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, value) in &self.0 {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

#[derive(Clone)]
struct SchemaEntry {
    field: String,
    pattern: Regex,
}

/// An ordered set of field patterns.
#[derive(Clone, Default)]
pub struct ExtractionSchema {
    entries: Vec<SchemaEntry>,
    placeholders: HashMap<String, String>,
    // Fields declared without a pattern still show up in every result.
    declared: Vec<String>,
}

impl ExtractionSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a schema from `(field, pattern)` pairs, compiling every pattern.
    pub fn from_pairs<'a, I>(pairs: I) -> Result<Self, SchemaError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        pairs
            .into_iter()
            .try_fold(Self::new(), |schema, (field, pattern)| schema.pattern(field, pattern))
    }

    /// Appends an entry for `field`.
    pub fn pattern(self, field: &str, pattern: &str) -> Result<Self, SchemaError> {
        let compiled = Regex::new(pattern).map_err(|source| SchemaError {
            field: field.to_string(),
            source,
        })?;
        Ok(self.compiled(field, compiled))
    }

    /// Appends an entry for `field` with an already compiled pattern.
    pub fn compiled(mut self, field: &str, pattern: Regex) -> Self {
        self.declare(field);
        self.entries.push(SchemaEntry {
            field: field.to_string(),
            pattern,
        });
        self
    }

    /// Declares a field that no pattern can fill (yet).
    pub fn field(mut self, field: &str) -> Self {
        self.declare(field);
        self
    }

    /// Reports `value` as a placeholder when `field` is not matched.
    pub fn placeholder(mut self, field: &str, value: &str) -> Self {
        self.declare(field);
        self.placeholders.insert(field.to_string(), value.to_string());
        self
    }

    /// Field names in first-appearance order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.declared.iter().map(String::as_str)
    }

    /// Applies every entry, in order, to `raw_text`.
    pub fn apply(&self, raw_text: &str) -> ExtractedFields {
        let mut found: HashMap<&str, String> = HashMap::new();
        for entry in &self.entries {
            if found.contains_key(entry.field.as_str()) {
                continue;
            }
            if let Some(value) = first_match(&entry.pattern, raw_text) {
                found.insert(entry.field.as_str(), value);
            }
        }

        let fields = self
            .declared
            .iter()
            .map(|field| {
                let value = match (found.remove(field.as_str()), self.placeholders.get(field)) {
                    (Some(value), _) => FieldValue::Extracted(value),
                    (None, Some(placeholder)) => FieldValue::Placeholder(placeholder.clone()),
                    (None, None) => FieldValue::Absent,
                };
                (field.clone(), value)
            })
            .collect();
        ExtractedFields(fields)
    }

    /// The partnership K-1 schema: the EIN has a real pattern, the other fields
    /// have no heuristic and follow `policy`.
    pub fn k1_partnership(policy: StubFieldPolicy) -> Result<Self, SchemaError> {
        let schema = Self::new().pattern("ein", EIN_PATTERN)?;
        Ok(K1_STUB_FIELDS.iter().fold(schema, |schema, (field, placeholder)| match policy {
            StubFieldPolicy::Absent => schema.field(field),
            StubFieldPolicy::Placeholders => schema.placeholder(field, placeholder),
        }))
    }

    fn declare(&mut self, field: &str) {
        if !self.declared.iter().any(|known| known == field) {
            self.declared.push(field.to_string());
        }
    }
}

impl fmt::Debug for ExtractionSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionSchema")
            .field("fields", &self.declared)
            .field("patterns", &self.entries.iter().map(|e| e.pattern.as_str()).collect::<Vec<_>>())
            .finish()
    }
}

const EIN_PATTERN: &str = r"\b\d{2}-\d{7}\b";

const K1_STUB_FIELDS: [(&str, &str); 3] = [
    ("partner_name", "Parsed Partner Name (Pending Regex Refinement)"),
    ("share_of_income", "0.00"),
    ("share_of_deductions", "0.00"),
];

fn first_match(pattern: &Regex, text: &str) -> Option<String> {
    if pattern.captures_len() > 1 {
        pattern
            .captures(text)
            .and_then(|captures| captures.get(1))
            .map(|m| m.as_str().to_string())
    } else {
        pattern.find(text).map(|m| m.as_str().to_string())
    }
}
