use std::{borrow::Cow, collections::HashMap};

use serde::{Deserialize, Serialize};

/// One side of a field entry as handed over by the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Bytes(Vec<u8>),
    Text(String),
    Other(serde_json::Value),
}

impl FieldValue {
    /// Decodes the value as UTF-8, substituting U+FFFD for invalid sequences.
    /// Non-byte values are coerced through their string form.
    pub fn decode(&self) -> Cow<'_, str> {
        match self {
            Self::Bytes(bytes) => String::from_utf8_lossy(bytes),
            Self::Text(text) => Cow::Borrowed(text),
            Self::Other(serde_json::Value::String(text)) => Cow::Borrowed(text),
            Self::Other(value) => Cow::Owned(value.to_string()),
        }
    }
}

impl From<&[u8]> for FieldValue {
    fn from(value: &[u8]) -> Self {
        Self::Bytes(value.to_vec())
    }
}

impl<const N: usize> From<&[u8; N]> for FieldValue {
    fn from(value: &[u8; N]) -> Self {
        Self::Bytes(value.to_vec())
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// Ordered, possibly repeating key/value container.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MultiDict {
    fields: Vec<(FieldValue, FieldValue)>,
}

impl MultiDict {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, key: impl Into<FieldValue>, value: impl Into<FieldValue>) {
        self.fields.push((key.into(), value.into()));
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(FieldValue, FieldValue)> {
        self.fields.iter()
    }
}

impl<K, V> FromIterator<(K, V)> for MultiDict
where
    K: Into<FieldValue>,
    V: Into<FieldValue>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            fields: iter
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        }
    }
}

/// Decoded field names mapped to their values. Names keep first-seen order,
/// which is also the order rows are written in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldMap {
    entries: Vec<(String, Vec<String>)>,
}

impl FieldMap {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.entries
            .iter()
            .find(|(entry_name, _)| entry_name == name)
            .map(|(_, values)| values.as_slice())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries
            .iter()
            .map(|(name, values)| (name.as_str(), values.as_slice()))
    }

    pub fn entries(&self) -> &[(String, Vec<String>)] {
        &self.entries
    }

    /// Total number of values across all names.
    pub fn value_count(&self) -> usize {
        self.entries.iter().map(|(_, values)| values.len()).sum()
    }
}

/// Groups `fields` by decoded key. An absent container yields an empty map.
pub fn normalize(fields: Option<&MultiDict>) -> FieldMap {
    let Some(fields) = fields else {
        return FieldMap::default();
    };

    let mut positions: HashMap<String, usize> = HashMap::with_capacity(fields.len());
    let mut entries: Vec<(String, Vec<String>)> = Vec::new();

    for (key, value) in fields.iter() {
        let key = key.decode().into_owned();
        let value = value.decode().into_owned();
        match positions.get(&key) {
            Some(&index) => entries[index].1.push(value),
            None => {
                positions.insert(key.clone(), entries.len());
                entries.push((key, vec![value]));
            }
        }
    }

    FieldMap { entries }
}
