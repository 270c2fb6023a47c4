use super::{Result, Value, ViewError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

/// Identity of a record. Numeric ids are the common case; string ids are
/// accepted so that non-numeric backends fit the same model.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordId {
    Int(i64),
    Text(String),
}

impl RecordId {
    /// Reads an id out of a JSON value; only integers and strings qualify.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Number(n) => n.as_i64().map(Self::Int),
            serde_json::Value::String(s) => Some(Self::Text(s.clone())),
            _ => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Self::Int(i) => Value::Integer(*i),
            Self::Text(s) => Value::Text(s.clone()),
        }
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(i) => write!(f, "{}", i),
            Self::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for RecordId {
    fn from(id: i64) -> Self {
        Self::Int(id)
    }
}

impl From<&str> for RecordId {
    fn from(id: &str) -> Self {
        Self::Text(id.to_string())
    }
}

pub type Fields = BTreeMap<String, Value>;

/// One addressable entity. Serialized as a flat JSON object with an `id` key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    #[serde(flatten)]
    pub fields: Fields,
}

impl Record {
    pub fn new(id: impl Into<RecordId>) -> Self {
        Self {
            id: id.into(),
            fields: Fields::new(),
        }
    }

    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    /// Looks up a field; `"id"` resolves to the record's identity.
    pub fn get(&self, field: &str) -> Option<Value> {
        if field == "id" {
            return Some(self.id.to_value());
        }
        self.fields.get(field).cloned()
    }

    /// Assigns every changed field. Assignment rather than delta, so applying
    /// the same changes twice is the same as applying them once.
    pub fn assign(&mut self, changes: &Fields) {
        for (field, value) in changes {
            if field == "id" {
                continue;
            }
            self.fields.insert(field.clone(), value.clone());
        }
    }
}

/// One fetched, ordered result set plus the server's total count.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct Page {
    records: Vec<Record>,
    total: u64,
}

impl Page {
    /// Builds a page, rejecting duplicate ids.
    pub fn new(records: Vec<Record>, total: u64) -> Result<Self> {
        let mut seen = HashSet::with_capacity(records.len());
        for record in &records {
            if !seen.insert(&record.id) {
                return Err(ViewError::DuplicateRecord(record.id.to_string()));
            }
        }
        Ok(Self { records, total })
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn contains(&self, id: &RecordId) -> bool {
        self.records.iter().any(|record| &record.id == id)
    }

    pub fn get(&self, id: &RecordId) -> Option<&Record> {
        self.records.iter().find(|record| &record.id == id)
    }

    /// Mutable access by id. Ids stay fixed, so uniqueness cannot be broken
    /// through this handle.
    pub(crate) fn get_mut(&mut self, id: &RecordId) -> Option<&mut Record> {
        self.records.iter_mut().find(|record| &record.id == id)
    }

    pub fn into_records(self) -> Vec<Record> {
        self.records
    }
}
