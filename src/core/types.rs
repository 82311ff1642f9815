use serde::{Serialize, Deserialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use chrono::{DateTime, Utc};

/// Global document id inside one reader snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DocId(pub u64);

impl DocId {
    pub fn new(id: u64) -> Self {
        DocId(id)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl From<u64> for DocId {
    fn from(id: u64) -> Self {
        DocId(id)
    }
}

/// Document id local to one segment.
pub type LocalDocId = u32;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    Text(String),
    Integer(i64),
    Number(f64),
    Date(DateTime<Utc>),
    Boolean(bool),
}

impl FieldValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Integral key used by range and date indexes.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Integer(v) => Some(*v),
            FieldValue::Number(v) => Some(*v as i64),
            FieldValue::Date(d) => Some(d.timestamp_millis()),
            FieldValue::Boolean(b) => Some(*b as i64),
            FieldValue::Text(_) => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Integer(v) => Some(*v as f64),
            FieldValue::Number(v) => Some(*v),
            FieldValue::Date(d) => Some(d.timestamp_millis() as f64),
            FieldValue::Boolean(b) => Some(*b as i64 as f64),
            FieldValue::Text(_) => None,
        }
    }

    /// Ordering between two values of comparable kinds; `None` when text is
    /// compared against a number.
    pub fn compare(&self, other: &FieldValue) -> Option<Ordering> {
        match (self, other) {
            (FieldValue::Text(a), FieldValue::Text(b)) => Some(a.cmp(b)),
            (a, b) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        }
    }

    pub fn estimated_size(&self) -> usize {
        match self {
            FieldValue::Text(s) => s.len() + 8,
            _ => 16,
        }
    }

    /// Textual form fed to term indexes.
    pub fn to_index_text(&self) -> String {
        match self {
            FieldValue::Text(s) => s.clone(),
            FieldValue::Integer(v) => v.to_string(),
            FieldValue::Number(v) => v.to_string(),
            FieldValue::Date(d) => d.timestamp_millis().to_string(),
            FieldValue::Boolean(b) => b.to_string(),
        }
    }
}

/// Position in a writer stream. Offsets are totally ordered within one source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Locator {
    pub source: u64,
    pub offset: i64,
}

impl Locator {
    pub fn new(source: u64, offset: i64) -> Self {
        Locator { source, offset }
    }

    pub fn is_same_source(&self, other: &Locator) -> bool {
        self.source == other.source
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocOperation {
    Add,
    Delete,
    UpdateField,
}

/// A document as handed to `OnlinePartition::build`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub operation: DocOperation,
    pub primary_key: String,
    pub timestamp: i64,
    pub source: u64,
    pub fields: HashMap<String, FieldValue>,
    pub sub_documents: Vec<Document>,
}

impl Document {
    pub fn new(operation: DocOperation, primary_key: &str, timestamp: i64) -> Self {
        Document {
            operation,
            primary_key: primary_key.to_string(),
            timestamp,
            source: 0,
            fields: HashMap::new(),
            sub_documents: Vec::new(),
        }
    }

    pub fn add(primary_key: &str, timestamp: i64) -> Self {
        Self::new(DocOperation::Add, primary_key, timestamp)
    }

    pub fn delete(primary_key: &str, timestamp: i64) -> Self {
        Self::new(DocOperation::Delete, primary_key, timestamp)
    }

    pub fn update(primary_key: &str, timestamp: i64) -> Self {
        Self::new(DocOperation::UpdateField, primary_key, timestamp)
    }

    pub fn with_field(mut self, name: &str, value: FieldValue) -> Self {
        self.fields.insert(name.to_string(), value);
        self
    }

    pub fn with_text(self, name: &str, value: &str) -> Self {
        self.with_field(name, FieldValue::Text(value.to_string()))
    }

    pub fn with_source(mut self, source: u64) -> Self {
        self.source = source;
        self
    }

    pub fn with_sub_document(mut self, doc: Document) -> Self {
        self.sub_documents.push(doc);
        self
    }

    pub fn add_field(&mut self, name: String, value: FieldValue) {
        self.fields.insert(name, value);
    }

    pub fn get_field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    pub fn locator(&self) -> Locator {
        Locator::new(self.source, self.timestamp)
    }
}
