use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A decoded, human-meaningful value.
///
/// `Unknown` is the designated "value not determinable" marker. It is a
/// distinct variant so it can never be confused with a legitimate text value;
/// it must not be produced by stringifying an absent result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Number(f64),
    Text(String),
    Bool(bool),
    Unknown,
}

impl Value {
    pub fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => write!(f, "{s}"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Number(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

/// Cached snapshot of one entity's state, as exposed to the entity layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityValue {
    pub unique_id: String,
    pub value: Value,
    /// Post-bit-op integer pattern; dependency gates compare against this.
    pub raw: Option<u64>,
    pub unit: Option<String>,
    pub category: Option<String>,
    pub last_updated: DateTime<Utc>,
    pub available: bool,
}

impl EntityValue {
    pub fn new(unique_id: impl Into<String>, value: Value, raw: Option<u64>) -> Self {
        Self {
            unique_id: unique_id.into(),
            value,
            raw,
            unit: None,
            category: None,
            last_updated: Utc::now(),
            available: true,
        }
    }

    pub fn with_metadata(mut self, unit: Option<String>, category: Option<String>) -> Self {
        self.unit = unit;
        self.category = category;
        self
    }

    /// Placeholder written when a read cycle fails for this entity.
    pub fn unavailable(unique_id: impl Into<String>) -> Self {
        Self {
            unique_id: unique_id.into(),
            value: Value::Unknown,
            raw: None,
            unit: None,
            category: None,
            last_updated: Utc::now(),
            available: false,
        }
    }

    pub fn mark_unavailable(&mut self) {
        self.available = false;
        self.last_updated = Utc::now();
    }
}
