use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A single dynamic-config value used during condition evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ContextValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl ContextValue {
    /// Numeric view, if the value can be read as a number.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            Self::Text(s) => s.trim().parse().ok(),
        }
    }

    /// Truthiness used when comparing against a boolean literal.
    pub fn truthy(&self) -> bool {
        match self {
            Self::Bool(b) => *b,
            Self::Int(i) => *i != 0,
            Self::Float(f) => *f != 0.0,
            Self::Text(s) => !s.is_empty(),
        }
    }

    /// Canonical string form used for textual comparison.
    pub fn as_text(&self) -> String {
        match self {
            Self::Bool(b) => b.to_string(),
            Self::Int(i) => i.to_string(),
            Self::Float(f) => f.to_string(),
            Self::Text(s) => s.clone(),
        }
    }
}

impl From<bool> for ContextValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for ContextValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for ContextValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for ContextValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for ContextValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

/// Evaluation context for one configured device instance.
///
/// Holds the identity of the device (slave address, entity prefix, the
/// template model the user selected) plus the open dynamic-config mapping
/// the setup flow collected (phases, mppt_count, battery settings, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceContext {
    pub slave_id: u8,
    pub prefix: String,
    pub selected_model: String,
    #[serde(default)]
    values: HashMap<String, ContextValue>,
}

impl DeviceContext {
    pub fn new(
        slave_id: u8,
        prefix: impl Into<String>,
        selected_model: impl Into<String>,
    ) -> Self {
        Self {
            slave_id,
            prefix: prefix.into(),
            selected_model: selected_model.into(),
            values: HashMap::new(),
        }
    }

    /// Builder-style insert for setup code and tests.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<ContextValue>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<ContextValue>) {
        self.values.insert(key.into(), value.into());
    }

    /// Look up a context key. The device identity fields are addressable
    /// alongside the dynamic config, so conditions like
    /// `selected_model == 'SH10RT'` work without duplicating them.
    pub fn get(&self, key: &str) -> Option<ContextValue> {
        if let Some(v) = self.values.get(key) {
            return Some(v.clone());
        }
        match key {
            "slave_id" => Some(ContextValue::Int(self.slave_id as i64)),
            "prefix" => Some(ContextValue::Text(self.prefix.clone())),
            "selected_model" => Some(ContextValue::Text(self.selected_model.clone())),
            _ => None,
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }
}
