//! Value processing: raw register words to typed values, and the write-path
//! inverse.
//!
//! The transform order is fixed: bit operations on the raw integer pattern,
//! then scale multiply, offset add, precision rounding, then symbolic
//! resolution. Writes reverse the numeric transforms before encoding.

mod bits;
mod codec;

pub use codec::RawNumber;

use crate::error::{DomainError, Result};
use crate::register::{DataType, RegisterSpec, SymbolicConfig, Value};

/// Result of running a register's payload through the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedValue {
    pub value: Value,
    /// Post-bit-op integer pattern; drives symbolic lookup and dependency
    /// gates. None for floats and strings.
    pub raw: Option<u64>,
    /// Numeric value after scale/offset/precision, when numeric.
    pub numeric: Option<f64>,
}

impl ProcessedValue {
    /// The designated marker for "no value could be determined".
    pub fn unknown() -> Self {
        Self {
            value: Value::Unknown,
            raw: None,
            numeric: None,
        }
    }
}

/// Decode one register's payload words into a typed value.
pub fn decode(words: &[u16], spec: &RegisterSpec) -> Result<ProcessedValue> {
    if words.is_empty() {
        // Missing/empty read result resolves to the unknown marker.
        return Ok(ProcessedValue::unknown());
    }

    if spec.data_type == DataType::String {
        let take = (spec.words() as usize).min(words.len());
        let text = codec::decode_string(&words[..take], spec.swap, spec.encoding);
        return Ok(ProcessedValue {
            value: Value::Text(text),
            raw: None,
            numeric: None,
        });
    }

    let decoded = codec::decode_raw(words, spec.data_type, spec.swap)?;

    let (raw, base) = match decoded.bits() {
        Some(pattern) => {
            let pattern = bits::apply(&spec.bit_ops, pattern, spec.data_type.bit_width());
            if spec.bit_ops.is_empty() {
                (Some(pattern), decoded.as_f64())
            } else {
                // Bit ops yield an unsigned field regardless of the wire type.
                (Some(pattern), pattern as f64)
            }
        }
        None => (None, decoded.as_f64()),
    };

    let numeric = round_to(base * spec.scale + spec.offset, spec.precision);

    let value = match &spec.symbolic {
        Some(symbolic) => resolve_symbolic(symbolic, raw, numeric),
        None => match spec.data_type {
            DataType::Bool => Value::Bool(raw.unwrap_or(0) != 0),
            _ => Value::Number(numeric),
        },
    };

    Ok(ProcessedValue {
        value,
        raw,
        numeric: Some(numeric),
    })
}

fn resolve_symbolic(symbolic: &SymbolicConfig, raw: Option<u64>, numeric: f64) -> Value {
    let Some(raw) = raw else {
        return Value::Unknown;
    };
    match symbolic {
        SymbolicConfig::Map { entries } => entries
            .iter()
            .find(|e| e.raw == raw)
            .map(|e| Value::Text(e.label.clone()))
            // A mapped entity with an unmapped reading is unknown, never a
            // stringified number.
            .unwrap_or(Value::Unknown),
        SymbolicConfig::Flags { entries } => {
            let labels: Vec<&str> = entries
                .iter()
                .filter(|e| (raw >> (e.bit as u32).min(63)) & 1 == 1)
                .map(|e| e.label.as_str())
                .collect();
            Value::Text(labels.join(", "))
        }
        SymbolicConfig::Options { entries } => entries
            .iter()
            .find(|e| e.raw == raw)
            .map(|e| Value::Text(e.label.clone()))
            // Sensors pass unmapped values through; the write path rejects
            // them instead.
            .unwrap_or(Value::Number(numeric)),
    }
}

fn round_to(value: f64, precision: Option<u32>) -> f64 {
    match precision {
        Some(p) => {
            let factor = 10f64.powi(p as i32);
            (value * factor).round() / factor
        }
        None => value,
    }
}

/// Encode a command value into wire words, reversing the numeric transforms.
///
/// Reading computes `raw * scale + offset`, so writing computes
/// `(value - offset) / scale` before the codec.
pub fn encode(value: &Value, spec: &RegisterSpec) -> Result<Vec<u16>> {
    if let Value::Text(label) = value {
        let entries = match &spec.symbolic {
            Some(SymbolicConfig::Options { entries }) => entries,
            Some(SymbolicConfig::Map { entries }) => entries,
            _ => {
                return Err(DomainError::Value(format!(
                    "{}: cannot write text to a numeric register",
                    spec.unique_id
                )));
            }
        };
        let entry = entries.iter().find(|e| e.label == *label).ok_or_else(|| {
            DomainError::Value(format!(
                "{}: '{label}' is not a configured option",
                spec.unique_id
            ))
        })?;
        // Symbolic labels address raw values directly; no transform applies.
        return codec::encode_raw(entry.raw as f64, spec.data_type, spec.swap);
    }

    let target = match value {
        Value::Number(n) => *n,
        Value::Bool(b) => {
            return codec::encode_raw(f64::from(*b), spec.data_type, spec.swap);
        }
        Value::Unknown => {
            return Err(DomainError::Value(format!(
                "{}: cannot write the unknown marker",
                spec.unique_id
            )));
        }
        Value::Text(_) => unreachable!("handled above"),
    };

    let raw = (target - spec.offset) / spec.scale;

    if let Some(SymbolicConfig::Options { entries }) = &spec.symbolic {
        let rounded = raw.round();
        let in_set = rounded >= 0.0 && entries.iter().any(|e| e.raw as f64 == rounded);
        if !in_set {
            return Err(DomainError::Value(format!(
                "{}: {target} is outside the configured option set",
                spec.unique_id
            )));
        }
    }

    codec::encode_raw(raw, spec.data_type, spec.swap)
}
