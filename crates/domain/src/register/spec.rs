use serde::{Deserialize, Serialize};

use crate::error::{DomainError, Result};

use super::{
    Access, BitOp, BoundSource, DataType, DependsOn, RegisterType, SwapMode, SymbolicConfig,
    TextEncoding,
};

/// Declarative description of one register-backed entity.
///
/// Built by the template loader, filtered by the condition evaluator, and
/// immutable for the lifetime of a configuration generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterSpec {
    /// Device-unique key.
    pub unique_id: String,
    pub address: u16,
    #[serde(default = "default_register_type")]
    pub register_type: RegisterType,
    #[serde(default = "default_data_type")]
    pub data_type: DataType,
    /// Explicit word count; None derives from the data type. Strings must
    /// set it.
    #[serde(default)]
    pub word_count: Option<u16>,
    /// Character handling for string registers.
    #[serde(default)]
    pub encoding: TextEncoding,
    #[serde(default)]
    pub swap: SwapMode,
    #[serde(default = "default_scale")]
    pub scale: f64,
    #[serde(default)]
    pub offset: f64,
    /// Decimal places for display rounding after scale/offset.
    #[serde(default)]
    pub precision: Option<u32>,
    #[serde(default)]
    pub bit_ops: Vec<BitOp>,
    #[serde(default)]
    pub symbolic: Option<SymbolicConfig>,
    /// Activation condition over the device context.
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub depends_on: Option<DependsOn>,
    /// Absence is expected on some device variants; failures log at debug.
    #[serde(default)]
    pub optional: bool,
    #[serde(default)]
    pub access: Access,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    /// Poll interval in seconds; the group interval is the minimum over its
    /// members.
    #[serde(default = "default_scan_interval")]
    pub scan_interval_s: u64,
    /// Per-spec slave override, e.g. a battery pack behind the same hub.
    #[serde(default)]
    pub slave_id: Option<u8>,
    #[serde(default)]
    pub min_value: Option<f64>,
    #[serde(default)]
    pub max_value: Option<f64>,
    #[serde(default)]
    pub min_from_register: Option<BoundSource>,
    #[serde(default)]
    pub max_from_register: Option<BoundSource>,
}

fn default_register_type() -> RegisterType {
    RegisterType::Holding
}

fn default_data_type() -> DataType {
    DataType::Uint16
}

fn default_scale() -> f64 {
    1.0
}

fn default_scan_interval() -> u64 {
    30
}

impl RegisterSpec {
    /// Minimal spec with template defaults; tests and loaders fill in the
    /// rest through the `with_*` builders.
    pub fn new(unique_id: impl Into<String>, address: u16) -> Self {
        Self {
            unique_id: unique_id.into(),
            address,
            register_type: default_register_type(),
            data_type: default_data_type(),
            word_count: None,
            encoding: TextEncoding::default(),
            swap: SwapMode::default(),
            scale: default_scale(),
            offset: 0.0,
            precision: None,
            bit_ops: Vec::new(),
            symbolic: None,
            condition: None,
            depends_on: None,
            optional: false,
            access: Access::default(),
            unit: None,
            category: None,
            scan_interval_s: default_scan_interval(),
            slave_id: None,
            min_value: None,
            max_value: None,
            min_from_register: None,
            max_from_register: None,
        }
    }

    pub fn with_register_type(mut self, register_type: RegisterType) -> Self {
        self.register_type = register_type;
        self
    }

    pub fn with_data_type(mut self, data_type: DataType) -> Self {
        self.data_type = data_type;
        self
    }

    pub fn with_word_count(mut self, word_count: u16) -> Self {
        self.word_count = Some(word_count);
        self
    }

    pub fn with_swap(mut self, swap: SwapMode) -> Self {
        self.swap = swap;
        self
    }

    pub fn with_transform(mut self, scale: f64, offset: f64, precision: Option<u32>) -> Self {
        self.scale = scale;
        self.offset = offset;
        self.precision = precision;
        self
    }

    pub fn with_bit_ops(mut self, bit_ops: Vec<BitOp>) -> Self {
        self.bit_ops = bit_ops;
        self
    }

    pub fn with_symbolic(mut self, symbolic: SymbolicConfig) -> Self {
        self.symbolic = Some(symbolic);
        self
    }

    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    pub fn with_depends_on(mut self, depends_on: DependsOn) -> Self {
        self.depends_on = Some(depends_on);
        self
    }

    pub fn with_access(mut self, access: Access) -> Self {
        self.access = access;
        self
    }

    pub fn with_interval(mut self, seconds: u64) -> Self {
        self.scan_interval_s = seconds;
        self
    }

    pub fn with_slave(mut self, slave_id: u8) -> Self {
        self.slave_id = Some(slave_id);
        self
    }

    pub fn with_optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Words occupied on the wire.
    pub fn words(&self) -> u16 {
        self.word_count
            .unwrap_or_else(|| self.data_type.default_word_count())
            .max(1)
    }

    /// Slave this spec is read from, given the device default.
    pub fn effective_slave(&self, default_slave: u8) -> u8 {
        self.slave_id.unwrap_or(default_slave)
    }

    pub fn is_readable(&self) -> bool {
        self.access.readable()
    }

    pub fn is_writable(&self) -> bool {
        self.access.writable()
    }

    /// Structural checks performed at generation-build time. A failing spec
    /// keeps the whole generation from going live.
    pub fn validate(&self, max_batch_words: u16) -> Result<()> {
        if self.unique_id.is_empty() {
            return Err(DomainError::Config("unique_id cannot be empty".into()));
        }
        if self.scale == 0.0 {
            return Err(DomainError::Config(format!(
                "{}: scale must be non-zero",
                self.unique_id
            )));
        }
        if self.words() > max_batch_words {
            return Err(DomainError::Config(format!(
                "{}: {} words exceed the transport maximum of {}",
                self.unique_id,
                self.words(),
                max_batch_words
            )));
        }
        match self.data_type {
            DataType::String => {
                if self.word_count.is_none() {
                    return Err(DomainError::Config(format!(
                        "{}: string registers must declare word_count",
                        self.unique_id
                    )));
                }
                if self.access.writable() {
                    return Err(DomainError::Config(format!(
                        "{}: string registers are read-only",
                        self.unique_id
                    )));
                }
            }
            other => {
                if let Some(wc) = self.word_count {
                    if wc != other.default_word_count() {
                        return Err(DomainError::Config(format!(
                            "{}: word_count {} does not match {:?}",
                            self.unique_id, wc, other
                        )));
                    }
                }
            }
        }
        if !self.bit_ops.is_empty() && !self.data_type.is_integer() && self.data_type != DataType::Bool
        {
            return Err(DomainError::Config(format!(
                "{}: bit operations require an integer data type",
                self.unique_id
            )));
        }
        if self.symbolic.is_some()
            && !self.data_type.is_integer()
            && self.data_type != DataType::Bool
        {
            return Err(DomainError::Config(format!(
                "{}: symbolic resolution requires an integer data type",
                self.unique_id
            )));
        }
        if let Some(dep) = &self.depends_on {
            if dep.register.is_empty() {
                return Err(DomainError::Config(format!(
                    "{}: depends_on.register cannot be empty",
                    self.unique_id
                )));
            }
            if dep.register == self.unique_id {
                return Err(DomainError::Config(format!(
                    "{}: register cannot depend on itself",
                    self.unique_id
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_template_conventions() {
        let spec = RegisterSpec::new("grid_voltage", 5018);
        assert_eq!(spec.register_type, RegisterType::Holding);
        assert_eq!(spec.data_type, DataType::Uint16);
        assert_eq!(spec.words(), 1);
        assert_eq!(spec.scale, 1.0);
        assert!(!spec.optional);
        assert!(spec.is_readable());
        assert!(!spec.is_writable());
    }

    #[test]
    fn test_words_derive_from_data_type() {
        let spec = RegisterSpec::new("energy_total", 5144).with_data_type(DataType::Uint32);
        assert_eq!(spec.words(), 2);
        let spec = spec.with_word_count(2);
        assert_eq!(spec.words(), 2);
    }

    #[test]
    fn test_validate_rejects_zero_scale() {
        let spec = RegisterSpec::new("bad", 0).with_transform(0.0, 0.0, None);
        assert!(matches!(spec.validate(125), Err(DomainError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_string_without_word_count() {
        let spec = RegisterSpec::new("serial_number", 4990).with_data_type(DataType::String);
        assert!(spec.validate(125).is_err());
        let spec = spec.with_word_count(10);
        assert!(spec.validate(125).is_ok());
    }

    #[test]
    fn test_validate_rejects_word_count_mismatch() {
        let spec = RegisterSpec::new("bad", 0)
            .with_data_type(DataType::Uint32)
            .with_word_count(3);
        assert!(spec.validate(125).is_err());
    }

    #[test]
    fn test_validate_rejects_oversized_register() {
        let spec = RegisterSpec::new("log_buffer", 0)
            .with_data_type(DataType::String)
            .with_word_count(200);
        assert!(spec.validate(125).is_err());
    }

    #[test]
    fn test_validate_rejects_self_dependency() {
        let spec = RegisterSpec::new("a", 0).with_depends_on(DependsOn {
            register: "a".into(),
            expected: None,
            fallback: None,
        });
        assert!(spec.validate(125).is_err());
    }

    #[test]
    fn test_validate_rejects_symbolic_on_float() {
        let spec = RegisterSpec::new("bad", 0)
            .with_data_type(DataType::Float32)
            .with_symbolic(SymbolicConfig::Map { entries: vec![] });
        assert!(spec.validate(125).is_err());
    }
}
