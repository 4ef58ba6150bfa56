use serde::{Deserialize, Serialize};

/// Wire data type of a register's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Uint16,
    Int16,
    Uint32,
    Int32,
    Uint64,
    Int64,
    Float32,
    Float64,
    String,
    Bool,
}

impl DataType {
    /// Number of 16-bit words the type occupies on the wire. Strings have no
    /// inherent width; their specs must declare `word_count` explicitly.
    pub fn default_word_count(&self) -> u16 {
        match self {
            Self::Uint16 | Self::Int16 | Self::Bool => 1,
            Self::Uint32 | Self::Int32 | Self::Float32 => 2,
            Self::Uint64 | Self::Int64 | Self::Float64 => 4,
            Self::String => 1,
        }
    }

    pub fn is_numeric(&self) -> bool {
        !matches!(self, Self::String | Self::Bool)
    }

    /// Integer-pattern types that bit operations and symbolic lookups apply to.
    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            Self::Uint16 | Self::Int16 | Self::Uint32 | Self::Int32 | Self::Uint64 | Self::Int64
        )
    }

    pub fn is_signed(&self) -> bool {
        matches!(self, Self::Int16 | Self::Int32 | Self::Int64)
    }

    pub fn bit_width(&self) -> u32 {
        self.default_word_count() as u32 * 16
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_word_counts() {
        assert_eq!(DataType::Uint16.default_word_count(), 1);
        assert_eq!(DataType::Float32.default_word_count(), 2);
        assert_eq!(DataType::Uint64.default_word_count(), 4);
    }

    #[test]
    fn test_serde_names_match_templates() {
        let dt: DataType = serde_json::from_str("\"uint32\"").unwrap();
        assert_eq!(dt, DataType::Uint32);
        let dt: DataType = serde_json::from_str("\"float64\"").unwrap();
        assert_eq!(dt, DataType::Float64);
    }
}
