use serde::{Deserialize, Serialize};

/// Byte/word order corrections applied before numeric interpretation.
/// Both flags are independent; the wire default is big-endian both ways.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapMode {
    #[serde(default)]
    pub bytes: bool,
    #[serde(default)]
    pub words: bool,
}

impl SwapMode {
    pub fn word() -> Self {
        Self {
            bytes: false,
            words: true,
        }
    }

    pub fn byte() -> Self {
        Self {
            bytes: true,
            words: false,
        }
    }
}

/// Composable bit-level operations, applied in declaration order to the raw
/// integer pattern before transforms and symbolic resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BitOp {
    Mask { mask: u64 },
    /// Extract a single bit as 0/1.
    Bit { bit: u8 },
    /// Extract `len` bits starting at `start`.
    Range { start: u8, len: u8 },
    ShiftLeft { bits: u8 },
    ShiftRight { bits: u8 },
    RotateLeft { bits: u8 },
    RotateRight { bits: u8 },
}

/// Character handling for string registers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextEncoding {
    /// UTF-8, invalid sequences replaced.
    #[default]
    Utf8,
    /// Strict 7-bit ASCII; bytes outside the range are dropped.
    Ascii,
}

/// One raw-value -> label association.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapEntry {
    pub raw: u64,
    pub label: String,
}

/// One bit -> label association for flag words.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlagEntry {
    pub bit: u8,
    pub label: String,
}

/// Symbolic resolution config. At most one mode applies per spec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SymbolicConfig {
    /// Exact raw-value map; first matching entry wins, misses resolve to the
    /// unknown marker.
    Map { entries: Vec<MapEntry> },
    /// Independent bit labels; several can be active at once.
    Flags { entries: Vec<FlagEntry> },
    /// Enumerated options for selects. Unmapped values pass through for
    /// sensors and are rejected on the write path.
    Options { entries: Vec<MapEntry> },
}

/// Reference to another register's most recently resolved value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependsOn {
    /// unique_id of the referenced register. Resolved against the same
    /// device first, then against other devices' cached snapshots.
    pub register: String,
    /// Raw value the reference must currently hold for this entity to be
    /// available. None gates on mere availability of the reference.
    #[serde(default)]
    pub expected: Option<u64>,
    /// Constant used when the reference has not been resolved yet.
    #[serde(default)]
    pub fallback: Option<f64>,
}

/// Dynamic numeric bound sourced from another register, with a constant
/// fallback while the source is unavailable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundSource {
    pub register: String,
    pub fallback: f64,
}

/// Capability flag distinguishing entity kinds; one flag, not a hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Access {
    ReadOnly,
    ReadWrite,
    /// Action triggers: written, never polled.
    WriteOnly,
}

impl Access {
    pub fn readable(&self) -> bool {
        matches!(self, Self::ReadOnly | Self::ReadWrite)
    }

    pub fn writable(&self) -> bool {
        matches!(self, Self::ReadWrite | Self::WriteOnly)
    }
}

impl Default for Access {
    fn default() -> Self {
        Self::ReadOnly
    }
}
