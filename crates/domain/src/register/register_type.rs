use serde::{Deserialize, Serialize};

/// Register table a spec is addressed in.
///
/// Ord is derived so planner partitions iterate in a stable order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum RegisterType {
    /// Read-only process data (function code 0x04).
    Input,
    /// Read/write configuration and setpoints (function codes 0x03/0x06/0x10).
    Holding,
}

impl RegisterType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Holding => "holding",
        }
    }
}

impl std::fmt::Display for RegisterType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
