use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::register::RegisterType;

/// Connection state of a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Not connected, no active connection attempt
    #[default]
    Disconnected,
    /// Currently attempting to establish connection
    Connecting,
    /// Successfully connected and operational
    Connected,
    /// Last connection attempt failed
    Failed,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    pub fn can_connect(&self) -> bool {
        matches!(self, Self::Disconnected | Self::Failed)
    }
}

/// Wire transport for one hub endpoint.
///
/// Implementations already speak the register protocol's framing and CRC;
/// the coordinator bounds every call with its per-device timeout and treats
/// an elapsed bound as a failed operation.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&mut self) -> Result<()>;

    async fn disconnect(&mut self) -> Result<()>;

    fn is_connected(&self) -> bool;

    fn state(&self) -> ConnectionState;

    /// Read `count` words starting at `address` from `slave`.
    async fn read(
        &mut self,
        slave: u8,
        register_type: RegisterType,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>>;

    /// Write words starting at `address` on `slave`.
    async fn write(&mut self, slave: u8, address: u16, words: &[u16]) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let state = ConnectionState::default();
        assert_eq!(state, ConnectionState::Disconnected);
        assert!(state.can_connect());
        assert!(!state.is_connected());
    }

    #[test]
    fn test_failed_state_allows_retry() {
        assert!(ConnectionState::Failed.can_connect());
        assert!(!ConnectionState::Connected.can_connect());
        assert!(!ConnectionState::Connecting.can_connect());
    }
}
