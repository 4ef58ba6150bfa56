use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex as TokioMutex;
use tokio_modbus::client::Context;
use tokio_modbus::prelude::*;

use domain::error::{DomainError, Result};
use domain::register::RegisterType;
use domain::transport::{ConnectionState, Transport};

// Global registry for shared TCP connections: several logical devices
// (slave ids) usually sit behind one host:port.
static SHARED_HUBS: std::sync::OnceLock<Mutex<HashMap<String, Weak<TokioMutex<Context>>>>> =
    std::sync::OnceLock::new();

fn get_shared_hubs() -> &'static Mutex<HashMap<String, Weak<TokioMutex<Context>>>> {
    SHARED_HUBS.get_or_init(|| Mutex::new(HashMap::new()))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModbusTcpConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    502
}

impl ModbusTcpConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Modbus TCP implementation of the transport interface.
///
/// The TCP context is shared per endpoint through a weak registry, so
/// several devices on one hub reuse a single connection; it closes when the
/// last device drops its handle. Callers bound every call with their own
/// timeout.
pub struct ModbusTcpTransport {
    config: ModbusTcpConfig,
    context: Option<Arc<TokioMutex<Context>>>,
    state: ConnectionState,
}

impl ModbusTcpTransport {
    pub fn new(config: ModbusTcpConfig) -> Self {
        Self {
            config,
            context: None,
            state: ConnectionState::Disconnected,
        }
    }

    async fn resolve_addr(&self) -> Result<SocketAddr> {
        let endpoint = self.config.endpoint();
        if let Ok(addr) = endpoint.parse::<SocketAddr>() {
            return Ok(addr);
        }
        tokio::net::lookup_host(&endpoint)
            .await
            .map_err(|e| DomainError::Connect(format!("cannot resolve {endpoint}: {e}")))?
            .next()
            .ok_or_else(|| DomainError::Connect(format!("no address for {endpoint}")))
    }

    /// Drop the shared context on transport-level errors so the next cycle
    /// reconnects instead of reusing a dead socket.
    fn invalidate(&mut self) {
        self.context = None;
        self.state = ConnectionState::Failed;
    }
}

#[async_trait]
impl Transport for ModbusTcpTransport {
    async fn connect(&mut self) -> Result<()> {
        self.state = ConnectionState::Connecting;
        let hub_key = self.config.endpoint().to_lowercase();

        // 1. Reuse an existing context for this endpoint if one is alive.
        let existing_ctx = {
            let hubs = get_shared_hubs().lock().unwrap_or_else(|e| e.into_inner());
            hubs.get(&hub_key).and_then(Weak::upgrade)
        };
        if let Some(ctx) = existing_ctx {
            self.context = Some(ctx);
            self.state = ConnectionState::Connected;
            return Ok(());
        }

        // 2. Open a new connection.
        let addr = self.resolve_addr().await?;
        let ctx = tokio_modbus::client::tcp::connect(addr).await.map_err(|e| {
            self.state = ConnectionState::Failed;
            let msg = format!("Failed to connect to {addr}: {e}");
            tracing::warn!("{msg}");
            DomainError::Connect(msg)
        })?;
        let ctx = Arc::new(TokioMutex::new(ctx));

        // 3. Publish it for other devices on the same hub.
        {
            let mut hubs = get_shared_hubs().lock().unwrap_or_else(|e| e.into_inner());
            hubs.insert(hub_key, Arc::downgrade(&ctx));
        }

        self.context = Some(ctx);
        self.state = ConnectionState::Connected;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        // Dropping the Arc decrements the refcount; the socket closes when
        // the last device on this hub disconnects.
        self.context = None;
        self.state = ConnectionState::Disconnected;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.context.is_some()
    }

    fn state(&self) -> ConnectionState {
        self.state
    }

    async fn read(
        &mut self,
        slave: u8,
        register_type: RegisterType,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>> {
        let ctx_arc = self
            .context
            .as_ref()
            .ok_or_else(|| DomainError::Connect("not connected".into()))?
            .clone();

        tracing::debug!(
            slave,
            address,
            count,
            register_type = %register_type,
            "Modbus read"
        );

        let mut ctx = ctx_arc.lock().await;
        // Shared context: select the slave for this transaction.
        ctx.set_slave(Slave(slave));

        let response = match register_type {
            RegisterType::Holding => ctx.read_holding_registers(address, count).await,
            RegisterType::Input => ctx.read_input_registers(address, count).await,
        };
        drop(ctx);

        match response {
            Ok(Ok(words)) => Ok(words),
            Ok(Err(exception)) => Err(DomainError::Protocol(format!(
                "Modbus exception: {exception}"
            ))),
            Err(e) => {
                self.invalidate();
                Err(DomainError::Connect(format!("Modbus transport error: {e}")))
            }
        }
    }

    async fn write(&mut self, slave: u8, address: u16, words: &[u16]) -> Result<()> {
        let ctx_arc = self
            .context
            .as_ref()
            .ok_or_else(|| DomainError::Connect("not connected".into()))?
            .clone();

        if words.is_empty() {
            return Err(DomainError::Value("nothing to write".into()));
        }

        tracing::debug!(slave, address, count = words.len(), "Modbus write");

        let mut ctx = ctx_arc.lock().await;
        ctx.set_slave(Slave(slave));

        // Single-register writes use function code 0x06, multi 0x10.
        let response = if words.len() == 1 {
            ctx.write_single_register(address, words[0]).await
        } else {
            ctx.write_multiple_registers(address, words).await
        };
        drop(ctx);

        match response {
            Ok(Ok(())) => Ok(()),
            Ok(Err(exception)) => Err(DomainError::Protocol(format!(
                "Modbus exception: {exception}"
            ))),
            Err(e) => {
                self.invalidate();
                Err(DomainError::Connect(format!("Modbus transport error: {e}")))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_format() {
        let config = ModbusTcpConfig::new("192.168.1.50", 502);
        assert_eq!(config.endpoint(), "192.168.1.50:502");
    }

    #[test]
    fn test_default_port() {
        let config: ModbusTcpConfig =
            serde_json::from_str(r#"{"host": "inverter.local"}"#).unwrap();
        assert_eq!(config.port, 502);
    }

    #[tokio::test]
    async fn test_read_before_connect_fails() {
        let mut transport = ModbusTcpTransport::new(ModbusTcpConfig::new("127.0.0.1", 502));
        let err = transport
            .read(1, RegisterType::Holding, 0, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Connect(_)));
        assert!(!transport.is_connected());
    }
}
