use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use domain::error::{DomainError, Result};
use domain::register::RegisterType;
use domain::transport::{ConnectionState, Transport};

#[derive(Default)]
struct SimState {
    registers: Mutex<HashMap<(u8, RegisterType, u16), u16>>,
    /// Address ranges (slave, start, count) whose reads fail.
    failing: Mutex<Vec<(u8, u16, u16)>>,
    connected: AtomicBool,
    /// Connect attempts hang until the caller's timeout fires.
    unreachable: AtomicBool,
    reads: AtomicU64,
    writes: AtomicU64,
}

/// In-memory register bank implementing the transport interface.
///
/// Used by tests and the demo example: registers are seeded up front,
/// individual ranges can be scripted to fail, and the whole endpoint can
/// play unreachable to exercise offline-first setup. Clones share the same
/// bank, so a test can keep a handle while the coordinator owns the boxed
/// transport.
#[derive(Clone, Default)]
pub struct SimulatorTransport {
    state: Arc<SimState>,
}

impl SimulatorTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_register(self, slave: u8, register_type: RegisterType, address: u16, value: u16) -> Self {
        self.set_register(slave, register_type, address, value);
        self
    }

    pub fn set_register(&self, slave: u8, register_type: RegisterType, address: u16, value: u16) {
        self.state
            .registers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert((slave, register_type, address), value);
    }

    /// Seed a run of consecutive registers starting at `address`.
    pub fn set_registers(&self, slave: u8, register_type: RegisterType, address: u16, values: &[u16]) {
        let mut registers = self
            .state
            .registers
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        for (i, value) in values.iter().enumerate() {
            registers.insert((slave, register_type, address + i as u16), *value);
        }
    }

    pub fn get_register(&self, slave: u8, register_type: RegisterType, address: u16) -> Option<u16> {
        self.state
            .registers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&(slave, register_type, address))
            .copied()
    }

    /// Script reads overlapping [address, address+count) on `slave` to fail.
    pub fn fail_range(&self, slave: u8, address: u16, count: u16) {
        self.state
            .failing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((slave, address, count));
    }

    pub fn clear_failures(&self) {
        self.state
            .failing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    /// Make connect attempts hang; the caller's bound turns them into
    /// timeouts.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.state.unreachable.store(unreachable, Ordering::SeqCst);
    }

    pub fn read_count(&self) -> u64 {
        self.state.reads.load(Ordering::SeqCst)
    }

    pub fn write_count(&self) -> u64 {
        self.state.writes.load(Ordering::SeqCst)
    }

    fn overlaps_failing(&self, slave: u8, address: u16, count: u16) -> bool {
        let failing = self.state.failing.lock().unwrap_or_else(|e| e.into_inner());
        failing.iter().any(|(s, start, len)| {
            *s == slave
                && (address as u32) < *start as u32 + *len as u32
                && (*start as u32) < address as u32 + count as u32
        })
    }
}

#[async_trait]
impl Transport for SimulatorTransport {
    async fn connect(&mut self) -> Result<()> {
        if self.state.unreachable.load(Ordering::SeqCst) {
            // Pretend the host swallows SYNs; the caller's timeout fires
            // long before this does.
            tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
            return Err(DomainError::Connect("host unreachable".into()));
        }
        self.state.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.state.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state.connected.load(Ordering::SeqCst)
    }

    fn state(&self) -> ConnectionState {
        if self.is_connected() {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }

    async fn read(
        &mut self,
        slave: u8,
        register_type: RegisterType,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>> {
        if !self.is_connected() {
            return Err(DomainError::Connect("not connected".into()));
        }
        self.state.reads.fetch_add(1, Ordering::SeqCst);
        if self.overlaps_failing(slave, address, count) {
            return Err(DomainError::Protocol("illegal data address".into()));
        }
        let registers = self
            .state
            .registers
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        Ok((0..count)
            .map(|i| {
                registers
                    .get(&(slave, register_type, address + i))
                    .copied()
                    .unwrap_or(0)
            })
            .collect())
    }

    async fn write(&mut self, slave: u8, address: u16, words: &[u16]) -> Result<()> {
        if !self.is_connected() {
            return Err(DomainError::Connect("not connected".into()));
        }
        self.state.writes.fetch_add(1, Ordering::SeqCst);
        let mut registers = self
            .state
            .registers
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        for (i, word) in words.iter().enumerate() {
            // Writes land in the holding table, as on the wire.
            registers.insert((slave, RegisterType::Holding, address + i as u16), *word);
        }
        Ok(())
    }
}
