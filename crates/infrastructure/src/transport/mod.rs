pub mod modbus_tcp;
pub mod simulator;

pub use modbus_tcp::{ModbusTcpConfig, ModbusTcpTransport};
pub use simulator::SimulatorTransport;
