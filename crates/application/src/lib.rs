//! Application layer - Polling orchestration and operational controls

pub mod cache;
pub mod coordinator;
pub mod error_tracker;
pub mod generation;
pub mod manager;
pub mod performance;

pub use cache::ValueCache;
pub use coordinator::{DeviceCoordinator, DeviceSettings, DeviceState};
pub use error_tracker::ErrorTracker;
pub use generation::Generation;
pub use manager::{AcquisitionManager, RegisterSelector};
pub use performance::{PerformanceMonitor, PerformanceSummary};
