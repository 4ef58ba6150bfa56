//! Per-device polling coordination.
//!
//! Each configured device runs one coordinator task: it owns the transport,
//! schedules due register groups, feeds replies through the value processor
//! into the cache, and serves write commands immediately. A device that is
//! slow or unreachable degrades in place and never blocks setup or sibling
//! devices.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex as TokioMutex;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use domain::error::{DomainError, Result};
use domain::plan::RegisterGroup;
use domain::processor;
use domain::register::{EntityValue, RegisterSpec, Value};
use domain::{DeviceContext, Transport};

use crate::cache::ValueCache;
use crate::error_tracker::ErrorTracker;
use crate::generation::{Generation, PlanLimits};
use crate::performance::PerformanceMonitor;

/// Runtime knobs for one device's polling task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSettings {
    /// Bound on initial and reconnect attempts (ms).
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Bound on every read/write call (ms).
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Pause between consecutive group reads within one cycle (ms).
    #[serde(default)]
    pub delay_ms: u64,
    /// Transport maximum words per read call.
    #[serde(default = "default_max_batch_words")]
    pub max_batch_words: u16,
    /// Unused filler words tolerated when merging adjacent spans.
    #[serde(default = "default_gap_merge_threshold")]
    pub gap_merge_threshold: u16,
    /// Scheduler granularity for due-group checks (ms).
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
}

fn default_connect_timeout_ms() -> u64 {
    5000
}
fn default_request_timeout_ms() -> u64 {
    3000
}
fn default_max_batch_words() -> u16 {
    125
}
fn default_gap_merge_threshold() -> u16 {
    8
}
fn default_tick_ms() -> u64 {
    1000
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            delay_ms: 0,
            max_batch_words: default_max_batch_words(),
            gap_merge_threshold: default_gap_merge_threshold(),
            tick_ms: default_tick_ms(),
        }
    }
}

impl DeviceSettings {
    pub fn plan_limits(&self) -> PlanLimits {
        PlanLimits {
            max_batch_words: self.max_batch_words,
            gap_merge_threshold: self.gap_merge_threshold,
        }
    }
}

/// Lifecycle state of one device's polling task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceState {
    Init,
    Connecting,
    Connected,
    /// Transport trouble: polling keeps retrying on schedule.
    Degraded,
    Unloading,
    Stopped,
}

impl std::fmt::Display for DeviceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Init => "init",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Degraded => "degraded",
            Self::Unloading => "unloading",
            Self::Stopped => "stopped",
        };
        write!(f, "{s}")
    }
}

struct Inner {
    device_id: String,
    settings: DeviceSettings,
    /// Full template set (pre-condition filtering); reloads re-evaluate it.
    template: RwLock<Vec<RegisterSpec>>,
    context: RwLock<DeviceContext>,
    transport: TokioMutex<Box<dyn Transport>>,
    generation: RwLock<Arc<Generation>>,
    generation_counter: AtomicU64,
    state: RwLock<DeviceState>,
    cache: Arc<ValueCache>,
    errors: Arc<ErrorTracker>,
    performance: Arc<PerformanceMonitor>,
    cancel: CancellationToken,
}

/// Coordinator handle; clones share the same device task state.
#[derive(Clone)]
pub struct DeviceCoordinator {
    inner: Arc<Inner>,
}

fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

impl DeviceCoordinator {
    /// Build the initial configuration generation and the coordinator for
    /// it. A broken template is rejected here and the device does not go
    /// live.
    pub fn new(
        context: DeviceContext,
        template: Vec<RegisterSpec>,
        settings: DeviceSettings,
        transport: Box<dyn Transport>,
        cache: Arc<ValueCache>,
        errors: Arc<ErrorTracker>,
        performance: Arc<PerformanceMonitor>,
    ) -> Result<Self> {
        let generation =
            Generation::build(1, context.clone(), &template, settings.plan_limits())?;
        info!(
            device_id = %context.prefix,
            registers = generation.specs.len(),
            groups = generation.groups.len(),
            "Built initial configuration generation"
        );
        Ok(Self {
            inner: Arc::new(Inner {
                device_id: context.prefix.clone(),
                settings,
                template: RwLock::new(template),
                context: RwLock::new(context),
                transport: TokioMutex::new(transport),
                generation: RwLock::new(Arc::new(generation)),
                generation_counter: AtomicU64::new(1),
                state: RwLock::new(DeviceState::Init),
                cache,
                errors,
                performance,
                cancel: CancellationToken::new(),
            }),
        })
    }

    pub fn device_id(&self) -> &str {
        &self.inner.device_id
    }

    pub fn state(&self) -> DeviceState {
        *read_lock(&self.inner.state)
    }

    fn set_state(&self, state: DeviceState) {
        *write_lock(&self.inner.state) = state;
    }

    fn current_generation(&self) -> Arc<Generation> {
        read_lock(&self.inner.generation).clone()
    }

    /// Diagnostic view of the active read plan.
    pub fn group_plan(&self) -> Vec<RegisterGroup> {
        self.current_generation().groups.clone()
    }

    /// Request teardown; the running task finishes its in-flight operation,
    /// discards the result and stops.
    pub fn shutdown(&self) {
        self.inner.cancel.cancel();
    }

    /// Poll loop. Runs until shutdown; spawned once per device.
    pub async fn run(&self) {
        let inner = &self.inner;
        info!(device_id = %inner.device_id, "Starting device coordinator");

        self.set_state(DeviceState::Connecting);
        match self.try_connect().await {
            Ok(()) => {
                info!(device_id = %inner.device_id, "Connected");
                self.set_state(DeviceState::Connected);
            }
            Err(e) => {
                // Offline-first: setup completes, polling starts degraded
                // and reconnects on schedule.
                warn!(device_id = %inner.device_id, "Initial connect failed (continuing offline): {e}");
                self.set_state(DeviceState::Degraded);
            }
        }

        let mut timer = tokio::time::interval(Duration::from_millis(inner.settings.tick_ms));
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut next_due: HashMap<String, tokio::time::Instant> = HashMap::new();

        loop {
            tokio::select! {
                _ = inner.cancel.cancelled() => {
                    info!(device_id = %inner.device_id, "Shutdown signal received");
                    break;
                }
                _ = timer.tick() => {
                    self.poll_cycle(&mut next_due).await;
                }
            }
        }

        self.set_state(DeviceState::Unloading);
        {
            let mut transport = inner.transport.lock().await;
            if let Err(e) = transport.disconnect().await {
                debug!(device_id = %inner.device_id, "Disconnect during unload failed: {e}");
            }
        }
        self.set_state(DeviceState::Stopped);
        info!(device_id = %inner.device_id, "Device coordinator stopped");
    }

    async fn try_connect(&self) -> Result<()> {
        let inner = &self.inner;
        let mut transport = inner.transport.lock().await;
        if transport.is_connected() {
            return Ok(());
        }
        let bound = Duration::from_millis(inner.settings.connect_timeout_ms);
        match timeout(bound, transport.connect()).await {
            Ok(res) => res,
            Err(_) => Err(DomainError::Timeout(inner.settings.connect_timeout_ms)),
        }
    }

    /// One scheduler tick: read every group whose interval has elapsed, in
    /// the plan's fixed ascending order.
    async fn poll_cycle(&self, next_due: &mut HashMap<String, tokio::time::Instant>) {
        let inner = &self.inner;
        let generation = self.current_generation();
        let now = tokio::time::Instant::now();
        let due: Vec<&RegisterGroup> = generation
            .groups
            .iter()
            .filter(|g| next_due.get(&g.key()).is_none_or(|t| now >= *t))
            .collect();
        if due.is_empty() {
            return;
        }

        if let Err(e) = self.try_connect().await {
            // The whole cycle fails: every due member goes unavailable and
            // is retried at its next naturally scheduled tick, no backoff.
            debug!(device_id = %inner.device_id, "Reconnect failed: {e}");
            self.set_state(DeviceState::Degraded);
            for group in due {
                self.handle_group_failure(group, &e);
                next_due.insert(group.key(), now + Duration::from_secs(group.interval_s));
            }
            return;
        }

        let delay = Duration::from_millis(inner.settings.delay_ms);
        let mut any_success = false;
        let mut first = true;
        for group in due {
            if inner.cancel.is_cancelled() {
                return;
            }
            if !first && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            first = false;

            let started = std::time::Instant::now();
            let result = self.read_group(group).await;
            inner.performance.record(
                &inner.device_id,
                &group.key(),
                started.elapsed(),
                group.count,
                group.members.len(),
                result.is_ok(),
            );

            match result {
                Ok(words) => {
                    any_success = true;
                    self.apply_group_result(&generation, group, &words);
                }
                Err(e) => {
                    // Failure stays contained to this group; siblings in the
                    // same cycle still run.
                    debug!(device_id = %inner.device_id, group = %group.key(), "Group read failed: {e}");
                    self.handle_group_failure(group, &e);
                }
            }
            next_due.insert(group.key(), now + Duration::from_secs(group.interval_s));
        }

        if inner.cancel.is_cancelled() {
            return;
        }
        if any_success {
            self.set_state(DeviceState::Connected);
        } else {
            self.set_state(DeviceState::Degraded);
        }
    }

    async fn read_group(&self, group: &RegisterGroup) -> Result<Vec<u16>> {
        let inner = &self.inner;
        let mut transport = inner.transport.lock().await;
        let bound = Duration::from_millis(inner.settings.request_timeout_ms);
        match timeout(
            bound,
            transport.read(group.slave_id, group.register_type, group.start, group.count),
        )
        .await
        {
            Ok(res) => res,
            Err(_) => Err(DomainError::Timeout(inner.settings.request_timeout_ms)),
        }
    }

    fn apply_group_result(
        &self,
        generation: &Arc<Generation>,
        group: &RegisterGroup,
        words: &[u16],
    ) {
        let inner = &self.inner;
        // Results from an abandoned generation or a tearing-down device are
        // discarded, never written.
        if inner.cancel.is_cancelled() || self.current_generation().id != generation.id {
            debug!(device_id = %inner.device_id, group = %group.key(), "Discarding stale group result");
            return;
        }
        for spec in &group.members {
            let offset = group.offset_of(spec);
            let end = offset + spec.words() as usize;
            let slice = words.get(offset..end).unwrap_or(&[]);
            match processor::decode(slice, spec) {
                Ok(processed) => {
                    let mut entity =
                        EntityValue::new(spec.unique_id.clone(), processed.value, processed.raw)
                            .with_metadata(spec.unit.clone(), spec.category.clone());
                    entity.available = self.dependency_satisfied(spec);
                    inner.cache.insert(&inner.device_id, entity);
                    inner.errors.record_success(&inner.device_id, &spec.unique_id);
                }
                Err(e) => {
                    inner
                        .errors
                        .record_failure(&inner.device_id, &spec.unique_id, &e, spec.optional);
                    inner.cache.mark_unavailable(&inner.device_id, &spec.unique_id);
                }
            }
        }
    }

    fn handle_group_failure(&self, group: &RegisterGroup, error: &DomainError) {
        let inner = &self.inner;
        if inner.cancel.is_cancelled() {
            return;
        }
        for spec in &group.members {
            inner
                .errors
                .record_failure(&inner.device_id, &spec.unique_id, error, spec.optional);
            inner.cache.mark_unavailable(&inner.device_id, &spec.unique_id);
        }
    }

    /// Availability gate: a register with `depends_on.expected` is only
    /// available while the referenced register's cached raw value matches.
    /// While the reference is unresolved the configured fallback constant
    /// stands in; without one the gate stays closed.
    fn dependency_satisfied(&self, spec: &RegisterSpec) -> bool {
        let Some(dep) = &spec.depends_on else {
            return true;
        };
        let Some(expected) = dep.expected else {
            return true;
        };
        let resolved = self
            .inner
            .cache
            .get(&self.inner.device_id, &dep.register)
            .or_else(|| self.inner.cache.find(&dep.register));
        match resolved {
            Some(entity) if entity.available => entity.raw == Some(expected),
            _ => dep
                .fallback
                .is_some_and(|f| f.round() >= 0.0 && f.round() as u64 == expected),
        }
    }

    /// Resolve a referenced register's numeric value from the cache,
    /// falling back to the configured constant. Never issues a read.
    fn resolve_reference(&self, register: &str, fallback: Option<f64>) -> Option<f64> {
        let entity = self
            .inner
            .cache
            .get(&self.inner.device_id, register)
            .or_else(|| self.inner.cache.find(register));
        match entity {
            Some(e) if e.available => e.value.as_f64().or(fallback),
            _ => fallback,
        }
    }

    fn check_bounds(&self, spec: &RegisterSpec, value: f64) -> Result<()> {
        let min = match &spec.min_from_register {
            Some(src) => self.resolve_reference(&src.register, Some(src.fallback)),
            None => spec.min_value,
        };
        let max = match &spec.max_from_register {
            Some(src) => self.resolve_reference(&src.register, Some(src.fallback)),
            None => spec.max_value,
        };
        if let Some(min) = min {
            if value < min {
                return Err(DomainError::Value(format!(
                    "{}: {value} is below the minimum of {min}",
                    spec.unique_id
                )));
            }
        }
        if let Some(max) = max {
            if value > max {
                return Err(DomainError::Value(format!(
                    "{}: {value} exceeds the limit of {max}",
                    spec.unique_id
                )));
            }
        }
        Ok(())
    }

    /// Execute a write command immediately, bypassing the poll schedule.
    /// The outcome is returned to the caller and is independent of polling
    /// availability.
    pub async fn command(&self, unique_id: &str, value: Value) -> Result<()> {
        let inner = &self.inner;
        let generation = self.current_generation();
        let spec = generation
            .find_spec(unique_id)
            .ok_or_else(|| DomainError::RegisterNotFound(unique_id.to_string()))?;
        if !spec.is_writable() {
            return Err(DomainError::Value(format!("{unique_id} is not writable")));
        }
        if !self.dependency_satisfied(spec) {
            let gate = spec
                .depends_on
                .as_ref()
                .map(|d| d.register.clone())
                .unwrap_or_default();
            return Err(DomainError::DependencyUnresolved(format!(
                "{unique_id} is gated by {gate}"
            )));
        }
        if let Value::Number(n) = &value {
            self.check_bounds(spec, *n)?;
        }

        let words = processor::encode(&value, spec)?;
        let slave = spec.effective_slave(generation.context.slave_id);

        self.try_connect().await?;
        let bound = Duration::from_millis(inner.settings.request_timeout_ms);
        let mut transport = inner.transport.lock().await;
        let result = match timeout(bound, transport.write(slave, spec.address, &words)).await {
            Ok(res) => res,
            Err(_) => Err(DomainError::Timeout(inner.settings.request_timeout_ms)),
        };
        drop(transport);

        match &result {
            Ok(()) => {
                info!(device_id = %inner.device_id, register = %unique_id, words = words.len(), "Write command executed");
            }
            Err(e) => {
                warn!(device_id = %inner.device_id, register = %unique_id, "Write command failed: {e}");
            }
        }
        result
    }

    /// Build and atomically activate a new configuration generation from the
    /// current template. In-flight reads against the old generation are
    /// discarded when they complete. On error the old generation stays live.
    pub fn reload(&self) -> Result<()> {
        let inner = &self.inner;
        let template = read_lock(&inner.template).clone();
        let context = read_lock(&inner.context).clone();
        let id = inner.generation_counter.fetch_add(1, Ordering::SeqCst) + 1;
        let generation =
            Generation::build(id, context, &template, inner.settings.plan_limits())?;
        info!(
            device_id = %inner.device_id,
            generation = id,
            registers = generation.specs.len(),
            groups = generation.groups.len(),
            "Activated configuration generation"
        );
        *write_lock(&inner.generation) = Arc::new(generation);
        Ok(())
    }

    /// Replace the template set and reload.
    pub fn update_template(&self, specs: Vec<RegisterSpec>) -> Result<()> {
        *write_lock(&self.inner.template) = specs;
        self.reload()
    }

    /// Update the device context (dynamic config) and reload.
    pub fn update_context(&self, context: DeviceContext) -> Result<()> {
        *write_lock(&self.inner.context) = context;
        self.reload()
    }

    /// Drop template specs matching the predicate and rebuild the plan.
    /// Cached values of dropped registers are evicted.
    pub fn remove_registers<F>(&self, matches: F) -> Result<usize>
    where
        F: Fn(&RegisterSpec) -> bool,
    {
        let removed: Vec<String> = {
            let mut template = write_lock(&self.inner.template);
            let (dropped, kept): (Vec<RegisterSpec>, Vec<RegisterSpec>) =
                template.drain(..).partition(|s| matches(s));
            *template = kept;
            dropped.into_iter().map(|s| s.unique_id).collect()
        };
        if removed.is_empty() {
            return Ok(0);
        }
        self.reload()?;
        for unique_id in &removed {
            self.inner.cache.remove(&self.inner.device_id, unique_id);
            self.inner.errors.record_success(&self.inner.device_id, unique_id);
        }
        Ok(removed.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use domain::register::{Access, BoundSource, DependsOn};
    use domain::ConnectionState;
    use std::sync::Mutex as StdMutex;

    /// Scripted in-memory transport for coordinator unit tests.
    struct FakeTransport {
        connected: bool,
        writes: Arc<StdMutex<Vec<(u8, u16, Vec<u16>)>>>,
    }

    impl FakeTransport {
        fn new() -> (Self, Arc<StdMutex<Vec<(u8, u16, Vec<u16>)>>>) {
            let writes = Arc::new(StdMutex::new(Vec::new()));
            (
                Self {
                    connected: false,
                    writes: writes.clone(),
                },
                writes,
            )
        }
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn connect(&mut self) -> Result<()> {
            self.connected = true;
            Ok(())
        }

        async fn disconnect(&mut self) -> Result<()> {
            self.connected = false;
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.connected
        }

        fn state(&self) -> ConnectionState {
            if self.connected {
                ConnectionState::Connected
            } else {
                ConnectionState::Disconnected
            }
        }

        async fn read(
            &mut self,
            _slave: u8,
            _register_type: domain::RegisterType,
            address: u16,
            count: u16,
        ) -> Result<Vec<u16>> {
            Ok((address..address + count).collect())
        }

        async fn write(&mut self, slave: u8, address: u16, words: &[u16]) -> Result<()> {
            self.writes.lock().unwrap().push((slave, address, words.to_vec()));
            Ok(())
        }
    }

    fn coordinator_with(
        template: Vec<RegisterSpec>,
    ) -> (DeviceCoordinator, Arc<ValueCache>, Arc<StdMutex<Vec<(u8, u16, Vec<u16>)>>>) {
        let cache = Arc::new(ValueCache::new());
        let (transport, writes) = FakeTransport::new();
        let coordinator = DeviceCoordinator::new(
            DeviceContext::new(1, "inv", "SH10RT").with("phases", 3i64),
            template,
            DeviceSettings::default(),
            Box::new(transport),
            cache.clone(),
            Arc::new(ErrorTracker::new()),
            Arc::new(PerformanceMonitor::new()),
        )
        .unwrap();
        (coordinator, cache, writes)
    }

    #[test]
    fn test_broken_template_does_not_go_live() {
        let cache = Arc::new(ValueCache::new());
        let (transport, _) = FakeTransport::new();
        let result = DeviceCoordinator::new(
            DeviceContext::new(1, "inv", "SH10RT"),
            vec![RegisterSpec::new("bad", 0).with_transform(0.0, 0.0, None)],
            DeviceSettings::default(),
            Box::new(transport),
            cache,
            Arc::new(ErrorTracker::new()),
            Arc::new(PerformanceMonitor::new()),
        );
        assert!(matches!(result, Err(DomainError::Config(_))));
    }

    #[tokio::test]
    async fn test_command_applies_inverse_transform() {
        let spec = RegisterSpec::new("export_limit", 5622)
            .with_access(Access::ReadWrite)
            .with_transform(10.0, 0.0, None);
        let (coordinator, _cache, writes) = coordinator_with(vec![spec]);
        coordinator
            .command("export_limit", Value::Number(500.0))
            .await
            .unwrap();
        let writes = writes.lock().unwrap();
        assert_eq!(writes.as_slice(), &[(1, 5622, vec![50])]);
    }

    #[tokio::test]
    async fn test_command_rejects_read_only_and_unknown_registers() {
        let (coordinator, _cache, _) = coordinator_with(vec![RegisterSpec::new("soc", 13022)]);
        assert!(matches!(
            coordinator.command("soc", Value::Number(1.0)).await,
            Err(DomainError::Value(_))
        ));
        assert!(matches!(
            coordinator.command("nope", Value::Number(1.0)).await,
            Err(DomainError::RegisterNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_dependency_gate_controls_availability() {
        // Scenario: control gated on X holding 0xA1.
        let control = RegisterSpec::new("forced_mode", 13050)
            .with_access(Access::ReadWrite)
            .with_depends_on(DependsOn {
                register: "ems_mode_raw".into(),
                expected: Some(0xA1),
                fallback: None,
            });
        let (coordinator, cache, writes) = coordinator_with(vec![control]);

        // Unresolved reference: unavailable.
        assert!(matches!(
            coordinator.command("forced_mode", Value::Number(1.0)).await,
            Err(DomainError::DependencyUnresolved(_))
        ));

        cache.insert("inv", EntityValue::new("ems_mode_raw", Value::Number(0.0), Some(0x00)));
        assert!(matches!(
            coordinator.command("forced_mode", Value::Number(1.0)).await,
            Err(DomainError::DependencyUnresolved(_))
        ));

        cache.insert("inv", EntityValue::new("ems_mode_raw", Value::Number(161.0), Some(0xA1)));
        coordinator
            .command("forced_mode", Value::Number(1.0))
            .await
            .unwrap();
        assert_eq!(writes.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_dependency_fallback_opens_the_gate_while_unresolved() {
        let control = RegisterSpec::new("backup_mode", 13075)
            .with_access(Access::ReadWrite)
            .with_depends_on(DependsOn {
                register: "app_mode".into(),
                expected: Some(0x01),
                fallback: Some(1.0),
            });
        let (coordinator, cache, _) = coordinator_with(vec![control]);

        // Nothing cached yet: the fallback constant satisfies the gate.
        assert!(coordinator.command("backup_mode", Value::Number(1.0)).await.is_ok());

        // A resolved reference overrides the fallback.
        cache.insert("inv", EntityValue::new("app_mode", Value::Number(0.0), Some(0x00)));
        assert!(coordinator.command("backup_mode", Value::Number(1.0)).await.is_err());
    }

    #[tokio::test]
    async fn test_dynamic_bound_from_referenced_register() {
        let mut control =
            RegisterSpec::new("charge_power", 13051).with_access(Access::ReadWrite);
        control.max_from_register = Some(BoundSource {
            register: "battery_max_power".into(),
            fallback: 5000.0,
        });
        let (coordinator, cache, _) = coordinator_with(vec![control]);

        // Source unavailable: the fallback constant bounds the command.
        assert!(coordinator
            .command("charge_power", Value::Number(6000.0))
            .await
            .is_err());
        assert!(coordinator
            .command("charge_power", Value::Number(4000.0))
            .await
            .is_ok());

        // Resolved source tightens the bound.
        cache.insert(
            "inv",
            EntityValue::new("battery_max_power", Value::Number(3000.0), None),
        );
        assert!(coordinator
            .command("charge_power", Value::Number(4000.0))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_reload_swaps_generation_atomically() {
        let (coordinator, _cache, _) =
            coordinator_with(vec![RegisterSpec::new("a", 100), RegisterSpec::new("b", 101)]);
        let before = coordinator.current_generation();
        assert_eq!(before.id, 1);

        coordinator
            .update_template(vec![RegisterSpec::new("a", 100)])
            .unwrap();
        let after = coordinator.current_generation();
        assert_eq!(after.id, 2);
        assert_eq!(after.specs.len(), 1);
        // The old generation object is untouched.
        assert_eq!(before.specs.len(), 2);
    }

    #[tokio::test]
    async fn test_failed_reload_keeps_old_generation() {
        let (coordinator, _cache, _) = coordinator_with(vec![RegisterSpec::new("a", 100)]);
        let result = coordinator.update_template(vec![
            RegisterSpec::new("dup", 1),
            RegisterSpec::new("dup", 2),
        ]);
        assert!(result.is_err());
        let generation = coordinator.current_generation();
        assert_eq!(generation.specs[0].unique_id, "a");
    }

    #[tokio::test]
    async fn test_remove_registers_recomputes_and_evicts() {
        let (coordinator, cache, _) = coordinator_with(vec![
            RegisterSpec::new("keep", 100),
            RegisterSpec::new("drop_me", 101),
        ]);
        cache.insert("inv", EntityValue::new("drop_me", Value::Number(1.0), None));

        let removed = coordinator
            .remove_registers(|s| s.unique_id == "drop_me")
            .unwrap();
        assert_eq!(removed, 1);
        assert!(cache.get("inv", "drop_me").is_none());
        let plan = coordinator.group_plan();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].count, 1);
    }

    #[tokio::test]
    async fn test_stale_generation_result_is_discarded() {
        let (coordinator, cache, _) = coordinator_with(vec![RegisterSpec::new("a", 100)]);
        let old_generation = coordinator.current_generation();
        let group = old_generation.groups[0].clone();
        coordinator.reload().unwrap();

        coordinator.apply_group_result(&old_generation, &group, &[42]);
        assert!(cache.get("inv", "a").is_none());
    }
}
