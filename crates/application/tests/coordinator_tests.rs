//! End-to-end coordinator tests against the in-memory simulator transport.
//!
//! Time is paused: the tokio clock auto-advances to the next timer, so
//! connect timeouts and poll intervals elapse deterministically.

use std::time::Duration;

use application::manager::RegisterSelector;
use application::{AcquisitionManager, DeviceSettings, DeviceState};
use domain::register::{
    Access, BoundSource, MapEntry, RegisterSpec, RegisterType, SymbolicConfig, Value,
};
use domain::DeviceContext;
use infrastructure::SimulatorTransport;

fn settings() -> DeviceSettings {
    DeviceSettings {
        connect_timeout_ms: 1000,
        request_timeout_ms: 500,
        delay_ms: 0,
        max_batch_words: 125,
        gap_merge_threshold: 8,
        tick_ms: 100,
    }
}

fn inverter_context() -> DeviceContext {
    DeviceContext::new(1, "inv", "sungrow_shx").with("phases", 3i64)
}

async fn sleep_ms(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

#[tokio::test(start_paused = true)]
async fn setup_against_unreachable_host_reaches_degraded() {
    let manager = AcquisitionManager::new();
    let sim = SimulatorTransport::new();
    sim.set_unreachable(true);

    let template = vec![RegisterSpec::new("soc", 13022).with_interval(1)];
    let started = tokio::time::Instant::now();
    manager
        .setup_device(inverter_context(), template, settings(), Box::new(sim.clone()))
        .await
        .unwrap();
    // Setup never blocks on the host; the bounded connect runs on the task.
    assert!(started.elapsed() < Duration::from_millis(10));

    sleep_ms(1500).await;
    assert_eq!(
        manager.device_state("inv").await.unwrap(),
        DeviceState::Degraded
    );

    // After the first failed cycle the register is unavailable, not absent.
    sleep_ms(2000).await;
    let value = manager.get_value("inv", "soc").await.unwrap();
    assert!(!value.available);
    assert!(value.value.is_unknown());
}

#[tokio::test(start_paused = true)]
async fn polled_values_reach_the_cache() {
    let manager = AcquisitionManager::new();
    let sim = SimulatorTransport::new();
    sim.set_registers(1, RegisterType::Holding, 13022, &[550]);
    sim.set_registers(1, RegisterType::Holding, 13000, &[2]);

    let template = vec![
        RegisterSpec::new("soc", 13022)
            .with_transform(0.1, 0.0, Some(1))
            .with_interval(1),
        RegisterSpec::new("device_state", 13000)
            .with_symbolic(SymbolicConfig::Map {
                entries: vec![
                    MapEntry { raw: 0, label: "Stop".into() },
                    MapEntry { raw: 2, label: "Run".into() },
                ],
            })
            .with_interval(1),
    ];
    manager
        .setup_device(inverter_context(), template, settings(), Box::new(sim.clone()))
        .await
        .unwrap();

    sleep_ms(500).await;
    let soc = manager.get_value("inv", "soc").await.unwrap();
    assert!(soc.available);
    assert_eq!(soc.value, Value::Number(55.0));

    let state = manager.get_value("inv", "device_state").await.unwrap();
    assert_eq!(state.value, Value::Text("Run".into()));

    assert_eq!(
        manager.device_state("inv").await.unwrap(),
        DeviceState::Connected
    );

    // 13000 and 13022 are further apart than the gap threshold: two reads.
    let plan = manager.get_group_plan("inv").await.unwrap();
    assert_eq!(plan.len(), 2);

    let perf = manager.get_performance(Some("inv")).await;
    assert!(perf.total_operations >= 2);
    assert!((perf.success_rate - 100.0).abs() < f64::EPSILON);
}

#[tokio::test(start_paused = true)]
async fn group_failure_is_isolated_and_recovers() {
    let manager = AcquisitionManager::new();
    let sim = SimulatorTransport::new();
    sim.set_registers(1, RegisterType::Holding, 100, &[11]);
    sim.set_registers(1, RegisterType::Holding, 200, &[22]);
    sim.fail_range(1, 100, 10);

    let template = vec![
        RegisterSpec::new("faulty", 100).with_interval(1),
        RegisterSpec::new("healthy", 200).with_interval(1),
    ];
    manager
        .setup_device(inverter_context(), template, settings(), Box::new(sim.clone()))
        .await
        .unwrap();

    sleep_ms(500).await;
    // One group failing does not touch its sibling in the same cycle.
    assert!(!manager.get_value("inv", "faulty").await.unwrap().available);
    let healthy = manager.get_value("inv", "healthy").await.unwrap();
    assert!(healthy.available);
    assert_eq!(healthy.value, Value::Number(22.0));

    // Recovery happens at the next naturally scheduled tick.
    sim.clear_failures();
    sleep_ms(1500).await;
    let recovered = manager.get_value("inv", "faulty").await.unwrap();
    assert!(recovered.available);
    assert_eq!(recovered.value, Value::Number(11.0));
}

#[tokio::test(start_paused = true)]
async fn write_command_executes_immediately_with_inverse_transform() {
    let manager = AcquisitionManager::new();
    let sim = SimulatorTransport::new();

    let template = vec![
        RegisterSpec::new("export_limit", 5622)
            .with_access(Access::ReadWrite)
            .with_transform(10.0, 0.0, None)
            .with_interval(3600),
    ];
    manager
        .setup_device(inverter_context(), template, settings(), Box::new(sim.clone()))
        .await
        .unwrap();
    sleep_ms(200).await;

    let writes_before = sim.write_count();
    manager
        .command("inv", "export_limit", Value::Number(500.0))
        .await
        .unwrap();
    // Display value 500 with scale 10 lands as raw 50, right away.
    assert_eq!(sim.write_count(), writes_before + 1);
    assert_eq!(sim.get_register(1, RegisterType::Holding, 5622), Some(50));
}

#[tokio::test(start_paused = true)]
async fn cross_device_reference_resolves_from_snapshots() {
    let manager = AcquisitionManager::new();
    let sim = SimulatorTransport::new();
    sim.set_registers(200, RegisterType::Holding, 100, &[3000]);

    let mut charge_control = RegisterSpec::new("charge_power", 13051)
        .with_access(Access::ReadWrite)
        .with_interval(3600);
    charge_control.max_from_register = Some(BoundSource {
        register: "battery_max_power".into(),
        fallback: 5000.0,
    });
    manager
        .setup_device(
            inverter_context(),
            vec![charge_control],
            settings(),
            Box::new(sim.clone()),
        )
        .await
        .unwrap();

    // The battery is not set up yet: the fallback constant bounds commands.
    assert!(manager
        .command("inv", "charge_power", Value::Number(4000.0))
        .await
        .is_ok());

    let battery_context = DeviceContext::new(200, "bat", "sbr_battery");
    let battery_template = vec![RegisterSpec::new("battery_max_power", 100).with_interval(1)];
    manager
        .setup_device(battery_context, battery_template, settings(), Box::new(sim.clone()))
        .await
        .unwrap();

    sleep_ms(500).await;
    // The battery's snapshot now tightens the bound to 3000.
    let err = manager
        .command("inv", "charge_power", Value::Number(4000.0))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("3000"));
    assert!(manager
        .command("inv", "charge_power", Value::Number(2500.0))
        .await
        .is_ok());
}

#[tokio::test(start_paused = true)]
async fn reload_and_register_removal_update_the_plan() {
    let manager = AcquisitionManager::new();
    let sim = SimulatorTransport::new();
    sim.set_registers(1, RegisterType::Holding, 100, &[1, 2]);

    let template = vec![
        RegisterSpec::new("keep", 100).with_interval(1),
        RegisterSpec::new("drop_me", 101).with_interval(1),
    ];
    manager
        .setup_device(inverter_context(), template, settings(), Box::new(sim.clone()))
        .await
        .unwrap();
    sleep_ms(300).await;
    assert_eq!(manager.get_group_plan("inv").await.unwrap()[0].count, 2);
    assert!(manager.get_value("inv", "drop_me").await.is_some());

    let removed = manager
        .remove_registers("inv", &RegisterSelector::by_unique_id("drop_me"))
        .await
        .unwrap();
    assert_eq!(removed, 1);
    assert_eq!(manager.get_group_plan("inv").await.unwrap()[0].count, 1);
    assert!(manager.get_value("inv", "drop_me").await.is_none());

    // Polling keeps running on the new generation.
    sleep_ms(1500).await;
    assert!(manager.get_value("inv", "keep").await.unwrap().available);
}

#[tokio::test(start_paused = true)]
async fn unload_stops_polling_and_clears_state() {
    let manager = AcquisitionManager::new();
    let sim = SimulatorTransport::new();
    sim.set_registers(1, RegisterType::Holding, 100, &[1]);

    manager
        .setup_device(
            inverter_context(),
            vec![RegisterSpec::new("soc", 100).with_interval(1)],
            settings(),
            Box::new(sim.clone()),
        )
        .await
        .unwrap();
    sleep_ms(300).await;
    assert!(manager.get_value("inv", "soc").await.is_some());

    manager.unload_device("inv").await.unwrap();
    assert!(manager.get_value("inv", "soc").await.is_none());
    assert!(manager.device_state("inv").await.is_err());

    let reads_after_unload = sim.read_count();
    sleep_ms(3000).await;
    assert_eq!(sim.read_count(), reads_after_unload);
}
