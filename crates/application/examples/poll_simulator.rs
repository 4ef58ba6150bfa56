//! Polls a simulated inverter and prints cache snapshots.
//!
//! Run with: cargo run -p application --example poll_simulator

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use application::{AcquisitionManager, DeviceSettings};
use domain::register::{Access, MapEntry, RegisterSpec, RegisterType, SymbolicConfig, Value};
use domain::DeviceContext;
use infrastructure::SimulatorTransport;

fn template() -> Vec<RegisterSpec> {
    vec![
        RegisterSpec::new("device_state", 13000)
            .with_symbolic(SymbolicConfig::Map {
                entries: vec![
                    MapEntry { raw: 0, label: "Stop".into() },
                    MapEntry { raw: 2, label: "Run".into() },
                ],
            })
            .with_interval(1),
        RegisterSpec::new("battery_soc", 13022)
            .with_transform(0.1, 0.0, Some(1))
            .with_interval(1),
        RegisterSpec::new("phase_c_voltage", 13024)
            .with_transform(0.1, 0.0, Some(1))
            .with_condition("phases > 1")
            .with_interval(1),
        RegisterSpec::new("export_limit", 13073)
            .with_access(Access::ReadWrite)
            .with_transform(10.0, 0.0, None)
            .with_interval(5),
    ]
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,application=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let sim = SimulatorTransport::new();
    sim.set_registers(1, RegisterType::Holding, 13000, &[2]);
    sim.set_registers(1, RegisterType::Holding, 13022, &[875, 2305, 2298]);

    let manager = AcquisitionManager::new();
    let context = DeviceContext::new(1, "demo_inverter", "sungrow_shx").with("phases", 3i64);
    manager
        .setup_device(context, template(), DeviceSettings::default(), Box::new(sim.clone()))
        .await?;

    for cycle in 1..=3 {
        tokio::time::sleep(std::time::Duration::from_secs(2)).await;
        println!("--- cycle {cycle} ---");
        for unique_id in ["device_state", "battery_soc", "phase_c_voltage", "export_limit"] {
            if let Some(value) = manager.get_value("demo_inverter", unique_id).await {
                println!(
                    "{unique_id:>16}: {} (available: {})",
                    value.value, value.available
                );
            }
        }
    }

    manager
        .command("demo_inverter", "export_limit", Value::Number(500.0))
        .await?;
    println!(
        "export_limit register now holds {:?} (raw, scale reversed)",
        sim.get_register(1, RegisterType::Holding, 13073)
    );

    let summary = manager.get_performance(Some("demo_inverter")).await;
    println!(
        "performance: {} ops, {:.0}% success, efficiency {:.2}",
        summary.total_operations, summary.success_rate, summary.optimization_efficiency
    );

    manager.shutdown().await;
    Ok(())
}
