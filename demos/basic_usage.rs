// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Basic registry-sync usage example.
//!
//! Demonstrates:
//! 1. Two remote masters and one local master, all in memory
//! 2. Discovery notifications driving the supervisor
//! 3. A filter document excluding noise
//! 4. A burst of notifications collapsing into one pass
//! 5. Inspecting what is mirrored
//! 6. Displaying metrics
//! 7. Clean shutdown retracting every mirrored registration
//!
//! # Run
//!
//! ```bash
//! RUST_LOG=registry_sync=debug cargo run --example basic_usage
//! ```

use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
use registry_sync::{InMemoryRegistry, RegistrySnapshot, RemoteMasterDescriptor, SyncConfig, SyncSupervisor};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const LOCAL: &str = "http://localhost:11311/";

fn robot(host: &str, extra_topic: Option<&str>) -> RegistrySnapshot {
    let master = format!("http://{}:11311/", host);
    let mut s = RegistrySnapshot::new(master.clone(), None);
    s.add_publisher("/scan", "/lidar");
    s.set_topic_type("/scan", "sensor_msgs/LaserScan");
    s.add_subscriber("/cmd_vel", "/base");
    s.set_topic_type("/cmd_vel", "geometry_msgs/Twist");
    s.add_publisher("/rosout", "/lidar");
    s.set_topic_type("/rosout", "rosgraph_msgs/Log");
    s.add_service_provider("/base/set_parameters", "/base");
    s.set_service(
        "/base/set_parameters",
        Some(&format!("rosrpc://{}:45000", host)),
        &master,
        Some("dynamic_reconfigure/Reconfigure"),
    );
    if let Some(topic) = extra_topic {
        s.add_publisher(topic, "/lidar");
        s.set_topic_type(topic, "std_msgs/String");
    }
    s.set_node("/lidar", Some(&format!("http://{}:40001/", host)), &master, Some(101));
    s.set_node("/base", Some(&format!("http://{}:40002/", host)), &master, Some(102));
    s
}

fn descriptor(host: &str, timestamp: f64) -> RemoteMasterDescriptor {
    RemoteMasterDescriptor::new(
        host,
        format!("http://{}:11311/", host),
        "/master_discovery",
        format!("http://{}:11611/", host),
        timestamp,
    )
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder.install().expect("failed to install metrics recorder");

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("registry_sync=info")))
        .with_target(false)
        .compact()
        .init();

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║           registry-sync: Basic Usage Example                  ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    // ─────────────────────────────────────────────────────────────────────────
    // 1. Masters and filter
    // ─────────────────────────────────────────────────────────────────────────
    println!("📦 Setting up in-memory masters...");
    let registry = Arc::new(InMemoryRegistry::new(LOCAL));
    registry.set_remote("http://alpha:11611/", robot("alpha", None));
    registry.set_remote("http://beta:11611/", robot("beta", None));

    let dir = tempfile::tempdir()?;
    let interface = dir.path().join("interface.yaml");
    std::fs::write(&interface, "ignore_topics: [/rosout, /rosout_agg, /tf_static]\nignore_services: ['*/set_parameters']\n")?;
    println!("   └─ Filter: {}", interface.display());

    let config = SyncConfig {
        local_master_uri: LOCAL.into(),
        interface_url: Some(interface.display().to_string()),
        debounce_quiet_ms: 300,
        debounce_max_wait_ms: 1500,
        debounce_jitter_ms: 200,
        ..Default::default()
    };
    let supervisor = SyncSupervisor::new(config, registry.clone());

    // ─────────────────────────────────────────────────────────────────────────
    // 2. Discovery reports two masters
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🚀 Discovery reports alpha and beta...");
    supervisor.on_descriptor_update(descriptor("alpha", 1.0)).await?;
    supervisor.on_descriptor_update(descriptor("beta", 1.0)).await?;
    tokio::time::sleep(Duration::from_millis(500)).await;
    for name in supervisor.session_names() {
        println!("   └─ {}: {:?}", name, supervisor.session_state(&name));
    }
    println!("   ✅ Local registry now holds {} mirrored registrations", registry.registered().len());

    // ─────────────────────────────────────────────────────────────────────────
    // 3. A burst of changes on alpha
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📝 alpha changes ten times in a row...");
    let fetches_before = registry.fetch_times().len();
    for i in 0..10 {
        let topic = format!("/status_{}", i);
        registry.set_remote("http://alpha:11611/", robot("alpha", Some(&topic)));
        supervisor.on_descriptor_update(descriptor("alpha", 2.0 + f64::from(i))).await?;
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    tokio::time::sleep(Duration::from_secs(2)).await;
    println!(
        "   ⚡ {} notifications → {} fetch(es)",
        10,
        registry.fetch_times().len() - fetches_before
    );

    // ─────────────────────────────────────────────────────────────────────────
    // 4. What is mirrored
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📖 Mirrored state:");
    println!("{}", serde_json::to_string_pretty(&supervisor.describe_all())?);

    // ─────────────────────────────────────────────────────────────────────────
    // 5. Metrics
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📈 Raw Metrics:");
    dump_metrics(&snapshotter);

    // ─────────────────────────────────────────────────────────────────────────
    // 6. beta disappears, then shutdown
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🛑 beta goes away...");
    supervisor.on_descriptor_lost("beta").await;
    println!("   └─ Remaining sessions: {:?}", supervisor.session_names());

    println!("\n🛑 Shutting down...");
    supervisor.shutdown().await;
    println!("   ✅ Local registry holds {} registrations", registry.registered().len());

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║                    Example complete!                          ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    Ok(())
}

/// Dump all captured metrics, grouped by kind
fn dump_metrics(snapshotter: &Snapshotter) {
    let mut counters = Vec::new();
    let mut gauges = Vec::new();
    let mut histograms = Vec::new();

    for (composite_key, _, _, value) in snapshotter.snapshot().into_vec() {
        let (_, key) = composite_key.into_parts();
        let labels: Vec<_> = key.labels().map(|l| format!("{}={}", l.key(), l.value())).collect();
        let label_str = if labels.is_empty() { String::new() } else { format!("{{{}}}", labels.join(",")) };
        let name = format!("{}{}", key.name(), label_str);

        match value {
            DebugValue::Counter(v) => counters.push((name, v)),
            DebugValue::Gauge(v) => gauges.push((name, v.into_inner())),
            DebugValue::Histogram(samples) => {
                let count = samples.len();
                let sum: f64 = samples.iter().map(|v| v.into_inner()).sum();
                let avg = if count > 0 { sum / count as f64 } else { 0.0 };
                histograms.push((name, count, avg));
            }
        }
    }

    counters.sort();
    gauges.sort_by(|a, b| a.0.cmp(&b.0));
    histograms.sort_by(|a, b| a.0.cmp(&b.0));

    if !counters.is_empty() {
        println!("   ┌─ Counters (cumulative)");
        for (name, value) in &counters {
            println!("   │  └─ {} = {}", name, value);
        }
    }
    if !gauges.is_empty() {
        println!("   ├─ Gauges (current value)");
        for (name, value) in &gauges {
            println!("   │  └─ {} = {:.2}", name, value);
        }
    }
    if !histograms.is_empty() {
        println!("   └─ Histograms");
        for (name, count, avg) in &histograms {
            println!("      └─ {} count={} avg={:.4}", name, count, avg);
        }
    }
}
