use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use spindle_core::{ExecutorRegistry, Promise, RecurringTask, RegistrySpec, SpindleError};

/// Periodic heartbeat used to show the scheduled surface.
struct Heartbeat {
    beats: AtomicU32,
}

#[async_trait]
impl RecurringTask for Heartbeat {
    async fn run(&self) -> Result<(), SpindleError> {
        let n = self.beats.fetch_add(1, Ordering::Relaxed) + 1;
        println!("heartbeat #{n}");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), SpindleError> {
    if let Err(err) = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init()
    {
        eprintln!("failed to initialize tracing: {err}");
    }

    // (A) declare the pools this demo wants, the way an application would
    //     load them from configuration
    let spec: RegistrySpec = serde_json::from_str(
        r#"{"executors":[
            {"name":"io",     "kind":"fixed",     "threads":4},
            {"name":"serial", "kind":"single"},
            {"name":"beat",   "kind":"scheduled", "threads":2}
        ]}"#,
    )
    .map_err(|e| SpindleError::task(format!("demo spec: {e}")))?;

    let registry = ExecutorRegistry::new();
    registry.apply_spec(&spec);

    // (B) fan work out over the fixed pool and combine the results
    let io = registry.get("io")?;
    let parts: Vec<Promise<u32>> = (1..=4)
        .map(|n| {
            io.submit(async move {
                tokio::time::sleep(Duration::from_millis(20 * n as u64)).await;
                Ok(n * n)
            })
        })
        .collect::<Result<_, _>>()?;
    let sum = Promise::all_apply(parts, |squares| squares.into_iter().sum::<u32>());
    println!("sum of squares: {}", sum.get().await?);

    // (C) the single pool preserves submission order
    let serial = registry.get("serial")?;
    for step in 1..=3 {
        serial.submit_and_forget(async move {
            println!("serial step {step}");
        })?;
    }

    // (D) a periodic heartbeat on the scheduled pool
    let beat = registry.get_scheduled("beat")?;
    let handle = beat.schedule_at_fixed_rate(
        Arc::new(Heartbeat {
            beats: AtomicU32::new(0),
        }),
        Duration::from_millis(50),
        Duration::from_millis(100),
    )?;
    tokio::time::sleep(Duration::from_millis(400)).await;
    handle.cancel(false);

    // (E) report and tear down
    let report = registry.status_report();
    println!(
        "status report:\n{}",
        serde_json::to_string_pretty(&report)
            .map_err(|e| SpindleError::task(format!("report: {e}")))?
    );

    registry.shutdown_all(false)?;
    for name in registry.list_names() {
        let executor = registry.get(&name)?;
        if !executor.await_termination(Duration::from_secs(5)).await {
            tracing::warn!(executor = %name, "termination timed out");
        }
    }
    registry.close(false)?;
    Ok(())
}
