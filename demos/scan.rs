use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ble_activity::{
    Advertisement, AdvertisementData, CancellationToken, DeviceId, GrantAll, NativeActivity, ScanOptions, Scanner,
    ScannerConfig,
};
use futures_lite::StreamExt;
use tracing::{info, metadata::LevelFilter};

/// Stands in for a platform scanner; advertisements are injected by `main`.
struct SimulatedRadio;

#[async_trait]
impl NativeActivity<ScanOptions> for SimulatedRadio {
    async fn start(&self, options: &ScanOptions, _timeout: Duration, _cancel: CancellationToken) -> ble_activity::Result<()> {
        info!(mode = ?options.mode, "radio scanning");
        Ok(())
    }

    async fn stop(&self, _timeout: Duration, _cancel: CancellationToken) -> ble_activity::Result<()> {
        info!("radio idle");
        Ok(())
    }

    async fn refresh_running_state(&self) -> ble_activity::Result<bool> {
        Ok(true)
    }
}

fn advertisement(id: &str, name: Option<&str>, rssi: i16) -> Advertisement {
    Advertisement {
        device: DeviceId::new(id),
        data: AdvertisementData {
            local_name: name.map(str::to_owned),
            ..Default::default()
        },
        rssi,
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let scanner = Scanner::new(Arc::new(SimulatedRadio), Arc::new(GrantAll), ScannerConfig::default())?;

    let mut changes = scanner.device_events();
    tokio::spawn(async move {
        while let Some(change) = changes.next().await {
            for device in &change.0.added {
                info!(
                    "+ {} {} ({:.0}%)",
                    device.id(),
                    device.name().unwrap_or("(unknown)"),
                    device.signal_strength() * 100.0
                );
            }
            for device in &change.0.removed {
                info!("- {}", device.id());
            }
        }
    });

    info!("starting scan");
    scanner.activity().start_default(&ScanOptions::default()).await?;
    info!("scan started");

    for round in 0..5i16 {
        scanner.on_advertisements(vec![
            advertisement("C4:7C:8D:6A:00:01", Some("thermometer"), -70 + round * 3),
            advertisement("C4:7C:8D:6A:00:02", None, -85),
            advertisement("C4:7C:8D:6A:00:03", Some("lamp"), -55 - round * 4),
        ]);
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    info!("showing unnamed devices");
    scanner.set_include_unnamed(true);
    tokio::time::sleep(Duration::from_millis(100)).await;

    for device in scanner.devices().iter() {
        info!(
            "{} smoothed {:.1} dBm, strength {:.2}",
            device.id(),
            device.smoothed_rssi(),
            device.signal_strength()
        );
    }

    scanner.activity().shutdown().await;
    Ok(())
}
