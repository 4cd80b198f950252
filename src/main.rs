mod acquisition;
mod config;
mod connection;
mod device;
mod error;
mod location;
mod manager;
mod remote;
mod session;
mod storage;
mod sync;
mod telemetry;

use std::sync::Arc;

use config::Config;
use location::{FixedLocation, LocationSource, NoLocation};
use manager::{SensorEvent, SensorManager};
use remote::{HttpRemoteStore, RemoteSessionStore};
use storage::{FileStore, MemoryStore, Store};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::load()?;

    let store: Arc<dyn Store> = match FileStore::open(config.data_dir()) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            log::warn!("Data directory unavailable ({}), sessions will not survive restart", e);
            Arc::new(MemoryStore::new())
        }
    };

    let remote: Option<Arc<dyn RemoteSessionStore>> = config.remote.as_ref().map(|settings| {
        log::info!("Remote session store configured for user {}", settings.user_id);
        Arc::new(HttpRemoteStore::new(settings)) as Arc<dyn RemoteSessionStore>
    });
    if remote.is_none() {
        log::info!("No identity configured, running offline-only");
    }

    let location: Arc<dyn LocationSource> = match &config.location {
        Some(spot) => Arc::new(FixedLocation::new(spot.latitude, spot.longitude)),
        None => Arc::new(NoLocation),
    };

    let mut sensor = SensorManager::new(&config, store, remote, location);

    // Narrate state changes while the session runs
    let events = sensor.events();
    std::thread::spawn(move || {
        for event in events {
            match event {
                SensorEvent::Connection(state) => {
                    log::info!(
                        "Connection: scanning={} connected={}",
                        state.is_scanning,
                        state.is_connected
                    );
                }
                SensorEvent::Reading(reading) => {
                    log::debug!(
                        "{}: {:.1}°C, |a|={:.2}",
                        reading.serial_number,
                        reading.temperature,
                        reading.accelerometer.magnitude
                    );
                }
                SensorEvent::RecordingStarted { session_id } => {
                    log::info!("Recording session {}", session_id);
                }
                SensorEvent::SessionFinalized(session) => {
                    log::info!(
                        "Session {}: {} points, {}s, avg {:.1}°C, distance {:.2}",
                        session.id,
                        session.data_points,
                        session.duration,
                        session.avg_temp,
                        session.distance
                    );
                }
                SensorEvent::HistoryLoaded { recent, pending } => {
                    log::info!("History: {} recent, {} pending", recent, pending);
                }
            }
        }
    });

    sensor.load_history().await;
    sensor.connect().await;

    if let Ok(files) = sensor.list_files().await {
        for file in &files {
            log::info!("On-board file: {} ({} bytes)", file.name, file.size);
        }
    }

    sensor.start_recording().await;
    log::info!("Recording, press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;

    sensor.stop_recording().await;
    if let Err(e) = sensor.flush_pending().await {
        log::error!("Pending sessions kept for next run: {}", e);
    }
    sensor.disconnect().await;

    Ok(())
}
