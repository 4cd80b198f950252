//! # Acquisition Loop Module
//!
//! Turns a connected link's raw frames into decoded readings and routes
//! them to the session core. Runs as a pair of cooperating tasks: the
//! producer drives `SensorLink::stream`, the consumer decodes each frame at
//! the schema boundary and hands the result to the sink. A malformed frame
//! is dropped by the decoder and never reaches the sink, so a single bad
//! payload cannot stall the stream.
//!
//! The returned `AcquisitionHandle` owns the stop flag and both task
//! handles; every exit path from the connected state must cancel it so no
//! timer or notification stream is leaked.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::device::SensorLink;
use crate::telemetry::{decode_frame, Reading};

/// Receives each decoded reading as it arrives.
pub trait ReadingSink: Send + Sync {
    fn handle_reading(&self, reading: Reading);
}

/// Handle to a running acquisition loop.
pub struct AcquisitionHandle {
    stop: Arc<AtomicBool>,
    producer: JoinHandle<()>,
    consumer: JoinHandle<()>,
}

impl AcquisitionHandle {
    /// Signal both halves to stop without waiting for them.
    pub fn cancel(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    /// Stop the loop and wait until both tasks have exited.
    pub async fn shutdown(self) {
        self.cancel();
        let _ = self.producer.await;
        let _ = self.consumer.await;
    }
}

/// Spawn the acquisition loop for an attached link.
pub fn spawn(link: Arc<dyn SensorLink>, sink: Arc<dyn ReadingSink>) -> AcquisitionHandle {
    let stop = Arc::new(AtomicBool::new(false));
    let (frames_tx, mut frames_rx) = mpsc::channel::<Vec<u8>>(32);

    let producer = {
        let link = link.clone();
        let stop = stop.clone();
        tokio::spawn(async move {
            link.stream(frames_tx, stop).await;
            log::debug!("Acquisition producer finished");
        })
    };

    let consumer = {
        let stop = stop.clone();
        let fallback_serial = link.info().id;
        tokio::spawn(async move {
            while let Some(frame) = frames_rx.recv().await {
                if stop.load(Ordering::Relaxed) {
                    break;
                }
                if let Some(reading) = decode_frame(&frame, &fallback_serial) {
                    sink.handle_reading(reading);
                }
            }
            log::debug!("Acquisition consumer finished");
        })
    };

    AcquisitionHandle { stop, producer, consumer }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::SimulatedLink;
    use crate::error::ConnectionError;
    use crate::telemetry::DeviceInfo;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct CollectingSink {
        readings: Mutex<Vec<Reading>>,
    }

    impl ReadingSink for CollectingSink {
        fn handle_reading(&self, reading: Reading) {
            self.readings.lock().unwrap().push(reading);
        }
    }

    /// Link that replays a fixed set of frames, then idles.
    struct ReplayLink {
        frames: Vec<Vec<u8>>,
    }

    #[async_trait]
    impl SensorLink for ReplayLink {
        fn info(&self) -> DeviceInfo {
            DeviceInfo { id: "replay-device".to_string(), name: "Replay".to_string() }
        }

        async fn stream(
            &self,
            frames: mpsc::Sender<Vec<u8>>,
            stop: Arc<AtomicBool>,
        ) {
            for frame in &self.frames {
                if frames.send(frame.clone()).await.is_err() {
                    return;
                }
            }
            crate::device::wait_for_stop(&stop).await;
        }

        async fn request(&self, _payload: &[u8]) -> Result<Vec<u8>, ConnectionError> {
            Err(ConnectionError::CommandFailed("replay link has no storage".to_string()))
        }

        async fn close(&self) {}
    }

    async fn wait_for_readings(sink: &CollectingSink, want: usize) {
        for _ in 0..100 {
            if sink.readings.lock().unwrap().len() >= want {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected at least {} readings", want);
    }

    #[tokio::test]
    async fn test_simulated_link_produces_readings() {
        let link = Arc::new(SimulatedLink::new(10));
        let sink = Arc::new(CollectingSink::default());

        let handle = spawn(link, sink.clone());
        wait_for_readings(&sink, 3).await;
        handle.shutdown().await;

        let readings = sink.readings.lock().unwrap();
        assert!(readings.len() >= 3);
        assert!(readings.iter().all(|r| r.serial_number.starts_with("SURF-001-")));
    }

    #[tokio::test]
    async fn test_malformed_frames_are_dropped() {
        let link = Arc::new(ReplayLink {
            frames: vec![
                br#"{"temperature":18.0,"accel":{"x":1.0,"y":0.0,"z":0.0}}"#.to_vec(),
                b"garbage frame".to_vec(),
                br#"{"temperature":19.0,"accel":{"x":0.0,"y":2.0,"z":0.0}}"#.to_vec(),
            ],
        });
        let sink = Arc::new(CollectingSink::default());

        let handle = spawn(link, sink.clone());
        wait_for_readings(&sink, 2).await;
        handle.shutdown().await;

        let readings = sink.readings.lock().unwrap();
        // The bad frame is skipped, the stream continues
        assert_eq!(readings.len(), 2);
        assert_eq!(readings[0].temperature, 18.0);
        assert_eq!(readings[1].temperature, 19.0);
        // Missing serial falls back to the device id
        assert_eq!(readings[0].serial_number, "replay-device");
    }

    #[tokio::test]
    async fn test_cancel_stops_both_tasks() {
        let link = Arc::new(SimulatedLink::new(5));
        let sink = Arc::new(CollectingSink::default());

        let handle = spawn(link, sink);
        tokio::time::timeout(Duration::from_secs(2), handle.shutdown())
            .await
            .expect("shutdown should complete promptly");
    }
}
