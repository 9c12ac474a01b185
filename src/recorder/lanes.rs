//! Routing lanes
//!
//! Two threads drain the bounded channels capture sources push into: one
//! for primary video (compositing happens on it), one for system audio and
//! microphone. A lane exits once every sender is dropped.

use super::router::SampleRouter;
use crate::capture::{SampleSink, StreamFault};
use crate::media::{FrameSlot, Sample};
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::mpsc;

pub struct Lanes {
    handles: Vec<JoinHandle<u64>>,
}

impl Lanes {
    /// Start both lanes and return the sink feeding them
    pub fn spawn(
        router: Arc<SampleRouter>,
        capacity: usize,
        camera_slot: Arc<FrameSlot>,
        faults: mpsc::UnboundedSender<StreamFault>,
    ) -> std::io::Result<(Self, SampleSink)> {
        let (video_tx, video_rx) = mpsc::channel(capacity.max(1));
        let (audio_tx, audio_rx) = mpsc::channel(capacity.max(1));

        let handles = vec![
            spawn_lane("video", router.clone(), video_rx)?,
            spawn_lane("audio", router, audio_rx)?,
        ];
        let sink = SampleSink::new(video_tx, audio_tx, camera_slot, faults);
        Ok((Self { handles }, sink))
    }

    /// Wait for both lanes to drain. Blocks.
    pub fn join(self) {
        for handle in self.handles {
            match handle.join() {
                Ok(routed) => tracing::debug!("Lane drained after {} samples", routed),
                Err(_) => tracing::error!("Routing lane panicked"),
            }
        }
    }
}

fn spawn_lane(
    name: &str,
    router: Arc<SampleRouter>,
    mut rx: mpsc::Receiver<Sample>,
) -> std::io::Result<JoinHandle<u64>> {
    std::thread::Builder::new()
        .name(format!("lane-{}", name))
        .spawn(move || {
            let mut routed = 0u64;
            while let Some(sample) = rx.blocking_recv() {
                router.route(sample);
                routed += 1;
            }
            routed
        })
}
