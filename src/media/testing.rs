//! In-memory collaborators for the unit tests.

use std::{
    collections::VecDeque,
    sync::{
        Mutex,
        atomic::{AtomicI64, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use sample_bus::MediaUnit;

use crate::media::{
    feedback::Feedback,
    source::{SourcePacket, Transport, UnitSource},
    types::Codec,
};

/// Yields queued packets, then nothing.
#[derive(Default)]
pub struct VecSource {
    packets: Mutex<VecDeque<SourcePacket>>,
    fps: Option<f64>,
    pub started: AtomicUsize,
    pub returned: AtomicUsize,
    pub bitrate: AtomicI64,
}

impl VecSource {
    pub fn new(packets: impl IntoIterator<Item = SourcePacket>) -> Self {
        Self {
            packets: Mutex::new(packets.into_iter().collect()),
            ..Default::default()
        }
    }

    /// Packets whose payload is their sequence number.
    pub fn numbered(count: u32) -> Self {
        Self::new((0..count).map(|i| SourcePacket::new(i.to_be_bytes().to_vec()).with_pts(i as i64)))
    }

    pub fn with_fps(mut self, fps: f64) -> Self {
        self.fps = Some(fps);
        self
    }

    pub fn remaining(&self) -> usize {
        self.packets.lock().unwrap().len()
    }
}

#[async_trait]
impl UnitSource for VecSource {
    fn start(&self) {
        self.started.fetch_add(1, Ordering::SeqCst);
    }

    async fn get_unit(&self, timeout: Duration) -> anyhow::Result<Option<SourcePacket>> {
        let next = self.packets.lock().unwrap().pop_front();
        if next.is_none() {
            tokio::time::sleep(timeout).await;
        }
        Ok(next)
    }

    fn put_back(&self, _packet: SourcePacket) {
        self.returned.fetch_add(1, Ordering::SeqCst);
    }

    fn frame_rate(&self) -> Option<f64> {
        self.fps
    }

    fn set_target_bitrate(&self, bps: i64) {
        self.bitrate.store(bps, Ordering::SeqCst);
    }
}

/// Poll `check` until it holds, failing the test after two seconds.
pub async fn wait_until(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

pub fn sequence_of(unit: &MediaUnit) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&unit.payload()[..4]);
    u32::from_be_bytes(raw)
}

/// Records every forwarded unit. Optionally rejects every n-th forward.
#[derive(Default)]
pub struct RecordingTransport {
    pub forwarded: Mutex<Vec<MediaUnit>>,
    pub attempts: AtomicUsize,
    pub bitrate: AtomicI64,
    pub bound: Mutex<Vec<(String, Codec)>>,
    fail_every: Option<usize>,
    feedback: Mutex<VecDeque<Vec<Feedback>>>,
    forward_delay: Option<Duration>,
}

impl RecordingTransport {
    pub fn failing_every(n: usize) -> Self {
        Self {
            fail_every: Some(n),
            ..Default::default()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            forward_delay: Some(delay),
            ..Default::default()
        }
    }

    pub fn with_feedback(batches: impl IntoIterator<Item = Vec<Feedback>>) -> Self {
        Self {
            feedback: Mutex::new(batches.into_iter().collect()),
            ..Default::default()
        }
    }

    pub fn sequences(&self) -> Vec<u32> {
        self.forwarded.lock().unwrap().iter().map(sequence_of).collect()
    }

    pub fn pending_feedback(&self) -> usize {
        self.feedback.lock().unwrap().len()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    fn bind(&self, key: &str, codec: &Codec) -> anyhow::Result<()> {
        self.bound
            .lock()
            .unwrap()
            .push((key.to_string(), codec.clone()));
        Ok(())
    }

    async fn forward(&self, unit: &MediaUnit) -> anyhow::Result<()> {
        if let Some(delay) = self.forward_delay {
            tokio::time::sleep(delay).await;
        }
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(n) = self.fail_every {
            if attempt % n == 0 {
                anyhow::bail!("rejected attempt {}", attempt);
            }
        }
        self.forwarded.lock().unwrap().push(unit.clone());
        Ok(())
    }

    fn set_target_bitrate(&self, bps: i64) {
        self.bitrate.store(bps, Ordering::SeqCst);
    }

    async fn next_feedback(&self) -> anyhow::Result<Option<Vec<Feedback>>> {
        Ok(self.feedback.lock().unwrap().pop_front())
    }
}

/// Binding always fails.
pub struct RefusingTransport;

#[async_trait]
impl Transport for RefusingTransport {
    fn bind(&self, key: &str, _codec: &Codec) -> anyhow::Result<()> {
        anyhow::bail!("no sender for {}", key)
    }

    async fn forward(&self, _unit: &MediaUnit) -> anyhow::Result<()> {
        Ok(())
    }
}
