//! Interfaces of the collaborators a track is wired to: the upstream
//! pipeline that yields ready units and the transport that ships them.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use sample_bus::MediaUnit;

use crate::media::{feedback::Feedback, types::Codec};

/// A compressed unit as handed over by the upstream pipeline.
#[derive(Clone, Debug, Default)]
pub struct SourcePacket {
    pub data: Bytes,
    pub pts: Option<i64>,
    pub duration: Option<Duration>,
}

impl SourcePacket {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            pts: None,
            duration: None,
        }
    }

    pub fn with_pts(mut self, pts: i64) -> Self {
        self.pts = Some(pts);
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }
}

/// Upstream pipeline (demux, decode, filter, encode) feeding one stream.
#[async_trait]
pub trait UnitSource: Send + Sync {
    /// Called once when the owning stream starts.
    fn start(&self) {}

    /// Wait at most `timeout` for the next ready packet. `Ok(None)` means
    /// nothing arrived in time.
    async fn get_unit(&self, timeout: Duration) -> anyhow::Result<Option<SourcePacket>>;

    /// Hand a consumed packet back for recycling.
    fn put_back(&self, _packet: SourcePacket) {}

    /// Nominal frame rate, when the pipeline knows it.
    fn frame_rate(&self) -> Option<f64> {
        None
    }

    /// Encode-rate control input, bits per second.
    fn set_target_bitrate(&self, _bps: i64) {}
}

/// Real-time transport a track forwards to.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Called when a track is created for `key`. Failing here fails the
    /// registration.
    fn bind(&self, _key: &str, _codec: &Codec) -> anyhow::Result<()> {
        Ok(())
    }

    async fn forward(&self, unit: &MediaUnit) -> anyhow::Result<()>;

    /// Rate input, bits per second. Independent of track priority.
    fn set_target_bitrate(&self, _bps: i64) {}

    /// Next batch of receiver feedback, used for diagnostics only.
    /// `Ok(None)` when the transport has none to offer.
    async fn next_feedback(&self) -> anyhow::Result<Option<Vec<Feedback>>> {
        Ok(None)
    }
}
