use std::{collections::HashSet, fmt, time::Duration};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ============================================================================
// Priority
// ============================================================================

/// Weight of a track in the capacity split. `Level0` opts the track out.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum Priority {
    #[default]
    Level0 = 0,
    Level1 = 1,
    Level2 = 2,
    Level3 = 3,
    Level4 = 4,
    Level5 = 5,
}

impl Priority {
    pub fn weight(self) -> u64 {
        self as u64
    }

    pub fn is_excluded(self) -> bool {
        self == Priority::Level0
    }
}

impl TryFrom<u8> for Priority {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Priority::Level0),
            1 => Ok(Priority::Level1),
            2 => Ok(Priority::Level2),
            3 => Ok(Priority::Level3),
            4 => Ok(Priority::Level4),
            5 => Ok(Priority::Level5),
            v => Err(Error::InvalidConfig(format!("priority out of range: {}", v))),
        }
    }
}

impl From<Priority> for u8 {
    fn from(p: Priority) -> u8 {
        p as u8
    }
}

// ============================================================================
// Codec capability
// ============================================================================

/// H264 packetization-mode fmtp parameter (RFC 6184).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum PacketizationMode {
    SingleNal,
    #[default]
    NonInterleaved,
    Interleaved,
}

impl TryFrom<u8> for PacketizationMode {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(PacketizationMode::SingleNal),
            1 => Ok(PacketizationMode::NonInterleaved),
            2 => Ok(PacketizationMode::Interleaved),
            v => Err(Error::InvalidConfig(format!(
                "packetization mode out of range: {}",
                v
            ))),
        }
    }
}

impl From<PacketizationMode> for u8 {
    fn from(m: PacketizationMode) -> u8 {
        match m {
            PacketizationMode::SingleNal => 0,
            PacketizationMode::NonInterleaved => 1,
            PacketizationMode::Interleaved => 2,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileLevel {
    // 480p
    Baseline21,
    // 720p
    Baseline31,
    // 1080p
    #[default]
    Baseline41,
    // 2K
    Baseline42,
    Main21,
    Main31,
    Main41,
    Main42,
    High21,
    High31,
    High41,
    High42,
}

impl ProfileLevel {
    /// profile-level-id as it appears in the fmtp line.
    pub fn id(self) -> &'static str {
        match self {
            ProfileLevel::Baseline21 => "420015",
            ProfileLevel::Baseline31 => "42001f",
            ProfileLevel::Baseline41 => "420029",
            ProfileLevel::Baseline42 => "42002a",
            ProfileLevel::Main21 => "4D0015",
            ProfileLevel::Main31 => "4D001f",
            ProfileLevel::Main41 => "4D0029",
            ProfileLevel::Main42 => "4D002a",
            ProfileLevel::High21 => "640015",
            ProfileLevel::High31 => "64001f",
            ProfileLevel::High41 => "640029",
            ProfileLevel::High42 => "64002a",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stereo {
    #[default]
    Mono,
    Stereo,
}

/// Codec the track advertises to the transport.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Codec {
    H264 {
        clock_rate: u32,
        #[serde(default)]
        packetization_mode: PacketizationMode,
        #[serde(default)]
        profile_level: ProfileLevel,
    },
    Vp8 {
        clock_rate: u32,
    },
    Opus {
        sample_rate: u32,
        channels: u16,
        #[serde(default)]
        stereo: Stereo,
    },
}

impl Codec {
    pub fn h264() -> Self {
        Codec::H264 {
            clock_rate: 90_000,
            packetization_mode: PacketizationMode::default(),
            profile_level: ProfileLevel::default(),
        }
    }

    pub fn vp8() -> Self {
        Codec::Vp8 { clock_rate: 90_000 }
    }

    pub fn opus() -> Self {
        Codec::Opus {
            sample_rate: 48_000,
            channels: 2,
            stereo: Stereo::Stereo,
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            Codec::H264 { .. } => "video/H264",
            Codec::Vp8 { .. } => "video/VP8",
            Codec::Opus { .. } => "audio/opus",
        }
    }

    pub fn clock_rate(&self) -> u32 {
        match self {
            Codec::H264 { clock_rate, .. } | Codec::Vp8 { clock_rate } => *clock_rate,
            Codec::Opus { sample_rate, .. } => *sample_rate,
        }
    }

    /// Zero for video.
    pub fn channels(&self) -> u16 {
        match self {
            Codec::Opus { channels, .. } => *channels,
            _ => 0,
        }
    }

    pub fn is_video(&self) -> bool {
        !matches!(self, Codec::Opus { .. })
    }

    pub fn payload_type(&self) -> u8 {
        if self.is_video() { 96 } else { 111 }
    }

    pub fn fmtp_line(&self) -> String {
        match self {
            Codec::H264 {
                packetization_mode,
                profile_level,
                ..
            } => format!(
                "level-asymmetry-allowed=1;packetization-mode={};profile-level-id={}",
                u8::from(*packetization_mode),
                profile_level.id()
            ),
            Codec::Vp8 { .. } => String::new(),
            Codec::Opus { stereo, .. } => format!(
                "minptime=10;useinbandfec=1;stereo={}",
                match stereo {
                    Stereo::Mono => 0,
                    Stereo::Stereo => 1,
                }
            ),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.clock_rate() == 0 {
            return Err(Error::InvalidConfig(format!(
                "{}: clock rate must be > 0",
                self.mime_type()
            )));
        }
        if let Codec::Opus { channels, .. } = self {
            if !(1..=2).contains(channels) {
                return Err(Error::InvalidConfig(format!(
                    "audio/opus: unsupported channel count {}",
                    channels
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.mime_type(), self.clock_rate())
    }
}

// ============================================================================
// Configuration Types
// ============================================================================

/// How a stream stamps the units it produces.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Pacing {
    /// Wall clock at the moment the unit arrives from the source.
    #[default]
    Arrival,
    /// Ticker at `fps`, stamped `start + index * frame_duration`.
    ConstantRate { fps: u32 },
}

impl Pacing {
    pub fn frame_duration(&self) -> Option<Duration> {
        match self {
            Pacing::ConstantRate { fps } if (1..=MAX_FPS).contains(fps) => {
                Some(Duration::from_secs(1) / *fps)
            }
            _ => None,
        }
    }
}

pub const DEFAULT_BUFFER_SIZE: usize = 256;
/// Upper bound for `buffer_size` and for capacities derived from a frame rate.
pub const MAX_BUFFER_SIZE: usize = 65_536;
/// Highest constant-rate pacing accepted.
pub const MAX_FPS: u32 = 1_000;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    // None = 3 seconds of frames for constant-rate sources, DEFAULT_BUFFER_SIZE otherwise
    pub buffer_size: Option<usize>,
    pub pacing: Pacing,
    pub push_timeout_ms: u64,
    pub pop_timeout_ms: u64,
    pub poll_timeout_ms: u64,
    pub resync_threshold_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            buffer_size: None,
            pacing: Pacing::Arrival,
            push_timeout_ms: 1000,
            pop_timeout_ms: 1000,
            poll_timeout_ms: 50,
            resync_threshold_ms: 1000,
        }
    }
}

impl StreamConfig {
    pub fn buffer_capacity(&self) -> usize {
        match (self.buffer_size, self.pacing) {
            (Some(size), _) => size,
            (None, Pacing::ConstantRate { fps }) if fps > 0 => {
                (fps as usize).saturating_mul(3).min(MAX_BUFFER_SIZE)
            }
            (None, _) => DEFAULT_BUFFER_SIZE,
        }
    }

    pub fn push_timeout(&self) -> Duration {
        Duration::from_millis(self.push_timeout_ms)
    }

    pub fn pop_timeout(&self) -> Duration {
        Duration::from_millis(self.pop_timeout_ms)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn resync_threshold(&self) -> Duration {
        Duration::from_millis(self.resync_threshold_ms)
    }

    pub fn validate(&self) -> Result<()> {
        match self.buffer_size {
            Some(0) => return Err(Error::InvalidConfig("buffer_size must be > 0".into())),
            Some(size) if size > MAX_BUFFER_SIZE => {
                return Err(Error::InvalidConfig(format!(
                    "buffer_size {} exceeds {}",
                    size, MAX_BUFFER_SIZE
                )));
            }
            _ => {}
        }
        if let Pacing::ConstantRate { fps } = self.pacing {
            if fps == 0 || fps > MAX_FPS {
                return Err(Error::InvalidConfig(format!(
                    "constant rate pacing needs 0 < fps <= {}, got {}",
                    MAX_FPS, fps
                )));
            }
        }
        for (name, value) in [
            ("push_timeout_ms", self.push_timeout_ms),
            ("pop_timeout_ms", self.pop_timeout_ms),
            ("poll_timeout_ms", self.poll_timeout_ms),
        ] {
            if value == 0 {
                return Err(Error::InvalidConfig(format!("{} must be > 0", name)));
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackConfig {
    pub key: String,
    pub codec: Codec,
    // Level0 unless set: the track gets no share of the capacity
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub stream: StreamConfig,
}

impl TrackConfig {
    pub fn new(key: impl Into<String>, codec: Codec) -> Self {
        Self {
            key: key.into(),
            codec,
            priority: Priority::default(),
            stream: StreamConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.key.trim().is_empty() {
            return Err(Error::InvalidConfig("track key is empty".into()));
        }
        self.codec.validate()?;
        self.stream
            .validate()
            .map_err(|e| Error::InvalidConfig(format!("track {}: {}", self.key, e)))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocatorConfig {
    pub enabled: bool,
    pub interval_ms: u64,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 100,
        }
    }
}

impl AllocatorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.enabled && self.interval_ms == 0 {
            return Err(Error::InvalidConfig("allocator interval_ms must be > 0".into()));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TracksConfig {
    pub allocator: AllocatorConfig,
    pub tracks: Vec<TrackConfig>,
}

impl TracksConfig {
    pub fn from_json_str(s: &str) -> Result<Self> {
        let config: TracksConfig = serde_json::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.allocator.validate()?;
        let mut keys = HashSet::new();
        for track in &self.tracks {
            track.validate()?;
            if !keys.insert(track.key.as_str()) {
                return Err(Error::DuplicateKey(track.key.clone()));
            }
        }
        Ok(())
    }

    pub fn track(&self, key: &str) -> Option<&TrackConfig> {
        self.tracks.iter().find(|t| t.key == key)
    }
}

#[cfg(test)]
#[path = "types_test.rs"]
mod types_test;
