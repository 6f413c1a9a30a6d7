use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicI64, AtomicU32, AtomicU64, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use mediasource::{
    Codec, FixedEstimate, MediaUnit, Pacing, Priority, SourcePacket, StreamConfig, TrackConfig,
    TrackOptions, Tracks, TracksConfig, Transport, UnitSource,
};
use tokio_util::sync::CancellationToken;

const DEMO_CAPACITY_BPS: i64 = 2_500_000;
const REPORT_EVERY: u64 = 100;

fn init_logging() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .filter_module("mediasource", log::LevelFilter::Debug)
        .init();
}

/// Fixed-size frames sized from the current target bitrate. Without a
/// pacing ticker upstream it clocks itself at `fps`.
struct SyntheticSource {
    fps: u32,
    self_clocked: bool,
    clock_rate: u32,
    sequence: AtomicU32,
    bitrate: AtomicI64,
}

impl SyntheticSource {
    fn new(fps: u32, clock_rate: u32, self_clocked: bool) -> Self {
        Self {
            fps,
            self_clocked,
            clock_rate,
            sequence: AtomicU32::new(0),
            bitrate: AtomicI64::new(256_000),
        }
    }
}

#[async_trait]
impl UnitSource for SyntheticSource {
    async fn get_unit(&self, timeout: Duration) -> anyhow::Result<Option<SourcePacket>> {
        if self.self_clocked {
            tokio::time::sleep(timeout.min(Duration::from_secs(1) / self.fps)).await;
        }
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        let bps = self.bitrate.load(Ordering::Relaxed).max(8_000);
        let size = (bps / 8 / self.fps as i64).max(1) as usize;
        let pts = seq as i64 * (self.clock_rate / self.fps) as i64;
        Ok(Some(SourcePacket::new(vec![seq as u8; size]).with_pts(pts)))
    }

    fn frame_rate(&self) -> Option<f64> {
        Some(self.fps as f64)
    }

    fn set_target_bitrate(&self, bps: i64) {
        self.bitrate.store(bps, Ordering::Relaxed);
    }
}

/// Counts what it is handed and reports periodically.
#[derive(Default)]
struct LoggingTransport {
    key: Mutex<String>,
    units: AtomicU64,
    bytes: AtomicU64,
    target: AtomicI64,
}

#[async_trait]
impl Transport for LoggingTransport {
    fn bind(&self, key: &str, codec: &Codec) -> anyhow::Result<()> {
        log::info!("bind {} as {} (pt {}) {}", key, codec, codec.payload_type(), codec.fmtp_line());
        *self.key.lock().unwrap_or_else(|e| e.into_inner()) = key.to_string();
        Ok(())
    }

    async fn forward(&self, unit: &MediaUnit) -> anyhow::Result<()> {
        let units = self.units.fetch_add(1, Ordering::Relaxed) + 1;
        let bytes = self.bytes.fetch_add(unit.len() as u64, Ordering::Relaxed) + unit.len() as u64;
        if units % REPORT_EVERY == 0 {
            let key = self.key.lock().unwrap_or_else(|e| e.into_inner()).clone();
            log::info!(
                "[{}] forwarded {} units, {} bytes, target {} bps, last: {}",
                key,
                units,
                bytes,
                self.target.load(Ordering::Relaxed),
                unit
            );
        }
        Ok(())
    }

    fn set_target_bitrate(&self, bps: i64) {
        self.target.store(bps, Ordering::Relaxed);
    }
}

fn default_config() -> TracksConfig {
    let video = TrackConfig {
        priority: Priority::Level3,
        stream: StreamConfig {
            pacing: Pacing::ConstantRate { fps: 30 },
            ..Default::default()
        },
        ..TrackConfig::new("video", Codec::h264())
    };
    let audio = TrackConfig {
        priority: Priority::Level1,
        stream: StreamConfig {
            pacing: Pacing::ConstantRate { fps: 50 },
            ..Default::default()
        },
        ..TrackConfig::new("audio", Codec::opus())
    };
    TracksConfig {
        tracks: vec![video, audio],
        ..Default::default()
    }
}

fn load_config() -> mediasource::Result<TracksConfig> {
    match std::env::args().nth(1) {
        Some(path) => {
            let raw = std::fs::read_to_string(&path).map_err(|e| {
                mediasource::Error::InvalidConfig(format!("reading {}: {}", path, e))
            })?;
            TracksConfig::from_json_str(&raw)
        }
        None => Ok(default_config()),
    }
}

async fn build(config: TracksConfig, cancel: CancellationToken) -> mediasource::Result<Tracks> {
    let tracks = Tracks::new(config.allocator.clone(), cancel)?;
    tracks
        .set_estimator(Arc::new(FixedEstimate::new(DEMO_CAPACITY_BPS)))
        .await;

    for track in config.tracks {
        let source = match track.stream.pacing {
            Pacing::ConstantRate { fps } => SyntheticSource::new(fps, track.codec.clock_rate(), false),
            Pacing::Arrival => SyntheticSource::new(30, track.codec.clock_rate(), true),
        };
        let options = TrackOptions::from_config(track)
            .source(Arc::new(source))
            .transport(Arc::new(LoggingTransport::default()));
        tracks.create_track(options).await?;
    }
    Ok(tracks)
}

#[tokio::main]
async fn main() -> ! {
    init_logging();
    let config = load_config().unwrap_or_else(|e| {
        eprintln!("Error loading config: {}", e);
        std::process::exit(1);
    });

    let cancel = CancellationToken::new();
    let tracks = build(config, cancel.clone()).await.unwrap_or_else(|e| {
        eprintln!("Error creating tracks: {}", e);
        std::process::exit(1);
    });
    tracks.start_all();
    log::info!("running {} tracks: {:?}", tracks.len(), tracks.keys());

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                break;
            },
            _ = tokio::signal::ctrl_c() => {
                cancel.cancel();
            },
        }
    }

    tracks.stop();
    // let the loops log their summaries
    tokio::time::sleep(Duration::from_millis(100)).await;
    std::process::exit(0);
}
