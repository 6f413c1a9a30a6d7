pub mod error;
pub mod media;

pub use error::{Error, Result};
pub use media::{
    bandwidth::{BandwidthAllocator, CapacityEstimator, FixedEstimate},
    source::{SourcePacket, Transport, UnitSource},
    stream::Stream,
    track::{Track, TrackOptions},
    tracks::Tracks,
    types::{
        AllocatorConfig, Codec, Pacing, Priority, StreamConfig, TrackConfig, TracksConfig,
    },
};
pub use sample_bus::MediaUnit;
