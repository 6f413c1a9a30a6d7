use std::{
    sync::{Arc, atomic::Ordering},
    time::{Duration, SystemTime},
};

use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use super::{FramePacer, Stream, StreamOptions};
use crate::{
    Error,
    media::{
        source::SourcePacket,
        state::State,
        testing::{VecSource, sequence_of, wait_until},
        types::{MAX_BUFFER_SIZE, Pacing},
    },
};

#[test]
fn test_pacer_expected_timestamps() {
    let start = SystemTime::UNIX_EPOCH + Duration::from_secs(1000);
    let frame = Duration::from_millis(40);
    let mut pacer = FramePacer::new(start, frame, Duration::from_secs(1));

    // arrival jitter does not leak into the stamps
    let arrivals = [0u64, 47, 75, 130, 158];
    let stamps: Vec<_> = arrivals
        .iter()
        .map(|ms| pacer.next_timestamp(start + Duration::from_millis(*ms)))
        .collect();
    for (i, stamp) in stamps.iter().enumerate() {
        assert_eq!(*stamp, start + frame * i as u32);
    }
}

#[test]
fn test_pacer_resyncs_after_drift() {
    let start = SystemTime::UNIX_EPOCH + Duration::from_secs(1000);
    let frame = Duration::from_millis(40);
    let mut pacer = FramePacer::new(start, frame, Duration::from_millis(500));

    assert_eq!(pacer.next_timestamp(start), start);
    // upstream stalled for two seconds
    let late = start + Duration::from_secs(2);
    assert_eq!(pacer.next_timestamp(late), late);
    assert_eq!(
        pacer.next_timestamp(late + Duration::from_millis(41)),
        late + frame
    );
}

#[test]
fn test_pacer_index_advances_per_packet_only() {
    let start = SystemTime::UNIX_EPOCH + Duration::from_secs(1000);
    let frame = Duration::from_millis(40);
    let mut pacer = FramePacer::new(start, frame, Duration::from_secs(1));

    assert_eq!(pacer.next_timestamp(start), start);
    // five empty ticks later the next packet still takes index 1
    let after_gap = start + frame * 6;
    assert_eq!(pacer.next_timestamp(after_gap), start + frame);
}

#[test]
fn test_pacer_zero_threshold_never_resyncs() {
    let start = SystemTime::UNIX_EPOCH;
    let frame = Duration::from_millis(10);
    let mut pacer = FramePacer::new(start, frame, Duration::ZERO);
    pacer.next_timestamp(start);
    assert_eq!(
        pacer.next_timestamp(start + Duration::from_secs(60)),
        start + frame
    );
}

#[tokio::test]
async fn test_packet_to_unit_overwrites_stale_fields() -> anyhow::Result<()> {
    let source = Arc::new(VecSource::default());
    let stream = Stream::new("s", StreamOptions::new(source), CancellationToken::new())?;

    let mut unit = stream.buffer().generate();
    unit.fill(&[9u8; 64]);
    unit.packet_timestamp = 77;
    unit.prev_dropped_packets = 5;
    unit.metadata = Some(Bytes::from_static(b"stale"));
    unit.header_extensions.push(sample_bus::HeaderExtension {
        id: 1,
        payload: Bytes::from_static(b"x"),
    });

    let packet = SourcePacket::new(vec![1, 2, 3])
        .with_pts(1234)
        .with_duration(Duration::from_millis(20));
    stream.packet_to_unit(&packet, &mut unit, None, 2);

    assert_eq!(unit.payload(), &[1, 2, 3]);
    assert_eq!(unit.packet_timestamp, 1234);
    assert_eq!(unit.duration, Duration::from_millis(20));
    assert_eq!(unit.prev_dropped_packets, 2);
    assert!(unit.metadata.is_none());
    assert!(unit.header_extensions.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_stream_pushes_in_order() -> anyhow::Result<()> {
    let source = Arc::new(VecSource::numbered(10));
    let stream = Arc::new(Stream::new(
        "video",
        StreamOptions::new(source.clone()).buffer_size(16),
        CancellationToken::new(),
    )?);

    assert!(stream.start());
    assert!(!stream.start());
    assert_eq!(stream.state(), State::Running);
    assert_eq!(source.started.load(Ordering::SeqCst), 1);

    for seq in 0..10 {
        let unit = stream.pop_unit().await?;
        assert_eq!(sequence_of(&unit), seq);
        assert_eq!(unit.packet_timestamp, seq);
        stream.put_back(unit);
    }
    assert_eq!(stream.stats().produced(), 10);
    assert_eq!(source.returned.load(Ordering::SeqCst), 10);
    stream.stop();
    Ok(())
}

#[tokio::test]
async fn test_invalid_packets_are_skipped() -> anyhow::Result<()> {
    let source = Arc::new(VecSource::new(vec![
        SourcePacket::new(vec![0, 0, 0, 1]),
        SourcePacket::new(Vec::new()),
        SourcePacket::new(vec![0, 0, 0, 2]),
    ]));
    let stream = Arc::new(Stream::new(
        "video",
        StreamOptions::new(source.clone()),
        CancellationToken::new(),
    )?);
    stream.start();

    assert_eq!(sequence_of(&stream.pop_unit().await?), 1);
    assert_eq!(sequence_of(&stream.pop_unit().await?), 2);
    assert_eq!(stream.stats().invalid(), 1);
    assert_eq!(source.returned.load(Ordering::SeqCst), 3);
    stream.stop();
    Ok(())
}

#[tokio::test]
async fn test_full_buffer_drops_and_keeps_running() -> anyhow::Result<()> {
    let source = Arc::new(VecSource::numbered(5));
    let stream = Arc::new(Stream::new(
        "video",
        StreamOptions::new(source.clone())
            .buffer_size(2)
            .push_timeout(Duration::from_millis(20)),
        CancellationToken::new(),
    )?);
    stream.start();

    wait_until(|| source.remaining() == 0 && stream.stats().dropped() == 3).await;
    assert_eq!(stream.stats().produced(), 2);
    assert_eq!(stream.state(), State::Running);

    // the head of the queue is what fitted first
    assert_eq!(sequence_of(&stream.pop_unit().await?), 0);
    assert_eq!(sequence_of(&stream.pop_unit().await?), 1);
    stream.stop();
    Ok(())
}

#[tokio::test]
async fn test_constant_rate_stamps_expected_time() -> anyhow::Result<()> {
    let source = Arc::new(VecSource::numbered(5));
    let stream = Arc::new(Stream::new(
        "video",
        StreamOptions::new(source).pacing(Pacing::ConstantRate { fps: 50 }),
        CancellationToken::new(),
    )?);
    assert_eq!(stream.buffer().capacity(), 150);
    stream.start();

    let mut units = Vec::new();
    for _ in 0..5 {
        units.push(stream.pop_unit().await?);
    }
    for pair in units.windows(2) {
        let step = pair[1].timestamp.duration_since(pair[0].timestamp)?;
        assert_eq!(step, Duration::from_millis(20));
        assert_eq!(pair[0].duration, Duration::from_millis(20));
    }
    stream.stop();
    Ok(())
}

#[tokio::test]
async fn test_capacity_from_source_rate() -> anyhow::Result<()> {
    let source = Arc::new(VecSource::default().with_fps(10.0));
    let stream = Stream::new("video", StreamOptions::new(source), CancellationToken::new())?;
    assert_eq!(stream.buffer().capacity(), 30);
    Ok(())
}

#[tokio::test]
async fn test_invalid_config_rejected() {
    let source = Arc::new(VecSource::default());
    let result = Stream::new(
        "video",
        StreamOptions::new(source).buffer_size(0),
        CancellationToken::new(),
    );
    assert!(matches!(result, Err(Error::InvalidConfig(_))));
}

#[tokio::test]
async fn test_cancel_stops_and_drains() -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    let source = Arc::new(VecSource::numbered(3));
    let stream = Arc::new(Stream::new(
        "video",
        StreamOptions::new(source.clone()),
        cancel.clone(),
    )?);
    stream.start();
    wait_until(|| stream.stats().produced() == 3).await;

    cancel.cancel();
    wait_until(|| stream.state() == State::Stopped).await;
    assert!(stream.buffer().is_empty());
    assert!(stream.buffer().pool().idle() >= 3);
    // stopped is terminal
    assert!(!stream.start());
    Ok(())
}

#[tokio::test]
async fn test_capacity_from_absurd_source_rate_is_capped() -> anyhow::Result<()> {
    let source = Arc::new(VecSource::default().with_fps(1e18));
    let stream = Stream::new("video", StreamOptions::new(source), CancellationToken::new())?;
    assert_eq!(stream.buffer().capacity(), MAX_BUFFER_SIZE);
    Ok(())
}

#[tokio::test]
async fn test_oversized_buffer_rejected() {
    let source = Arc::new(VecSource::default());
    let result = Stream::new(
        "video",
        StreamOptions::new(source).buffer_size(usize::MAX),
        CancellationToken::new(),
    );
    assert!(matches!(result, Err(Error::InvalidConfig(_))));
}

#[tokio::test]
async fn test_pop_unit_reports_timeout_then_cancel() -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    let stream = Stream::new(
        "video",
        StreamOptions::new(Arc::new(VecSource::default())).pop_timeout(Duration::from_millis(20)),
        cancel.clone(),
    )?;

    assert!(matches!(stream.pop_unit().await, Err(Error::Backpressure(_))));
    cancel.cancel();
    assert!(matches!(stream.pop_unit().await, Err(Error::Cancelled)));
    Ok(())
}
