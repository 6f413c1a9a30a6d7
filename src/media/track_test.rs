use std::{
    sync::{Arc, atomic::Ordering},
    time::Duration,
};

use tokio_util::sync::CancellationToken;

use super::{Track, TrackOptions};
use crate::{
    Error,
    media::{
        bitrate,
        feedback::Feedback,
        state::State,
        testing::{RecordingTransport, RefusingTransport, VecSource, wait_until},
        types::{Codec, Priority},
    },
};

fn video(key: &str) -> TrackOptions {
    TrackOptions::new(key, Codec::h264()).priority(Priority::Level2)
}

#[tokio::test]
async fn test_forwards_in_order_and_recycles() -> anyhow::Result<()> {
    let source = Arc::new(VecSource::numbered(20));
    let transport = Arc::new(RecordingTransport::default());
    let track = Arc::new(Track::new(
        video("cam").source(source).transport(transport.clone()),
        CancellationToken::new(),
    )?);

    assert!(track.start());
    assert_eq!(track.state(), State::Running);
    wait_until(|| track.stats().forwarded() == 20).await;

    assert_eq!(transport.sequences(), (0..20).collect::<Vec<_>>());
    let stream = track.stream().expect("track has a stream");
    let pool = stream.buffer().pool();
    wait_until(|| pool.idle() > 0).await;
    assert!(pool.reused() + pool.allocated() >= 20);
    track.stop();
    Ok(())
}

#[tokio::test]
async fn test_forward_failure_does_not_stop_loop() -> anyhow::Result<()> {
    let source = Arc::new(VecSource::numbered(9));
    let transport = Arc::new(RecordingTransport::failing_every(3));
    let track = Arc::new(Track::new(
        video("cam").source(source).transport(transport.clone()),
        CancellationToken::new(),
    )?);
    track.start();

    wait_until(|| transport.attempts.load(Ordering::SeqCst) == 9).await;
    wait_until(|| track.stats().failed() == 3).await;
    assert_eq!(track.stats().forwarded(), 6);
    assert_eq!(transport.sequences(), vec![0, 1, 3, 4, 6, 7]);
    assert_eq!(track.state(), State::Running);
    track.stop();
    Ok(())
}

#[tokio::test]
async fn test_start_without_transport_is_noop() -> anyhow::Result<()> {
    let source = Arc::new(VecSource::numbered(3));
    let track = Arc::new(Track::new(
        video("cam").source(source.clone()),
        CancellationToken::new(),
    )?);

    assert!(!track.start());
    assert_eq!(track.state(), State::Created);
    assert_eq!(source.started.load(Ordering::SeqCst), 0);
    Ok(())
}

#[tokio::test]
async fn test_start_without_source_is_noop() -> anyhow::Result<()> {
    let transport = Arc::new(RecordingTransport::default());
    let track = Arc::new(Track::new(
        video("cam").transport(transport),
        CancellationToken::new(),
    )?);
    assert!(track.stream().is_none());
    assert!(!track.start());
    assert_eq!(track.state(), State::Created);
    Ok(())
}

#[tokio::test]
async fn test_bind_receives_key_and_codec() -> anyhow::Result<()> {
    let transport = Arc::new(RecordingTransport::default());
    let _track = Track::new(
        TrackOptions::new("mic", Codec::opus()).transport(transport.clone()),
        CancellationToken::new(),
    )?;
    let bound = transport.bound.lock().unwrap().clone();
    assert_eq!(bound, vec![("mic".to_string(), Codec::opus())]);
    Ok(())
}

#[tokio::test]
async fn test_bind_failure_fails_creation() {
    let result = Track::new(
        video("cam").transport(Arc::new(RefusingTransport)),
        CancellationToken::new(),
    );
    assert!(matches!(result, Err(Error::Bind(_))));
}

#[tokio::test]
async fn test_empty_key_rejected() {
    let result = Track::new(video("  "), CancellationToken::new());
    assert!(matches!(result, Err(Error::InvalidConfig(_))));
}

#[tokio::test]
async fn test_bitrate_reaches_source_and_transport() -> anyhow::Result<()> {
    let source = Arc::new(VecSource::default());
    let transport = Arc::new(RecordingTransport::default());
    let track = Arc::new(Track::new(
        video("cam").source(source.clone()).transport(transport.clone()),
        CancellationToken::new(),
    )?);
    let (sender, receiver) = bitrate::mailbox();
    track.attach_bitrate(receiver);
    track.start();

    sender.deliver(1_500_000);
    wait_until(|| {
        source.bitrate.load(Ordering::SeqCst) == 1_500_000
            && transport.bitrate.load(Ordering::SeqCst) == 1_500_000
    })
    .await;

    // only the latest share matters
    sender.deliver(1);
    sender.deliver(800_000);
    wait_until(|| source.bitrate.load(Ordering::SeqCst) == 800_000).await;
    track.stop();
    Ok(())
}

#[tokio::test]
async fn test_feedback_is_drained() -> anyhow::Result<()> {
    let transport = Arc::new(RecordingTransport::with_feedback([
        vec![Feedback::Remb {
            sender_ssrc: 1,
            bitrate: 2_000_000.0,
            ssrcs: vec![42],
        }],
        vec![Feedback::Other("pli".into())],
    ]));
    let track = Arc::new(Track::new(
        video("cam")
            .source(Arc::new(VecSource::default()))
            .transport(transport.clone()),
        CancellationToken::new(),
    )?);
    track.start();
    wait_until(|| transport.pending_feedback() == 0).await;
    track.stop();
    Ok(())
}

#[tokio::test]
async fn test_stop_is_terminal() -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    let transport = Arc::new(RecordingTransport::slow(Duration::from_millis(5)));
    let track = Arc::new(Track::new(
        video("cam")
            .source(Arc::new(VecSource::numbered(50)))
            .transport(transport),
        cancel.clone(),
    )?);
    track.start();
    wait_until(|| track.stats().forwarded() > 0).await;

    track.stop();
    wait_until(|| track.state() == State::Stopped).await;
    let stream = track.stream().expect("track has a stream");
    wait_until(|| stream.state() == State::Stopped).await;
    assert!(cancel.is_cancelled());
    assert!(!track.start());
    Ok(())
}
