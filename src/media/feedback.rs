//! Receiver feedback as reported by the transport. Only logged: none of it
//! feeds the capacity split.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use tokio_util::sync::CancellationToken;

use crate::media::source::Transport;

/// Warn when transport-cc feedback has been silent for this long.
pub const TWCC_STALE_AFTER: Duration = Duration::from_secs(5);
/// Receive-delta spread above which jitter is reported.
pub const HIGH_JITTER: Duration = Duration::from_millis(50);

#[derive(Clone, Debug, PartialEq)]
pub enum Feedback {
    TransportCc {
        media_ssrc: u32,
        feedback_count: u8,
        status_count: u16,
        reference_time: u32,
        received: u32,
        lost: u32,
        recv_deltas: Vec<Duration>,
    },
    ReceiverReport {
        ssrc: u32,
        reports: Vec<ReceptionReport>,
    },
    SenderReport {
        ssrc: u32,
        ntp_time: u64,
        rtp_time: u32,
        packet_count: u32,
        octet_count: u32,
    },
    Remb {
        sender_ssrc: u32,
        bitrate: f32,
        ssrcs: Vec<u32>,
    },
    Other(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReceptionReport {
    pub ssrc: u32,
    // out of 256
    pub fraction_lost: u8,
    pub total_lost: u32,
    pub last_sequence_number: u32,
    // timestamp units
    pub jitter: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeltaStats {
    pub avg: Duration,
    pub min: Duration,
    pub max: Duration,
    pub jitter: Duration,
}

/// Percentage of lost packets, 0 when nothing was counted.
pub fn loss_rate(received: u32, lost: u32) -> f64 {
    let total = received as u64 + lost as u64;
    if total == 0 {
        return 0.0;
    }
    lost as f64 / total as f64 * 100.0
}

pub fn fraction_lost_percent(fraction_lost: u8) -> f64 {
    fraction_lost as f64 / 256.0 * 100.0
}

/// Spread of transport-cc receive deltas. Needs at least two samples.
pub fn delta_stats(deltas: &[Duration]) -> Option<DeltaStats> {
    if deltas.len() < 2 {
        return None;
    }
    let total: Duration = deltas.iter().sum();
    let min = deltas.iter().min().copied()?;
    let max = deltas.iter().max().copied()?;
    Some(DeltaStats {
        avg: total / deltas.len() as u32,
        min,
        max,
        jitter: max - min,
    })
}

pub fn log_feedback(key: &str, feedback: &Feedback) {
    match feedback {
        Feedback::TransportCc {
            media_ssrc,
            feedback_count,
            status_count,
            reference_time,
            received,
            lost,
            recv_deltas,
        } => {
            log::debug!(
                "[{}] twcc: ssrc {}, fb count {}, status count {}, ref time {}, {} received, {} lost ({:.1}% loss)",
                key,
                media_ssrc,
                feedback_count,
                status_count,
                reference_time,
                received,
                lost,
                loss_rate(*received, *lost)
            );
            if let Some(stats) = delta_stats(recv_deltas) {
                log::debug!(
                    "[{}] twcc timing: avg {:?}, jitter {:?} (max {:?}, min {:?})",
                    key,
                    stats.avg,
                    stats.jitter,
                    stats.max,
                    stats.min
                );
                if stats.jitter > HIGH_JITTER {
                    log::warn!("[{}] high jitter detected: {:?}", key, stats.jitter);
                }
            }
        }
        Feedback::ReceiverReport { ssrc, reports } => {
            for r in reports {
                log::debug!(
                    "[{}] receiver report from {} for {}: fraction lost {}/256 ({:.1}%), total lost {}, highest seq {}, jitter {}",
                    key,
                    ssrc,
                    r.ssrc,
                    r.fraction_lost,
                    fraction_lost_percent(r.fraction_lost),
                    r.total_lost,
                    r.last_sequence_number,
                    r.jitter
                );
            }
        }
        Feedback::SenderReport {
            ssrc,
            ntp_time,
            rtp_time,
            packet_count,
            octet_count,
        } => {
            log::debug!(
                "[{}] sender report {}: ntp {}, rtp {}, {} packets, {} octets",
                key,
                ssrc,
                ntp_time,
                rtp_time,
                packet_count,
                octet_count
            );
        }
        Feedback::Remb {
            sender_ssrc,
            bitrate,
            ssrcs,
        } => {
            log::debug!(
                "[{}] remb from {}: {:.2} Mbps for {:?}",
                key,
                sender_ssrc,
                *bitrate as f64 / 1_000_000.0,
                ssrcs
            );
        }
        Feedback::Other(kind) => log::trace!("[{}] other feedback: {}", key, kind),
    }
}

/// Drain transport feedback for one track until cancelled or the transport
/// stops offering it.
pub async fn watch(key: String, transport: Arc<dyn Transport>, cancel: CancellationToken) {
    let mut last_twcc = Instant::now();
    loop {
        let batch = tokio::select! {
            _ = cancel.cancelled() => break,
            batch = transport.next_feedback() => batch,
        };
        let batch = match batch {
            Ok(Some(batch)) => batch,
            Ok(None) => break,
            Err(e) => {
                log::warn!("[{}] feedback read error: {:#}", key, e);
                break;
            }
        };

        for feedback in &batch {
            if matches!(feedback, Feedback::TransportCc { .. }) {
                last_twcc = Instant::now();
            }
            log_feedback(&key, feedback);
        }

        if last_twcc.elapsed() > TWCC_STALE_AFTER {
            log::warn!(
                "[{}] no twcc feedback for {:?}, estimate may be stuck",
                key,
                last_twcc.elapsed()
            );
        }
    }
    log::debug!("[{}] feedback loop finished", key);
}

#[cfg(test)]
#[path = "feedback_test.rs"]
mod feedback_test;
