use std::{
    fmt::{Display, Formatter},
    time::{Duration, SystemTime},
};

use bytes::{Bytes, BytesMut};

/// One RTP header extension to attach when the unit is packetized.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HeaderExtension {
    pub id: u8,
    pub payload: Bytes,
}

/// A transport-ready media payload with its timing metadata.
///
/// Units are recycled through a [`crate::Pool`], so a unit obtained from
/// the pool may still hold the values of its previous use. Producers must
/// overwrite every field before pushing it.
#[derive(Clone, Debug)]
pub struct MediaUnit {
    pub data: BytesMut,
    pub timestamp: SystemTime,
    pub duration: Duration,
    // source pts, truncated
    pub packet_timestamp: u32,
    // units dropped by the producer since the previous delivered one
    pub prev_dropped_packets: u16,
    pub header_extensions: Vec<HeaderExtension>,
    pub metadata: Option<Bytes>,
}

impl MediaUnit {
    /// Replace the payload, keeping the allocation when it is large enough.
    pub fn fill(&mut self, payload: &[u8]) {
        self.data.clear();
        self.data.extend_from_slice(payload);
    }

    pub fn payload(&self) -> &[u8] {
        &self.data
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }
}

impl Default for MediaUnit {
    fn default() -> Self {
        Self {
            data: BytesMut::new(),
            timestamp: SystemTime::UNIX_EPOCH,
            duration: Duration::ZERO,
            packet_timestamp: 0,
            prev_dropped_packets: 0,
            header_extensions: Vec::new(),
            metadata: None,
        }
    }
}

impl Display for MediaUnit {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(
            f,
            "MediaUnit {{ data: {}, duration: {:?}, pts: {} }}",
            self.data.len(),
            self.duration,
            self.packet_timestamp
        )
    }
}
