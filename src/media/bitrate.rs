//! Single-slot capacity mailbox: the sender never waits and the receiver
//! only ever sees the most recent share.

use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

pub fn mailbox() -> (BitrateSender, BitrateReceiver) {
    let (tx, rx) = watch::channel(0);
    (BitrateSender(tx), BitrateReceiver(rx))
}

#[derive(Debug)]
pub struct BitrateSender(watch::Sender<i64>);

impl BitrateSender {
    /// Overwrites any value the receiver has not picked up yet.
    pub fn deliver(&self, bps: i64) {
        self.0.send_replace(bps);
    }

    pub fn last(&self) -> i64 {
        *self.0.borrow()
    }
}

#[derive(Clone, Debug)]
pub struct BitrateReceiver(watch::Receiver<i64>);

impl BitrateReceiver {
    /// Wait for a delivery newer than the last one seen. `None` once the
    /// sender is gone.
    pub async fn changed(&mut self) -> Option<i64> {
        self.0.changed().await.ok()?;
        Some(*self.0.borrow_and_update())
    }

    pub fn latest(&self) -> i64 {
        *self.0.borrow()
    }

    /// Only deliveries made after this call show up in the stream.
    pub fn into_stream(self) -> WatchStream<i64> {
        WatchStream::from_changes(self.0)
    }
}
