use std::{
    future::poll_fn,
    pin::Pin,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    task::{Context, Poll},
    time::Duration,
};

use futures::Stream;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};

use crate::{
    error::{BufferError, PushError},
    pool::Pool,
};

/// Fixed-capacity FIFO between one producer and one consumer.
///
/// Both ends wait at most a caller supplied deadline; running out of time
/// surfaces as [`BufferError::Backpressure`] instead of a stall. Every wait
/// also ends as soon as the buffer's cancellation token fires. Units come
/// from and return to the backing [`Pool`] through `generate`/`put_back`.
pub struct UnitBuffer<T> {
    writer: mpsc::Sender<T>,
    inner: Mutex<mpsc::Receiver<T>>,
    pool: Arc<Pool<T>>,
    capacity: usize,
    cancel: CancellationToken,
}

impl<T: Default + Send> UnitBuffer<T> {
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize, pool: Arc<Pool<T>>, cancel: CancellationToken) -> Self {
        assert!(capacity > 0, "buffer capacity must be > 0");
        let (writer, receiver) = mpsc::channel(capacity);
        Self {
            writer,
            inner: Mutex::new(receiver),
            pool,
            capacity,
            cancel,
        }
    }

    /// Enqueue `unit`, waiting up to `timeout` for a free slot.
    ///
    /// A rejected unit is handed back inside the error; nothing is enqueued.
    pub async fn push(&self, unit: T, timeout: Duration) -> Result<(), PushError<T>> {
        let reserved = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(BufferError::Cancelled),
            reserved = tokio::time::timeout(timeout, self.writer.reserve()) => match reserved {
                Ok(Ok(permit)) => Ok(permit),
                Ok(Err(_)) => Err(BufferError::Closed),
                Err(_) => Err(BufferError::Backpressure(timeout)),
            },
        };

        match reserved {
            Ok(permit) => {
                permit.send(unit);
                Ok(())
            }
            Err(e) => Err(PushError::new(e, unit)),
        }
    }

    /// Dequeue the oldest unit, waiting up to `timeout` for one to arrive.
    pub async fn pop(&self, timeout: Duration) -> Result<T, BufferError> {
        let recv = poll_fn(|cx| self.receiver().poll_recv(cx));
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(BufferError::Cancelled),
            received = tokio::time::timeout(timeout, recv) => match received {
                Ok(Some(unit)) => Ok(unit),
                Ok(None) => Err(BufferError::Closed),
                Err(_) => Err(BufferError::Backpressure(timeout)),
            },
        }
    }

    pub fn try_pop(&self) -> Option<T> {
        self.receiver().try_recv().ok()
    }

    /// A unit for the producer to fill. May carry stale values.
    pub fn generate(&self) -> T {
        self.pool.get()
    }

    pub fn put_back(&self, unit: T) {
        self.pool.put(unit);
    }

    /// Move every queued unit back into the pool.
    pub fn drain(&self) -> usize {
        let mut drained = 0;
        while let Some(unit) = self.try_pop() {
            self.pool.put(unit);
            drained += 1;
        }
        drained
    }

    /// Units that ended up queued, yielded until the buffer is cancelled.
    pub fn stream(&self) -> UnitStream<'_, T> {
        UnitStream {
            buffer: self,
            cancelled: Box::pin(self.cancel.clone().cancelled_owned()),
        }
    }

    pub fn len(&self) -> usize {
        self.capacity - self.writer.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn pool(&self) -> &Arc<Pool<T>> {
        &self.pool
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn receiver(&self) -> MutexGuard<'_, mpsc::Receiver<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct UnitStream<'a, T> {
    buffer: &'a UnitBuffer<T>,
    cancelled: Pin<Box<WaitForCancellationFutureOwned>>,
}

impl<T: Default + Send> Stream for UnitStream<'_, T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.cancelled.as_mut().poll(cx).is_ready() {
            return Poll::Ready(None);
        }
        self.buffer.receiver().poll_recv(cx)
    }
}

#[cfg(test)]
#[path = "buffer_test.rs"]
mod buffer_test;
