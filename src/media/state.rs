use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle shared by streams and tracks. `Stopped` is terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    Created,
    Running,
    Stopped,
}

#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) fn new() -> Self {
        Self(AtomicU8::new(State::Created as u8))
    }

    pub(crate) fn get(&self) -> State {
        match self.0.load(Ordering::SeqCst) {
            0 => State::Created,
            1 => State::Running,
            _ => State::Stopped,
        }
    }

    /// Created -> Running. False from any other state.
    pub(crate) fn start(&self) -> bool {
        self.0
            .compare_exchange(
                State::Created as u8,
                State::Running as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    pub(crate) fn stop(&self) {
        self.0.store(State::Stopped as u8, Ordering::SeqCst);
    }
}
