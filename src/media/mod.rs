//! Media source layer: buffers encoded units between an upstream pipeline
//! and a real-time transport, and splits one capacity estimate across tracks.
//!
//! Data Flow:
//! ```text
//!  UnitSource ──► [Stream loop] ──► UnitBuffer (bounded) ──► [Track loop] ──► Transport
//!      ▲                                                          │   ▲          │
//!      └────────────── target bitrate ◄───────────────────────────┘   │          │
//!                                                                     │      feedback
//!  CapacityEstimator ──► [BandwidthAllocator loop] ── share/priority ─┘   (diagnostics)
//! ```
//!
//! Every handoff of a unit goes through the bounded buffer with a deadline;
//! capacity shares go through single-slot mailboxes where the latest wins.

pub mod bandwidth;
pub mod bitrate;
pub mod feedback;
pub mod source;
pub mod state;
pub mod stream;
pub mod track;
pub mod tracks;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use state::State;
