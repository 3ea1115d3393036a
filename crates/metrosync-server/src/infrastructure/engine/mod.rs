//! Playback engine adapters.
//!
//! The real phone player is an external collaborator.  The server binary and
//! the tests drive [`in_memory::InMemoryPlaybackEngine`], a queue-backed
//! stand-in implementing the same `PlaybackEngine` trait.

pub mod in_memory;

pub use in_memory::InMemoryPlaybackEngine;
