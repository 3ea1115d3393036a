//! Queue-backed in-memory playback engine.
//!
//! Behaviour:
//! - Nothing is "current" until the first `play`, `next` or `previous`.
//! - `play` starts the current song (the first one initially).
//! - `next` / `previous` wrap around the queue and keep the playing flag.
//! - `pause` is always accepted.
//! - Every entry point except `pause` fails with `EmptyQueue` on an empty queue.

use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use metrosync_core::{PlaybackState, SongInfo};

use crate::application::playback_control::{EngineError, PlaybackEngine};

#[derive(Debug, Default)]
struct Player {
    queue: Vec<SongInfo>,
    index: usize,
    started: bool,
    is_playing: bool,
}

impl Player {
    fn require_queue(&self) -> Result<usize, EngineError> {
        match self.queue.len() {
            0 => Err(EngineError::EmptyQueue),
            len => Ok(len),
        }
    }

    fn snapshot(&self) -> PlaybackState {
        PlaybackState {
            is_playing: self.is_playing,
            current_song: self
                .started
                .then(|| self.queue.get(self.index).cloned())
                .flatten(),
        }
    }
}

/// A [`PlaybackEngine`] over a fixed list of songs.
#[derive(Debug, Default)]
pub struct InMemoryPlaybackEngine {
    player: Mutex<Player>,
}

impl InMemoryPlaybackEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_queue(queue: Vec<SongInfo>) -> Self {
        Self {
            player: Mutex::new(Player {
                queue,
                ..Player::default()
            }),
        }
    }

    /// Replaces the queue and stops playback.
    pub fn set_queue(&self, queue: Vec<SongInfo>) {
        *self.lock() = Player {
            queue,
            ..Player::default()
        };
    }

    /// Synchronous snapshot for callers outside an async context.
    pub fn current(&self) -> PlaybackState {
        self.lock().snapshot()
    }

    fn lock(&self) -> MutexGuard<'_, Player> {
        self.player.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A short demo queue for the server binary.
pub fn demo_queue() -> Vec<SongInfo> {
    [
        ("demo-1", "Blue in Green", "Miles Davis"),
        ("demo-2", "Naima", "John Coltrane"),
        ("demo-3", "Peace Piece", "Bill Evans"),
    ]
    .into_iter()
    .map(|(id, title, artist)| SongInfo {
        id: id.to_string(),
        title: title.to_string(),
        artist: artist.to_string(),
    })
    .collect()
}

#[async_trait]
impl PlaybackEngine for InMemoryPlaybackEngine {
    async fn snapshot(&self) -> Result<PlaybackState, EngineError> {
        Ok(self.current())
    }

    async fn play(&self) -> Result<(), EngineError> {
        let mut player = self.lock();
        player.require_queue()?;
        player.started = true;
        player.is_playing = true;
        Ok(())
    }

    async fn pause(&self) -> Result<(), EngineError> {
        self.lock().is_playing = false;
        Ok(())
    }

    async fn next(&self) -> Result<(), EngineError> {
        let mut player = self.lock();
        let len = player.require_queue()?;
        if player.started {
            player.index = (player.index + 1) % len;
        } else {
            player.started = true;
        }
        Ok(())
    }

    async fn previous(&self) -> Result<(), EngineError> {
        let mut player = self.lock();
        let len = player.require_queue()?;
        if player.started {
            player.index = (player.index + len - 1) % len;
        } else {
            player.started = true;
            player.index = len - 1;
        }
        Ok(())
    }
}
