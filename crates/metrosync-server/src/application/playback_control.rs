//! PlaybackControlUseCase: applies companion commands to the playback engine.
//!
//! The engine itself is a black box behind [`PlaybackEngine`].  This use case
//! only maps each [`PlaybackAction`] to the matching entry point and then
//! queries the engine for the snapshot that should be broadcast.

use std::sync::Arc;

use async_trait::async_trait;
use metrosync_core::{PlaybackAction, PlaybackCommand, PlaybackState};
use thiserror::Error;
use tracing::debug;

/// Failures reported by a [`PlaybackEngine`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    /// There is nothing to play.
    #[error("the play queue is empty")]
    EmptyQueue,
    /// The engine could not service the request.
    #[error("playback engine unavailable: {0}")]
    Unavailable(String),
}

/// The phone-side player, as seen by MetroSync.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PlaybackEngine: Send + Sync {
    /// Current player snapshot.
    async fn snapshot(&self) -> Result<PlaybackState, EngineError>;

    async fn play(&self) -> Result<(), EngineError>;

    async fn pause(&self) -> Result<(), EngineError>;

    async fn next(&self) -> Result<(), EngineError>;

    async fn previous(&self) -> Result<(), EngineError>;
}

/// Dispatches commands to the engine.
pub struct PlaybackControlUseCase {
    engine: Arc<dyn PlaybackEngine>,
}

impl PlaybackControlUseCase {
    pub fn new(engine: Arc<dyn PlaybackEngine>) -> Self {
        Self { engine }
    }

    /// Applies `command` and returns the engine's snapshot afterwards.
    ///
    /// The command's `timestamp` is informational only and is not used for
    /// ordering.
    ///
    /// # Errors
    ///
    /// Returns the [`EngineError`] from the control entry point or from the
    /// follow-up snapshot query.
    pub async fn handle_command(
        &self,
        command: &PlaybackCommand,
    ) -> Result<PlaybackState, EngineError> {
        debug!(
            "applying {} from {:?} (sent at {})",
            command.action, command.device_id, command.timestamp
        );
        match command.action {
            PlaybackAction::Play => self.engine.play().await?,
            PlaybackAction::Pause => self.engine.pause().await?,
            PlaybackAction::Next => self.engine.next().await?,
            PlaybackAction::Previous => self.engine.previous().await?,
        }
        self.engine.snapshot().await
    }

    /// Current snapshot, used for a peer's first frame.
    pub async fn snapshot(&self) -> Result<PlaybackState, EngineError> {
        self.engine.snapshot().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrosync_core::SongInfo;

    fn command(action: PlaybackAction) -> PlaybackCommand {
        PlaybackCommand {
            device_id: "watch1".to_string(),
            action,
            timestamp: 1_700_000_000_000,
        }
    }

    fn playing(title: &str) -> PlaybackState {
        PlaybackState {
            is_playing: true,
            current_song: Some(SongInfo {
                id: "1".to_string(),
                title: title.to_string(),
                artist: "Artist".to_string(),
            }),
        }
    }

    #[tokio::test]
    async fn test_play_calls_engine_play_then_returns_snapshot() {
        // Arrange
        let mut engine = MockPlaybackEngine::new();
        engine.expect_play().times(1).returning(|| Ok(()));
        engine.expect_pause().never();
        engine
            .expect_snapshot()
            .times(1)
            .returning(|| Ok(playing("Song")));
        let uc = PlaybackControlUseCase::new(Arc::new(engine));

        // Act
        let state = uc.handle_command(&command(PlaybackAction::Play)).await;

        // Assert
        assert_eq!(state, Ok(playing("Song")));
    }

    #[tokio::test]
    async fn test_each_action_maps_to_its_entry_point() {
        for action in PlaybackAction::ALL {
            let mut engine = MockPlaybackEngine::new();
            let expect = |a: PlaybackAction| -> usize { usize::from(a == action) };
            engine.expect_play().times(expect(PlaybackAction::Play)).returning(|| Ok(()));
            engine.expect_pause().times(expect(PlaybackAction::Pause)).returning(|| Ok(()));
            engine.expect_next().times(expect(PlaybackAction::Next)).returning(|| Ok(()));
            engine
                .expect_previous()
                .times(expect(PlaybackAction::Previous))
                .returning(|| Ok(()));
            engine
                .expect_snapshot()
                .returning(|| Ok(PlaybackState::default()));
            let uc = PlaybackControlUseCase::new(Arc::new(engine));

            assert!(uc.handle_command(&command(action)).await.is_ok(), "{action}");
        }
    }

    #[tokio::test]
    async fn test_engine_failure_skips_snapshot() {
        let mut engine = MockPlaybackEngine::new();
        engine
            .expect_next()
            .returning(|| Err(EngineError::EmptyQueue));
        engine.expect_snapshot().never();
        let uc = PlaybackControlUseCase::new(Arc::new(engine));

        let result = uc.handle_command(&command(PlaybackAction::Next)).await;

        assert_eq!(result, Err(EngineError::EmptyQueue));
    }

    #[tokio::test]
    async fn test_snapshot_passes_through() {
        let mut engine = MockPlaybackEngine::new();
        engine
            .expect_snapshot()
            .returning(|| Err(EngineError::Unavailable("audio focus lost".to_string())));
        let uc = PlaybackControlUseCase::new(Arc::new(engine));

        assert!(matches!(uc.snapshot().await, Err(EngineError::Unavailable(_))));
    }
}
