//! Time Base: the single playback clock every stream derives its frame from.

use std::{sync::Arc, time::Duration};

use tokio::time::Instant;

use crate::codec::MediaElement;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockState {
    Paused,
    Playing,
}

enum Source {
    /// The audio element owns the position; nothing is duplicated here.
    Media(Arc<dyn MediaElement>),
    Wall {
        start: Instant,
        paused_at: Option<Instant>,
        total_paused: Duration,
    },
}

pub struct TimeBase {
    source: Source,
}

impl TimeBase {
    pub fn media(element: Arc<dyn MediaElement>) -> Self {
        Self {
            source: Source::Media(element),
        }
    }

    /// Free-running clock. Starts paused at position zero.
    pub fn wall(now: Instant) -> Self {
        Self {
            source: Source::Wall {
                start: now,
                paused_at: Some(now),
                total_paused: Duration::ZERO,
            },
        }
    }

    pub fn is_audio_backed(&self) -> bool {
        matches!(self.source, Source::Media(_))
    }

    pub fn state(&self) -> ClockState {
        let paused = match &self.source {
            Source::Media(element) => element.paused(),
            Source::Wall { paused_at, .. } => paused_at.is_some(),
        };
        if paused {
            ClockState::Paused
        } else {
            ClockState::Playing
        }
    }

    pub fn is_paused(&self) -> bool {
        self.state() == ClockState::Paused
    }

    /// Playback position in seconds.
    pub fn current_time(&self, now: Instant) -> f64 {
        match &self.source {
            Source::Media(element) => element.current_time(),
            Source::Wall {
                start,
                paused_at,
                total_paused,
            } => {
                let until = paused_at.unwrap_or(now);
                until
                    .saturating_duration_since(*start)
                    .saturating_sub(*total_paused)
                    .as_secs_f64()
            }
        }
    }

    /// Only an audio element can report that it ran out.
    pub fn ended(&self) -> bool {
        match &self.source {
            Source::Media(element) => element.ended(),
            Source::Wall { .. } => false,
        }
    }

    pub fn play(&mut self, now: Instant) {
        match &mut self.source {
            Source::Media(element) => element.play(),
            Source::Wall {
                paused_at,
                total_paused,
                ..
            } => {
                if let Some(at) = paused_at.take() {
                    *total_paused += now.saturating_duration_since(at);
                }
            }
        }
    }

    pub fn pause(&mut self, now: Instant) {
        match &mut self.source {
            Source::Media(element) => element.pause(),
            Source::Wall { paused_at, .. } => {
                if paused_at.is_none() {
                    *paused_at = Some(now);
                }
            }
        }
    }
}

/// Frame shown at `time` for a stream running at `frame_rate`.
pub fn frame_at(time: f64, frame_rate: f64) -> u32 {
    (time * frame_rate).round().max(0.0) as u32
}
