use chrono::{DateTime, Utc};

use crate::twitch::StreamSnapshot;

/// One timestamped viewer-count sample, immutable once recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewerDataPoint {
    pub timestamp: DateTime<Utc>,
    pub count: u64,
}

/// Live-tracking record for one uninterrupted on-air period. Exists iff the
/// channel is live and the start notification has been delivered; dropped
/// when the stream ends.
///
/// The viewer history is append-only and non-empty from creation on, and the
/// message id never changes once assigned.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamSession {
    message_id: i64,
    started_at: DateTime<Utc>,
    game: String,
    title: String,
    tags: Vec<String>,
    broadcaster_id: String,
    viewer_history: Vec<ViewerDataPoint>,
    update_counter: u32,
}

impl StreamSession {
    /// Seeds the history with a single data point at the triggering
    /// snapshot's count and caches the snapshot's game/title/tags.
    pub fn new(
        message_id: i64,
        broadcaster_id: String,
        info: &StreamSnapshot,
        now: DateTime<Utc>,
    ) -> StreamSession {
        StreamSession {
            message_id,
            started_at: now,
            game: info.game.clone(),
            title: info.title.clone(),
            tags: info.tags.clone(),
            broadcaster_id,
            viewer_history: vec![ViewerDataPoint {
                timestamp: now,
                count: info.viewers,
            }],
            update_counter: 0,
        }
    }

    pub fn message_id(&self) -> i64 {
        self.message_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn broadcaster_id(&self) -> &str {
        &self.broadcaster_id
    }

    pub fn game(&self) -> &str {
        &self.game
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn history(&self) -> &[ViewerDataPoint] {
        &self.viewer_history
    }

    pub fn update_counter(&self) -> u32 {
        self.update_counter
    }

    /// Appends a data point and counts the poll towards the next refresh.
    pub fn record(&mut self, count: u64, now: DateTime<Utc>) {
        self.viewer_history.push(ViewerDataPoint {
            timestamp: now,
            count,
        });
        self.update_counter += 1;
    }

    pub fn refresh_due(&self, checks_per_update: u32) -> bool {
        self.update_counter >= checks_per_update
    }

    /// A change away from an empty cached game is not a game change: the
    /// first refresh fills the cache instead.
    pub fn game_changed(&self, current_game: &str) -> bool {
        current_game != self.game && !self.game.is_empty()
    }

    /// Resets the refresh counter and re-caches the snapshot fields used to
    /// detect the next game change and to compose the end message.
    pub fn mark_refreshed(&mut self, info: &StreamSnapshot) {
        self.update_counter = 0;
        self.game = info.game.clone();
        self.title = info.title.clone();
        self.tags = info.tags.clone();
    }
}
