//! The poll-driven core: owns the current session, classifies each poll
//! cycle into a transition, and drives notification delivery through the
//! retry executor.

use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::format;
use crate::locale::Localization;
use crate::metrics;
use crate::retry::{self, Delivery};
use crate::session::StreamSession;
use crate::telegram::DeliveryError;
use crate::twitch::{self, Clip, StreamSnapshot, TwitchError};

/// Dropping this file next to the process forces an end-of-stream cycle;
/// it is consumed (deleted) once seen.
const SIMULATE_END_FILE: &str = "simulate_end";

/// Read-side collaborator: stream status and lookups. All failures are
/// transient and skip the current poll cycle.
#[async_trait]
pub trait StreamingPlatform: Send + Sync {
    async fn stream_snapshot(&self, channel: &str) -> Result<Option<StreamSnapshot>, TwitchError>;

    async fn broadcaster_id(&self, channel: &str) -> Result<String, TwitchError>;

    async fn recent_clips(
        &self,
        broadcaster_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<Clip>, TwitchError>;
}

/// Write-side collaborator: the one notification message being kept in
/// sync. Calls are always wrapped in [`retry::deliver`].
#[async_trait]
pub trait Messenger: Send + Sync {
    /// Creates the notification, returning its handle.
    async fn post(
        &self,
        photo_url: &str,
        caption: &str,
        link_url: &str,
        link_label: &str,
    ) -> Result<i64, DeliveryError>;

    /// Replaces photo and caption in place.
    async fn edit(
        &self,
        message_id: i64,
        photo_url: &str,
        caption: &str,
        link_url: &str,
        link_label: &str,
    ) -> Result<(), DeliveryError>;

    /// Caption-only edit, the image stays as it was.
    async fn finalize(
        &self,
        message_id: i64,
        caption: &str,
        link_url: &str,
        link_label: &str,
    ) -> Result<(), DeliveryError>;
}

/// What one poll cycle does, decided solely from session and snapshot
/// presence. Timing and game-change conditions are evaluated inside the
/// `StayLive` branch against the session itself.
#[derive(Debug)]
pub enum Transition<'a> {
    GoLive(&'a StreamSnapshot),
    StayLive(&'a StreamSnapshot),
    GoOffline,
    Idle,
}

pub fn classify<'a>(
    session: Option<&StreamSession>,
    snapshot: Option<&'a StreamSnapshot>,
) -> Transition<'a> {
    match (session, snapshot) {
        (None, Some(info)) => Transition::GoLive(info),
        (Some(_), Some(info)) => Transition::StayLive(info),
        (Some(_), None) => Transition::GoOffline,
        (None, None) => Transition::Idle,
    }
}

pub struct Monitor<P, M> {
    platform: P,
    messenger: M,
    channel: String,
    locale: &'static Localization,
    checks_per_update: u32,
    check_interval: Duration,
    session: Option<StreamSession>,
    last_was_live: bool,
}

impl<P: StreamingPlatform, M: Messenger> Monitor<P, M> {
    pub fn new(
        cfg: &Config,
        locale: &'static Localization,
        platform: P,
        messenger: M,
    ) -> Monitor<P, M> {
        Monitor {
            platform,
            messenger,
            channel: cfg.twitch.channel.clone(),
            locale,
            checks_per_update: cfg.checks_per_update(),
            check_interval: Duration::from_secs(cfg.check_interval_seconds as u64),
            session: None,
            last_was_live: false,
        }
    }

    /// Ticks until the token fires. One cycle runs to completion before the
    /// next begins; the only suspension points are the inter-poll sleep,
    /// retry waits, and collaborator I/O.
    pub async fn run(&mut self, token: &CancellationToken) -> Result<()> {
        log::info!(
            "monitor started: channel={} check_interval={}s checks_per_update={}",
            self.channel,
            self.check_interval.as_secs(),
            self.checks_per_update
        );

        loop {
            if token.is_cancelled() {
                log::info!("monitor stopped");
                return Ok(());
            }

            self.tick(token).await;

            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(self.check_interval) => {}
            }
        }
    }

    /// One poll cycle. Never returns an error: transient failures end the
    /// cycle early and the next tick retries.
    async fn tick(&mut self, token: &CancellationToken) {
        let snapshot = match self.acquire_snapshot().await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                log::error!("stream status check failed: {}", err);
                return;
            }
        };

        let is_live = snapshot.is_some();
        if is_live != self.last_was_live {
            match &snapshot {
                Some(info) => {
                    log::info!("stream came online: viewers={} game={:?}", info.viewers, info.game)
                }
                None => log::info!("stream went offline"),
            }
            self.last_was_live = is_live;
        }

        match classify(self.session.as_ref(), snapshot.as_ref()) {
            Transition::GoLive(info) => self.go_live(token, info).await,
            Transition::StayLive(info) => self.stay_live(token, info).await,
            Transition::GoOffline => self.go_offline(token).await,
            Transition::Idle => {}
        }
    }

    /// The sentinel is consumed whenever present; with no session the forced
    /// offline cycle is a no-op.
    async fn acquire_snapshot(&self) -> Result<Option<StreamSnapshot>, TwitchError> {
        if consume_end_sentinel() {
            log::info!("simulate_end trigger detected");
            return Ok(None);
        }
        self.platform.stream_snapshot(&self.channel).await
    }

    async fn go_live(&mut self, token: &CancellationToken, info: &StreamSnapshot) {
        log::info!("stream started: channel={}", self.channel);

        let broadcaster_id = match self.platform.broadcaster_id(&self.channel).await {
            Ok(id) => id,
            Err(err) => {
                log::error!("failed to get broadcaster id: {}", err);
                return;
            }
        };

        let photo_url = twitch::thumbnail_url(&self.channel);
        let caption = format::start_message(info, self.locale);

        let messenger = &self.messenger;
        let (photo, text, link, label) = (
            photo_url.as_str(),
            caption.as_str(),
            info.url.as_str(),
            self.locale.button_text,
        );
        let outcome = retry::deliver(token, "send start notification", move || {
            messenger.post(photo, text, link, label)
        })
        .await;

        match outcome {
            Delivery::Completed(message_id) => {
                log::info!("start notification sent");
                self.session = Some(StreamSession::new(
                    message_id,
                    broadcaster_id,
                    info,
                    Utc::now(),
                ));
            }
            // no handle, no session: the cycle ends without a state change
            Delivery::Cancelled => {}
        }
    }

    async fn stay_live(&mut self, token: &CancellationToken, info: &StreamSnapshot) {
        let mut session = match self.session.take() {
            Some(session) => session,
            None => return,
        };
        session.record(info.viewers, Utc::now());

        let game_changed = session.game_changed(&info.game);
        if session.refresh_due(self.checks_per_update) || game_changed {
            if game_changed {
                log::info!("game changed: from={:?} to={:?}", session.game(), info.game);
            }
            log::info!(
                "updating stream info: viewers={} uptime={}",
                info.viewers,
                info.uptime
            );

            let avg_viewers = metrics::average(session.history());
            let photo_url = twitch::thumbnail_url(&self.channel);
            let clips = self
                .recent_clips_or_empty(session.broadcaster_id(), session.started_at())
                .await;
            let caption =
                format::update_message(info, avg_viewers, session.history(), &clips, self.locale);

            let messenger = &self.messenger;
            let message_id = session.message_id();
            let (photo, text, link, label) = (
                photo_url.as_str(),
                caption.as_str(),
                info.url.as_str(),
                self.locale.button_text,
            );
            let outcome = retry::deliver(token, "update stream info", move || {
                messenger.edit(message_id, photo, text, link, label)
            })
            .await;

            if let Delivery::Completed(()) = outcome {
                log::info!("stream info updated");
            }
            // the counter resets and the cache refreshes either way
            session.mark_refreshed(info);
        }

        self.session = Some(session);
    }

    async fn go_offline(&mut self, token: &CancellationToken) {
        // taken out up front: the session is discarded no matter how
        // delivery ends
        let session = match self.session.take() {
            Some(session) => session,
            None => return,
        };
        log::info!("stream ended: channel={}", self.channel);

        let duration = format::format_duration(Utc::now() - session.started_at(), self.locale);
        let avg_viewers = metrics::average(session.history());
        let peak_viewers = metrics::peak(session.history());
        log::info!(
            "stream stats: duration={} avg_viewers={} max_viewers={}",
            duration,
            avg_viewers,
            peak_viewers
        );

        let clips = self
            .recent_clips_or_empty(session.broadcaster_id(), session.started_at())
            .await;
        let caption = format::end_message(
            &self.channel,
            &duration,
            avg_viewers,
            peak_viewers,
            session.game(),
            session.title(),
            session.tags(),
            &clips,
            self.locale,
        );
        let stream_url = format!("https://twitch.tv/{}", self.channel);

        let messenger = &self.messenger;
        let message_id = session.message_id();
        let (text, link, label) = (
            caption.as_str(),
            stream_url.as_str(),
            self.locale.button_text,
        );
        let outcome = retry::deliver(token, "send end notification", move || {
            messenger.finalize(message_id, text, link, label)
        })
        .await;

        if let Delivery::Completed(()) = outcome {
            log::info!("end notification sent");
        }
    }

    /// Clip lookups are best-effort: a failure renders as "no clips".
    async fn recent_clips_or_empty(&self, broadcaster_id: &str, since: DateTime<Utc>) -> Vec<Clip> {
        match self.platform.recent_clips(broadcaster_id, since).await {
            Ok(clips) => clips,
            Err(err) => {
                log::debug!("clip lookup failed: {}", err);
                Vec::new()
            }
        }
    }
}

fn consume_end_sentinel() -> bool {
    if Path::new(SIMULATE_END_FILE).exists() {
        let _ = std::fs::remove_file(SIMULATE_END_FILE);
        return true;
    }
    false
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    fn snapshot(game: &str, viewers: u64) -> StreamSnapshot {
        StreamSnapshot {
            channel: "somechannel".to_string(),
            url: "https://twitch.tv/somechannel".to_string(),
            title: "a title".to_string(),
            game: game.to_string(),
            viewers,
            uptime: "12 m".to_string(),
            tags: vec!["rust".to_string()],
        }
    }

    #[derive(Default)]
    struct FakePlatform {
        snapshot: Mutex<Option<StreamSnapshot>>,
        fail_snapshot: Mutex<bool>,
        clips: Vec<Clip>,
    }

    impl FakePlatform {
        fn set_snapshot(&self, snapshot: Option<StreamSnapshot>) {
            *self.snapshot.lock().expect("fake platform lock") = snapshot;
        }

        fn set_failing(&self, failing: bool) {
            *self.fail_snapshot.lock().expect("fake platform lock") = failing;
        }
    }

    #[async_trait]
    impl StreamingPlatform for FakePlatform {
        async fn stream_snapshot(
            &self,
            _channel: &str,
        ) -> Result<Option<StreamSnapshot>, TwitchError> {
            if *self.fail_snapshot.lock().expect("fake platform lock") {
                return Err(TwitchError::RateLimited);
            }
            Ok(self.snapshot.lock().expect("fake platform lock").clone())
        }

        async fn broadcaster_id(&self, _channel: &str) -> Result<String, TwitchError> {
            Ok("459331509".to_string())
        }

        async fn recent_clips(
            &self,
            _broadcaster_id: &str,
            _since: DateTime<Utc>,
        ) -> Result<Vec<Clip>, TwitchError> {
            Ok(self.clips.clone())
        }
    }

    #[derive(Default)]
    struct FakeMessenger {
        posts: Mutex<Vec<String>>,
        edits: Mutex<Vec<(i64, String)>>,
        finalizes: Mutex<Vec<(i64, String)>>,
    }

    #[async_trait]
    impl Messenger for FakeMessenger {
        async fn post(
            &self,
            _photo_url: &str,
            caption: &str,
            _link_url: &str,
            _link_label: &str,
        ) -> Result<i64, DeliveryError> {
            self.posts
                .lock()
                .expect("fake messenger lock")
                .push(caption.to_string());
            Ok(4211)
        }

        async fn edit(
            &self,
            message_id: i64,
            _photo_url: &str,
            caption: &str,
            _link_url: &str,
            _link_label: &str,
        ) -> Result<(), DeliveryError> {
            self.edits
                .lock()
                .expect("fake messenger lock")
                .push((message_id, caption.to_string()));
            Ok(())
        }

        async fn finalize(
            &self,
            message_id: i64,
            caption: &str,
            _link_url: &str,
            _link_label: &str,
        ) -> Result<(), DeliveryError> {
            self.finalizes
                .lock()
                .expect("fake messenger lock")
                .push((message_id, caption.to_string()));
            Ok(())
        }
    }

    fn test_monitor(checks_per_update: u32) -> Monitor<FakePlatform, FakeMessenger> {
        Monitor {
            platform: FakePlatform::default(),
            messenger: FakeMessenger::default(),
            channel: "somechannel".to_string(),
            locale: crate::locale::Localization::for_language("en"),
            checks_per_update,
            check_interval: Duration::from_secs(60),
            session: None,
            last_was_live: false,
        }
    }

    #[test]
    fn classify_covers_the_whole_transition_table() {
        let info = snapshot("Tetris", 10);
        let session = StreamSession::new(1, "id".to_string(), &info, Utc::now());

        assert!(matches!(classify(None, Some(&info)), Transition::GoLive(_)));
        assert!(matches!(
            classify(Some(&session), Some(&info)),
            Transition::StayLive(_)
        ));
        assert!(matches!(
            classify(Some(&session), None),
            Transition::GoOffline
        ));
        assert!(matches!(classify(None, None), Transition::Idle));
    }

    #[tokio::test]
    async fn going_live_posts_and_seeds_a_fresh_session() {
        let mut monitor = test_monitor(5);
        monitor.platform.set_snapshot(Some(snapshot("Tetris", 42)));
        let token = CancellationToken::new();

        monitor.tick(&token).await;

        assert_eq!(monitor.messenger.posts.lock().unwrap().len(), 1);
        let session = monitor.session.as_ref().expect("session created");
        assert_eq!(session.message_id(), 4211);
        assert_eq!(session.history().len(), 1);
        assert_eq!(session.history()[0].count, 42);
        assert_eq!(session.update_counter(), 0);
    }

    #[tokio::test]
    async fn live_polls_accumulate_history_without_refreshing_early() {
        let mut monitor = test_monitor(3);
        monitor.platform.set_snapshot(Some(snapshot("Tetris", 42)));
        let token = CancellationToken::new();

        monitor.tick(&token).await; // go live
        monitor.platform.set_snapshot(Some(snapshot("Tetris", 50)));
        monitor.tick(&token).await;
        monitor.platform.set_snapshot(Some(snapshot("Tetris", 60)));
        monitor.tick(&token).await;

        assert!(monitor.messenger.edits.lock().unwrap().is_empty());
        let session = monitor.session.as_ref().expect("session alive");
        assert_eq!(session.history().len(), 3);
        assert_eq!(session.update_counter(), 2);
    }

    #[tokio::test]
    async fn the_refresh_threshold_triggers_an_edit_and_resets_the_counter() {
        let mut monitor = test_monitor(2);
        monitor.platform.set_snapshot(Some(snapshot("Tetris", 42)));
        let token = CancellationToken::new();

        monitor.tick(&token).await; // go live
        monitor.tick(&token).await; // counter 1
        monitor.tick(&token).await; // counter 2 -> refresh

        {
            let edits = monitor.messenger.edits.lock().unwrap();
            assert_eq!(edits.len(), 1);
            assert_eq!(edits[0].0, 4211);
        }
        let session = monitor.session.as_ref().expect("session alive");
        assert_eq!(session.update_counter(), 0);
        assert_eq!(session.history().len(), 3);
    }

    #[tokio::test]
    async fn a_game_change_refreshes_before_the_threshold() {
        let mut monitor = test_monitor(100);
        monitor.platform.set_snapshot(Some(snapshot("Tetris", 42)));
        let token = CancellationToken::new();

        monitor.tick(&token).await; // go live
        monitor.platform.set_snapshot(Some(snapshot("Chess", 42)));
        monitor.tick(&token).await;

        assert_eq!(monitor.messenger.edits.lock().unwrap().len(), 1);
        let session = monitor.session.as_ref().expect("session alive");
        assert_eq!(session.game(), "Chess");
        assert_eq!(session.update_counter(), 0);
    }

    #[tokio::test]
    async fn going_offline_finalizes_and_always_clears_the_session() {
        let mut monitor = test_monitor(5);
        monitor.platform.set_snapshot(Some(snapshot("Tetris", 42)));
        let token = CancellationToken::new();

        monitor.tick(&token).await; // go live
        monitor.platform.set_snapshot(None);
        monitor.tick(&token).await; // go offline

        assert!(monitor.session.is_none());
        let finalizes = monitor.messenger.finalizes.lock().unwrap();
        assert_eq!(finalizes.len(), 1);
        assert_eq!(finalizes[0].0, 4211);
    }

    #[tokio::test]
    async fn a_transient_snapshot_failure_changes_nothing() {
        let mut monitor = test_monitor(5);
        monitor.platform.set_snapshot(Some(snapshot("Tetris", 42)));
        let token = CancellationToken::new();

        monitor.tick(&token).await; // go live
        monitor.platform.set_failing(true);
        monitor.tick(&token).await; // lookup fails, cycle skipped

        let session = monitor.session.as_ref().expect("session survives");
        assert_eq!(session.history().len(), 1);
        assert!(monitor.messenger.finalizes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn offline_with_no_session_is_a_no_op() {
        let mut monitor = test_monitor(5);
        let token = CancellationToken::new();

        monitor.tick(&token).await;

        assert!(monitor.session.is_none());
        assert!(monitor.messenger.posts.lock().unwrap().is_empty());
        assert!(monitor.messenger.finalizes.lock().unwrap().is_empty());
    }
}
