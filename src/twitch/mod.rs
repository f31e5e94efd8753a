// Thin Helix client for the three lookups the monitor needs: stream
// status, broadcaster id, and recent clips.

mod token;

pub use token::TokenProvider;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::format;
use crate::locale::Localization;
use crate::monitor::StreamingPlatform;

const HELIX_URL: &str = "https://api.twitch.tv/helix";
const HTTP_TIMEOUT: Duration = Duration::from_secs(15);

/// How many clips a single lookup returns at most.
const CLIP_PAGE_SIZE: u32 = 20;

/// Lookup failures are all transient from the monitor's point of view:
/// logged, skipped, retried on the next poll.
#[derive(Debug, thiserror::Error)]
pub enum TwitchError {
    #[error("twitch request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("twitch auth failed ({status}): {body}")]
    Auth { status: u16, body: String },
    #[error("rate limited (429)")]
    RateLimited,
    #[error("twitch API error ({status}): {body}")]
    Api { status: u16, body: String },
    #[error("broadcaster not found: {0}")]
    UnknownBroadcaster(String),
}

/// Point-in-time live status and metadata for a channel. Absence of a
/// snapshot means the channel is offline.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamSnapshot {
    pub channel: String,
    pub url: String,
    pub title: String,
    pub game: String,
    pub viewers: u64,
    pub uptime: String,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Clip {
    pub url: String,
    pub title: String,
}

// tmp structs mirroring the json shape, mapped to the domain types below
#[derive(Debug, Deserialize)]
struct StreamsResponse {
    data: Vec<HelixStream>,
}

#[derive(Debug, Deserialize)]
struct HelixStream {
    user_login: String,
    game_name: String,
    title: String,
    viewer_count: u64,
    started_at: DateTime<Utc>,
    #[serde(default)]
    tags: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct UsersResponse {
    data: Vec<HelixUser>,
}

#[derive(Debug, Deserialize)]
struct HelixUser {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ClipsResponse {
    data: Vec<HelixClip>,
}

#[derive(Debug, Deserialize)]
struct HelixClip {
    url: String,
    title: String,
}

pub struct TwitchClient {
    http: reqwest::Client,
    client_id: String,
    token: TokenProvider,
    locale: &'static Localization,
}

impl TwitchClient {
    pub fn new(
        client_id: String,
        client_secret: String,
        locale: &'static Localization,
    ) -> Result<TwitchClient, TwitchError> {
        let http = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;
        Ok(TwitchClient {
            http,
            token: TokenProvider::new(client_id.clone(), client_secret),
            client_id,
            locale,
        })
    }

    async fn helix_get<T: DeserializeOwned>(&self, url: &str) -> Result<T, TwitchError> {
        let bearer = self.token.bearer(&self.http).await?;
        let resp = self
            .http
            .get(url)
            .header("Client-ID", &self.client_id)
            .bearer_auth(bearer)
            .send()
            .await?;

        let status = resp.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(TwitchError::RateLimited);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(TwitchError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(resp.json().await?)
    }
}

#[async_trait]
impl StreamingPlatform for TwitchClient {
    /// Returning `Ok(None)` means the channel isn't live at the moment.
    async fn stream_snapshot(&self, channel: &str) -> Result<Option<StreamSnapshot>, TwitchError> {
        let url = format!("{}/streams?user_login={}", HELIX_URL, channel);
        let resp: StreamsResponse = self.helix_get(&url).await?;

        let stream = match resp.data.into_iter().next() {
            None => return Ok(None),
            Some(stream) => stream,
        };

        Ok(Some(StreamSnapshot {
            url: format!("https://twitch.tv/{}", stream.user_login),
            uptime: format::format_duration(Utc::now() - stream.started_at, self.locale),
            channel: stream.user_login,
            title: stream.title,
            game: stream.game_name,
            viewers: stream.viewer_count,
            tags: stream.tags,
        }))
    }

    async fn broadcaster_id(&self, channel: &str) -> Result<String, TwitchError> {
        let url = format!("{}/users?login={}", HELIX_URL, channel);
        let resp: UsersResponse = self.helix_get(&url).await?;
        resp.data
            .into_iter()
            .next()
            .map(|user| user.id)
            .ok_or_else(|| TwitchError::UnknownBroadcaster(channel.to_string()))
    }

    async fn recent_clips(
        &self,
        broadcaster_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<Clip>, TwitchError> {
        let url = format!(
            "{}/clips?broadcaster_id={}&started_at={}&ended_at={}&first={}",
            HELIX_URL,
            broadcaster_id,
            since.to_rfc3339_opts(SecondsFormat::Secs, true),
            Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            CLIP_PAGE_SIZE,
        );
        let resp: ClipsResponse = self.helix_get(&url).await?;
        Ok(resp
            .data
            .into_iter()
            .map(|clip| Clip {
                url: clip.url,
                title: clip.title,
            })
            .collect())
    }
}

/// CDN preview used as the notification photo; the timestamp query busts
/// Telegram's download cache so edits pick up a fresh frame.
pub fn thumbnail_url(channel: &str) -> String {
    format!(
        "https://static-cdn.jtvnw.net/previews-ttv/live_user_{}-1920x1080.jpg?t={}",
        channel,
        Utc::now().timestamp()
    )
}
