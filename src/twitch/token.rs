use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::twitch::TwitchError;

const TOKEN_URL: &str = "https://id.twitch.tv/oauth2/token";

/// Tokens are treated as expired this long before Twitch says so, so a
/// token handed out here is never on the verge of dying mid-request.
const EXPIRY_SLACK_SECS: i64 = 300;

#[derive(Debug, Deserialize)]
struct AuthResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

/// App-access-token cache for the Helix API (client-credentials grant).
/// The cache is internally locked: a provider shared between tasks still
/// hands out one token at a time and refreshes it exactly once.
pub struct TokenProvider {
    client_id: String,
    client_secret: String,
    cached: Mutex<Option<CachedToken>>,
}

impl TokenProvider {
    pub fn new(client_id: String, client_secret: String) -> TokenProvider {
        TokenProvider {
            client_id,
            client_secret,
            cached: Mutex::new(None),
        }
    }

    /// Returns the cached token while it is still valid, fetching a fresh
    /// one transparently when expired or absent.
    pub async fn bearer(&self, http: &reqwest::Client) -> Result<String, TwitchError> {
        let mut cached = self.cached.lock().await;

        if let Some(token) = cached.as_ref() {
            if Utc::now() < token.expires_at {
                return Ok(token.access_token.clone());
            }
        }

        let resp = http
            .post(TOKEN_URL)
            .query(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("grant_type", "client_credentials"),
            ])
            .header("Content-Type", "application/x-www-form-urlencoded")
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(TwitchError::Auth {
                status: status.as_u16(),
                body,
            });
        }

        let auth: AuthResponse = resp.json().await?;
        let token = CachedToken {
            access_token: auth.access_token,
            expires_at: Utc::now() + Duration::seconds(auth.expires_in - EXPIRY_SLACK_SECS),
        };
        let bearer = token.access_token.clone();
        *cached = Some(token);
        Ok(bearer)
    }
}
