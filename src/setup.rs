// Interactive first-run wizard. Walks through credentials, channel, bot,
// chat discovery, permissions and intervals, then writes the config file
// with setup_completed latched.

use std::io::{self, Write};
use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{bail, ensure, Context, Result};
use serde::Deserialize;

use crate::config::Config;
use crate::locale::Localization;
use crate::monitor::StreamingPlatform;
use crate::telegram;
use crate::twitch::{TokenProvider, TwitchClient, TwitchError};

const TOTAL_STEPS: u32 = 6;

/// How long the automatic chat discovery waits for a SETUP message.
const SETUP_COMMAND_TIMEOUT_SECS: u64 = 120;
const PERMISSIONS_FIX_TIMEOUT_SECS: u64 = 300;

pub async fn run(config_path: &Path, reconfigure: bool) -> Result<()> {
    // long polls against getUpdates run up to 30 seconds
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(35))
        .build()?;

    let mut cfg = if reconfigure {
        Config::load(config_path).unwrap_or_default()
    } else {
        Config::default()
    };

    println!();
    println!("Twitch Stream Monitor - Setup");
    println!();

    let mut step = 0;

    if cfg.twitch.client_id.is_empty() || cfg.twitch.client_secret.is_empty() {
        step += 1;
        println!("[{}/{}] Twitch API Credentials", step, TOTAL_STEPS);
        println!("Get your credentials at: https://dev.twitch.tv/console");
        println!();

        loop {
            let client_id = prompt("Client ID", "")?;
            if client_id.is_empty() {
                continue;
            }
            let client_secret = prompt("Client Secret", "")?;
            if client_secret.is_empty() {
                continue;
            }

            print_flush("Validating credentials... ")?;
            match TokenProvider::new(client_id.clone(), client_secret.clone())
                .bearer(&http)
                .await
            {
                Ok(_) => {
                    println!("OK");
                    cfg.twitch.client_id = client_id;
                    cfg.twitch.client_secret = client_secret;
                    break;
                }
                Err(err) => {
                    println!("Error: {}", err);
                    if !prompt_retry()? {
                        bail!("setup cancelled");
                    }
                }
            }
        }
        println!();
    }

    if cfg.twitch.channel.is_empty() {
        step += 1;
        println!("[{}/{}] Twitch Channel", step, TOTAL_STEPS);

        let client = TwitchClient::new(
            cfg.twitch.client_id.clone(),
            cfg.twitch.client_secret.clone(),
            Localization::for_language("en"),
        )?;

        loop {
            let channel = prompt("Enter channel name", "")?;
            if channel.is_empty() {
                continue;
            }

            print_flush("Checking channel... ")?;
            match client.broadcaster_id(&channel).await {
                Err(TwitchError::UnknownBroadcaster(_)) => {
                    println!("Error: Channel not found");
                    if !prompt_retry()? {
                        bail!("setup cancelled");
                    }
                }
                // lookup trouble is not the user's fault, accept the answer
                _ => {
                    println!("OK");
                    cfg.twitch.channel = channel;
                    break;
                }
            }
        }
        println!();
    }

    if cfg.telegram.bot_token.is_empty() {
        step += 1;
        println!("[{}/{}] Telegram Bot", step, TOTAL_STEPS);
        println!("Create a bot via @BotFather on Telegram");
        println!();

        loop {
            let bot_token = prompt("Bot Token", "")?;
            if bot_token.len() < 20 {
                println!("Error: Invalid format");
                continue;
            }

            print_flush("Checking bot... ")?;
            match get_me(&http, &bot_token).await {
                Ok(bot) => {
                    println!("OK (Bot: @{})", bot.username);
                    cfg.telegram.bot_token = bot_token;
                    break;
                }
                Err(err) => {
                    println!("Error: {}", err);
                    if !prompt_retry()? {
                        bail!("setup cancelled");
                    }
                }
            }
        }
        println!();
    }

    if cfg.telegram.chat_id.is_none() {
        step += 1;
        println!("[{}/{}] Chat Configuration", step, TOTAL_STEPS);
        println!();

        let bot_username = get_me(&http, &cfg.telegram.bot_token)
            .await
            .map(|bot| bot.username)
            .unwrap_or_default();

        println!("Choose setup method:");
        println!("1. Automatic - for groups (bot will detect chat ID)");
        println!("2. Manual - for channels (you provide chat ID)");
        println!();
        let method = prompt("Select method (1/2)", "1")?;
        println!();

        let (chat_id, thread_id) = if method == "2" {
            println!("To get your channel chat ID:");
            println!("1. Add your bot to the channel as administrator");
            println!("2. Forward any channel message to @userinfobot");
            println!("3. Copy the chat ID (number starting with -100)");
            println!();

            let chat_id = prompt("Enter chat ID", "")?;
            ensure!(!chat_id.is_empty(), "chat ID is required");
            let chat_id: i64 = chat_id.parse().context("invalid chat ID format")?;

            let thread_id = prompt("Enter thread ID (optional, press Enter to skip)", "")?;
            (chat_id, thread_id.parse::<i64>().ok())
        } else {
            if bot_username.is_empty() {
                println!("1. Add your bot to the group as administrator");
            } else {
                println!("1. Add @{} to your group as administrator", bot_username);
            }
            println!("2. Send 'SETUP' command in the group");
            println!();
            print_flush("Waiting for SETUP command... ")?;

            match wait_for_setup_command(&http, &cfg.telegram.bot_token, SETUP_COMMAND_TIMEOUT_SECS)
                .await
            {
                Ok(found) => found,
                Err(err) => {
                    println!("Error: {}", err);
                    println!();
                    println!("Tip: If using a channel, restart and choose manual method (option 2)");
                    return Err(err.context("setup failed"));
                }
            }
        };

        println!("OK (Chat ID: {})", chat_id);
        println!();

        print_flush("Checking bot permissions... ")?;
        if let Err(err) = check_bot_permissions(&http, &cfg.telegram.bot_token, chat_id).await {
            println!("Error");
            println!();
            println!("Missing permissions: {}", err);
            println!("Please grant the bot permission to send messages");
            println!();
            print_flush("Waiting for permissions fix... ")?;
            wait_for_permissions_fix(
                &http,
                &cfg.telegram.bot_token,
                chat_id,
                PERMISSIONS_FIX_TIMEOUT_SECS,
            )
            .await
            .context("setup failed")?;
        }
        println!("OK");

        cfg.telegram.chat_id = Some(chat_id);
        cfg.telegram.thread_id = thread_id;
    }

    if cfg.language.is_empty() {
        step += 1;
        println!("[{}/{}] Language", step, TOTAL_STEPS);
        let lang = prompt("Select language (en/ru)", "en")?;
        cfg.language = match lang.as_str() {
            "en" | "ru" => lang,
            _ => "en".to_string(),
        };
        println!();
    }

    if cfg.check_interval_seconds == 0 || cfg.update_interval_minutes == 0 {
        step += 1;
        println!("[{}/{}] Monitor Settings", step, TOTAL_STEPS);

        if cfg.check_interval_seconds == 0 {
            let answer = prompt("Check interval (seconds)", "60")?;
            cfg.check_interval_seconds = answer
                .parse::<u32>()
                .ok()
                .filter(|v| *v > 0)
                .unwrap_or(60);
        }
        if cfg.update_interval_minutes == 0 {
            let answer = prompt("Update interval (minutes)", "5")?;
            cfg.update_interval_minutes = answer
                .parse::<u32>()
                .ok()
                .filter(|v| *v > 0)
                .unwrap_or(5);
        }
        println!();
    }

    cfg.setup_completed = true;
    cfg.save(config_path)?;
    println!("Configuration saved to {}", config_path.display());
    Ok(())
}

// The wizard runs before anything else is scheduled, blocking reads on
// stdin are fine here.
fn prompt(label: &str, default: &str) -> Result<String> {
    if default.is_empty() {
        print!("{}: ", label);
    } else {
        print!("{} [{}]: ", label, default);
    }
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    let input = input.trim();
    Ok(if input.is_empty() {
        default.to_string()
    } else {
        input.to_string()
    })
}

fn prompt_retry() -> Result<bool> {
    let answer = prompt("Try again? (y/n)", "")?.to_lowercase();
    Ok(answer == "y" || answer == "yes" || answer.is_empty())
}

fn print_flush(text: &str) -> Result<()> {
    print!("{}", text);
    io::stdout().flush()?;
    Ok(())
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    ok: bool,
    #[serde(default)]
    result: Option<T>,
}

#[derive(Debug, Default, Deserialize)]
struct BotInfo {
    id: i64,
    username: String,
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    message: Option<UpdateMessage>,
}

#[derive(Debug, Deserialize)]
struct UpdateMessage {
    #[serde(default)]
    message_thread_id: Option<i64>,
    chat: Chat,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct Chat {
    id: i64,
    #[serde(default)]
    title: String,
    #[serde(default)]
    username: String,
}

#[derive(Debug, Default, Deserialize)]
struct ChatMember {
    status: String,
    #[serde(default)]
    can_post_messages: Option<bool>,
}

async fn get_me(http: &reqwest::Client, token: &str) -> Result<BotInfo> {
    let url = format!("{}/bot{}/getMe", telegram::API_URL, token);
    let resp = http.get(&url).send().await?;
    ensure!(
        resp.status().is_success(),
        "invalid token ({})",
        resp.status().as_u16()
    );
    let body: Envelope<BotInfo> = resp.json().await?;
    ensure!(body.ok, "bot not found");
    body.result.context("empty getMe result")
}

async fn get_updates(
    http: &reqwest::Client,
    token: &str,
    offset: i64,
    long_poll_secs: u32,
) -> Result<Vec<Update>> {
    let url = format!(
        "{}/bot{}/getUpdates?offset={}&timeout={}",
        telegram::API_URL,
        token,
        offset,
        long_poll_secs
    );
    let resp = http.get(&url).send().await?;
    let body: Envelope<Vec<Update>> = resp.json().await?;
    Ok(body.result.unwrap_or_default())
}

/// Long-polls until somebody writes `SETUP` (or `/SETUP`) in a chat the bot
/// can see, returning that chat's id and, for forum groups, the thread id.
async fn wait_for_setup_command(
    http: &reqwest::Client,
    token: &str,
    timeout_secs: u64,
) -> Result<(i64, Option<i64>)> {
    // skip whatever is already sitting in the update queue
    let mut offset = 0;
    if let Ok(backlog) = get_updates(http, token, 0, 0).await {
        if let Some(last) = backlog.last() {
            offset = last.update_id + 1;
        }
    }

    let deadline = Instant::now() + Duration::from_secs(timeout_secs);
    while Instant::now() < deadline {
        let updates = match get_updates(http, token, offset, 30).await {
            Ok(updates) => updates,
            Err(_) => {
                tokio::time::sleep(Duration::from_secs(2)).await;
                continue;
            }
        };

        for update in updates {
            offset = update.update_id + 1;
            let msg = match update.message {
                Some(msg) => msg,
                None => continue,
            };
            let text = msg.text.trim().to_uppercase();
            if text != "SETUP" && text != "/SETUP" {
                continue;
            }

            let chat = &msg.chat;
            if !chat.title.is_empty() {
                println!("\nReceived SETUP from: {} (Chat ID: {})", chat.title, chat.id);
            } else if !chat.username.is_empty() {
                println!("\nReceived SETUP from: @{} ({})", chat.username, chat.id);
            } else {
                println!("\nReceived SETUP from: Chat ID: {}", chat.id);
            }
            if let Some(thread_id) = msg.message_thread_id {
                println!("Thread ID: {}", thread_id);
            }
            return Ok((chat.id, msg.message_thread_id));
        }

        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    bail!("timeout waiting for SETUP command")
}

/// The bot can post if it is an administrator/creator or explicitly granted
/// the posting right.
async fn check_bot_permissions(http: &reqwest::Client, token: &str, chat_id: i64) -> Result<()> {
    let bot = get_me(http, token).await.context("cannot look up the bot user")?;

    let url = format!("{}/bot{}/getChatMember", telegram::API_URL, token);
    let resp = http
        .post(&url)
        .json(&serde_json::json!({ "chat_id": chat_id, "user_id": bot.id }))
        .send()
        .await?;
    let body: Envelope<ChatMember> = resp.json().await?;
    ensure!(body.ok, "failed to get bot permissions");
    let member = body.result.context("empty getChatMember result")?;

    if member.status != "administrator" && member.status != "creator" {
        ensure!(
            member.can_post_messages.unwrap_or(false),
            "bot needs permission to send messages"
        );
    }
    Ok(())
}

async fn wait_for_permissions_fix(
    http: &reqwest::Client,
    token: &str,
    chat_id: i64,
    timeout_secs: u64,
) -> Result<()> {
    let deadline = Instant::now() + Duration::from_secs(timeout_secs);
    while Instant::now() < deadline {
        if check_bot_permissions(http, token, chat_id).await.is_ok() {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_secs(3)).await;
    }
    bail!("timeout waiting for permissions fix")
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn updates_from_json() {
        let json = r#"{"ok":true,"result":[
            {"update_id":10,"message":{"message_id":1,"message_thread_id":5,
             "chat":{"id":-100123,"type":"supergroup","title":"My Group"},
             "text":"setup"}},
            {"update_id":11,"message":{"message_id":2,
             "chat":{"id":99,"type":"private","username":"someone"},
             "text":"hello"}}
        ]}"#;
        let body: Envelope<Vec<Update>> = serde_json::from_str(json).expect("valid updates");
        let updates = body.result.expect("result present");
        assert_eq!(updates.len(), 2);

        let first = updates[0].message.as_ref().expect("message present");
        assert_eq!(first.chat.id, -100123);
        assert_eq!(first.chat.title, "My Group");
        assert_eq!(first.message_thread_id, Some(5));
        assert_eq!(first.text, "setup");

        let second = updates[1].message.as_ref().expect("message present");
        assert_eq!(second.chat.username, "someone");
        assert_eq!(second.message_thread_id, None);
    }

    #[test]
    fn chat_member_permissions_from_json() {
        let json = r#"{"ok":true,"result":{"status":"member","can_post_messages":false}}"#;
        let body: Envelope<ChatMember> = serde_json::from_str(json).expect("valid member");
        let member = body.result.expect("result present");
        assert_eq!(member.status, "member");
        assert_eq!(member.can_post_messages, Some(false));
    }
}
