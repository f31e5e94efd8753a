//! Renders session and stream data into the Telegram-HTML captions kept in
//! sync with the stream. Everything here is a pure function of its inputs.

use itertools::Itertools;

use crate::locale::Localization;
use crate::metrics;
use crate::session::ViewerDataPoint;
use crate::twitch::{Clip, StreamSnapshot};

/// The three characters reserved by Telegram's HTML parse mode.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Space-joined `#tag` tokens, skipping empty tags.
pub fn format_tags(tags: &[String]) -> String {
    tags.iter()
        .filter(|tag| !tag.is_empty())
        .map(|tag| format!("#{}", tag))
        .join(" ")
}

/// Middle-dot-joined clip links. Titles are user-supplied and get escaped,
/// clip URLs come from the API and are embedded as-is.
pub fn format_clips(clips: &[Clip]) -> String {
    clips
        .iter()
        .map(|clip| format!("<a href=\"{}\">{}</a>", clip.url, escape_html(&clip.title)))
        .join(" · ")
}

/// Abbreviates a viewer count for display: 950 → "950", 1500 → "1.5K",
/// 25000 → "25K", 2500000 → "2.5M", 12000000 → "12M".
pub fn format_viewers(n: u64) -> String {
    if n >= 1_000_000 {
        let val = n as f64 / 1_000_000.0;
        if val >= 10.0 {
            format!("{:.0}M", val)
        } else {
            format!("{:.1}M", val)
        }
    } else if n >= 10_000 {
        format!("{:.0}K", n as f64 / 1000.0)
    } else if n >= 1_000 {
        format!("{:.1}K", n as f64 / 1000.0)
    } else {
        format!("{}", n)
    }
}

/// Whole hours and minutes in the locale's units, minutes only under an hour.
pub fn format_duration(d: chrono::Duration, loc: &Localization) -> String {
    let hours = d.num_hours();
    let minutes = d.num_minutes() % 60;
    if hours > 0 {
        format!("{} {} {} {}", hours, loc.hour_unit, minutes, loc.minute_unit)
    } else {
        format!("{} {}", minutes, loc.minute_unit)
    }
}

/// `<b>channel</b> • label [• game]`
fn header(channel: &str, label: &str, game: &str) -> String {
    let mut line = format!("<b>{}</b> • {}", escape_html(channel), label);
    if !game.is_empty() {
        line.push_str(&format!(" • {}", escape_html(game)));
    }
    line
}

pub fn start_message(info: &StreamSnapshot, loc: &Localization) -> String {
    let mut msg = header(&info.channel, loc.live_label, &info.game);
    msg.push_str("\n\n");

    if !info.title.is_empty() {
        msg.push_str(&format!("<i>{}</i>", escape_html(&info.title)));
    }

    let tags = format_tags(&info.tags);
    if !tags.is_empty() {
        msg.push_str("\n\n");
        msg.push_str(&tags);
    }

    msg
}

pub fn update_message(
    info: &StreamSnapshot,
    avg_viewers: u64,
    history: &[ViewerDataPoint],
    clips: &[Clip],
    loc: &Localization,
) -> String {
    let mut msg = header(&info.channel, loc.live_label, &info.game);
    msg.push_str("\n\n");

    if !info.title.is_empty() {
        msg.push_str(&format!("<i>{}</i>\n\n", escape_html(&info.title)));
    }

    let mut stats: Vec<String> = Vec::new();
    if !info.uptime.is_empty() {
        stats.push(info.uptime.clone());
    }
    if info.viewers > 0 {
        let mut viewers = format!("{} {}", format_viewers(info.viewers), loc.viewers);
        // the average adds nothing while it still equals the live count
        if avg_viewers > 0 && avg_viewers != info.viewers {
            viewers.push_str(&format!(", {} {}", format_viewers(avg_viewers), loc.avg));
        }
        if let Some(trend) = metrics::trend(history) {
            viewers.push_str(&format!(" · {}", loc.trend_word(trend)));
        }
        stats.push(viewers);
    }
    msg.push_str(&stats.join(" · "));

    let clips_line = format_clips(clips);
    if !clips_line.is_empty() {
        msg.push_str("\n\n");
        msg.push_str(&clips_line);
    }

    let tags = format_tags(&info.tags);
    if !tags.is_empty() {
        msg.push_str("\n\n");
        msg.push_str(&tags);
    }

    msg
}

pub fn end_message(
    channel: &str,
    duration: &str,
    avg_viewers: u64,
    peak_viewers: u64,
    game: &str,
    title: &str,
    tags: &[String],
    clips: &[Clip],
    loc: &Localization,
) -> String {
    let mut msg = header(channel, loc.ended_label, game);
    msg.push_str("\n\n");

    if !title.is_empty() {
        msg.push_str(&format!("<i>{}</i>\n\n", escape_html(title)));
    }

    let mut stats: Vec<String> = Vec::new();
    if !duration.is_empty() {
        stats.push(duration.to_string());
    }
    if avg_viewers > 0 {
        let mut viewers = format!("{} {}", format_viewers(avg_viewers), loc.avg);
        if peak_viewers > avg_viewers {
            viewers.push_str(&format!(", {} {}", format_viewers(peak_viewers), loc.peak));
        }
        stats.push(viewers);
    }
    if !clips.is_empty() {
        stats.push(format!("{} {}", clips.len(), loc.clips));
    }
    msg.push_str(&stats.join(" · "));

    let clips_line = format_clips(clips);
    if !clips_line.is_empty() {
        msg.push_str("\n\n");
        msg.push_str(&clips_line);
    }

    let hashtags = format_tags(tags);
    if !hashtags.is_empty() {
        msg.push_str("\n\n");
        msg.push_str(&hashtags);
    }

    msg
}
