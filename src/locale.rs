use crate::metrics::Trend;

/// Static label table for one message language. Only the strings change with
/// the language selector, never the message logic.
#[derive(Debug)]
pub struct Localization {
    pub live_label: &'static str,
    pub ended_label: &'static str,
    pub button_text: &'static str,
    pub viewers: &'static str,
    pub avg: &'static str,
    pub peak: &'static str,
    pub clips: &'static str,
    pub growing: &'static str,
    pub steady: &'static str,
    pub dropping: &'static str,
    pub hour_unit: &'static str,
    pub minute_unit: &'static str,
}

impl Localization {
    /// Unknown selectors fall back to English.
    pub fn for_language(lang: &str) -> &'static Localization {
        match lang {
            "ru" => &RU,
            _ => &EN,
        }
    }

    pub fn trend_word(&self, trend: Trend) -> &'static str {
        match trend {
            Trend::Growing => self.growing,
            Trend::Steady => self.steady,
            Trend::Dropping => self.dropping,
        }
    }
}

pub static EN: Localization = Localization {
    live_label: "LIVE",
    ended_label: "OFFLINE",
    button_text: "Watch",
    viewers: "viewers",
    avg: "avg",
    peak: "peak",
    clips: "clips",
    growing: "growing",
    steady: "steady",
    dropping: "dropping",
    hour_unit: "h",
    minute_unit: "m",
};

pub static RU: Localization = Localization {
    live_label: "LIVE",
    ended_label: "OFFLINE",
    button_text: "Смотреть",
    viewers: "зрителей",
    avg: "среднее",
    peak: "пик",
    clips: "клипов",
    growing: "растёт",
    steady: "стабильно",
    dropping: "падает",
    hour_unit: "ч",
    minute_unit: "мин",
};
