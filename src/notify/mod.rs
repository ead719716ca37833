// src/notify/mod.rs
//! Outbound delivery boundary. The pipeline only needs `deliver` and its
//! success/failure; anything non-Ok means "do not commit the fingerprint".

pub mod telegram;

use anyhow::Result;

use crate::config::DispatchCfg;
use crate::record::Record;

#[async_trait::async_trait]
pub trait Dispatcher: Send + Sync {
    async fn deliver(&self, record: &Record) -> Result<()>;
}

/// Build the dispatcher the config names. Telegram without credentials in
/// the environment is a startup error, not a silent console fallback.
pub fn build_dispatcher(cfg: &DispatchCfg) -> Result<Box<dyn Dispatcher>> {
    match cfg.kind.as_str() {
        "telegram" => Ok(Box::new(telegram::TelegramDispatcher::from_env(cfg)?)),
        _ => Ok(Box::new(ConsoleDispatcher)),
    }
}

/// Telegram-flavored HTML message for one record. User-supplied text is
/// entity-escaped; the URL is printed bare so clients linkify it.
pub fn format_message(record: &Record) -> String {
    use html_escape::encode_text;

    let mut msg = format!(
        "\u{1F4E2} <b>[{}] {}</b>\n",
        encode_text(&record.source_id),
        encode_text(&record.title)
    );
    if let Some(category) = &record.category {
        let confidence = record.category_confidence.unwrap_or(0.0);
        msg.push_str(&format!(
            "\u{1F4CC} <b>{}</b> ({:.0}%)\n",
            encode_text(category),
            confidence * 100.0
        ));
    }
    if let Some(ts) = record.published_at {
        msg.push_str(&format!("\u{1F4C5} {}\n", ts.format("%Y-%m-%d")));
    }
    let excerpt = record.excerpt();
    if !excerpt.is_empty() {
        msg.push_str(&format!("\u{1F4DD} {}\n", encode_text(excerpt)));
    }
    if !record.url.is_empty() {
        msg.push_str(&format!("\u{1F517} {}\n", record.url));
    }
    msg
}

/// Console-only mode: prints what Telegram would send. Always succeeds.
pub struct ConsoleDispatcher;

#[async_trait::async_trait]
impl Dispatcher for ConsoleDispatcher {
    async fn deliver(&self, record: &Record) -> Result<()> {
        println!("{}", format_message(record));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record() -> Record {
        let mut r = Record::new(
            "Spring <enrollment> opens".into(),
            "https://example.test/notice/1".into(),
            "Applications & documents due soon".into(),
            "unn-news".into(),
        );
        r.category = Some("music".into());
        r.category_confidence = Some(0.5);
        r.published_at = chrono::Utc.with_ymd_and_hms(2025, 6, 2, 9, 0, 0).single();
        r
    }

    #[test]
    fn message_escapes_html_in_user_text() {
        let msg = format_message(&record());
        assert!(msg.contains("Spring &lt;enrollment&gt; opens"));
        assert!(msg.contains("Applications &amp; documents"));
        assert!(msg.contains("https://example.test/notice/1"));
        assert!(msg.contains("music</b> (50%)"));
        assert!(msg.contains("2025-06-02"));
    }

    #[test]
    fn unclassified_record_has_no_category_line() {
        let mut r = record();
        r.category = None;
        r.category_confidence = None;
        let msg = format_message(&r);
        assert!(!msg.contains("\u{1F4CC}"));
    }

    #[test]
    fn build_console_dispatcher() {
        let cfg = DispatchCfg {
            kind: "console".into(),
            ..Default::default()
        };
        assert!(build_dispatcher(&cfg).is_ok());
    }
}
