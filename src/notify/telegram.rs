// src/notify/telegram.rs
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use reqwest::Client;
use serde::Serialize;

use super::{format_message, Dispatcher};
use crate::config::DispatchCfg;
use crate::record::Record;

const ENV_BOT_TOKEN: &str = "TELEGRAM_BOT_TOKEN";
const ENV_CHAT_ID: &str = "TELEGRAM_CHAT_ID";

pub struct TelegramDispatcher {
    api_url: String,
    chat_id: String,
    client: Client,
    timeout: Duration,
    max_retries: u8,
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'static str,
    disable_web_page_preview: bool,
}

impl TelegramDispatcher {
    /// Credentials come from the environment only; they are opaque to the
    /// pipeline and never logged.
    pub fn from_env(cfg: &DispatchCfg) -> Result<Self> {
        let token = std::env::var(ENV_BOT_TOKEN)
            .map_err(|_| anyhow!("{ENV_BOT_TOKEN} is not set but dispatch.kind = \"telegram\""))?;
        let chat_id = std::env::var(ENV_CHAT_ID)
            .map_err(|_| anyhow!("{ENV_CHAT_ID} is not set but dispatch.kind = \"telegram\""))?;
        Ok(Self::new(token, chat_id)
            .with_timeout(cfg.timeout_secs)
            .with_retries(cfg.max_retries))
    }

    pub fn new(token: String, chat_id: String) -> Self {
        Self {
            api_url: format!("https://api.telegram.org/bot{token}/sendMessage"),
            chat_id,
            client: Client::new(),
            timeout: Duration::from_secs(10),
            max_retries: 3,
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    pub fn with_retries(mut self, retries: u8) -> Self {
        self.max_retries = retries.max(1);
        self
    }
}

#[async_trait::async_trait]
impl Dispatcher for TelegramDispatcher {
    async fn deliver(&self, record: &Record) -> Result<()> {
        let text = format_message(record);
        let payload = SendMessage {
            chat_id: &self.chat_id,
            text: &text,
            parse_mode: "HTML",
            disable_web_page_preview: true,
        };

        let mut attempt: u8 = 0;
        loop {
            attempt += 1;
            let res = self
                .client
                .post(&self.api_url)
                .timeout(self.timeout)
                .json(&payload)
                .send()
                .await;

            match res {
                Ok(rsp) => {
                    if let Err(e) = rsp.error_for_status_ref() {
                        if attempt < self.max_retries {
                            tokio::time::sleep(Duration::from_millis(500u64 << (attempt - 1)))
                                .await;
                            continue;
                        }
                        return Err(anyhow!("telegram sendMessage HTTP error: {e}"));
                    }
                    return Ok(());
                }
                Err(e) => {
                    if attempt < self.max_retries {
                        tokio::time::sleep(Duration::from_millis(500u64 << (attempt - 1))).await;
                        continue;
                    }
                    return Err(e).context("telegram sendMessage request failed");
                }
            }
        }
    }
}
