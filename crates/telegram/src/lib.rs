//! Telegram delivery of WhatsApp pairing QR codes.
//!
//! Each new pairing payload is pushed to one configured chat as a photo with
//! a caption, or as plain text when no image could be rendered.

use {
    async_trait::async_trait,
    secrecy::ExposeSecret,
    teloxide::{
        prelude::*,
        types::{InputFile, Recipient},
    },
    tracing::debug,
    wagate_channels::{NotifyError, PairingNotice, PairingNotifier},
    wagate_config::TelegramConfig,
};

/// File name shown to the Telegram user for the QR photo.
const QR_FILE_NAME: &str = "wa-qr.png";

pub struct TelegramQrNotifier {
    bot: Bot,
    chat: Recipient,
    caption: String,
}

impl TelegramQrNotifier {
    pub fn new(token: &str, chat: Recipient, caption: String) -> Self {
        Self {
            bot: Bot::new(token),
            chat,
            caption,
        }
    }

    /// Build a notifier when both the bot token and the chat id are set.
    pub fn from_config(cfg: &TelegramConfig) -> Option<Self> {
        if !cfg.is_enabled() {
            return None;
        }
        let token = cfg.bot_token.as_ref()?;
        let chat = parse_recipient(cfg.chat_id.as_deref()?)?;
        Some(Self::new(token.expose_secret(), chat, cfg.caption.clone()))
    }
}

/// Numeric ids (including negative group ids) address a chat directly;
/// anything else is treated as a public channel username.
pub fn parse_recipient(chat_id: &str) -> Option<Recipient> {
    let chat_id = chat_id.trim();
    if chat_id.is_empty() {
        return None;
    }
    if let Ok(id) = chat_id.parse::<i64>() {
        return Some(Recipient::Id(ChatId(id)));
    }
    let username = if chat_id.starts_with('@') {
        chat_id.to_string()
    } else {
        format!("@{chat_id}")
    };
    Some(Recipient::ChannelUsername(username))
}

#[async_trait]
impl PairingNotifier for TelegramQrNotifier {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn notify(&self, notice: &PairingNotice) -> Result<(), NotifyError> {
        let result = match &notice.png {
            Some(png) => {
                debug!(bytes = png.len(), "sending QR photo to telegram");
                self.bot
                    .send_photo(
                        self.chat.clone(),
                        InputFile::memory(png.to_vec()).file_name(QR_FILE_NAME),
                    )
                    .caption(self.caption.clone())
                    .await
                    .map(|_| ())
            },
            None => {
                debug!("sending QR payload to telegram as text");
                self.bot
                    .send_message(self.chat.clone(), notice.fallback_text())
                    .await
                    .map(|_| ())
            },
        };
        result.map_err(|e| NotifyError::Delivery(e.to_string()))
    }
}
