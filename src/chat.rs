//! Outbound messaging: the chat collaborator trait and its Telegram adapter.
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use teloxide::prelude::*;
use teloxide::types::{MessageId, ParseMode};
use teloxide::utils::html;
use tokio::sync::Mutex;

/// Identifies one message the bot posted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageHandle {
    pub channel: i64,
    pub message_id: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
}

/// Structured content for rich notifications.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Embed {
    pub title: String,
    pub description: String,
    pub colour: (u8, u8, u8),
    pub timestamp: Option<DateTime<Utc>>,
    pub image_url: Option<String>,
    pub fields: Vec<EmbedField>,
    pub footer: Option<String>,
}

impl Embed {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.value.as_str())
    }

    pub fn add_field(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.push(EmbedField {
            name: name.into(),
            value: value.into(),
        });
    }

    /// Flatten into the markdown-like text used for plain transports.
    pub fn to_text(&self) -> String {
        let mut out = format!("**{}**\n{}", self.title, self.description);
        for f in &self.fields {
            out.push_str(&format!("\n**{}**: {}", f.name, f.value));
        }
        if let Some(footer) = &self.footer {
            out.push('\n');
            out.push_str(footer);
        }
        out
    }
}

/// A linked chat user to ping ahead of the message body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mention {
    pub user_id: i64,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageBody {
    Text(String),
    Rich(Embed),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub mention: Option<Mention>,
    pub body: MessageBody,
}

impl OutgoingMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            mention: None,
            body: MessageBody::Text(text.into()),
        }
    }

    pub fn rich(embed: Embed, mention: Option<Mention>) -> Self {
        Self {
            mention,
            body: MessageBody::Rich(embed),
        }
    }

    /// Text content of a plain message.
    pub fn as_text(&self) -> Option<&str> {
        match &self.body {
            MessageBody::Text(text) => Some(text),
            MessageBody::Rich(_) => None,
        }
    }
}

#[async_trait]
pub trait ChatService: Send + Sync {
    async fn send(&self, channel: i64, message: &OutgoingMessage) -> Result<MessageHandle>;

    /// Replace the text of a message previously sent by the bot.
    async fn edit(&self, handle: &MessageHandle, text: &str) -> Result<()>;

    /// Whether nothing has been posted in the handle's channel since it.
    async fn is_latest(&self, handle: &MessageHandle) -> Result<bool>;

    /// Custom emoji of the community behind a channel, when the platform has them.
    async fn custom_emojis(&self, channel: i64) -> Option<Vec<String>>;
}

/// Latest message id observed per chat, fed by sends and incoming updates.
#[derive(Debug, Clone, Default)]
pub struct LatestMessages {
    inner: Arc<Mutex<HashMap<i64, i32>>>,
}

impl LatestMessages {
    pub async fn observe(&self, chat_id: i64, message_id: i32) {
        let mut guard = self.inner.lock().await;
        let entry = guard.entry(chat_id).or_insert(message_id);
        if message_id > *entry {
            *entry = message_id;
        }
    }

    pub async fn latest(&self, chat_id: i64) -> Option<i32> {
        self.inner.lock().await.get(&chat_id).copied()
    }
}

#[derive(Clone)]
pub struct TelegramChat {
    bot: Bot,
    latest: LatestMessages,
}

impl fmt::Debug for TelegramChat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelegramChat").finish_non_exhaustive()
    }
}

impl TelegramChat {
    pub fn new(bot: Bot, latest: LatestMessages) -> Self {
        Self { bot, latest }
    }
}

#[async_trait]
impl ChatService for TelegramChat {
    async fn send(&self, channel: i64, message: &OutgoingMessage) -> Result<MessageHandle> {
        let text = render_html(message);
        let sent = self
            .bot
            .send_message(ChatId(channel), text)
            .parse_mode(ParseMode::Html)
            .await
            .with_context(|| format!("failed to send message to chat {channel}"))?;
        self.latest.observe(sent.chat.id.0, sent.id.0).await;
        Ok(MessageHandle {
            channel: sent.chat.id.0,
            message_id: sent.id.0,
        })
    }

    async fn edit(&self, handle: &MessageHandle, text: &str) -> Result<()> {
        self.bot
            .edit_message_text(ChatId(handle.channel), MessageId(handle.message_id), markup_to_html(text))
            .parse_mode(ParseMode::Html)
            .await
            .with_context(|| format!("failed to edit message {:?}", handle))?;
        Ok(())
    }

    async fn is_latest(&self, handle: &MessageHandle) -> Result<bool> {
        Ok(self.latest.latest(handle.channel).await == Some(handle.message_id))
    }

    async fn custom_emojis(&self, _channel: i64) -> Option<Vec<String>> {
        None
    }
}

/// Render a message as Telegram HTML.
pub fn render_html(message: &OutgoingMessage) -> String {
    let body = match &message.body {
        MessageBody::Text(text) => markup_to_html(text),
        MessageBody::Rich(embed) => markup_to_html(&embed.to_text()),
    };
    match &message.mention {
        Some(m) => format!(
            "<a href=\"tg://user?id={}\">@{}</a>\n{}",
            m.user_id,
            html::escape(&m.label),
            body
        ),
        None => body,
    }
}

static CODE_BLOCK: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)```\n?(.*?)\n?```").unwrap());
static INLINE_CODE: Lazy<Regex> = Lazy::new(|| Regex::new(r"`([^`\n]+)`").unwrap());
static BOLD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*\*(.+?)\*\*").unwrap());
static UNDERLINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"__(.+?)__").unwrap());
static LINK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[([^\]]+)\]\(([^)\s]+)\)").unwrap());

/// Convert the markdown subset used by notifications into escaped Telegram HTML.
pub fn markup_to_html(text: &str) -> String {
    let escaped = html::escape(text);
    let out = CODE_BLOCK.replace_all(&escaped, "<pre>$1</pre>");
    let out = INLINE_CODE.replace_all(&out, "<code>$1</code>");
    let out = BOLD.replace_all(&out, "<b>$1</b>");
    let out = UNDERLINE.replace_all(&out, "<u>$1</u>");
    let out = LINK.replace_all(&out, "<a href=\"$2\">$1</a>");
    out.into_owned()
}
