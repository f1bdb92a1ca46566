//! Telegram update routing.
//!
//! Every message the bot can see, including channel posts, feeds the
//! latest-message tracker. Ordinary messages may also carry `/ci` commands.
//! Group chats must have the bot's privacy mode disabled, otherwise member
//! messages never arrive and the tracker cannot notice them.
use crate::chat::{ChatService, LatestMessages, OutgoingMessage};
use crate::commands::{self, CommandRunner, Invocation};
use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use teloxide::dispatching::UpdateHandler;
use teloxide::prelude::*;
use tracing::{error, info, instrument, warn};

static BOT_SUFFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(/\w+)@\w+").unwrap());

/// Everything the update handlers need, shared across updates.
pub struct BotContext {
    pub chat: Arc<dyn ChatService>,
    pub runner: CommandRunner,
    pub latest: LatestMessages,
    pub admins: Vec<i64>,
}

/// Handler tree for the dispatcher. Expects an `Arc<BotContext>` dependency.
pub fn schema() -> UpdateHandler<anyhow::Error> {
    dptree::entry()
        .branch(Update::filter_message().endpoint(on_message))
        .branch(Update::filter_channel_post().endpoint(on_channel_post))
}

async fn on_message(msg: Message, ctx: Arc<BotContext>) -> Result<()> {
    if let Err(err) = handle_update(&ctx, &msg).await {
        error!(?err, "failed to handle update");
    }
    Ok(())
}

async fn on_channel_post(msg: Message, ctx: Arc<BotContext>) -> Result<()> {
    ctx.latest.observe(msg.chat.id.0, msg.id.0).await;
    Ok(())
}

#[instrument(skip_all)]
pub async fn handle_update(ctx: &BotContext, msg: &Message) -> Result<()> {
    // Any message counts for the "latest message" check, command or not.
    ctx.latest.observe(msg.chat.id.0, msg.id.0).await;

    let Some(text) = msg.text() else {
        return Ok(());
    };
    let Some(user) = msg.from() else {
        return Ok(());
    };
    let user_id = user.id.0 as i64;
    let chat_id = msg.chat.id.0;

    let text = strip_bot_suffix(text.trim());
    let cmd = match commands::parse_command(&text) {
        Ok(Some(cmd)) => cmd,
        Ok(None) => return Ok(()),
        Err(usage) => {
            if is_admin(&ctx.admins, user_id) {
                ctx.chat.send(chat_id, &OutgoingMessage::text(usage)).await?;
            }
            return Ok(());
        }
    };
    if !is_admin(&ctx.admins, user_id) {
        info!(user_id, "ignoring command from non-admin");
        return Ok(());
    }

    let reply = ctx.runner.execute(cmd, Invocation { chat_id, user_id }).await?;
    for message in &reply.messages {
        if let Err(err) = ctx.chat.send(chat_id, message).await {
            warn!(?err, chat_id, "failed to send command reply");
        }
    }
    if reply.ack {
        ctx.chat.send(chat_id, &OutgoingMessage::text("\u{2705}")).await?;
    }
    Ok(())
}

fn is_admin(admins: &[i64], user_id: i64) -> bool {
    admins.contains(&user_id)
}

/// `/ci@some_bot status` -> `/ci status`
fn strip_bot_suffix(text: &str) -> String {
    BOT_SUFFIX.replace(text, "$1").into_owned()
}
