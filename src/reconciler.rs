//! Build notification reconciler.
//!
//! Decides, for every build callback, whether to post new messages, extend
//! an earlier success message in place, or post a standalone report. One
//! async mutex covers the whole decide-and-dispatch sequence, so the
//! "still the latest message" precondition always sees the handles of the
//! previous event.
use crate::announce;
use crate::chat::{ChatService, Mention, MessageHandle, OutgoingMessage};
use crate::contributors::ContributorDirectory;
use crate::model::{BuildEvent, BuildOutcome, ErrorIndicator};
use crate::quality::QualityOracle;
use futures::future::join_all;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

/// Per-event routing data resolved by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildContext {
    pub channels: Vec<i64>,
    pub server_name: String,
    pub repo: Option<String>,
}

/// A success message as last written to one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Announcement {
    pub handle: MessageHandle,
    pub text: String,
}

/// Dedup state. Entries are never evicted.
#[derive(Debug, Default)]
pub struct ReconcilerState {
    pub announced: HashMap<String, Vec<Announcement>>,
    pub failed: HashSet<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildAction {
    /// No channel is subscribed to build notifications.
    NoChannels,
    ErrorReported { handles: Vec<MessageHandle> },
    Posted { outcome: BuildOutcome, handles: Vec<MessageHandle> },
    Edited { handles: Vec<MessageHandle> },
}

pub struct Reconciler {
    chat: Arc<dyn ChatService>,
    contributors: Option<Arc<dyn ContributorDirectory>>,
    quality: QualityOracle,
    state: Mutex<ReconcilerState>,
}

impl Reconciler {
    pub fn new(
        chat: Arc<dyn ChatService>,
        contributors: Option<Arc<dyn ContributorDirectory>>,
        quality: QualityOracle,
    ) -> Self {
        Self {
            chat,
            contributors,
            quality,
            state: Mutex::new(ReconcilerState::default()),
        }
    }

    /// Number of commits with a tracked success announcement and failure record.
    pub async fn tracked(&self) -> (usize, usize) {
        let state = self.state.lock().await;
        (state.announced.len(), state.failed.len())
    }

    pub async fn announced(&self, commit: &str) -> Option<Vec<Announcement>> {
        self.state.lock().await.announced.get(commit).cloned()
    }

    pub async fn has_failed(&self, commit: &str) -> bool {
        self.state.lock().await.failed.contains(commit)
    }

    /// Relay a callback that carried only an error, without commit details.
    #[instrument(skip_all, fields(server = %ctx.server_name))]
    pub async fn report_error(&self, error: &ErrorIndicator, ctx: &BuildContext) -> BuildAction {
        let _guard = self.state.lock().await;
        if ctx.channels.is_empty() {
            return BuildAction::NoChannels;
        }
        let text = announce::error_report_text(&ctx.server_name, error);
        let handles = self.fan_out(&ctx.channels, &OutgoingMessage::text(text)).await;
        BuildAction::ErrorReported { handles }
    }

    #[instrument(skip_all, fields(commit = %event.commit, server = %ctx.server_name))]
    pub async fn handle_build_event(&self, event: &BuildEvent, ctx: &BuildContext) -> BuildAction {
        let mut state = self.state.lock().await;
        if ctx.channels.is_empty() {
            return BuildAction::NoChannels;
        }
        let outcome = event.outcome();
        info!(outcome = outcome.as_str(), "handling build event");
        match outcome {
            BuildOutcome::Cancelled => {
                let text = announce::cancelled_text(event, &ctx.server_name);
                let handles = self.fan_out(&ctx.channels, &OutgoingMessage::text(text)).await;
                BuildAction::Posted { outcome, handles }
            }
            BuildOutcome::CleanSuccess => self.clean_success(&mut state, event, ctx).await,
            BuildOutcome::Success | BuildOutcome::Failure => {
                self.build_report(&mut state, event, ctx, outcome).await
            }
        }
    }

    async fn clean_success(
        &self,
        state: &mut ReconcilerState,
        event: &BuildEvent,
        ctx: &BuildContext,
    ) -> BuildAction {
        if let Some(previous) = state.announced.get(&event.commit).cloned() {
            if self.all_latest(&previous).await {
                if let Some(updated) = self.extend(&previous, &ctx.server_name).await {
                    let handles = updated.iter().map(|a| a.handle).collect();
                    state.announced.insert(event.commit.clone(), updated);
                    return BuildAction::Edited { handles };
                }
            }
            info!("earlier success message is no longer latest; posting anew");
        }

        let emojis = match ctx.channels.first() {
            Some(channel) => self.chat.custom_emojis(*channel).await,
            None => None,
        };
        let names = self.contributor_names().await;
        let quality = self
            .quality
            .funny_message(&event.commit, emojis.as_deref(), names.as_deref());
        let text = announce::with_quality(
            &announce::success_text(event, &ctx.server_name),
            &quality,
        );
        let handles = self.fan_out(&ctx.channels, &OutgoingMessage::text(text.clone())).await;
        let announcements = handles
            .iter()
            .map(|handle| Announcement {
                handle: *handle,
                text: text.clone(),
            })
            .collect();
        state.announced.insert(event.commit.clone(), announcements);
        BuildAction::Posted {
            outcome: BuildOutcome::CleanSuccess,
            handles,
        }
    }

    async fn build_report(
        &self,
        state: &mut ReconcilerState,
        event: &BuildEvent,
        ctx: &BuildContext,
        outcome: BuildOutcome,
    ) -> BuildAction {
        let names = self.contributor_names().await;
        let quality = self.quality.funny_message(&event.commit, None, names.as_deref());
        let embed =
            announce::build_report_embed(event, &ctx.server_name, ctx.repo.as_deref(), &quality);

        let mut mention = None;
        if outcome == BuildOutcome::Failure {
            if !state.failed.contains(&event.commit) {
                mention = self.mention_for(&event.author).await;
            }
            state.failed.insert(event.commit.clone());
        }

        let handles = self
            .fan_out(&ctx.channels, &OutgoingMessage::rich(embed, mention))
            .await;
        BuildAction::Posted { outcome, handles }
    }

    /// Precondition for editing: every earlier message is still the newest in
    /// its channel. Evaluated fresh on every call.
    async fn all_latest(&self, previous: &[Announcement]) -> bool {
        if previous.is_empty() {
            return false;
        }
        let checks = join_all(previous.iter().map(|a| self.chat.is_latest(&a.handle))).await;
        checks.into_iter().all(|res| match res {
            Ok(latest) => latest,
            Err(err) => {
                warn!(?err, "failed to check latest message");
                false
            }
        })
    }

    /// Add the server to every earlier message. Messages that fail to update
    /// keep their old text.
    async fn extend(&self, previous: &[Announcement], server_name: &str) -> Option<Vec<Announcement>> {
        let updated: Vec<Announcement> = previous
            .iter()
            .map(|a| {
                announce::insert_server(&a.text, server_name).map(|text| Announcement {
                    handle: a.handle,
                    text,
                })
            })
            .collect::<Option<_>>()?;

        let results = join_all(updated.iter().map(|a| self.chat.edit(&a.handle, &a.text))).await;
        Some(
            results
                .into_iter()
                .zip(updated)
                .zip(previous)
                .map(|((res, new), old)| match res {
                    Ok(()) => new,
                    Err(err) => {
                        warn!(?err, channel = old.handle.channel, "failed to edit notification");
                        old.clone()
                    }
                })
                .collect(),
        )
    }

    async fn contributor_names(&self) -> Option<Vec<String>> {
        let directory = self.contributors.as_ref()?;
        match directory.names().await {
            Ok(names) => Some(names),
            Err(err) => {
                warn!(?err, "failed to list contributors");
                None
            }
        }
    }

    async fn mention_for(&self, author: &str) -> Option<Mention> {
        let directory = self.contributors.as_ref()?;
        match directory.chat_user_for(author).await {
            Ok(user) => user.map(|user_id| Mention {
                user_id,
                label: author.to_string(),
            }),
            Err(err) => {
                warn!(?err, author, "failed to look up contributor");
                None
            }
        }
    }

    /// Send to every channel concurrently. Failed deliveries are logged and
    /// left out of the returned handles.
    async fn fan_out(&self, channels: &[i64], message: &OutgoingMessage) -> Vec<MessageHandle> {
        let sends = channels.iter().map(|&channel| async move {
            (channel, self.chat.send(channel, message).await)
        });
        join_all(sends)
            .await
            .into_iter()
            .filter_map(|(channel, res)| match res {
                Ok(handle) => Some(handle),
                Err(err) => {
                    warn!(?err, channel, "failed to deliver notification");
                    None
                }
            })
            .collect()
    }
}
