//! `/ci` chat commands: parsing and execution against the CI service.
use crate::announce::{self, pull_url, CHECK_MARK, CROSS_MARK};
use crate::chat::{ChatService, Embed, OutgoingMessage};
use crate::ci::{CiError, CiService, TestMergeRequest};
use crate::db::{self, ChannelKind};
use crate::model::ServerInfo;
use crate::servers::ServerDirectory;
use crate::testmerge;
use anyhow::Result;
use serde_json::Value;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Longest chunk sent as a single chat message.
const MESSAGE_LIMIT: usize = 2000;
const DEFAULT_TESTMERGE_TARGET: &str = "standard";
const NO_REBUILD_NOTE: &str = "Note that this does not retrigger a build. Consider using `/ci build`.";
const SUCCESS_NOTE: &str =
    "Success - note that this does not retrigger a build. Consider using `/ci build`.";
const UPDATED_ARROWS: char = '\u{1F504}';

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Status,
    Stats,
    Build(Vec<String>),
    Cancel(Vec<String>),
    Restart(String),
    Branch { server: String, branch: Option<String> },
    SetRepo(String),
    AddChannel(ChannelKind, Option<i64>),
    RemoveChannel(ChannelKind, Option<i64>),
    CheckChannels(ChannelKind),
    /// Link a commit author to a chat user for failure mentions.
    Link { login: String, user: Option<i64> },
    TmList { server: Option<String>, verbose: bool },
    TmMerge { pr: i64, server: Option<String>, commit: Option<String> },
    TmUpdate { pr: i64, server: Option<String>, commit: Option<String> },
    TmCancel { pr: i64, server: Option<String> },
}

pub const USAGE: &str = "\
/ci status | stats
/ci build <servers...> | cancel <servers...> | restart <server>
/ci branch <server> [branch]
/ci setrepo <owner/repo>
/ci addchannel | removechannel [chat id] | checkchannels
/ci link <github login> [user id]
/ci tm list [server] | listverbose [server]
/ci tm merge <pr> [server] [commit] | update <pr> [server] [commit] | cancel <pr> [server]
/ci tm addchannel | removechannel [chat id] | checkchannels";

/// Parse a message. `Ok(None)` means the text is not a `/ci` command; `Err`
/// carries a usage hint for malformed commands.
pub fn parse_command(text: &str) -> Result<Option<Command>, String> {
    let mut words = text.split_whitespace();
    match words.next() {
        Some("/ci") => {}
        _ => return Ok(None),
    }
    let args: Vec<&str> = words.collect();
    let usage = || format!("Usage:\n{USAGE}");
    let owned = |s: &&str| s.to_string();

    let cmd = match args.as_slice() {
        [] | ["help"] => Command::Help,
        ["status"] | ["check"] => Command::Status,
        ["stats"] => Command::Stats,
        ["build", servers @ ..] if !servers.is_empty() => {
            Command::Build(servers.iter().map(owned).collect())
        }
        ["cancel", servers @ ..] if !servers.is_empty() => {
            Command::Cancel(servers.iter().map(owned).collect())
        }
        ["restart", server] => Command::Restart(server.to_string()),
        ["branch", server] => Command::Branch {
            server: server.to_string(),
            branch: None,
        },
        ["branch", server, branch] => Command::Branch {
            server: server.to_string(),
            branch: Some(branch.to_string()),
        },
        ["setrepo", repo] => Command::SetRepo(repo.to_string()),
        ["addchannel", rest @ ..] => Command::AddChannel(ChannelKind::Build, chat_arg(rest)?),
        ["removechannel", rest @ ..] => {
            Command::RemoveChannel(ChannelKind::Build, chat_arg(rest)?)
        }
        ["checkchannels"] => Command::CheckChannels(ChannelKind::Build),
        ["link", login, rest @ ..] => Command::Link {
            login: login.to_string(),
            user: chat_arg(rest)?,
        },
        ["tm" | "testmerge", rest @ ..] => parse_testmerge(rest).ok_or_else(usage)?,
        _ => return Err(usage()),
    };
    Ok(Some(cmd))
}

fn chat_arg(rest: &[&str]) -> Result<Option<i64>, String> {
    match rest {
        [] => Ok(None),
        [id] => id
            .parse()
            .map(Some)
            .map_err(|_| format!("`{id}` is not a chat id.")),
        _ => Err(format!("Usage:\n{USAGE}")),
    }
}

fn parse_testmerge(args: &[&str]) -> Option<Command> {
    let opt = |s: Option<&&str>| s.map(|s| s.to_string());
    let cmd = match args {
        ["list", rest @ ..] if rest.len() <= 1 => Command::TmList {
            server: opt(rest.first()),
            verbose: false,
        },
        ["listverbose", rest @ ..] if rest.len() <= 1 => Command::TmList {
            server: opt(rest.first()),
            verbose: true,
        },
        ["merge", pr, rest @ ..] if rest.len() <= 2 => Command::TmMerge {
            pr: pr.parse().ok()?,
            server: opt(rest.first()),
            commit: opt(rest.get(1)),
        },
        ["update", pr, rest @ ..] if rest.len() <= 2 => Command::TmUpdate {
            pr: pr.parse().ok()?,
            server: opt(rest.first()),
            commit: opt(rest.get(1)),
        },
        ["cancel", pr, rest @ ..] if rest.len() <= 1 => Command::TmCancel {
            pr: pr.parse().ok()?,
            server: opt(rest.first()),
        },
        ["addchannel", rest @ ..] => Command::AddChannel(ChannelKind::TestMerge, chat_arg(rest).ok()?),
        ["removechannel", rest @ ..] => {
            Command::RemoveChannel(ChannelKind::TestMerge, chat_arg(rest).ok()?)
        }
        ["checkchannels"] => Command::CheckChannels(ChannelKind::TestMerge),
        _ => return None,
    };
    Some(cmd)
}

/// Who invoked a command and where.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Invocation {
    pub chat_id: i64,
    pub user_id: i64,
}

/// Messages to send back to the invoking chat.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reply {
    pub messages: Vec<OutgoingMessage>,
    /// Every targeted server accepted the request.
    pub ack: bool,
}

impl Reply {
    fn text(text: impl Into<String>) -> Self {
        let mut reply = Self::default();
        reply.say(text);
        reply
    }

    fn say(&mut self, text: impl Into<String>) {
        for chunk in pagify(&text.into(), MESSAGE_LIMIT) {
            self.messages.push(OutgoingMessage::text(chunk));
        }
    }

    pub fn texts(&self) -> Vec<&str> {
        self.messages.iter().filter_map(OutgoingMessage::as_text).collect()
    }
}

/// Split text into chunks of at most `limit` characters, preferring line breaks.
pub fn pagify(text: &str, limit: usize) -> Vec<String> {
    let mut pages = Vec::new();
    let mut current = String::new();
    for line in text.split_inclusive('\n') {
        let mut line = line;
        while !line.is_empty() {
            let room = limit - current.chars().count();
            let take: usize = line.chars().take(room).map(char::len_utf8).sum();
            if take < line.len() && !current.is_empty() {
                pages.push(std::mem::take(&mut current));
                continue;
            }
            current.push_str(&line[..take]);
            line = &line[take..];
            if current.chars().count() >= limit {
                pages.push(std::mem::take(&mut current));
            }
        }
    }
    let current = current.trim_end_matches('\n');
    if !current.is_empty() {
        pages.push(current.to_string());
    }
    pages
        .into_iter()
        .map(|p| p.trim_end_matches('\n').to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

fn format_stat(key: &str, value: &Value) -> (String, String) {
    let readable_key = key.replace('_', " ");
    let readable_value = match (key, value.as_f64()) {
        ("average_build_duration", Some(ms)) => {
            let secs = ms / 1000.0;
            let minutes = (secs / 60.0).floor() as i64;
            format!("{}:{}", minutes, (secs % 60.0) as i64)
        }
        _ => match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        },
    };
    (readable_key, readable_value)
}

pub struct CommandRunner {
    ci: Arc<dyn CiService>,
    servers: Arc<dyn ServerDirectory>,
    chat: Arc<dyn ChatService>,
    pool: SqlitePool,
}

impl CommandRunner {
    pub fn new(
        ci: Arc<dyn CiService>,
        servers: Arc<dyn ServerDirectory>,
        chat: Arc<dyn ChatService>,
        pool: SqlitePool,
    ) -> Self {
        Self {
            ci,
            servers,
            chat,
            pool,
        }
    }

    #[instrument(skip_all, fields(chat = inv.chat_id, user = inv.user_id))]
    pub async fn execute(&self, cmd: Command, inv: Invocation) -> Result<Reply> {
        info!(?cmd, "running command");
        match cmd {
            Command::Help => Ok(Reply::text(USAGE)),
            Command::Status => Ok(self.status().await),
            Command::Stats => Ok(self.stats().await),
            Command::Build(names) => Ok(self.fleet_action(&names, FleetAction::Build).await),
            Command::Cancel(names) => Ok(self.fleet_action(&names, FleetAction::Cancel).await),
            Command::Restart(name) => {
                Ok(self.fleet_action(&[name], FleetAction::Restart).await)
            }
            Command::Branch { server, branch } => Ok(self.branch(&server, branch.as_deref()).await),
            Command::SetRepo(repo) => {
                db::set_repo(&self.pool, &repo).await?;
                Ok(Reply::text(format!("Repo set to `{repo}`.")))
            }
            Command::AddChannel(kind, chat) => {
                let chat = chat.unwrap_or(inv.chat_id);
                db::add_channel(&self.pool, kind, chat).await?;
                Ok(Reply::text(format!(
                    "Channel {chat} will now receive notifications about {}.",
                    kind.topic()
                )))
            }
            Command::RemoveChannel(kind, chat) => {
                let chat = chat.unwrap_or(inv.chat_id);
                if db::remove_channel(&self.pool, kind, chat).await? {
                    Ok(Reply::text(format!(
                        "Channel {chat} will no longer receive notifications about {}.",
                        kind.topic()
                    )))
                } else {
                    Ok(Reply::text(format!("Channel {chat} was not subscribed.")))
                }
            }
            Command::CheckChannels(kind) => {
                let channels = db::list_channels(&self.pool, kind).await?;
                if channels.is_empty() {
                    Ok(Reply::text("No channels."))
                } else {
                    let lines: Vec<String> = channels.iter().map(i64::to_string).collect();
                    Ok(Reply::text(lines.join("\n")))
                }
            }
            Command::Link { login, user } => {
                let user = user.unwrap_or(inv.user_id);
                db::upsert_contributor(&self.pool, &login, Some(user)).await?;
                Ok(Reply::text(format!("`{login}` is now linked to user {user}.")))
            }
            Command::TmList { server, verbose } => self.tm_list(server.as_deref(), verbose).await,
            Command::TmMerge { pr, server, commit } => {
                self.tm_change(TmChange::Merge, pr, server, commit, inv).await
            }
            Command::TmUpdate { pr, server, commit } => {
                self.tm_change(TmChange::Update, pr, server, commit, inv).await
            }
            Command::TmCancel { pr, server } => {
                self.tm_change(TmChange::Cancel, pr, server, None, inv).await
            }
        }
    }

    fn server_label(&self, server_id: &str) -> String {
        match self.servers.resolve_server(server_id) {
            Some(server) => format!("__{}__", server.short_name),
            None => format!("__Unknown server {server_id}__"),
        }
    }

    fn short_name(&self, server_id: &str) -> String {
        self.servers
            .resolve_server(server_id)
            .map(|s| s.short_name)
            .unwrap_or_else(|| server_id.to_string())
    }

    /// Servers named by each word, deduplicated in order of first mention.
    fn resolve_many(&self, names: &[String]) -> Vec<ServerInfo> {
        let mut servers: Vec<ServerInfo> = Vec::new();
        for name in names.iter().flat_map(|n| n.split_whitespace()) {
            for server in self.servers.resolve_server_or_category(name) {
                if !servers.contains(&server) {
                    servers.push(server);
                }
            }
        }
        servers
    }

    async fn status(&self) -> Reply {
        let status = match self.ci.status().await {
            Ok(status) => status,
            Err(err) => return Reply::text(err.to_string()),
        };
        let max_jobs = match &status.max_compile_jobs {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => "N/A".to_string(),
            Some(other) => other.to_string(),
        };
        let mut lines = vec![format!("Max compile jobs: {max_jobs}")];
        let list = |jobs: &[Option<crate::ci::JobRef>]| {
            jobs.iter()
                .flatten()
                .map(|job| self.server_label(job.server_id()))
                .collect::<Vec<_>>()
        };
        let current = list(status.current_compile_jobs.as_slice());
        if current.is_empty() {
            lines.push("No jobs currently running".to_string());
        } else {
            lines.push(format!("Currently compiling: {}", current.join(", ")));
        }
        let queued = list(status.queued_jobs.as_slice());
        if queued.is_empty() {
            lines.push("No jobs queued".to_string());
        } else {
            lines.push(format!("Queued: {}", queued.join(", ")));
        }
        Reply::text(lines.join("\n"))
    }

    async fn stats(&self) -> Reply {
        let stats = match self.ci.stats().await {
            Ok(stats) => stats,
            Err(err) => return Reply::text(err.to_string()),
        };
        let mut embed = Embed {
            title: "CI Stats".to_string(),
            ..Default::default()
        };
        for (key, value) in &stats {
            let (name, value) = format_stat(key, value);
            embed.add_field(name, value);
        }
        Reply {
            messages: vec![OutgoingMessage::rich(embed, None)],
            ack: false,
        }
    }

    async fn fleet_action(&self, names: &[String], action: FleetAction) -> Reply {
        let servers = self.resolve_many(names);
        if servers.is_empty() {
            return Reply::text("Unknown server.");
        }
        let mut reply = Reply::default();
        let mut all_ok = true;
        for server in &servers {
            let res = match action {
                FleetAction::Build => self.ci.build(&server.tgs).await,
                FleetAction::Cancel => self.ci.cancel(&server.tgs).await,
                FleetAction::Restart => self.ci.restart(&server.tgs).await,
            };
            if let Err(err) = res {
                warn!(?err, server = %server.tgs, "CI {} failed", action.as_str());
                let detail = match err {
                    CiError::Unsuccessful(body) => format!("Idk what happened: `{body}`"),
                    other => other.to_string(),
                };
                reply.say(format!("`{}`: {detail}", server.tgs));
                all_ok = false;
            }
        }
        reply.ack = all_ok;
        reply
    }

    async fn branch(&self, name: &str, new_branch: Option<&str>) -> Reply {
        let servers = self.servers.resolve_server_or_category(name);
        if servers.is_empty() {
            return Reply::text("Unknown server.");
        }
        let mut output = Vec::new();
        for server in &servers {
            let old_branch = match self.ci.branch(&server.tgs).await {
                Ok(branch) => branch.unwrap_or_else(|| "unknown?".to_string()),
                Err(err) => {
                    output.push(format!("{}: {err}", server.short_name));
                    continue;
                }
            };
            let line = match new_branch {
                Some(new_branch) => match self.ci.switch_branch(&server.tgs, new_branch).await {
                    Ok(()) => format!("branch changed from `{old_branch}` to `{new_branch}`"),
                    Err(err) => err.to_string(),
                },
                None => format!("branch is `{old_branch}`"),
            };
            output.push(format!("{}: {line}", server.short_name));
        }
        if new_branch.is_some() {
            output.push(NO_REBUILD_NOTE.to_string());
        }
        Reply::text(output.join("\n"))
    }

    async fn tm_list(&self, server_name: Option<&str>, verbose: bool) -> Result<Reply> {
        let server = match server_name {
            Some(name) => match self.servers.resolve_server(name) {
                Some(server) => Some(server),
                None => return Ok(Reply::text("Unknown server.")),
            },
            None => None,
        };
        let Some(repo) = db::get_repo(&self.pool).await? else {
            return Ok(Reply::text("Repo is not set. Use `/ci setrepo <owner/repo>` first."));
        };
        let records = match self.ci.test_merges(server.as_ref().map(|s| s.tgs.as_str())).await {
            Ok(records) => records,
            Err(err) => return Ok(Reply::text(err.to_string())),
        };
        if records.is_empty() {
            return Ok(Reply::text(match &server {
                Some(server) => format!("No testmerges active on {}", server.short_name),
                None => "No testmerges active".to_string(),
            }));
        }

        let mut groups = testmerge::reconcile_test_merges(records);
        for group in &mut groups {
            group.servers = group.servers.iter().map(|id| self.short_name(id)).collect();
        }
        let title = match &server {
            Some(server) => format!("Testmerges of {}", server.short_name),
            None => "Testmerges".to_string(),
        };
        let pages = testmerge::paginate(
            groups.iter().map(|g| testmerge::render_entry(g, &repo)),
            &title,
        );
        let mut reply = Reply {
            messages: pages
                .into_iter()
                .map(|page| OutgoingMessage::rich(page, None))
                .collect(),
            ack: false,
        };
        if verbose {
            let mut links: Vec<String> = Vec::new();
            for group in &groups {
                let link = pull_url(&repo, &group.record.pr.to_string());
                if !links.contains(&link) {
                    links.push(link);
                }
            }
            reply.say(links.join("\n"));
        }
        Ok(reply)
    }

    async fn tm_change(
        &self,
        change: TmChange,
        pr: i64,
        server_name: Option<String>,
        commit: Option<String>,
        inv: Invocation,
    ) -> Result<Reply> {
        let name = server_name.as_deref().unwrap_or(DEFAULT_TESTMERGE_TARGET);
        let servers = self.servers.resolve_server_or_category(name);
        if servers.is_empty() {
            return Ok(Reply::text("Unknown server."));
        }
        if commit.as_ref().is_some_and(|c| c.chars().count() != 40) {
            return Ok(Reply::text("Error: That is not a full commit hash."));
        }

        let mut reply = Reply::default();
        let mut succeeded: Vec<String> = Vec::new();
        for server in &servers {
            let req = TestMergeRequest {
                pr,
                server: server.tgs.clone(),
                requester: matches!(change, TmChange::Merge).then(|| format!("@{}", inv.user_id)),
                updater: matches!(change, TmChange::Update).then(|| format!("@{}", inv.user_id)),
                commit: commit.clone(),
            };
            let res = match change {
                TmChange::Merge => self.ci.create_test_merge(&req).await,
                TmChange::Update => self.ci.update_test_merge(&req).await,
                TmChange::Cancel => self.ci.delete_test_merge(&req).await,
            };
            match res {
                Ok(()) => succeeded.push(server.short_name.clone()),
                Err(err) => {
                    warn!(?err, pr, server = %server.tgs, "test-merge request failed");
                    reply.say(format!("{}: {err}", server.short_name));
                }
            }
        }
        if succeeded.len() == servers.len() {
            reply.ack = true;
            reply.say(SUCCESS_NOTE);
        }
        if !succeeded.is_empty() {
            self.announce_testmerge(change, pr, &succeeded, commit.as_deref())
                .await?;
        }
        Ok(reply)
    }

    async fn announce_testmerge(
        &self,
        change: TmChange,
        pr: i64,
        servers: &[String],
        commit: Option<&str>,
    ) -> Result<()> {
        let channels = db::list_channels(&self.pool, ChannelKind::TestMerge).await?;
        if channels.is_empty() {
            return Ok(());
        }
        let repo = db::get_repo(&self.pool).await?;
        let text = announce::testmerge_announcement(
            &change.headline(),
            repo.as_deref(),
            pr,
            servers,
            commit,
        );
        let message = OutgoingMessage::text(text);
        for channel in channels {
            if let Err(err) = self.chat.send(channel, &message).await {
                warn!(?err, channel, "failed to announce test-merge");
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FleetAction {
    Build,
    Cancel,
    Restart,
}

impl FleetAction {
    fn as_str(&self) -> &'static str {
        match self {
            FleetAction::Build => "build",
            FleetAction::Cancel => "cancel",
            FleetAction::Restart => "restart",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TmChange {
    Merge,
    Update,
    Cancel,
}

impl TmChange {
    fn headline(&self) -> String {
        match self {
            TmChange::Merge => format!("{CHECK_MARK} **New** testmerge"),
            TmChange::Update => format!("{UPDATED_ARROWS} **Updated** testmerge"),
            TmChange::Cancel => format!("{CROSS_MARK} **Cancelled** testmerge"),
        }
    }
}
