//! Text and embed composition for build and test-merge notifications.
use crate::chat::Embed;
use crate::model::{BuildEvent, BuildOutcome, ErrorIndicator};
use chrono::Utc;

pub const CHECK_MARK: char = '\u{2705}';
pub const CROSS_MARK: char = '\u{274C}';
const SUCCESS_COLOUR: (u8, u8, u8) = (60, 100, 45);
const FAILURE_COLOUR: (u8, u8, u8) = (150, 60, 45);

// Per-part budgets keeping a full report under Telegram's 4096-character cap.
const LOG_EXCERPT_CHARS: usize = 1800;
const ERROR_EXCERPT_CHARS: usize = 500;
const MESSAGE_EXCERPT_CHARS: usize = 400;
const CONFLICTS_EXCERPT_CHARS: usize = 500;
const ELLIPSIS: char = '\u{2026}';

/// The last `limit` characters of `text`, cut at a line start when possible.
pub fn tail_excerpt(text: &str, limit: usize) -> String {
    let count = text.chars().count();
    if count <= limit {
        return text.to_string();
    }
    let start = text
        .char_indices()
        .nth(count - limit)
        .map_or(text.len(), |(idx, _)| idx);
    let tail = &text[start..];
    let tail = match tail.split_once('\n') {
        Some((_, rest)) if !rest.is_empty() => rest,
        _ => tail,
    };
    format!("{ELLIPSIS} (truncated)\n{tail}")
}

/// The first `limit` characters of `text`, with an ellipsis when cut.
pub fn head_excerpt(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let mut out: String = text.chars().take(limit).collect();
    out.push(ELLIPSIS);
    out
}

pub fn error_report_text(server_name: &str, error: &ErrorIndicator) -> String {
    format!(
        "**ERROR**: {server_name}\n```\n{}\n```",
        head_excerpt(&error.describe(), ERROR_EXCERPT_CHARS)
    )
}

pub fn cancelled_text(ev: &BuildEvent, server_name: &str) -> String {
    format!(
        "**CANCELLED** __{}__ on {server_name} {CROSS_MARK} `{}` by {}: `{}`",
        ev.branch,
        ev.short_commit(),
        ev.author,
        ev.subject()
    )
}

/// Clean-success line; the server list sits right before the check mark.
pub fn success_text(ev: &BuildEvent, server_name: &str) -> String {
    format!(
        "__{}__ on {server_name} {CHECK_MARK} `{}` by {}: `{}`",
        ev.branch,
        ev.short_commit(),
        ev.author,
        ev.subject()
    )
}

pub fn with_quality(text: &str, quality: &str) -> String {
    format!("{text}\nCode quality: {quality}")
}

/// Add `server_name` to the server list of a success message.
///
/// Returns `None` when the text does not contain exactly one check mark.
pub fn insert_server(text: &str, server_name: &str) -> Option<String> {
    let (head, tail) = text.split_once(CHECK_MARK)?;
    if tail.contains(CHECK_MARK) {
        return None;
    }
    let head = head.strip_suffix(' ').unwrap_or(head);
    Some(format!("{head}, {server_name} {CHECK_MARK}{tail}"))
}

fn commit_url(repo: &str, commit: &str) -> String {
    format!("https://github.com/{repo}/commit/{commit}")
}

pub fn pull_url(repo: &str, pr: &str) -> String {
    format!("https://github.com/{repo}/pull/{pr}")
}

/// Rich notification for failed builds and builds with merge conflicts.
pub fn build_report_embed(
    ev: &BuildEvent,
    server_name: &str,
    repo: Option<&str>,
    quality: &str,
) -> Embed {
    let success = ev.outcome() != BuildOutcome::Failure;
    let mut description = format!("```\n{}\n```", tail_excerpt(&ev.compile_log, LOG_EXCERPT_CHARS));
    if !success {
        if let Some(error) = ev.error.text() {
            let error = head_excerpt(error, ERROR_EXCERPT_CHARS);
            if error.trim().contains('\n') {
                description.push_str(&format!("\nError:\n```{error}```"));
            } else {
                description.push_str(&format!("\nError: `{}`", error.trim()));
            }
        }
    }

    let mut embed = Embed {
        title: format!(
            "`{}` on {server_name}: {}",
            ev.branch,
            if success { "succeeded" } else { "failed" }
        ),
        description,
        colour: if success { SUCCESS_COLOUR } else { FAILURE_COLOUR },
        timestamp: Some(Utc::now()),
        image_url: repo.map(|r| format!("https://opengraph.githubassets.com/1/{r}/commit/{}", ev.commit)),
        fields: Vec::new(),
        footer: Some(format!("Code quality: {quality}")),
    };

    let commit = match repo {
        Some(r) => format!("[{}]({})", ev.short_commit(), commit_url(r, &ev.commit)),
        None => format!("`{}`", ev.short_commit()),
    };
    embed.add_field("commit", commit);
    embed.add_field("message", head_excerpt(&ev.message, MESSAGE_EXCERPT_CHARS));
    embed.add_field("author", ev.author.clone());
    if !ev.merge_conflicts.is_empty() {
        let conflicts = ev
            .merge_conflicts
            .iter()
            .map(|c| {
                let pr = c.pr_label();
                match repo {
                    Some(r) => format!(" - [{pr}]({}): {}", pull_url(r, &pr), c.files_label()),
                    None => format!(" - {pr}: {}", c.files_label()),
                }
            })
            .collect::<Vec<_>>()
            .join("\n");
        embed.add_field("merge conflicts", head_excerpt(&conflicts, CONFLICTS_EXCERPT_CHARS));
    }
    embed
}

/// Announcement posted to test-merge channels after a test-merge change.
pub fn testmerge_announcement(
    headline: &str,
    repo: Option<&str>,
    pr: i64,
    server_names: &[String],
    commit: Option<&str>,
) -> String {
    let repo = repo.unwrap_or("unknown/unknown");
    let pr_link = pull_url(repo, &pr.to_string());
    let mut msg = format!("{headline}\n{pr_link}\n");
    if let Some(commit) = commit {
        msg.push_str(&format!("on commit {pr_link}/commits/{commit}\n"));
    }
    if !server_names.is_empty() {
        msg.push_str("on servers ");
        msg.push_str(&server_names.join(" "));
    }
    msg.trim_end().to_string()
}
