//! Grouping and paginated rendering of active test-merges.
use crate::announce::pull_url;
use crate::chat::Embed;
use crate::model::{short_hash, TestMergeRecord};
use chrono::{DateTime, Utc};

/// Timestamps closer than this are treated as the same moment.
pub const SIMILARITY_WINDOW_SECS: i64 = 30 * 60;
/// Rendered characters that fit on one page.
pub const PAGE_CAPACITY: usize = 4000;
const NBSP: char = '\u{00A0}';

/// Consecutive test-merges of one PR that differ only by server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestMergeGroup {
    pub record: TestMergeRecord,
    /// Servers in arrival order. Empty for fleet-wide test-merges.
    pub servers: Vec<String>,
}

impl TestMergeGroup {
    pub fn is_global(&self) -> bool {
        self.record.server.is_none()
    }
}

fn dates_similar(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => (a - b).num_seconds().abs() <= SIMILARITY_WINDOW_SECS,
        (None, None) => true,
        _ => false,
    }
}

/// Whether `b` can join a group started by `a`. Compares every field except
/// the server, with a tolerance window on timestamps. Fleet-wide records
/// never merge.
pub fn mergeable(a: &TestMergeRecord, b: &TestMergeRecord) -> bool {
    a.server.is_some()
        && b.server.is_some()
        && a.pr == b.pr
        && a.requester == b.requester
        && a.updater == b.updater
        && a.commit == b.commit
        && dates_similar(a.created_at, b.created_at)
        && dates_similar(a.updated_at, b.updated_at)
}

/// Fold records left to right, comparing each only with the group before it.
pub fn reconcile_test_merges(records: Vec<TestMergeRecord>) -> Vec<TestMergeGroup> {
    let mut groups: Vec<TestMergeGroup> = Vec::new();
    for record in records {
        if let Some(last) = groups.last_mut() {
            if mergeable(&last.record, &record) {
                if let Some(server) = record.server {
                    last.servers.push(server);
                }
                continue;
            }
        }
        groups.push(TestMergeGroup {
            servers: record.server.iter().cloned().collect(),
            record,
        });
    }
    groups
}

fn format_time(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M UTC").to_string()
}

/// One display entry, newline terminated.
pub fn render_entry(group: &TestMergeGroup, repo: &str) -> String {
    let rec = &group.record;
    let pr_link = pull_url(repo, &rec.pr.to_string());
    let mut text = format!("[{}]({pr_link})", rec.pr);
    if group.is_global() {
        text.push_str(" on all servers");
    } else {
        text.push_str(" on ");
        text.push_str(&group.servers.join(", "));
    }
    if let Some(requester) = &rec.requester {
        text.push_str(&format!(" by {requester}"));
    }
    if let Some(created) = rec.created_at {
        text.push_str(&format!(" on {}", format_time(created)));
    }
    if let Some(commit) = &rec.commit {
        text.push_str(&format!(" [{}]({pr_link}/commits/{commit})", short_hash(commit)));
    }
    text.push('\n');
    if rec.updater.is_some() || rec.updated_at.is_some() {
        text.extend(std::iter::repeat(NBSP).take(5));
        text.push_str("updated");
        if let Some(updater) = &rec.updater {
            text.push_str(&format!(" by {updater}"));
        }
        if let Some(updated) = rec.updated_at {
            text.push_str(&format!(" on {}", format_time(updated)));
        }
        text.push('\n');
    }
    text
}

/// Pack entries into pages. An entry that would reach the capacity starts a
/// new page; entries are never split. Pages get `i/n` footers.
pub fn paginate<I>(entries: I, title: &str) -> Vec<Embed>
where
    I: IntoIterator<Item = String>,
{
    let mut pages = Vec::new();
    let mut current: Option<Embed> = None;
    let mut size = 0usize;
    for entry in entries {
        let len = entry.chars().count();
        if size + len >= PAGE_CAPACITY {
            if let Some(page) = current.take() {
                pages.push(page);
            }
            size = 0;
        }
        let page = current.get_or_insert_with(|| {
            size += title.chars().count();
            Embed {
                title: title.to_string(),
                ..Default::default()
            }
        });
        size += len;
        page.description.push_str(&entry);
    }
    pages.extend(current);
    let total = pages.len();
    for (i, page) in pages.iter_mut().enumerate() {
        page.footer = Some(format!("{}/{}", i + 1, total));
    }
    pages
}
