#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;
use wireci_relay::chat::{ChatService, MessageHandle, OutgoingMessage};
use wireci_relay::ci::{CiError, CiService, CiStatus, TestMergeRequest};
use wireci_relay::contributors::ContributorDirectory;
use wireci_relay::model::{BuildEvent, ErrorIndicator, ServerInfo, TestMergeRecord};

pub async fn setup_pool() -> sqlx::SqlitePool {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}

pub fn servers() -> Vec<ServerInfo> {
    let server = |id: &str, short: &str, aliases: &[&str], categories: &[&str]| ServerInfo {
        id: id.to_string(),
        short_name: short.to_string(),
        tgs: id.to_string(),
        aliases: aliases.iter().map(|a| a.to_string()).collect(),
        categories: categories.iter().map(|c| c.to_string()).collect(),
    };
    vec![
        server("main1", "Goon 1", &["1"], &["standard", "main"]),
        server("main2", "Goon 2", &["2"], &["standard", "main"]),
        server("main3", "Goon RP", &["3", "rp"], &["rp"]),
    ]
}

pub const COMMIT: &str = "0123456789abcdef0123456789abcdef01234567";

pub fn event(server: &str) -> BuildEvent {
    BuildEvent {
        server: server.to_string(),
        commit: COMMIT.to_string(),
        branch: "master".to_string(),
        author: "pali".to_string(),
        message: "Fix the thing\n\nLonger body".to_string(),
        compile_log: "compiled in 3m".to_string(),
        error: ErrorIndicator::Flag(false),
        cancelled: false,
        merge_conflicts: Vec::new(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sent {
    pub handle: MessageHandle,
    pub message: OutgoingMessage,
}

#[derive(Default)]
struct ChatLog {
    next_id: i32,
    latest: HashMap<i64, i32>,
    sent: Vec<Sent>,
    edits: Vec<(MessageHandle, String)>,
    failing_sends: HashSet<i64>,
    failing_edits: HashSet<i64>,
}

/// In-memory chat that numbers messages per process and tracks the newest
/// message of each channel.
#[derive(Clone, Default)]
pub struct RecordingChat {
    log: Arc<Mutex<ChatLog>>,
    emojis: Option<Vec<String>>,
}

impl RecordingChat {
    pub fn with_emojis(emojis: Vec<String>) -> Self {
        Self {
            emojis: Some(emojis),
            ..Default::default()
        }
    }

    /// Someone else talks in the channel.
    pub async fn foreign_message(&self, channel: i64) {
        let mut log = self.log.lock().await;
        log.next_id += 1;
        let id = log.next_id;
        log.latest.insert(channel, id);
    }

    pub async fn fail_sends_to(&self, channel: i64) {
        self.log.lock().await.failing_sends.insert(channel);
    }

    pub async fn fail_edits_in(&self, channel: i64) {
        self.log.lock().await.failing_edits.insert(channel);
    }

    pub async fn sent(&self) -> Vec<Sent> {
        self.log.lock().await.sent.clone()
    }

    pub async fn sent_texts(&self) -> Vec<String> {
        self.sent()
            .await
            .iter()
            .filter_map(|s| s.message.as_text().map(str::to_owned))
            .collect()
    }

    pub async fn edits(&self) -> Vec<(MessageHandle, String)> {
        self.log.lock().await.edits.clone()
    }
}

#[async_trait]
impl ChatService for RecordingChat {
    async fn send(&self, channel: i64, message: &OutgoingMessage) -> Result<MessageHandle> {
        let mut log = self.log.lock().await;
        if log.failing_sends.contains(&channel) {
            return Err(anyhow!("channel {channel} is unreachable"));
        }
        log.next_id += 1;
        let handle = MessageHandle {
            channel,
            message_id: log.next_id,
        };
        log.latest.insert(channel, handle.message_id);
        log.sent.push(Sent {
            handle,
            message: message.clone(),
        });
        Ok(handle)
    }

    async fn edit(&self, handle: &MessageHandle, text: &str) -> Result<()> {
        let mut log = self.log.lock().await;
        if log.failing_edits.contains(&handle.channel) {
            return Err(anyhow!("edit rejected"));
        }
        log.edits.push((*handle, text.to_string()));
        Ok(())
    }

    async fn is_latest(&self, handle: &MessageHandle) -> Result<bool> {
        let log = self.log.lock().await;
        Ok(log.latest.get(&handle.channel) == Some(&handle.message_id))
    }

    async fn custom_emojis(&self, _channel: i64) -> Option<Vec<String>> {
        self.emojis.clone()
    }
}

#[derive(Clone, Default)]
pub struct FakeContributors {
    pub links: HashMap<String, i64>,
    pub lookups: Arc<Mutex<Vec<String>>>,
}

impl FakeContributors {
    pub fn linked(login: &str, user: i64) -> Self {
        Self {
            links: HashMap::from([(login.to_string(), user)]),
            ..Default::default()
        }
    }

    pub async fn lookups(&self) -> Vec<String> {
        self.lookups.lock().await.clone()
    }
}

#[async_trait]
impl ContributorDirectory for FakeContributors {
    async fn chat_user_for(&self, author: &str) -> Result<Option<i64>> {
        self.lookups.lock().await.push(author.to_string());
        Ok(self.links.get(author).copied())
    }

    async fn names(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.links.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}

/// A CI call as seen by the fake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CiCall {
    Build(String),
    Cancel(String),
    Restart(String),
    Branch(String),
    SwitchBranch(String, String),
    TestMerges(Option<String>),
    Create(TestMergeRequest),
    Update(TestMergeRequest),
    Delete(TestMergeRequest),
}

#[derive(Clone, Default)]
pub struct FakeCi {
    pub calls: Arc<Mutex<Vec<CiCall>>>,
    /// Servers whose requests fail with the given error factory.
    pub failing: Arc<Mutex<HashMap<String, fn() -> CiError>>>,
    pub records: Arc<Mutex<VecDeque<Vec<TestMergeRecord>>>>,
    pub status: CiStatus,
    pub stats: Map<String, Value>,
}

impl FakeCi {
    pub async fn fail(&self, server: &str, err: fn() -> CiError) {
        self.failing.lock().await.insert(server.to_string(), err);
    }

    pub async fn queue_records(&self, records: Vec<TestMergeRecord>) {
        self.records.lock().await.push_back(records);
    }

    pub async fn calls(&self) -> Vec<CiCall> {
        self.calls.lock().await.clone()
    }

    async fn record(&self, call: CiCall, server: &str) -> Result<(), CiError> {
        self.calls.lock().await.push(call);
        match self.failing.lock().await.get(server) {
            Some(err) => Err(err()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl CiService for FakeCi {
    async fn status(&self) -> Result<CiStatus, CiError> {
        Ok(self.status.clone())
    }

    async fn stats(&self) -> Result<Map<String, Value>, CiError> {
        Ok(self.stats.clone())
    }

    async fn build(&self, server: &str) -> Result<(), CiError> {
        self.record(CiCall::Build(server.into()), server).await
    }

    async fn cancel(&self, server: &str) -> Result<(), CiError> {
        self.record(CiCall::Cancel(server.into()), server).await
    }

    async fn restart(&self, server: &str) -> Result<(), CiError> {
        self.record(CiCall::Restart(server.into()), server).await
    }

    async fn branch(&self, server: &str) -> Result<Option<String>, CiError> {
        self.record(CiCall::Branch(server.into()), server).await?;
        Ok(Some("master".to_string()))
    }

    async fn switch_branch(&self, server: &str, branch: &str) -> Result<(), CiError> {
        self.record(CiCall::SwitchBranch(server.into(), branch.into()), server)
            .await
    }

    async fn test_merges(&self, server: Option<&str>) -> Result<Vec<TestMergeRecord>, CiError> {
        self.record(CiCall::TestMerges(server.map(str::to_owned)), server.unwrap_or(""))
            .await?;
        Ok(self.records.lock().await.pop_front().unwrap_or_default())
    }

    async fn create_test_merge(&self, req: &TestMergeRequest) -> Result<(), CiError> {
        self.record(CiCall::Create(req.clone()), &req.server).await
    }

    async fn update_test_merge(&self, req: &TestMergeRequest) -> Result<(), CiError> {
        self.record(CiCall::Update(req.clone()), &req.server).await
    }

    async fn delete_test_merge(&self, req: &TestMergeRequest) -> Result<(), CiError> {
        self.record(CiCall::Delete(req.clone()), &req.server).await
    }
}
