//! Storage models used by repositories.
//!
//! Keep these focused on the data returned by queries. Notification logic
//! lives in higher layers.

use serde::{Deserialize, Serialize};

/// Which notification stream a subscribed chat receives.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    Build,
    TestMerge,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Build => "build",
            ChannelKind::TestMerge => "testmerge",
        }
    }

    /// Noun used in subscription replies.
    pub fn topic(&self) -> &'static str {
        match self {
            ChannelKind::Build => "builds",
            ChannelKind::TestMerge => "testmerges",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Contributor {
    pub login: String,
    pub chat_user_id: Option<i64>,
}
