use crate::model::TestMergeRecord;
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;
use thiserror::Error;
use tracing::{debug, instrument};

/// How much of an upstream error body is echoed back to chat.
const ERROR_BODY_LIMIT: usize = 100;

#[derive(Debug, Error)]
pub enum CiError {
    #[error("Server responded with an error code {status}: `{body}`")]
    Status { status: u16, body: String },
    #[error("Build not found")]
    NotFound,
    /// The CI service refused the request and said why.
    #[error("{0}")]
    Rejected(String),
    #[error("Unknown response: `{0}`")]
    Unsuccessful(String),
    #[error("CI request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("invalid CI URL: {0}")]
    Url(#[from] url::ParseError),
}

pub fn truncate(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect()
}

/// A compile job reference: either a bare server id or a job object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum JobRef {
    Server(String),
    Job {
        #[serde(rename = "serverId")]
        server_id: String,
    },
}

impl JobRef {
    pub fn server_id(&self) -> &str {
        match self {
            JobRef::Server(id) => id,
            JobRef::Job { server_id } => server_id,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CiStatus {
    #[serde(default)]
    pub max_compile_jobs: Option<Value>,
    #[serde(default)]
    pub current_compile_jobs: Vec<Option<JobRef>>,
    #[serde(default)]
    pub queued_jobs: Vec<Option<JobRef>>,
}

/// Body for creating, updating or cancelling a test-merge on one server.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TestMergeRequest {
    pub pr: i64,
    pub server: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requester: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updater: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
}

#[async_trait]
pub trait CiService: Send + Sync {
    async fn status(&self) -> Result<CiStatus, CiError>;

    async fn stats(&self) -> Result<Map<String, Value>, CiError>;

    async fn build(&self, server: &str) -> Result<(), CiError>;

    async fn cancel(&self, server: &str) -> Result<(), CiError>;

    async fn restart(&self, server: &str) -> Result<(), CiError>;

    async fn branch(&self, server: &str) -> Result<Option<String>, CiError>;

    async fn switch_branch(&self, server: &str, branch: &str) -> Result<(), CiError>;

    /// Active test-merges on one server, or everywhere when `server` is `None`.
    async fn test_merges(&self, server: Option<&str>) -> Result<Vec<TestMergeRecord>, CiError>;

    async fn create_test_merge(&self, req: &TestMergeRequest) -> Result<(), CiError>;

    async fn update_test_merge(&self, req: &TestMergeRequest) -> Result<(), CiError>;

    async fn delete_test_merge(&self, req: &TestMergeRequest) -> Result<(), CiError>;
}

#[derive(Clone)]
pub struct HttpCiClient {
    http: Client,
    base_url: Url,
    api_key: String,
}

impl fmt::Debug for HttpCiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpCiClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl HttpCiClient {
    pub fn new(base_url: &str, api_key: String) -> Result<Self, CiError> {
        let mut base_url = Url::parse(base_url)?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let http = Client::builder()
            .user_agent("wireci-relay/0.1")
            .no_proxy()
            .build()?;
        Ok(Self {
            http,
            base_url,
            api_key,
        })
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, CiError> {
        let url = self.base_url.join(path)?;
        debug!(%method, %url, "CI request");
        Ok(self
            .http
            .request(method, url)
            .header("Api-Key", &self.api_key))
    }

    /// Fail on any status other than 200 OK, keeping a short body excerpt.
    async fn checked(res: Response) -> Result<Response, CiError> {
        if res.status() == StatusCode::OK {
            return Ok(res);
        }
        let status = res.status().as_u16();
        let body = res.text().await.unwrap_or_default();
        Err(CiError::Status {
            status,
            body: truncate(&body, ERROR_BODY_LIMIT),
        })
    }

    /// Decode a `{ "success": ... }` acknowledgement.
    async fn acknowledged(res: Response) -> Result<(), CiError> {
        let body = res.text().await?;
        let data: Value = serde_json::from_str(&body).unwrap_or(Value::Null);
        if data.get("success").and_then(Value::as_bool).unwrap_or(false) {
            Ok(())
        } else {
            Err(CiError::Unsuccessful(truncate(&body, ERROR_BODY_LIMIT)))
        }
    }

    async fn server_action(&self, path: &str, server: &str) -> Result<Response, CiError> {
        Ok(self
            .request(Method::POST, path)?
            .json(&json!({ "server": server }))
            .send()
            .await?)
    }

    async fn test_merge_call(&self, method: Method, req: &TestMergeRequest) -> Result<(), CiError> {
        let res = self.request(method, "test-merges")?.json(req).send().await?;
        let res = Self::checked(res).await?;
        Self::acknowledged(res).await
    }
}

#[async_trait]
impl CiService for HttpCiClient {
    #[instrument(skip_all)]
    async fn status(&self) -> Result<CiStatus, CiError> {
        let res = self.request(Method::GET, "status")?.send().await?;
        let res = Self::checked(res).await?;
        Ok(res.json().await?)
    }

    #[instrument(skip_all)]
    async fn stats(&self) -> Result<Map<String, Value>, CiError> {
        let res = self.request(Method::GET, "stats")?.send().await?;
        let res = Self::checked(res).await?;
        Ok(res.json().await?)
    }

    #[instrument(skip(self))]
    async fn build(&self, server: &str) -> Result<(), CiError> {
        let res = Self::checked(self.server_action("build", server).await?).await?;
        Self::acknowledged(res).await
    }

    #[instrument(skip(self))]
    async fn cancel(&self, server: &str) -> Result<(), CiError> {
        let res = self.server_action("cancel", server).await?;
        if res.status() == StatusCode::NOT_FOUND {
            return Err(CiError::NotFound);
        }
        let res = Self::checked(res).await?;
        Self::acknowledged(res).await
    }

    #[instrument(skip(self))]
    async fn restart(&self, server: &str) -> Result<(), CiError> {
        let res = Self::checked(self.server_action("restart", server).await?).await?;
        Self::acknowledged(res).await
    }

    #[instrument(skip(self))]
    async fn branch(&self, server: &str) -> Result<Option<String>, CiError> {
        let res = self
            .request(Method::GET, &format!("branch/{server}"))?
            .send()
            .await?;
        let res = Self::checked(res).await?;
        let data: Value = res.json().await?;
        Ok(data.get("branch").and_then(Value::as_str).map(str::to_owned))
    }

    #[instrument(skip(self))]
    async fn switch_branch(&self, server: &str, branch: &str) -> Result<(), CiError> {
        let res = self
            .request(Method::POST, "switch-branch")?
            .json(&json!({ "server": server, "branch": branch }))
            .send()
            .await?;
        if res.status() == StatusCode::INTERNAL_SERVER_ERROR {
            let body = res.text().await.unwrap_or_default();
            let data: Value = serde_json::from_str(&body).unwrap_or(Value::Null);
            return Err(match data.get("error").and_then(Value::as_str) {
                Some(error) => CiError::Rejected(error.to_string()),
                None => CiError::Status {
                    status: 500,
                    body: truncate(&body, ERROR_BODY_LIMIT),
                },
            });
        }
        Self::checked(res).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn test_merges(&self, server: Option<&str>) -> Result<Vec<TestMergeRecord>, CiError> {
        let path = format!("test-merges/{}", server.unwrap_or_default());
        let res = self.request(Method::GET, &path)?.send().await?;
        let res = Self::checked(res).await?;
        let records: Option<Vec<TestMergeRecord>> = res.json().await?;
        Ok(records.unwrap_or_default())
    }

    #[instrument(skip_all, fields(pr = req.pr, server = %req.server))]
    async fn create_test_merge(&self, req: &TestMergeRequest) -> Result<(), CiError> {
        self.test_merge_call(Method::POST, req).await
    }

    #[instrument(skip_all, fields(pr = req.pr, server = %req.server))]
    async fn update_test_merge(&self, req: &TestMergeRequest) -> Result<(), CiError> {
        self.test_merge_call(Method::PUT, req).await
    }

    #[instrument(skip_all, fields(pr = req.pr, server = %req.server))]
    async fn delete_test_merge(&self, req: &TestMergeRequest) -> Result<(), CiError> {
        self.test_merge_call(Method::DELETE, req).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_accepts_mixed_job_refs() {
        let status: CiStatus = serde_json::from_value(json!({
            "maxCompileJobs": 2,
            "currentCompileJobs": ["main1", {"serverId": "main2", "build": {}}],
            "queuedJobs": [null]
        }))
        .unwrap();
        let ids: Vec<_> = status
            .current_compile_jobs
            .iter()
            .flatten()
            .map(JobRef::server_id)
            .collect();
        assert_eq!(ids, vec!["main1", "main2"]);
        assert_eq!(status.queued_jobs, vec![None]);
    }

    #[test]
    fn request_body_omits_unset_fields() {
        let req = TestMergeRequest {
            pr: 3,
            server: "main1".into(),
            requester: Some("@5".into()),
            updater: None,
            commit: None,
        };
        assert_eq!(
            serde_json::to_value(&req).unwrap(),
            json!({"pr": 3, "server": "main1", "requester": "@5"})
        );
    }

    #[test]
    fn error_messages() {
        let err = CiError::Status {
            status: 502,
            body: truncate(&"x".repeat(300), ERROR_BODY_LIMIT),
        };
        assert_eq!(
            err.to_string(),
            format!("Server responded with an error code 502: `{}`", "x".repeat(100))
        );
        assert_eq!(CiError::NotFound.to_string(), "Build not found");
    }

    #[test]
    fn base_url_gets_trailing_slash() {
        let client = HttpCiClient::new("http://ci.local/api", "k".into()).unwrap();
        assert_eq!(client.base_url.join("status").unwrap().as_str(), "http://ci.local/api/status");
    }
}
