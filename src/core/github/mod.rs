use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, Deserialize)]
pub struct Repository {
    pub name: String,
    pub full_name: String,
    #[serde(default)]
    pub archived: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Commit {
    pub sha: String,
    pub html_url: String,
    pub commit: CommitDetail,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommitDetail {
    pub message: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Issue {
    pub number: u64,
    pub title: String,
    pub html_url: String,
    // The issues listing interleaves pull requests; they carry this key.
    #[serde(default)]
    pub pull_request: Option<Value>,
}

/// Read-only view of the tracked repository on the hosting platform.
#[async_trait]
pub trait SourceHost: Send + Sync {
    async fn get_repository(&self) -> Result<Repository>;
    async fn list_commits(&self, per_page: u32) -> Result<Vec<Commit>>;
    async fn list_open_issues(&self, per_page: u32) -> Result<Vec<Issue>>;
}

#[derive(Debug, Clone)]
pub struct GitHubConfig {
    pub api_url: String,
    pub token: String,
    pub owner: String,
    pub repo: String,
}

pub struct GitHubClient {
    client: reqwest::Client,
    api_url: String,
    token: String,
    owner: String,
    repo: String,
}

impl GitHubClient {
    pub fn new(config: &GitHubConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: config.api_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            owner: config.owner.clone(),
            repo: config.repo.clone(),
        }
    }

    fn repo_request(&self, path: &str) -> reqwest::RequestBuilder {
        self.client
            .get(format!(
                "{}/repos/{}/{}{}",
                self.api_url, self.owner, self.repo, path
            ))
            .bearer_auth(&self.token)
            .header(reqwest::header::USER_AGENT, "ledgersync")
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
    }

    async fn read_json<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("source host API error {status}: {body}"));
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl SourceHost for GitHubClient {
    async fn get_repository(&self) -> Result<Repository> {
        let response = self.repo_request("").send().await?;
        Self::read_json(response).await
    }

    async fn list_commits(&self, per_page: u32) -> Result<Vec<Commit>> {
        let response = self
            .repo_request("/commits")
            .query(&[("per_page", per_page)])
            .send()
            .await?;
        Self::read_json(response).await
    }

    async fn list_open_issues(&self, per_page: u32) -> Result<Vec<Issue>> {
        let response = self
            .repo_request("/issues")
            .query(&[("state", "open".to_string()), ("per_page", per_page.to_string())])
            .send()
            .await?;
        let issues: Vec<Issue> = Self::read_json(response).await?;
        Ok(issues
            .into_iter()
            .filter(|issue| issue.pull_request.is_none())
            .collect())
    }
}
