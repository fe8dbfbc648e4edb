pub mod blocks;
pub mod resolver;
pub mod schema;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::retry::{RetryPolicy, with_retry};

const API_VERSION: &str = "2022-06-28";

/// One row of the remote database: an opaque identifier plus the raw
/// property map the workspace returned for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

impl Record {
    pub fn title_text(&self) -> Option<&str> {
        self.properties
            .get("Name")?
            .pointer("/title/0/text/content")?
            .as_str()
    }

    /// Server-computed formula value, 0.0 when the column is absent.
    pub fn formula_number(&self, name: &str) -> f64 {
        self.properties
            .get(name)
            .and_then(|p| p.pointer("/formula/number"))
            .and_then(Value::as_f64)
            .unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

/// A database query: exact title match and/or title ordering with an
/// optional result cap. Covers every read the engine performs.
#[derive(Debug, Clone, Default)]
pub struct QueryRequest {
    pub title_equals: Option<String>,
    pub sort: Option<SortDirection>,
    pub page_size: Option<u32>,
}

impl QueryRequest {
    pub fn title_equals(title: &str) -> Self {
        Self {
            title_equals: Some(title.to_string()),
            ..Self::default()
        }
    }

    /// Most recent record first. Records are created one per period, so
    /// reverse title order stands in for reverse creation order.
    pub fn latest() -> Self {
        Self {
            sort: Some(SortDirection::Descending),
            page_size: Some(1),
            ..Self::default()
        }
    }

    pub fn full_history() -> Self {
        Self {
            sort: Some(SortDirection::Ascending),
            ..Self::default()
        }
    }
}

/// Capability interface over the remote workspace. Every component takes
/// this rather than a concrete client so tests can substitute a fake;
/// the workspace is the only shared mutable state in the process.
#[async_trait]
pub trait Workspace: Send + Sync {
    async fn query(&self, request: &QueryRequest) -> Result<Vec<Record>>;

    /// Create a record, optionally with initial body blocks. Returns the
    /// new record's identifier.
    async fn create_record(&self, properties: Value, children: Option<Vec<Value>>)
    -> Result<String>;

    async fn update_record(&self, record_id: &str, properties: Value) -> Result<()>;

    /// Append body blocks to a record. Blocks are append-only; there is
    /// no way to retract one.
    async fn append_blocks(&self, record_id: &str, blocks: Vec<Value>) -> Result<()>;

    /// The database's current property map, keyed by column name.
    async fn retrieve_schema(&self) -> Result<Map<String, Value>>;

    /// Patch the database schema. A `null` property value removes that
    /// column; anything else creates or replaces it.
    async fn update_schema(&self, title: Option<&str>, properties: Value) -> Result<()>;
}

// === REST client ===

#[derive(Debug, Clone)]
pub struct WorkspaceConfig {
    pub api_url: String,
    pub token: String,
    pub database_id: String,
}

/// HTTP client for the workspace's REST API. Safe to share across
/// concurrent tasks; holds no state beyond the connection pool.
pub struct WorkspaceClient {
    client: reqwest::Client,
    api_url: String,
    token: String,
    database_id: String,
}

impl WorkspaceClient {
    pub fn new(config: &WorkspaceConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: config.api_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            database_id: config.database_id.clone(),
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.api_url, path))
            .bearer_auth(&self.token)
            .header("Notion-Version", API_VERSION)
    }

    async fn read_json(response: reqwest::Response) -> Result<Value> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("workspace API error {status}: {body}"));
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl Workspace for WorkspaceClient {
    async fn query(&self, request: &QueryRequest) -> Result<Vec<Record>> {
        let mut body = Map::new();
        if let Some(title) = &request.title_equals {
            body.insert(
                "filter".to_string(),
                serde_json::json!({ "property": "Name", "title": { "equals": title } }),
            );
        }
        if let Some(direction) = request.sort {
            let direction = match direction {
                SortDirection::Ascending => "ascending",
                SortDirection::Descending => "descending",
            };
            body.insert(
                "sorts".to_string(),
                serde_json::json!([{ "property": "Name", "direction": direction }]),
            );
        }
        if let Some(size) = request.page_size {
            body.insert("page_size".to_string(), serde_json::json!(size));
        }

        let response = self
            .request(
                reqwest::Method::POST,
                &format!("/databases/{}/query", self.database_id),
            )
            .json(&Value::Object(body))
            .send()
            .await?;
        let value = Self::read_json(response).await?;

        #[derive(Deserialize)]
        struct QueryResponse {
            results: Vec<Record>,
        }
        let parsed: QueryResponse = serde_json::from_value(value)?;
        Ok(parsed.results)
    }

    async fn create_record(
        &self,
        properties: Value,
        children: Option<Vec<Value>>,
    ) -> Result<String> {
        let mut body = Map::new();
        body.insert(
            "parent".to_string(),
            serde_json::json!({ "database_id": self.database_id }),
        );
        body.insert("properties".to_string(), properties);
        if let Some(children) = children {
            body.insert("children".to_string(), Value::Array(children));
        }

        let response = self
            .request(reqwest::Method::POST, "/pages")
            .json(&Value::Object(body))
            .send()
            .await?;
        let value = Self::read_json(response).await?;
        value
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| anyhow!("create response carried no record id"))
    }

    async fn update_record(&self, record_id: &str, properties: Value) -> Result<()> {
        let response = self
            .request(reqwest::Method::PATCH, &format!("/pages/{record_id}"))
            .json(&serde_json::json!({ "properties": properties }))
            .send()
            .await?;
        Self::read_json(response).await?;
        Ok(())
    }

    async fn append_blocks(&self, record_id: &str, blocks: Vec<Value>) -> Result<()> {
        let response = self
            .request(
                reqwest::Method::PATCH,
                &format!("/blocks/{record_id}/children"),
            )
            .json(&serde_json::json!({ "children": blocks }))
            .send()
            .await?;
        Self::read_json(response).await?;
        Ok(())
    }

    async fn retrieve_schema(&self) -> Result<Map<String, Value>> {
        let response = self
            .request(
                reqwest::Method::GET,
                &format!("/databases/{}", self.database_id),
            )
            .send()
            .await?;
        let value = Self::read_json(response).await?;
        Ok(value
            .get("properties")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default())
    }

    async fn update_schema(&self, title: Option<&str>, properties: Value) -> Result<()> {
        let mut body = Map::new();
        if let Some(title) = title {
            body.insert(
                "title".to_string(),
                serde_json::json!([{ "type": "text", "text": { "content": title } }]),
            );
        }
        body.insert("properties".to_string(), properties);

        let response = self
            .request(
                reqwest::Method::PATCH,
                &format!("/databases/{}", self.database_id),
            )
            .json(&Value::Object(body))
            .send()
            .await?;
        Self::read_json(response).await?;
        Ok(())
    }
}

// === Uniform write retry ===

/// Decorator applying the retry policy to every mutation, so "wrap in
/// retry" is one cross-cutting choice instead of a per-call-site one.
/// Reads are not retried: the scheduled readers tolerate a failed read by
/// logging it. The schema provisioner runs over the bare client because
/// it owns its own per-formula retry and settle loop.
pub struct RetryingWorkspace<W> {
    inner: W,
    policy: RetryPolicy,
}

impl<W: Workspace> RetryingWorkspace<W> {
    pub fn new(inner: W, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl<W: Workspace> Workspace for RetryingWorkspace<W> {
    async fn query(&self, request: &QueryRequest) -> Result<Vec<Record>> {
        self.inner.query(request).await
    }

    async fn create_record(
        &self,
        properties: Value,
        children: Option<Vec<Value>>,
    ) -> Result<String> {
        with_retry("create record", self.policy, || {
            self.inner.create_record(properties.clone(), children.clone())
        })
        .await
        .map_err(anyhow::Error::from)
    }

    async fn update_record(&self, record_id: &str, properties: Value) -> Result<()> {
        with_retry("update record", self.policy, || {
            self.inner.update_record(record_id, properties.clone())
        })
        .await
        .map_err(anyhow::Error::from)
    }

    async fn append_blocks(&self, record_id: &str, blocks: Vec<Value>) -> Result<()> {
        with_retry("append blocks", self.policy, || {
            self.inner.append_blocks(record_id, blocks.clone())
        })
        .await
        .map_err(anyhow::Error::from)
    }

    async fn retrieve_schema(&self) -> Result<Map<String, Value>> {
        self.inner.retrieve_schema().await
    }

    async fn update_schema(&self, title: Option<&str>, properties: Value) -> Result<()> {
        with_retry("update schema", self.policy, || {
            self.inner.update_schema(title, properties.clone())
        })
        .await
        .map_err(anyhow::Error::from)
    }
}

// === Test fake ===


#[cfg(test)]
mod tests {
    use super::testing::FakeWorkspace;
    use super::*;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn zero_delay_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn retrying_workspace_retries_failed_creates() {
        let fake = FakeWorkspace::new();
        fake.fail_next_creates.store(2, Ordering::SeqCst);
        let retrying = RetryingWorkspace::new(fake, zero_delay_policy());

        let id = retrying
            .create_record(serde_json::json!({}), None)
            .await
            .unwrap();

        assert_eq!(id, "rec-1");
        assert_eq!(retrying.inner.calls.load(Ordering::SeqCst), 3);
        assert_eq!(retrying.inner.create_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retrying_workspace_surfaces_exhaustion() {
        let fake = FakeWorkspace::new();
        fake.fail_next_creates.store(3, Ordering::SeqCst);
        let retrying = RetryingWorkspace::new(fake, zero_delay_policy());

        let err = retrying
            .create_record(serde_json::json!({}), None)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("after 3 attempts"));
        assert!(retrying.inner.records.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn query_filters_on_exact_title() {
        let fake = FakeWorkspace::new();
        fake.seed_record("March 2024", &[]);
        fake.seed_record("March", &[]);

        let exact = fake
            .query(&QueryRequest::title_equals("March"))
            .await
            .unwrap();
        assert_eq!(exact.len(), 1);
        assert_eq!(exact[0].title_text(), Some("March"));
    }

    #[tokio::test]
    async fn latest_query_returns_single_last_record() {
        let fake = FakeWorkspace::new();
        fake.seed_record("2024-01", &[]);
        fake.seed_record("2024-03", &[]);
        fake.seed_record("2024-02", &[]);

        let latest = fake.query(&QueryRequest::latest()).await.unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].title_text(), Some("2024-03"));
    }

    #[test]
    fn formula_number_defaults_to_zero_when_absent() {
        let record = Record {
            id: "rec-9".to_string(),
            properties: Map::new(),
        };
        assert_eq!(record.formula_number("Expense Ratio"), 0.0);
    }
}
