use std::sync::Arc;

use anyhow::Result;
use serde_json::json;
use tracing::info;

use super::{QueryRequest, Workspace};

/// Maps a project display name to exactly one workspace record.
pub struct ProjectResolver {
    workspace: Arc<dyn Workspace>,
}

impl ProjectResolver {
    pub fn new(workspace: Arc<dyn Workspace>) -> Self {
        Self { workspace }
    }

    /// Return the record titled exactly `name` (case-sensitive, full
    /// match), creating it with default Status/Priority/Tags when absent.
    ///
    /// Check-then-create is not atomic: two concurrent resolutions of the
    /// same name can both miss and both create, leaving a duplicate. The
    /// workspace offers no uniqueness constraint or compare-and-swap to
    /// close that window, so callers are expected to be single-writer.
    pub async fn find_or_create(&self, name: &str) -> Result<String> {
        let found = self
            .workspace
            .query(&QueryRequest::title_equals(name))
            .await?;
        if let Some(record) = found.first() {
            return Ok(record.id.clone());
        }

        info!("Creating project record '{}'", name);
        let properties = json!({
            "Name": { "title": [{ "text": { "content": name } }] },
            "Status": { "select": { "name": "Active" } },
            "Priority": { "select": { "name": "Medium" } },
            "Tags": { "multi_select": [{ "name": "GitHub" }] }
        });
        self.workspace.create_record(properties, None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::workspace::testing::FakeWorkspace;
    use std::sync::atomic::Ordering;

    #[tokio::test]
    async fn existing_record_is_returned_without_creating() {
        let fake = Arc::new(FakeWorkspace::new());
        let seeded = fake.seed_record("forge Development", &[]);
        let resolver = ProjectResolver::new(fake.clone());

        let id = resolver.find_or_create("forge Development").await.unwrap();

        assert_eq!(id, seeded);
        assert_eq!(fake.create_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_record_is_created_with_defaults() {
        let fake = Arc::new(FakeWorkspace::new());
        let resolver = ProjectResolver::new(fake.clone());

        let id = resolver.find_or_create("forge Development").await.unwrap();

        assert_eq!(fake.create_calls.load(Ordering::SeqCst), 1);
        let records = fake.records.lock().unwrap();
        let created = records.iter().find(|r| r.id == id).unwrap();
        assert_eq!(created.title_text(), Some("forge Development"));
        assert_eq!(
            created.properties.get("Status").unwrap().pointer("/select/name"),
            Some(&serde_json::Value::String("Active".to_string()))
        );
        assert_eq!(
            created
                .properties
                .get("Priority")
                .unwrap()
                .pointer("/select/name"),
            Some(&serde_json::Value::String("Medium".to_string()))
        );
        assert_eq!(
            created
                .properties
                .get("Tags")
                .unwrap()
                .pointer("/multi_select/0/name"),
            Some(&serde_json::Value::String("GitHub".to_string()))
        );
    }

    #[tokio::test]
    async fn second_resolution_reuses_the_first_record() {
        let fake = Arc::new(FakeWorkspace::new());
        let resolver = ProjectResolver::new(fake.clone());

        let first = resolver.find_or_create("forge Development").await.unwrap();
        let second = resolver.find_or_create("forge Development").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(fake.create_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn match_is_exact_not_prefix() {
        let fake = Arc::new(FakeWorkspace::new());
        fake.seed_record("forge Development (archived)", &[]);
        let resolver = ProjectResolver::new(fake.clone());

        resolver.find_or_create("forge Development").await.unwrap();

        assert_eq!(fake.create_calls.load(Ordering::SeqCst), 1);
    }
}
