use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use serde_json::{Value, json};
use tracing::info;

use super::github::{Commit, SourceHost};
use super::workspace::blocks;
use super::workspace::resolver::ProjectResolver;
use super::workspace::Workspace;

/// How many commits and open issues a full resynchronization pulls in.
const ACTIVITY_PAGE_SIZE: u32 = 5;

/// One inbound notification from the hosting platform, built at the HTTP
/// boundary from the event-type header and the raw JSON body. Consumed
/// exactly once by the dispatcher, never persisted.
#[derive(Debug, Clone)]
pub enum WebhookEvent {
    Push(Value),
    Issues(Value),
    PullRequest(Value),
    Release(Value),
    Unknown { tag: String },
}

impl WebhookEvent {
    pub fn from_parts(tag: &str, payload: Value) -> Self {
        match tag {
            "push" => Self::Push(payload),
            "issues" => Self::Issues(payload),
            "pull_request" => Self::PullRequest(payload),
            "release" => Self::Release(payload),
            other => Self::Unknown {
                tag: other.to_string(),
            },
        }
    }
}

/// Dispatches verified webhook events into workspace mutations and runs
/// the full resynchronization. Holds only shared clients; safe to share
/// behind an `Arc` between the HTTP handlers and the manual sync route.
pub struct SyncEngine {
    workspace: Arc<dyn Workspace>,
    source: Arc<dyn SourceHost>,
    resolver: ProjectResolver,
    project_name: String,
}

impl SyncEngine {
    pub fn new(workspace: Arc<dyn Workspace>, source: Arc<dyn SourceHost>, repo: &str) -> Self {
        let resolver = ProjectResolver::new(workspace.clone());
        Self {
            workspace,
            source,
            resolver,
            project_name: format!("{repo} Development"),
        }
    }

    /// Route a verified event to its handler. Branches are independent
    /// and side-effect-only; a failure propagates to the HTTP boundary
    /// rather than being retried here (the workspace writes underneath
    /// already carry the uniform retry policy).
    pub async fn handle_event(&self, event: WebhookEvent) -> Result<()> {
        match event {
            WebhookEvent::Push(_) => self.sync_repository().await.map(|_| ()),
            WebhookEvent::Issues(payload) => self.handle_issue(payload).await,
            WebhookEvent::PullRequest(payload) => self.handle_pull_request(payload).await,
            WebhookEvent::Release(payload) => self.handle_release(payload).await,
            WebhookEvent::Unknown { tag } => {
                info!("Ignoring unhandled webhook event type '{}'", tag);
                Ok(())
            }
        }
    }

    /// Full resynchronization: repository metadata, the latest commits
    /// and open issues, the project's lifecycle status, and one appended
    /// activity section. Returns the project record's identifier.
    pub async fn sync_repository(&self) -> Result<String> {
        let repo = self.source.get_repository().await?;
        let commits = self.source.list_commits(ACTIVITY_PAGE_SIZE).await?;
        let issues = self.source.list_open_issues(ACTIVITY_PAGE_SIZE).await?;

        let record_id = self.resolver.find_or_create(&self.project_name).await?;

        let status = if repo.archived { "Archived" } else { "Active" };
        self.workspace
            .update_record(
                &record_id,
                json!({ "Status": { "select": { "name": status } } }),
            )
            .await?;

        let mut activity = vec![
            blocks::heading_2("Recent Development Activity"),
            blocks::paragraph(&format!(
                "Last updated: {}",
                Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
            )),
            blocks::heading_3("Recent Commits"),
        ];
        for commit in &commits {
            activity.push(commit_block(commit));
        }
        activity.push(blocks::heading_3("Open Issues"));
        for issue in &issues {
            activity.push(blocks::linked_paragraph(
                &format!("#{}: {}", issue.number, issue.title),
                &issue.html_url,
            ));
        }
        self.workspace.append_blocks(&record_id, activity).await?;

        info!(
            "Synchronized {} into project record '{}'",
            repo.full_name, self.project_name
        );
        Ok(record_id)
    }

    async fn handle_issue(&self, payload: Value) -> Result<()> {
        let action = action_of(&payload);
        let number = payload
            .pointer("/issue/number")
            .and_then(Value::as_u64)
            .unwrap_or_default();
        let title = payload
            .pointer("/issue/title")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let url = payload
            .pointer("/issue/html_url")
            .and_then(Value::as_str)
            .unwrap_or_default();

        self.append_activity_line(
            &payload,
            &format!("Issue {action}: #{number} {title}"),
            url,
        )
        .await
    }

    async fn handle_pull_request(&self, payload: Value) -> Result<()> {
        let action = action_of(&payload);
        let number = payload
            .pointer("/pull_request/number")
            .and_then(Value::as_u64)
            .unwrap_or_default();
        let title = payload
            .pointer("/pull_request/title")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let url = payload
            .pointer("/pull_request/html_url")
            .and_then(Value::as_str)
            .unwrap_or_default();

        self.append_activity_line(
            &payload,
            &format!("Pull Request {action}: #{number} {title}"),
            url,
        )
        .await
    }

    async fn handle_release(&self, payload: Value) -> Result<()> {
        let action = action_of(&payload);
        let tag = payload
            .pointer("/release/tag_name")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let name = payload
            .pointer("/release/name")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let url = payload
            .pointer("/release/html_url")
            .and_then(Value::as_str)
            .unwrap_or_default();

        self.append_activity_line(&payload, &format!("Release {action}: {tag} - {name}"), url)
            .await
    }

    /// Resolve the project record for the event's repository and append
    /// a single one-line activity block.
    async fn append_activity_line(&self, payload: &Value, line: &str, url: &str) -> Result<()> {
        let record_id = self
            .resolver
            .find_or_create(&self.project_page_name(payload))
            .await?;
        self.workspace
            .append_blocks(&record_id, vec![blocks::linked_paragraph(line, url)])
            .await
    }

    fn project_page_name(&self, payload: &Value) -> String {
        payload
            .pointer("/repository/name")
            .and_then(Value::as_str)
            .map(|name| format!("{name} Development"))
            .unwrap_or_else(|| self.project_name.clone())
    }
}

fn action_of(payload: &Value) -> &str {
    payload
        .get("action")
        .and_then(Value::as_str)
        .unwrap_or("updated")
}

/// Commit line: the message as plain text, the short SHA as the link.
fn commit_block(commit: &Commit) -> Value {
    let short_sha = commit.sha.get(..7).unwrap_or(&commit.sha);
    blocks::span_paragraph(vec![
        blocks::text_span(&format!("{} ", commit.commit.message)),
        blocks::linked_span(&format!("({short_sha})"), &commit.html_url),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::github::testing::FakeSourceHost;
    use crate::core::workspace::blocks::block_text;
    use crate::core::workspace::testing::FakeWorkspace;
    use std::sync::atomic::Ordering;

    fn engine_with(
        workspace: Arc<FakeWorkspace>,
        source: FakeSourceHost,
    ) -> SyncEngine {
        SyncEngine::new(workspace, Arc::new(source), "forge")
    }

    fn issue_payload(action: &str) -> Value {
        json!({
            "action": action,
            "issue": {
                "number": 42,
                "title": "Bug",
                "html_url": "https://github.example/acme/forge/issues/42"
            },
            "repository": { "name": "forge" }
        })
    }

    #[tokio::test]
    async fn issue_event_appends_one_linked_activity_line() {
        let fake = Arc::new(FakeWorkspace::new());
        let engine = engine_with(fake.clone(), FakeSourceHost::new());

        engine
            .handle_event(WebhookEvent::from_parts("issues", issue_payload("opened")))
            .await
            .unwrap();

        // The project record did not exist, so it was created first.
        assert_eq!(fake.create_calls.load(Ordering::SeqCst), 1);
        let appends = fake.appends.lock().unwrap();
        assert_eq!(appends.len(), 1);
        let (_, blocks) = &appends[0];
        assert_eq!(blocks.len(), 1);
        assert_eq!(block_text(&blocks[0]), "Issue opened: #42 Bug");
        assert_eq!(
            blocks[0].pointer("/paragraph/rich_text/0/text/link/url"),
            Some(&Value::String(
                "https://github.example/acme/forge/issues/42".to_string()
            ))
        );
    }

    #[tokio::test]
    async fn repeated_issue_events_reuse_the_project_record() {
        let fake = Arc::new(FakeWorkspace::new());
        let engine = engine_with(fake.clone(), FakeSourceHost::new());

        engine
            .handle_event(WebhookEvent::from_parts("issues", issue_payload("opened")))
            .await
            .unwrap();
        engine
            .handle_event(WebhookEvent::from_parts("issues", issue_payload("closed")))
            .await
            .unwrap();

        assert_eq!(fake.create_calls.load(Ordering::SeqCst), 1);
        let appends = fake.appends.lock().unwrap();
        assert_eq!(appends.len(), 2);
        assert_eq!(appends[0].0, appends[1].0);
        assert_eq!(block_text(&appends[1].1[0]), "Issue closed: #42 Bug");
    }

    #[tokio::test]
    async fn pull_request_and_release_lines_follow_the_same_shape() {
        let fake = Arc::new(FakeWorkspace::new());
        let engine = engine_with(fake.clone(), FakeSourceHost::new());

        engine
            .handle_event(WebhookEvent::from_parts(
                "pull_request",
                json!({
                    "action": "merged",
                    "pull_request": {
                        "number": 9,
                        "title": "Add retries",
                        "html_url": "https://github.example/acme/forge/pull/9"
                    },
                    "repository": { "name": "forge" }
                }),
            ))
            .await
            .unwrap();
        engine
            .handle_event(WebhookEvent::from_parts(
                "release",
                json!({
                    "action": "published",
                    "release": {
                        "tag_name": "v1.2.0",
                        "name": "Steady State",
                        "html_url": "https://github.example/acme/forge/releases/v1.2.0"
                    },
                    "repository": { "name": "forge" }
                }),
            ))
            .await
            .unwrap();

        let appends = fake.appends.lock().unwrap();
        assert_eq!(block_text(&appends[0].1[0]), "Pull Request merged: #9 Add retries");
        assert_eq!(
            block_text(&appends[1].1[0]),
            "Release published: v1.2.0 - Steady State"
        );
    }

    #[tokio::test]
    async fn push_event_runs_the_full_resynchronization() {
        let fake = Arc::new(FakeWorkspace::new());
        let engine = engine_with(fake.clone(), FakeSourceHost::new());

        engine
            .handle_event(WebhookEvent::from_parts("push", json!({})))
            .await
            .unwrap();

        let updates = fake.record_updates.lock().unwrap();
        assert_eq!(updates.len(), 1);
        assert_eq!(
            updates[0].1.pointer("/Status/select/name"),
            Some(&Value::String("Active".to_string()))
        );

        let appends = fake.appends.lock().unwrap();
        assert_eq!(appends.len(), 1);
        let texts: Vec<String> = appends[0].1.iter().map(block_text).collect();
        assert_eq!(texts[0], "Recent Development Activity");
        assert!(texts[1].starts_with("Last updated: "));
        assert!(texts.contains(&"Recent Commits".to_string()));
        assert!(texts.contains(&"Fix parser (0123456)".to_string()));
        assert!(texts.contains(&"Open Issues".to_string()));
        assert!(texts.contains(&"#7: Flaky test".to_string()));
    }

    #[tokio::test]
    async fn archived_repository_marks_the_project_archived() {
        let fake = Arc::new(FakeWorkspace::new());
        let engine = engine_with(fake.clone(), FakeSourceHost { archived: true });

        engine.sync_repository().await.unwrap();

        let updates = fake.record_updates.lock().unwrap();
        assert_eq!(
            updates[0].1.pointer("/Status/select/name"),
            Some(&Value::String("Archived".to_string()))
        );
    }

    #[tokio::test]
    async fn unknown_event_is_a_logged_no_op() {
        let fake = Arc::new(FakeWorkspace::new());
        let engine = engine_with(fake.clone(), FakeSourceHost::new());

        engine
            .handle_event(WebhookEvent::from_parts("watch", json!({})))
            .await
            .unwrap();

        assert_eq!(fake.calls.load(Ordering::SeqCst), 0);
    }
}
