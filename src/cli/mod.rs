use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use crate::config::AppConfig;
use crate::core::alerts::{AlertTransport, HttpMailer};
use crate::core::github::{GitHubClient, SourceHost};
use crate::core::retry::RetryPolicy;
use crate::core::sync::SyncEngine;
use crate::core::workspace::schema::{ProvisionerConfig, SchemaProvisioner};
use crate::core::workspace::{
    QueryRequest, RetryingWorkspace, Workspace, WorkspaceClient,
};
use crate::interfaces;

fn print_help() {
    println!("ledgersync - repository activity to workspace synchronization\n");
    println!("Usage: ledgersync <command>\n");
    println!("Commands:");
    println!("  serve      Start the webhook server and scheduler (default)");
    println!("  sync       Run one full resynchronization and exit");
    println!("  provision  Apply the database schema once, offline, and exit");
    println!("  backup     Dump all records to a timestamped JSON file");
    println!("  help       Show this message");
}

pub(crate) async fn run_main() -> Result<()> {
    crate::logging::init();

    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(String::as_str).unwrap_or("serve");

    match command {
        "serve" => serve().await,
        "sync" => sync_once().await,
        "provision" => provision().await,
        "backup" => backup().await,
        "help" | "--help" | "-h" => {
            print_help();
            Ok(())
        }
        other => {
            print_help();
            anyhow::bail!("unknown command '{other}'")
        }
    }
}

/// Event-path workspace handle: every write carries the uniform retry
/// policy.
fn retrying_workspace(config: &AppConfig) -> Arc<dyn Workspace> {
    Arc::new(RetryingWorkspace::new(
        WorkspaceClient::new(&config.workspace),
        RetryPolicy::default(),
    ))
}

fn engine(config: &AppConfig, workspace: Arc<dyn Workspace>) -> Arc<SyncEngine> {
    let source: Arc<dyn SourceHost> = Arc::new(GitHubClient::new(&config.github));
    Arc::new(SyncEngine::new(workspace, source, &config.github.repo))
}

async fn serve() -> Result<()> {
    let config = AppConfig::from_env()?;
    let workspace = retrying_workspace(&config);
    let engine = engine(&config, workspace.clone());
    let mailer: Arc<dyn AlertTransport> = Arc::new(HttpMailer::new(&config.mail));

    // The scheduler handle must stay alive for its jobs to keep firing.
    let _scheduler = interfaces::scheduler::start(interfaces::scheduler::SchedulerConfig {
        workspace,
        mailer,
        alert_recipient: config.mail.alert_recipient.clone(),
        server_url: config.server_url.clone(),
        cron: config.cron.clone(),
    })
    .await?;

    interfaces::web::serve(config.port, engine, config.webhook_secret.clone()).await
}

async fn sync_once() -> Result<()> {
    let config = AppConfig::from_env()?;
    let workspace = retrying_workspace(&config);
    let record_id = engine(&config, workspace).sync_repository().await?;
    info!("Sync completed, project record {record_id}");
    Ok(())
}

/// Provisioning runs over the bare client, never concurrently with event
/// traffic: the provisioner owns its own retry and settle loop.
async fn provision() -> Result<()> {
    let config = AppConfig::from_env()?;
    let workspace: Arc<dyn Workspace> = Arc::new(WorkspaceClient::new(&config.workspace));
    let provisioner = SchemaProvisioner::new(workspace, ProvisionerConfig::default());
    provisioner.ensure_schema().await?;
    info!("Schema provisioning completed");
    Ok(())
}

async fn backup() -> Result<()> {
    let config = AppConfig::from_env()?;
    let workspace = WorkspaceClient::new(&config.workspace);
    let records = workspace.query(&QueryRequest::full_history()).await?;

    let timestamp = chrono::Utc::now().format("%Y-%m-%dT%H-%M-%S");
    let path = format!("backups/backup-{timestamp}.json");
    tokio::fs::create_dir_all("backups").await?;
    tokio::fs::write(&path, serde_json::to_string_pretty(&records)?).await?;
    info!("Backed up {} records to {path}", records.len());
    Ok(())
}
