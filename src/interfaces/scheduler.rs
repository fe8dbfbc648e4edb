use std::sync::Arc;

use anyhow::{Result, anyhow};
use chrono::Utc;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

use crate::core::alerts::{self, AlertTransport};
use crate::core::workspace::Workspace;

#[derive(Debug, Clone)]
pub struct CronConfig {
    pub daily: String,
    pub monthly: String,
    pub health: String,
}

pub struct SchedulerConfig {
    pub workspace: Arc<dyn Workspace>,
    pub mailer: Arc<dyn AlertTransport>,
    pub alert_recipient: String,
    pub server_url: String,
    pub cron: CronConfig,
}

/// Register the periodic tasks on one scheduler: the daily metrics
/// check, the monthly report, and the health probe. Tasks share nothing
/// but the injected clients; each one catches and logs its own failures
/// so a bad run never takes the scheduler down.
pub async fn start(config: SchedulerConfig) -> Result<JobScheduler> {
    let scheduler = JobScheduler::new()
        .await
        .map_err(|e| anyhow!("failed to create scheduler: {e}"))?;

    // Daily: evaluate the latest metrics, alert on a breach, roll the
    // period's status up from its own numbers.
    {
        let workspace = config.workspace.clone();
        let mailer = config.mailer.clone();
        let recipient = config.alert_recipient.clone();
        let job = Job::new_async(config.cron.daily.as_str(), move |_uuid, mut _lock| {
            let workspace = workspace.clone();
            let mailer = mailer.clone();
            let recipient = recipient.clone();
            Box::pin(async move {
                if let Err(e) =
                    alerts::check_metrics(workspace.as_ref(), mailer.as_ref(), &recipient).await
                {
                    error!("Daily metrics check failed: {e:#}");
                }
                if let Err(e) = alerts::apply_latest_status(workspace.as_ref()).await {
                    error!("Status rollup failed: {e:#}");
                }
            })
        })
        .map_err(|e| anyhow!("failed to create daily metrics job: {e}"))?;
        scheduler
            .add(job)
            .await
            .map_err(|e| anyhow!("failed to register daily metrics job: {e}"))?;
        info!("Scheduled daily metrics check: {}", config.cron.daily);
    }

    // Monthly: summarize the previous calendar month into a report record.
    {
        let workspace = config.workspace.clone();
        let job = Job::new_async(config.cron.monthly.as_str(), move |_uuid, mut _lock| {
            let workspace = workspace.clone();
            Box::pin(async move {
                let label = alerts::previous_month_label(Utc::now().date_naive());
                match alerts::generate_monthly_report(workspace.as_ref(), &label).await {
                    Ok(id) => info!("Monthly report '{label}' created as record {id}"),
                    Err(e) => error!("Monthly report generation failed: {e:#}"),
                }
            })
        })
        .map_err(|e| anyhow!("failed to create monthly report job: {e}"))?;
        scheduler
            .add(job)
            .await
            .map_err(|e| anyhow!("failed to register monthly report job: {e}"))?;
        info!("Scheduled monthly report: {}", config.cron.monthly);
    }

    // Health probe against our own HTTP boundary, for the ops log.
    {
        let url = format!("{}/health", config.server_url.trim_end_matches('/'));
        let client = reqwest::Client::new();
        let job = Job::new_async(config.cron.health.as_str(), move |_uuid, mut _lock| {
            let url = url.clone();
            let client = client.clone();
            Box::pin(async move {
                match client.get(&url).send().await {
                    Ok(response) if response.status().is_success() => {}
                    Ok(response) => {
                        error!("Health check failed with status {}", response.status());
                    }
                    Err(e) => error!("Health check failed: {e}"),
                }
            })
        })
        .map_err(|e| anyhow!("failed to create health check job: {e}"))?;
        scheduler
            .add(job)
            .await
            .map_err(|e| anyhow!("failed to register health check job: {e}"))?;
        info!("Scheduled health check: {}", config.cron.health);
    }

    scheduler
        .start()
        .await
        .map_err(|e| anyhow!("failed to start scheduler: {e}"))?;
    Ok(scheduler)
}
