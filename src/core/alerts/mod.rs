use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use serde_json::json;
use tracing::{error, info, warn};

use super::charts::{ChartData, chart_url};
use super::workspace::blocks;
use super::workspace::{QueryRequest, Record, Workspace};

/// Expense ratio above this fires an alert and flags the period at risk.
const EXPENSE_RATIO_CEILING: f64 = 70.0;
/// Monthly growth below this fires an alert and flags the period behind.
const GROWTH_FLOOR: f64 = 10.0;

/// Headline metrics of one period, as computed server-side by the
/// workspace's formula columns. Never computed locally; a missing column
/// reads as zero.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MetricsSnapshot {
    pub expense_ratio: f64,
    pub monthly_growth: f64,
    pub investment_roi: f64,
    pub total_revenue: f64,
    pub net_savings: f64,
}

impl MetricsSnapshot {
    pub fn from_record(record: &Record) -> Self {
        Self {
            expense_ratio: record.formula_number("Expense Ratio"),
            monthly_growth: record.formula_number("Monthly Growth Rate"),
            investment_roi: record.formula_number("Investment ROI"),
            total_revenue: record.formula_number("Total AI Revenue"),
            net_savings: record.formula_number("Net Monthly Savings"),
        }
    }

    pub fn breached(&self) -> bool {
        self.expense_ratio > EXPENSE_RATIO_CEILING || self.monthly_growth < GROWTH_FLOOR
    }

    /// Status rollup: overspending outranks stalled growth.
    pub fn status(&self) -> &'static str {
        if self.expense_ratio > EXPENSE_RATIO_CEILING {
            "At Risk"
        } else if self.monthly_growth < GROWTH_FLOOR {
            "Behind"
        } else {
            "On Track"
        }
    }
}

/// Outbound alert channel. Fire-and-forget: a failed send is logged by
/// the caller, never retried.
#[async_trait]
pub trait AlertTransport: Send + Sync {
    async fn send(&self, to: &str, subject: &str, html_body: &str) -> Result<()>;
}

#[derive(Debug, Clone, Default)]
pub struct MailConfig {
    pub relay_url: String,
    pub relay_token: String,
    pub from: String,
    pub alert_recipient: String,
}

/// Posts alert mail to an HTTP relay. The relay handles actual delivery;
/// this side only hands over the message.
pub struct HttpMailer {
    client: reqwest::Client,
    relay_url: String,
    relay_token: String,
    from: String,
}

impl HttpMailer {
    pub fn new(config: &MailConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            relay_url: config.relay_url.clone(),
            relay_token: config.relay_token.clone(),
            from: config.from.clone(),
        }
    }
}

#[async_trait]
impl AlertTransport for HttpMailer {
    async fn send(&self, to: &str, subject: &str, html_body: &str) -> Result<()> {
        if self.relay_url.is_empty() {
            return Err(anyhow!("mail relay is not configured"));
        }
        let response = self
            .client
            .post(&self.relay_url)
            .bearer_auth(&self.relay_token)
            .json(&json!({
                "from": self.from,
                "to": to,
                "subject": subject,
                "html": html_body
            }))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("mail relay error {status}: {body}"));
        }
        Ok(())
    }
}

/// The most recent period's snapshot, or `None` on an empty database.
/// "Most recent" is the last record in title order standing in for
/// creation order; backfilled records would make this ambiguous.
pub async fn latest_metrics(workspace: &dyn Workspace) -> Result<Option<MetricsSnapshot>> {
    let records = workspace.query(&QueryRequest::latest()).await?;
    Ok(records.first().map(MetricsSnapshot::from_record))
}

fn alert_html(metrics: &MetricsSnapshot) -> String {
    format!(
        "<h2>Financial Metrics Alert</h2>\
         <p>The following metrics require attention:</p>\
         <ul>\
         <li>Expense Ratio: {:.1}%</li>\
         <li>Monthly Growth: {:.1}%</li>\
         <li>Investment ROI: {:.1}%</li>\
         </ul>",
        metrics.expense_ratio, metrics.monthly_growth, metrics.investment_roi
    )
}

/// Daily check: read the latest snapshot and raise a mail alert when a
/// threshold is breached. Read failures propagate to the scheduler's
/// logging sink; a failed send is logged and dropped.
pub async fn check_metrics(
    workspace: &dyn Workspace,
    mailer: &dyn AlertTransport,
    recipient: &str,
) -> Result<()> {
    let Some(metrics) = latest_metrics(workspace).await? else {
        info!("No metrics records yet, skipping alert check");
        return Ok(());
    };
    if !metrics.breached() {
        return Ok(());
    }

    warn!(
        "Metrics thresholds breached: expense ratio {:.1}%, monthly growth {:.1}%",
        metrics.expense_ratio, metrics.monthly_growth
    );
    if recipient.is_empty() {
        warn!("No alert recipient configured, alert not sent");
        return Ok(());
    }
    if let Err(e) = mailer
        .send(recipient, "Financial Metrics Alert", &alert_html(&metrics))
        .await
    {
        error!("Failed to send metrics alert: {e:#}");
    }
    Ok(())
}

/// Roll the latest period's status up from its own metrics.
pub async fn apply_latest_status(workspace: &dyn Workspace) -> Result<()> {
    let records = workspace.query(&QueryRequest::latest()).await?;
    let Some(record) = records.first() else {
        return Ok(());
    };
    let status = MetricsSnapshot::from_record(record).status();
    workspace
        .update_record(
            &record.id,
            json!({ "Status": { "select": { "name": status } } }),
        )
        .await
}

/// Monthly rollup: latest headline metrics, full history for the chart,
/// one new report record carrying both. Returns the report record's id.
pub async fn generate_monthly_report(
    workspace: &dyn Workspace,
    month_label: &str,
) -> Result<String> {
    let metrics = latest_metrics(workspace).await?.unwrap_or_default();
    let history = workspace.query(&QueryRequest::full_history()).await?;
    let chart = chart_url(&ChartData::from_records(&history));
    info!(
        "Reporting {month_label}: revenue {:.2}, net savings {:.2}, {} periods charted",
        metrics.total_revenue,
        metrics.net_savings,
        history.len()
    );

    let properties = json!({
        "Name": { "title": [{ "text": { "content": format!("{month_label} - Report") } }] },
        "Tags": { "multi_select": [{ "name": "Report" }] }
    });
    let children = vec![
        blocks::heading_1("Monthly Financial Report"),
        blocks::paragraph(&format!(
            "Monthly Growth Rate: {:.1}%\nExpense Ratio: {:.1}%\nInvestment ROI: {:.1}%",
            metrics.monthly_growth, metrics.expense_ratio, metrics.investment_roi
        )),
        blocks::external_image(&chart),
    ];
    workspace.create_record(properties, Some(children)).await
}

/// Label of the calendar month before `today`, e.g. "July 2026".
pub fn previous_month_label(today: NaiveDate) -> String {
    let start_of_month = today.with_day(1).unwrap_or(today);
    let last_of_previous = start_of_month.pred_opt().unwrap_or(start_of_month);
    last_of_previous.format("%B %Y").to_string()
}
