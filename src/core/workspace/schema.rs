use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde_json::{Map, Value, json};
use tracing::info;

use super::Workspace;
use crate::core::error::SyncError;
use crate::core::retry::{RetryPolicy, with_retry};

/// Hard ceiling the workspace imposes on a database's serialized schema.
pub const MAX_SCHEMA_BYTES: usize = 50_000;

const DATABASE_TITLE: &str = "AI Business & Investment Tracker";

/// A computed column: the workspace evaluates `expression` server-side,
/// the engine only ever reads the result.
#[derive(Debug, Clone, Copy)]
pub struct FormulaColumn {
    pub name: &'static str,
    pub expression: &'static str,
}

/// Formula columns in dependency order. A formula that references another
/// formula must be added strictly after the one it references, so this
/// slice is applied front to back, one column at a time.
pub const FORMULA_COLUMNS: &[FormulaColumn] = &[
    FormulaColumn {
        name: "Total AI Revenue",
        expression: "add(add(add(prop(\"AI Content Agency\"), prop(\"AI Stock Analysis\")), prop(\"MES Analytics\")), prop(\"Workflow Automation\"))",
    },
    FormulaColumn {
        name: "Total Investments",
        expression: "add(add(add(prop(\"Stocks Investment\"), prop(\"Crypto Investment\")), prop(\"Bonds Investment\")), prop(\"Savings\"))",
    },
    FormulaColumn {
        name: "Total Expenses",
        expression: "add(prop(\"Business Expenses\"), prop(\"Personal Expenses\"))",
    },
    FormulaColumn {
        name: "Total Income",
        expression: "add(prop(\"Base Salary\"), prop(\"Total AI Revenue\"))",
    },
    FormulaColumn {
        name: "Net Monthly Savings",
        expression: "subtract(prop(\"Total Income\"), prop(\"Total Expenses\"))",
    },
    FormulaColumn {
        name: "Monthly Growth Rate",
        expression: "multiply(divide(prop(\"Net Monthly Savings\"), prop(\"Total Income\")), 100)",
    },
    FormulaColumn {
        name: "Investment ROI",
        expression: "multiply(divide(subtract(prop(\"Total AI Revenue\"), prop(\"Total Expenses\")), prop(\"Total Investments\")), 100)",
    },
    FormulaColumn {
        name: "Expense Ratio",
        expression: "multiply(divide(prop(\"Total Expenses\"), prop(\"Total Income\")), 100)",
    },
];

const DOLLAR_COLUMNS: &[&str] = &[
    "AI Content Agency",
    "AI Stock Analysis",
    "MES Analytics",
    "Workflow Automation",
    "Stocks Investment",
    "Crypto Investment",
    "Bonds Investment",
    "Savings",
    "Base Salary",
    "Business Expenses",
    "Personal Expenses",
];

/// The non-formula column set: title, currency numbers, the status and
/// priority selects with their color mapping, timeline, notes, tags.
pub fn base_properties() -> Map<String, Value> {
    let mut properties = Map::new();
    properties.insert(
        "Name".to_string(),
        json!({ "id": "title", "type": "title", "title": {} }),
    );
    for name in DOLLAR_COLUMNS {
        properties.insert(
            (*name).to_string(),
            json!({ "type": "number", "number": { "format": "dollar" } }),
        );
    }
    properties.insert(
        "Progress Bar".to_string(),
        json!({ "type": "number", "number": { "format": "percent" } }),
    );
    properties.insert(
        "Status".to_string(),
        json!({
            "type": "select",
            "select": { "options": [
                { "name": "Active", "color": "blue" },
                { "name": "Archived", "color": "gray" },
                { "name": "On Track", "color": "green" },
                { "name": "Behind", "color": "yellow" },
                { "name": "At Risk", "color": "red" }
            ]}
        }),
    );
    properties.insert(
        "Priority".to_string(),
        json!({
            "type": "select",
            "select": { "options": [
                { "name": "High", "color": "red" },
                { "name": "Medium", "color": "yellow" },
                { "name": "Low", "color": "green" }
            ]}
        }),
    );
    properties.insert("Timeline".to_string(), json!({ "type": "date", "date": {} }));
    properties.insert(
        "Notes".to_string(),
        json!({ "type": "rich_text", "rich_text": {} }),
    );
    properties.insert(
        "Tags".to_string(),
        json!({
            "type": "multi_select",
            "multi_select": { "options": [
                { "name": "Investment", "color": "blue" },
                { "name": "AI Revenue", "color": "green" },
                { "name": "Savings", "color": "yellow" },
                { "name": "GitHub", "color": "purple" },
                { "name": "Report", "color": "gray" }
            ]}
        }),
    );
    properties
}

fn formula_property(column: &FormulaColumn) -> Value {
    json!({ "type": "formula", "formula": { "expression": column.expression } })
}

/// Delay knobs for provisioning. The remote service needs time to
/// propagate a new formula column before the next schema write lands.
#[derive(Debug, Clone, Copy)]
pub struct ProvisionerConfig {
    pub retry: RetryPolicy,
    /// Wait after a successful formula addition.
    pub settle_delay: Duration,
    /// Wait between consecutive schema writes.
    pub spacing_delay: Duration,
}

impl Default for ProvisionerConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_secs(5),
            },
            settle_delay: Duration::from_secs(5),
            spacing_delay: Duration::from_secs(2),
        }
    }
}

#[cfg(test)]
impl ProvisionerConfig {
    fn instant() -> Self {
        Self {
            retry: RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::ZERO,
            },
            settle_delay: Duration::ZERO,
            spacing_delay: Duration::ZERO,
        }
    }
}

/// Brings the remote database schema to the desired column set. Runs are
/// expected to be operationally serialized (one provisioning run at a
/// time, never concurrent with event traffic): two interleaved runs
/// would race each other's formula removal and re-creation.
pub struct SchemaProvisioner {
    workspace: Arc<dyn Workspace>,
    config: ProvisionerConfig,
    properties: Map<String, Value>,
    formulas: &'static [FormulaColumn],
}

impl SchemaProvisioner {
    pub fn new(workspace: Arc<dyn Workspace>, config: ProvisionerConfig) -> Self {
        Self::with_columns(workspace, config, base_properties(), FORMULA_COLUMNS)
    }

    fn with_columns(
        workspace: Arc<dyn Workspace>,
        config: ProvisionerConfig,
        properties: Map<String, Value>,
        formulas: &'static [FormulaColumn],
    ) -> Self {
        Self {
            workspace,
            config,
            properties,
            formulas,
        }
    }

    /// Validate the serialized size of the full desired column set,
    /// reset and re-apply the schema, then add formulas one at a time in
    /// dependency order. A formula that exhausts its retries aborts the
    /// whole call with that column's name attached; prior columns stay
    /// applied and a rerun recovers through the existence checks.
    pub async fn ensure_schema(&self) -> Result<()> {
        let size = self.serialized_size()?;
        if size > MAX_SCHEMA_BYTES {
            return Err(SyncError::SchemaTooLarge { size }.into());
        }

        self.remove_existing_formulas().await?;
        tokio::time::sleep(self.config.spacing_delay).await;

        self.workspace
            .update_schema(
                Some(DATABASE_TITLE),
                Value::Object(self.properties.clone()),
            )
            .await?;
        info!("Applied {} base columns", self.properties.len());

        for column in self.formulas {
            tokio::time::sleep(self.config.spacing_delay).await;
            self.add_formula(column).await?;
        }
        Ok(())
    }

    fn serialized_size(&self) -> Result<usize> {
        let mut full = self.properties.clone();
        for column in self.formulas {
            full.insert(column.name.to_string(), formula_property(column));
        }
        Ok(serde_json::to_string(&Value::Object(full))?.len())
    }

    /// Existing formula columns are dropped wholesale before re-applying:
    /// a stale expression can reference renamed columns and poison every
    /// later schema write. This reset runs on every invocation, even when
    /// the desired set is unchanged.
    async fn remove_existing_formulas(&self) -> Result<()> {
        let schema = self.workspace.retrieve_schema().await?;
        let stale: Vec<&String> = schema
            .iter()
            .filter(|(_, property)| {
                property.get("type").and_then(Value::as_str) == Some("formula")
            })
            .map(|(name, _)| name)
            .collect();
        if stale.is_empty() {
            return Ok(());
        }

        info!("Removing existing formula columns: {:?}", stale);
        let mut removals = Map::new();
        for name in stale {
            removals.insert(name.clone(), Value::Null);
        }
        self.workspace
            .update_schema(None, Value::Object(removals))
            .await
    }

    async fn add_formula(&self, column: &FormulaColumn) -> Result<()> {
        let label = format!("formula column '{}'", column.name);
        with_retry(&label, self.config.retry, || async {
            let schema = self.workspace.retrieve_schema().await?;
            if schema.contains_key(column.name) {
                info!("Formula column '{}' already exists, skipping", column.name);
                return Ok(());
            }

            let mut update = Map::new();
            update.insert(column.name.to_string(), formula_property(column));
            self.workspace
                .update_schema(None, Value::Object(update))
                .await?;
            info!("Added formula column '{}'", column.name);

            // Let the workspace propagate the column before the next write.
            tokio::time::sleep(self.config.settle_delay).await;
            Ok(())
        })
        .await
        .map_err(anyhow::Error::from)
    }
}
