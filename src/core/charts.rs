//! Chart URL composition. Rendering is delegated to an external chart
//! service; this module only assembles the render URL embedded in
//! monthly report records.

use serde_json::json;

use super::workspace::Record;

const CHART_WIDTH: u32 = 800;
const CHART_HEIGHT: u32 = 400;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChartData {
    pub labels: Vec<String>,
    pub revenue: Vec<f64>,
    pub expenses: Vec<f64>,
    pub savings: Vec<f64>,
}

impl ChartData {
    pub fn from_records(records: &[Record]) -> Self {
        let mut data = Self::default();
        for record in records {
            data.labels
                .push(record.title_text().unwrap_or_default().to_string());
            data.revenue.push(record.formula_number("Total AI Revenue"));
            data.expenses.push(record.formula_number("Total Expenses"));
            data.savings
                .push(record.formula_number("Net Monthly Savings"));
        }
        data
    }
}

/// Line chart over the full metrics history, one dataset per headline
/// series, with the chart config URL-encoded into the render URL.
pub fn chart_url(data: &ChartData) -> String {
    let config = json!({
        "type": "line",
        "data": {
            "labels": data.labels,
            "datasets": [
                {
                    "label": "Revenue",
                    "data": data.revenue,
                    "borderColor": "rgb(75, 192, 192)",
                    "fill": false
                },
                {
                    "label": "Expenses",
                    "data": data.expenses,
                    "borderColor": "rgb(255, 99, 132)",
                    "fill": false
                },
                {
                    "label": "Savings",
                    "data": data.savings,
                    "borderColor": "rgb(54, 162, 235)",
                    "fill": false
                }
            ]
        }
    });
    format!(
        "https://quickchart.io/chart?w={}&h={}&c={}",
        CHART_WIDTH,
        CHART_HEIGHT,
        urlencoding::encode(&config.to_string())
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Map, json};

    fn record(title: &str, revenue: f64) -> Record {
        let mut properties = Map::new();
        properties.insert(
            "Name".to_string(),
            json!({ "title": [{ "text": { "content": title } }] }),
        );
        properties.insert(
            "Total AI Revenue".to_string(),
            json!({ "formula": { "number": revenue } }),
        );
        Record {
            id: format!("rec-{title}"),
            properties,
        }
    }

    #[test]
    fn chart_data_collects_labels_and_series_in_order() {
        let records = vec![record("January 2024", 9000.0), record("February 2024", 11000.0)];
        let data = ChartData::from_records(&records);

        assert_eq!(data.labels, vec!["January 2024", "February 2024"]);
        assert_eq!(data.revenue, vec![9000.0, 11000.0]);
        // Missing formula columns fall back to zero rather than skewing
        // the series lengths.
        assert_eq!(data.expenses, vec![0.0, 0.0]);
    }

    #[test]
    fn chart_url_is_fully_encoded() {
        let data = ChartData {
            labels: vec!["January 2024".to_string()],
            revenue: vec![9000.0],
            expenses: vec![7000.0],
            savings: vec![2000.0],
        };
        let url = chart_url(&data);

        assert!(url.starts_with("https://quickchart.io/chart?w=800&h=400&c="));
        let config = url.split("&c=").nth(1).unwrap();
        assert!(!config.contains('"'));
        assert!(!config.contains(' '));
        assert!(config.contains("Revenue"));
    }
}
