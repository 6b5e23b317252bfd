//! InfluxDB 2.x Flux client

use std::time::Duration;

use async_trait::async_trait;

use super::{QueryError, TimeSeriesSource};

/// Connection settings for the InfluxDB query API
#[derive(Debug, Clone)]
pub struct InfluxConfig {
    /// Server base URL, e.g. `http://localhost:8086`
    pub url: String,
    /// API token sent as `Authorization: Token ...`
    pub token: String,
    pub org: String,
    /// Bucket holding the PowerLogic measurements
    pub bucket: String,
    /// Per-request timeout
    pub timeout: Duration,
}

impl Default for InfluxConfig {
    fn default() -> Self {
        Self {
            url: "http://influxdb:8086".to_string(),
            token: "token_telegraf".to_string(),
            org: "power_logic".to_string(),
            bucket: "powerlogic_warnings_tmp".to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone)]
pub struct InfluxClient {
    http_client: reqwest::Client,
    config: InfluxConfig,
}

impl InfluxClient {
    pub fn new(config: InfluxConfig) -> Result<Self, QueryError> {
        let http_client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| QueryError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            config,
        })
    }

    pub fn config(&self) -> &InfluxConfig {
        &self.config
    }

    fn query_url(&self) -> String {
        format!("{}/api/v2/query", self.config.url.trim_end_matches('/'))
    }

    /// Run a raw Flux query and return the CSV body
    pub async fn query(&self, flux: &str) -> Result<String, QueryError> {
        let response = self
            .http_client
            .post(self.query_url())
            .query(&[("org", self.config.org.as_str())])
            .header("Authorization", format!("Token {}", self.config.token))
            .header("Content-Type", "application/vnd.flux")
            .header("Accept", "application/csv")
            .body(flux.to_string())
            .send()
            .await
            .map_err(|e| QueryError::Network(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| QueryError::Network(e.to_string()))?;

        if !status.is_success() {
            return Err(QueryError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(body)
    }
}

#[async_trait]
impl TimeSeriesSource for InfluxClient {
    async fn latest_value(&self, field: &str, lookback: Duration) -> Result<Option<f64>, QueryError> {
        let flux = latest_value_query(&self.config.bucket, field, lookback);
        let body = self.query(&flux).await?;
        parse_latest_value(&body)
    }
}

/// Flux query selecting the last point of `field` within `lookback`
pub fn latest_value_query(bucket: &str, field: &str, lookback: Duration) -> String {
    format!(
        r#"from(bucket: "{bucket}")
  |> range(start: -{secs}s)
  |> filter(fn: (r) => r["_field"] == "{field}")
  |> last()"#,
        bucket = escape_flux_string(bucket),
        secs = lookback.as_secs().max(1),
        field = escape_flux_string(field),
    )
}

fn escape_flux_string(raw: &str) -> String {
    raw.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Extract the first `_result` value from an annotated-CSV response.
///
/// Uses the `_value` column when a header row names it; otherwise falls back
/// to the last cell of the row that parses as a number.
pub fn parse_latest_value(body: &str) -> Result<Option<f64>, QueryError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .comment(Some(b'#'))
        .from_reader(body.as_bytes());

    let mut value_idx: Option<usize> = None;

    for record in reader.records() {
        let record = record.map_err(|e| QueryError::Parse(e.to_string()))?;

        if record.iter().all(|cell| cell.trim().is_empty()) {
            // blank line between tables; a new header follows
            value_idx = None;
            continue;
        }

        if record.iter().any(|cell| cell == "result") {
            value_idx = record.iter().position(|cell| cell == "_value");
            continue;
        }

        if !record.iter().any(|cell| cell == "_result") {
            continue;
        }

        let value = match value_idx {
            Some(idx) => record.get(idx).and_then(|cell| cell.trim().parse::<f64>().ok()),
            None => record
                .iter()
                .rev()
                .find_map(|cell| cell.trim().parse::<f64>().ok()),
        };

        if value.is_some() {
            return Ok(value);
        }
    }

    Ok(None)
}
