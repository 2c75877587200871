//! HTTP JSON endpoint as an upstream source.
//!
//! `GET {base_url}/{endpoint}?symbol=..&start=..&end=..` returning a JSON array
//! of flat records. Status handling:
//! - 2xx: parse records into a table (union of record keys)
//! - 404: empty result
//! - 429 / 5xx / connect / timeout: `UpstreamUnavailable` (retryable)
//! - anything else or a malformed body: `SchemaDrift` (not retryable)

use serde_json::Value;
use std::time::Duration;

use super::provider::{DataError, FetchRequest, UpstreamSource};
use super::table::{raw_cell, Cell, Table};

pub struct HttpJsonSource {
    name: String,
    base_url: String,
    client: reqwest::blocking::Client,
}

impl HttpJsonSource {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, DataError> {
        let name = name.into();
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("fundwise/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| DataError::unavailable(&name, format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            name,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'))
    }
}

impl UpstreamSource for HttpJsonSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn fetch(&self, request: &FetchRequest) -> Result<Table, DataError> {
        let mut query = vec![("symbol", request.subject.clone())];
        if let Some(range) = request.range {
            query.push(("start", range.start.format("%Y-%m-%d").to_string()));
            query.push(("end", range.end.format("%Y-%m-%d").to_string()));
        }

        let resp = self
            .client
            .get(self.url(&request.endpoint))
            .query(&query)
            .send()
            .map_err(|e| DataError::unavailable(&self.name, e.to_string()))?;

        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(Table::default());
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Err(DataError::unavailable(&self.name, format!("HTTP {status}")));
        }
        if !status.is_success() {
            return Err(DataError::SchemaDrift {
                dataset: request.endpoint.clone(),
                missing: vec![format!("HTTP {status}")],
            });
        }

        let body: Value = resp.json().map_err(|e| DataError::SchemaDrift {
            dataset: request.endpoint.clone(),
            missing: vec![format!("malformed response body ({e})")],
        })?;
        records_to_table(&body).ok_or_else(|| DataError::SchemaDrift {
            dataset: request.endpoint.clone(),
            missing: vec!["response is not an array of records".into()],
        })
    }
}

/// Convert a JSON array of objects into a table. `None` if the shape is wrong.
pub fn records_to_table(body: &Value) -> Option<Table> {
    let records = body.as_array()?;
    let mut columns: Vec<String> = Vec::new();
    for record in records {
        for key in record.as_object()?.keys() {
            if !columns.contains(key) {
                columns.push(key.clone());
            }
        }
    }

    let mut table = Table::new(columns);
    for record in records {
        let obj = record.as_object()?;
        let row = table
            .columns
            .iter()
            .map(|c| match obj.get(c) {
                None | Some(Value::Null) => Cell::Null,
                Some(Value::Number(n)) => n.as_f64().map_or(Cell::Null, Cell::number),
                Some(Value::String(s)) => raw_cell(s),
                Some(other) => Cell::Text(other.to_string()),
            })
            .collect();
        table.push_row(row);
    }
    Some(table)
}
