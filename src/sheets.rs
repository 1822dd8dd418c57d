//!
//! src/sheets.rs
//!
//! Google Sheets row store: reads the full track log and appends new
//! rows in one batch. Column order is fixed:
//! title, artist, album, year, found, addedAt
//!

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::warn;
use url::Url;

use crate::config::{HttpConfig, RetryConfig, SheetsConfig};
use crate::errors::SyncError;
use crate::http::http_with_retry;
use crate::identity::derive_identity;
use crate::store::{RecordedRow, RowStore};

/// Sheet cells come back as formatted strings; numbers and bools are
/// stringified when they don't.
fn cell_text(cell: &Value) -> String {
    match cell.as_str() {
        Some(s) => s.to_string(),
        None => cell.to_string(),
    }
}

/// Decodes one sheet row. The sheet has no identity column, so the
/// identity is derived here from the raw cells (raw year string
/// included); everything downstream trusts it as persisted. Short rows
/// are malformed and yield None.
fn row_from_cells(cells: &[String]) -> Option<RecordedRow> {
    if cells.len() < 6 {
        return None;
    }

    let year_raw = cells[3].trim();
    let year = year_raw.parse::<i32>().unwrap_or(-1);
    let identity = derive_identity(&cells[0], &cells[1], &cells[2], year_raw);

    Some(RecordedRow {
        identity,
        title: cells[0].clone(),
        artist: cells[1].clone(),
        album: cells[2].clone(),
        year,
        found: cells[4].trim().eq_ignore_ascii_case("true"),
        added_at: cells[5].clone(),
    })
}

fn cells_from_row(row: &RecordedRow) -> Vec<Value> {
    vec![
        Value::from(row.title.as_str()),
        Value::from(row.artist.as_str()),
        Value::from(row.album.as_str()),
        Value::from(row.year),
        Value::from(row.found),
        Value::from(row.added_at.as_str()),
    ]
}

pub struct SheetsClient {
    http: Client,
    cfg: SheetsConfig,
    retry: RetryConfig,
    bearer: Mutex<Option<String>>,
}

impl SheetsClient {
    pub fn new(http_cfg: &HttpConfig, cfg: &SheetsConfig) ->
        Result<Self, SyncError> {

        let http = crate::http::json_client(http_cfg)?;
        Ok( Self {
            http,
            cfg: cfg.clone(),
            retry: http_cfg.retry.clone(),
            bearer: Mutex::new(None),
        })
    }

    async fn bearer(&self) -> Result<String, SyncError> {
        let mut guard = self.bearer.lock().await;
        if let Some(token) = guard.as_ref() {
            return Ok(token.clone());
        }

        let request = self.http
            .post(self.cfg.token_url.clone())
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", self.cfg.refresh_token.as_str()),
                ("client_id", self.cfg.client_id.as_str()),
                ("client_secret", self.cfg.client_secret.as_str()),
            ]);

        let value = http_with_retry(request, &self.retry, SyncError::Store).await?;
        let token = value["access_token"].as_str()
            .ok_or_else(|| SyncError::Store(
                "token response missing access_token".to_string()
            ))?
            .to_string();

        *guard = Some(token.clone());
        Ok(token)
    }

    fn range(&self) -> String {
        format!("{}!{}", self.cfg.sheet_name, self.cfg.row_range)
    }

    fn values_url(&self, suffix: &str) -> Result<Url, SyncError> {
        let mut url = self.cfg.api_base.join(&self.cfg.spreadsheet_id)
            .map_err(|e| SyncError::Store(format!("spreadsheet url: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| SyncError::Store("api base cannot be a base".to_string()))?
            .push("values")
            .push(suffix);
        Ok(url)
    }
}

#[async_trait]
impl RowStore for SheetsClient {
    /// GET .../values/{Sheet Name}!A2:F
    async fn load_all(&self) -> Result<Vec<RecordedRow>, SyncError> {
        let bearer = self.bearer().await?;
        let url = self.values_url(&self.range())?;
        let request = self.http.get(url).bearer_auth(&bearer);

        let value = http_with_retry(request, &self.retry, SyncError::Store).await?;

        let mut rows = Vec::new();
        if let Some(values) = value["values"].as_array() {
            for (i, raw) in values.iter().enumerate() {
                let cells: Vec<String> = raw.as_array()
                    .map(|cells| cells.iter().map(cell_text).collect())
                    .unwrap_or_default();
                match row_from_cells(&cells) {
                    Some(row) => rows.push(row),
                    None => warn!(row = i + 2, "skipping malformed sheet row"),
                }
            }
        }

        Ok(rows)
    }

    /// POST .../values/{range}:append?valueInputOption=RAW&insertDataOption=INSERT_ROWS
    async fn append_batch(&self, rows: &[RecordedRow]) -> Result<usize, SyncError> {
        let bearer = self.bearer().await?;
        let url = self.values_url(&format!("{}:append", self.range()))?;

        let values: Vec<Vec<Value>> = rows.iter().map(cells_from_row).collect();
        let request = self.http.post(url)
            .bearer_auth(&bearer)
            .query(&[
                ("valueInputOption", "RAW"),
                ("insertDataOption", "INSERT_ROWS"),
            ])
            .json(&serde_json::json!({
                "majorDimension": "ROWS",
                "values": values,
            }));

        let value = http_with_retry(request, &self.retry, SyncError::Store).await?;
        let appended = value["updates"]["updatedRows"].as_u64()
            .map(|n| n as usize)
            .unwrap_or(rows.len());

        Ok(appended)
    }
}
