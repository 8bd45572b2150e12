//! CSV export and import of cards.
//!
//! Columns: `card_key, minutes, max_devices, remark, created_at, is_used,
//! used_at, devices`. Timestamps are RFC 3339, `devices` is `;`-joined.
//! On import only `card_key` and `minutes` are required.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::card::{
    normalize_remark, validate_imported_key, validate_max_devices, validate_minutes, Card,
    CardState, NewCard, DEFAULT_MAX_DEVICES,
};
use crate::device::DeviceId;
use crate::error::CoreError;
use crate::types::Timestamp;

const DEVICE_SEPARATOR: &str = ";";

/// One CSV row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardRecord {
    pub card_key: String,
    pub minutes: i32,
    pub max_devices: Option<i32>,
    pub remark: Option<String>,
    pub created_at: Option<String>,
    pub is_used: Option<bool>,
    pub used_at: Option<String>,
    pub devices: Option<String>,
}

impl From<&Card> for CardRecord {
    fn from(card: &Card) -> Self {
        let devices: Vec<&str> = card.devices().map(DeviceId::as_str).collect();
        Self {
            card_key: card.key.clone(),
            minutes: card.granted_minutes,
            max_devices: Some(card.max_devices),
            remark: card.remark.clone(),
            created_at: Some(card.created_at.to_rfc3339()),
            is_used: Some(card.is_used()),
            used_at: card.first_used_at().map(|t| t.to_rfc3339()),
            devices: Some(devices.join(DEVICE_SEPARATOR)),
        }
    }
}

impl CardRecord {
    /// Validate the row and build the card it describes.
    pub fn into_new_card(self, now: Timestamp) -> Result<NewCard, String> {
        let key = self.card_key.trim().to_string();
        validate_imported_key(&key).map_err(reason)?;
        validate_minutes(self.minutes).map_err(reason)?;
        let max_devices = self.max_devices.unwrap_or(DEFAULT_MAX_DEVICES);
        validate_max_devices(max_devices).map_err(reason)?;
        let remark = normalize_remark(self.remark.as_deref()).map_err(reason)?;

        let created_at = match non_blank(self.created_at.as_deref()) {
            Some(raw) => parse_timestamp("created_at", raw)?,
            None => now,
        };
        let used_at = non_blank(self.used_at.as_deref())
            .map(|raw| parse_timestamp("used_at", raw))
            .transpose()?;
        let devices: Vec<DeviceId> = self
            .devices
            .as_deref()
            .unwrap_or("")
            .split(DEVICE_SEPARATOR)
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(DeviceId::from_stored)
            .collect();
        let state = CardState::from_parts(
            self.is_used.unwrap_or(false),
            used_at,
            devices,
            max_devices,
        )?;

        Ok(NewCard {
            key,
            remark,
            granted_minutes: self.minutes,
            max_devices,
            created_at,
            state,
        })
    }
}

fn reason(err: CoreError) -> String {
    match err {
        CoreError::Validation(msg) => msg,
        other => other.to_string(),
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn parse_timestamp(field: &str, raw: &str) -> Result<Timestamp, String> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| format!("{field} is not an RFC 3339 timestamp: {e}"))
}

/// Serialize cards to CSV with a header row.
pub fn export_csv(cards: &[Card]) -> Result<String, CoreError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for card in cards {
        writer
            .serialize(CardRecord::from(card))
            .map_err(|e| CoreError::Internal(format!("CSV write failed: {e}")))?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| CoreError::Internal(format!("CSV flush failed: {e}")))?;
    String::from_utf8(bytes).map_err(|e| CoreError::Internal(format!("CSV is not UTF-8: {e}")))
}

/// A row that could not be imported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportRejection {
    /// 1-based line number in the uploaded file (the header is line 1).
    pub line: u64,
    pub reason: String,
}

/// Outcome of an import.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub imported: usize,
    pub skipped: usize,
    pub rejected: Vec<ImportRejection>,
}

/// Rows that parsed and validated, plus per-row rejections.
#[derive(Debug, Default)]
pub struct ParsedImport {
    pub cards: Vec<NewCard>,
    pub rejected: Vec<ImportRejection>,
}

/// Parse an uploaded CSV. Fails only if the header row itself is unreadable.
pub fn parse_csv(data: &[u8], now: Timestamp) -> Result<ParsedImport, CoreError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(data);
    let headers = reader
        .headers()
        .map_err(|e| CoreError::Validation(format!("Unreadable CSV header: {e}")))?
        .clone();
    for required in ["card_key", "minutes"] {
        if !headers.iter().any(|h| h == required) {
            return Err(CoreError::Validation(format!(
                "CSV header is missing the '{required}' column"
            )));
        }
    }

    let mut parsed = ParsedImport::default();
    for (index, row) in reader.records().enumerate() {
        let fallback_line = index as u64 + 2;
        let record = match row {
            Ok(record) => record,
            Err(e) => {
                let line = e.position().map_or(fallback_line, |p| p.line());
                parsed.rejected.push(ImportRejection {
                    line,
                    reason: format!("malformed row: {e}"),
                });
                continue;
            }
        };
        let line = record.position().map_or(fallback_line, |p| p.line());
        let result = record
            .deserialize::<CardRecord>(Some(&headers))
            .map_err(|e| format!("invalid field: {e}"))
            .and_then(|r| r.into_new_card(now));
        match result {
            Ok(card) => parsed.cards.push(card),
            Err(reason) => parsed.rejected.push(ImportRejection { line, reason }),
        }
    }
    Ok(parsed)
}
