use anyhow::{bail, Result};
use chrono::NaiveDate;
use serde_json::Value;

use crate::api::Page;

const DATE_FORMAT: &str = "%B %d, %Y";

/// One normalized license record, ready for the store.
///
/// `license_number` stays optional here: extraction is best-effort and does
/// not filter; identity filtering happens in the driver.
#[derive(Debug, Clone, PartialEq)]
pub struct LicenseRow {
    pub license_number: Option<String>,
    pub name: Option<String>,
    pub profession: Option<String>,
    pub address: Option<String>,
    pub date_of_licensure: Option<NaiveDate>,
}

/// Flatten a page payload into license rows.
///
/// Pure, and infallible except for a malformed licensure date, which is a
/// hard error for the whole page rather than a silently-defaulted field.
pub fn extract_rows(page: &Page) -> Result<Vec<LicenseRow>> {
    let records = page.content.as_deref().unwrap_or_default();
    let mut rows = Vec::with_capacity(records.len());

    for record in records {
        let address = text_field(record, "address")
            .filter(|s| !s.is_empty())
            .or_else(|| compose_address(record));

        rows.push(LicenseRow {
            license_number: text_field(record, "licenseNumber"),
            name: text_field(record, "name"),
            profession: text_field(record, "profession"),
            address,
            date_of_licensure: clean_date(record.get("dateOfLicensure"))?,
        });
    }

    Ok(rows)
}

/// City + state, space-joined, skipping absent or empty parts.
fn compose_address(record: &Value) -> Option<String> {
    let parts: Vec<String> = [text_field(record, "city"), text_field(record, "state")]
        .into_iter()
        .flatten()
        .filter(|s| !s.is_empty())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(" "))
    }
}

/// Registry fields come either as a bare scalar or wrapped in an object
/// carrying the scalar under `"value"`. Unwraps one level, then passes
/// string and numeric scalars through as text.
fn text_field(record: &Value, key: &str) -> Option<String> {
    scalar_text(unwrap_value(record.get(key)?)?)
}

fn unwrap_value(v: &Value) -> Option<&Value> {
    match v {
        Value::Object(map) => map.get("value"),
        other => Some(other),
    }
}

fn scalar_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Missing, empty, "null" and "not on file" (any casing) all mean no date
/// on record. Anything else must be a full-month-name date.
fn clean_date(raw: Option<&Value>) -> Result<Option<NaiveDate>> {
    let text = match raw.and_then(unwrap_value).and_then(scalar_text) {
        Some(t) => t,
        None => return Ok(None),
    };

    if text.is_empty()
        || text.eq_ignore_ascii_case("null")
        || text.eq_ignore_ascii_case("not on file")
    {
        return Ok(None);
    }

    match NaiveDate::parse_from_str(&text, DATE_FORMAT) {
        Ok(date) => Ok(Some(date)),
        Err(e) => bail!("invalid dateOfLicensure {text:?}: {e}"),
    }
}

// ── Tests ──
