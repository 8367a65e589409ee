//! Raw provider result -> canonical record.
//!
//! One decoding branch per raw shape. A record is accepted only with a
//! non-empty title and company and an absolute http(s) URL; every other field
//! is best-effort and falls back to [`UNKNOWN`].

use chrono::{DateTime, NaiveDate};
use jobsweep_core::{BrowserCard, CanonicalRecord, RawResult, RawShape, SearchTask, UNKNOWN};
use serde_json::{Map as JsonMap, Value as JsonValue};
use thiserror::Error;
use url::Url;

use crate::config::NormalizerPolicy;

/// Why a raw result did not become a canonical record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Rejected {
    #[error("missing title")]
    MissingTitle,
    #[error("missing company")]
    MissingCompany,
    #[error("missing or non-http(s) url")]
    InvalidUrl,
}

const PLACEHOLDERS: &[&str] = &["nan", "none", "null", "n/a"];

/// Fields pulled out of a raw shape before validation.
#[derive(Debug, Default)]
struct Fields {
    title: Option<String>,
    company: Option<String>,
    location: Option<String>,
    description: Option<String>,
    url: Option<String>,
    date_posted: Option<String>,
    job_type: Option<String>,
    remote: Option<bool>,
    salary: Option<String>,
    site: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct Normalizer {
    policy: NormalizerPolicy,
}

impl Normalizer {
    pub fn new(policy: NormalizerPolicy) -> Self {
        Self { policy }
    }

    pub fn normalize(&self, raw: &RawResult, task: &SearchTask) -> Option<CanonicalRecord> {
        self.try_normalize(raw, task).ok()
    }

    pub fn try_normalize(&self, raw: &RawResult, task: &SearchTask) -> Result<CanonicalRecord, Rejected> {
        let fields = match &raw.shape {
            RawShape::ApiRow(row) => api_fields(row),
            RawShape::BrowserCard(card) => card_fields(card),
        };

        let title = fields.title.ok_or(Rejected::MissingTitle)?;
        let company = fields.company.ok_or(Rejected::MissingCompany)?;
        let url = fields
            .url
            .filter(|u| is_absolute_http(u))
            .ok_or(Rejected::InvalidUrl)?;

        let location = fields.location.unwrap_or_else(|| UNKNOWN.to_string());
        let region = extract_region(&location, self.policy.region_token_max_chars)
            .or_else(|| extract_region(&task.location, self.policy.region_token_max_chars));

        Ok(CanonicalRecord {
            title,
            company,
            location,
            description: fields
                .description
                .map(|d| truncate_chars(&d, self.policy.description_max_chars))
                .unwrap_or_else(|| UNKNOWN.to_string()),
            url,
            date_posted: fields
                .date_posted
                .map(|d| normalize_date(&d))
                .unwrap_or_else(|| UNKNOWN.to_string()),
            job_type: fields.job_type.unwrap_or_else(|| UNKNOWN.to_string()),
            remote: fields.remote,
            salary: fields.salary.unwrap_or_else(|| UNKNOWN.to_string()),
            source: fields.site.unwrap_or_else(|| raw.source.clone()),
            search_term: task.term.clone(),
            search_location: task.location.clone(),
            region,
        })
    }
}

fn api_fields(row: &JsonMap<String, JsonValue>) -> Fields {
    let text = |key: &str| row.get(key).and_then(coerce);
    Fields {
        title: text("title"),
        company: text("company"),
        location: text("location"),
        description: text("description"),
        url: text("job_url").or_else(|| text("url")),
        date_posted: text("date_posted"),
        job_type: text("job_type"),
        remote: text("is_remote").and_then(|v| parse_flag(&v)),
        salary: salary_summary(
            text("min_amount"),
            text("max_amount"),
            text("interval"),
        ),
        site: text("site"),
    }
}

fn card_fields(card: &BrowserCard) -> Fields {
    let clean = |v: &Option<String>| v.as_deref().and_then(clean_text);
    Fields {
        title: clean(&card.title),
        company: clean(&card.company),
        location: clean(&card.location),
        description: clean(&card.description),
        url: clean(&card.link),
        date_posted: clean(&card.posted),
        ..Fields::default()
    }
}

fn clean_text(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() || PLACEHOLDERS.iter().any(|p| trimmed.eq_ignore_ascii_case(p)) {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Coerce a loosely typed JSON value into trimmed text.
fn coerce(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::Null => None,
        JsonValue::Bool(b) => Some(b.to_string()),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(i.to_string())
            } else if let Some(u) = n.as_u64() {
                Some(u.to_string())
            } else {
                let f = n.as_f64()?;
                if f.is_finite() && f.fract() == 0.0 {
                    Some(format!("{f:.0}"))
                } else {
                    Some(f.to_string())
                }
            }
        }
        JsonValue::String(s) => clean_text(s),
        JsonValue::Array(items) => {
            let parts = items.iter().filter_map(coerce).collect::<Vec<_>>();
            (!parts.is_empty()).then(|| parts.join(", "))
        }
        JsonValue::Object(_) => None,
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

fn is_absolute_http(value: &str) -> bool {
    Url::parse(value)
        .map(|u| matches!(u.scheme(), "http" | "https") && u.host_str().is_some_and(|h| !h.is_empty()))
        .unwrap_or(false)
}

fn truncate_chars(value: &str, max_chars: usize) -> String {
    match value.char_indices().nth(max_chars) {
        Some((cut, _)) => value[..cut].to_string(),
        None => value.to_string(),
    }
}

fn normalize_date(value: &str) -> String {
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return date.format("%Y-%m-%d").to_string();
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return ts.date_naive().format("%Y-%m-%d").to_string();
    }
    value.to_string()
}

/// `"3000-5000 monthly"`; a zero amount counts as absent.
fn salary_summary(min: Option<String>, max: Option<String>, interval: Option<String>) -> Option<String> {
    let present = |v: Option<String>| v.filter(|a| a.parse::<f64>().map_or(true, |n| n != 0.0));
    let amount = match (present(min), present(max)) {
        (Some(lo), Some(hi)) => format!("{lo}-{hi}"),
        (Some(one), None) | (None, Some(one)) => one,
        (None, None) => return None,
    };
    Some(match interval {
        Some(interval) => format!("{amount} {interval}"),
        None => amount,
    })
}

/// Trailing comma segment of `location` when it is short enough to read as a
/// state or region abbreviation. Heuristic; may miss or misread.
pub fn extract_region(location: &str, max_chars: usize) -> Option<String> {
    let (_, tail) = location.rsplit_once(',')?;
    let tail = tail.trim();
    if tail.is_empty() || tail.chars().count() > max_chars {
        None
    } else {
        Some(tail.to_string())
    }
}
