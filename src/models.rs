//! Wire types for the ZdravScan backend API.
//!
//! Field names follow the backend's JSON. Timestamps are accepted both with and
//! without a UTC offset since the backend emits naive datetimes from SQLite.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Opaque scan identifier.
///
/// The backend currently issues integers; the client never does arithmetic on
/// them, so both JSON numbers and strings are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ScanId(String);

impl ScanId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ScanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for ScanId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(i64),
            Text(String),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Number(n) => ScanId(n.to_string()),
            Raw::Text(s) => ScanId(s),
        })
    }
}

/// Processing state of a submitted scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    /// Any status string this client does not know yet
    #[serde(other)]
    Unknown,
}

impl ScanStatus {
    /// Status only moves forward: `{pending|processing}* -> {completed|failed}`
    pub fn is_terminal(self) -> bool {
        matches!(self, ScanStatus::Completed | ScanStatus::Failed)
    }
}

/// Diagnosis produced by the backend for a completed scan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosisResult {
    pub condition_label: String,
    pub description: String,
    /// Confidence in `0.0..=1.0`
    pub confidence: Option<f64>,
    pub recommendations: Vec<String>,
}

/// Scan record as returned by `/api/scan/upload` and `/api/scan/{id}`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ScanRecord {
    pub id: ScanId,
    pub status: ScanStatus,
    #[serde(default)]
    pub condition_detected: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub recommendations: Vec<String>,
    #[serde(default, deserialize_with = "flexible_timestamp")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "flexible_timestamp")]
    pub processed_at: Option<DateTime<Utc>>,
}

impl ScanRecord {
    /// Assemble the diagnosis carried by a completed record
    pub fn diagnosis(&self) -> Option<DiagnosisResult> {
        if self.status != ScanStatus::Completed {
            return None;
        }

        Some(DiagnosisResult {
            condition_label: self.condition_detected.clone().unwrap_or_default(),
            description: self.description.clone().unwrap_or_default(),
            confidence: self.confidence.map(|c| c.clamp(0.0, 1.0)),
            recommendations: self.recommendations.clone(),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ScanHistoryPage {
    #[serde(default)]
    pub scans: Vec<ScanRecord>,
    #[serde(default)]
    pub total: u64,
}

/// Image file about to be submitted for analysis
#[derive(Debug, Clone, PartialEq)]
pub struct ImageFile {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl ImageFile {
    pub fn new(file_name: impl Into<String>, mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            mime_type: mime_type.into(),
            bytes,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub telegram_id: i64,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
}

impl User {
    /// Name to greet the user with
    pub fn display_name(&self) -> String {
        match (&self.first_name, &self.username) {
            (Some(first), _) if !first.is_empty() => first.clone(),
            (_, Some(username)) => format!("@{username}"),
            _ => format!("#{}", self.telegram_id),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AuthRequest {
    #[serde(rename = "initData")]
    pub init_data: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthResponse {
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    pub user: User,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

/// `limit`/`offset` pair used by every paginated endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub limit: u32,
    pub offset: u32,
}

impl Page {
    pub fn new(limit: u32, offset: u32) -> Self {
        Self { limit, offset }
    }

    /// The page after this one
    pub fn next(self) -> Self {
        Self {
            offset: self.offset + self.limit,
            ..self
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryHistoryEntry {
    pub id: i64,
    pub query_text: String,
    #[serde(default)]
    pub scan_id: Option<i64>,
    #[serde(default, deserialize_with = "flexible_timestamp")]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct HistoryPage {
    #[serde(default)]
    pub history: Vec<QueryHistoryEntry>,
    #[serde(default)]
    pub total: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LiteratureSummary {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub category: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LiteratureDetail {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub content: String,
    pub category: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct LiteraturePage {
    #[serde(default)]
    pub literature: Vec<LiteratureSummary>,
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub categories: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CategoryList {
    #[serde(default)]
    pub categories: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LiteratureSearchHit {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub category: String,
    #[serde(default)]
    pub relevance_snippet: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct LiteratureSearchResults {
    #[serde(default)]
    pub results: Vec<LiteratureSearchHit>,
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub query: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionType {
    Trial,
    Express,
    Quarter,
    Annual,
}

impl SubscriptionType {
    pub fn as_str(self) -> &'static str {
        match self {
            SubscriptionType::Trial => "trial",
            SubscriptionType::Express => "express",
            SubscriptionType::Quarter => "quarter",
            SubscriptionType::Annual => "annual",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "trial" => Some(SubscriptionType::Trial),
            "express" => Some(SubscriptionType::Express),
            "quarter" => Some(SubscriptionType::Quarter),
            "annual" => Some(SubscriptionType::Annual),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionState {
    Active,
    Expired,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Subscription {
    pub id: i64,
    pub subscription_type: SubscriptionType,
    pub status: SubscriptionState,
    #[serde(default, deserialize_with = "flexible_timestamp")]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "flexible_timestamp")]
    pub end_date: Option<DateTime<Utc>>,
    pub is_trial: bool,
    pub days_remaining: i64,
    pub auto_renew: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SubscriptionStatus {
    pub has_active_subscription: bool,
    #[serde(default)]
    pub subscription: Option<Subscription>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SubscriptionPlan {
    #[serde(rename = "type")]
    pub plan_type: SubscriptionType,
    pub name: String,
    pub duration: String,
    pub price: u32,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PlanList {
    #[serde(default)]
    pub plans: Vec<SubscriptionPlan>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateSubscriptionRequest {
    pub subscription_type: SubscriptionType,
}

/// `{"message": ...}` acknowledgement body
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct MessageResponse {
    #[serde(default)]
    pub message: String,
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

fn flexible_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = match Option::<String>::deserialize(deserializer)? {
        Some(raw) => raw,
        None => return Ok(None),
    };

    if let Ok(with_offset) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(Some(with_offset.with_timezone(&Utc)));
    }

    NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(&raw, "%Y-%m-%d %H:%M:%S%.f"))
        .map(|naive| Some(naive.and_utc()))
        .map_err(serde::de::Error::custom)
}
