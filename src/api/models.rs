// API request/response models (DTOs)

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::model::{CatalogProduct, MappingRule};
use crate::conversion::converter::UnitBreakdown;
use crate::facts::snapshot::GroupTotal;
use crate::resolution::resolver::ResolutionReport;

/// Standard API response wrapper
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Stable machine-readable code, e.g. "refresh_in_progress".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Meta>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            code: None,
            meta: Some(Meta::now()),
        }
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
            code: Some(code.into()),
            meta: Some(Meta::now()),
        }
    }
}

/// Metadata included in all API responses
#[derive(Debug, Serialize, Deserialize)]
pub struct Meta {
    pub timestamp: DateTime<Utc>,
    pub request_id: String,
    pub version: String,
}

impl Meta {
    pub fn now() -> Self {
        Self {
            timestamp: Utc::now(),
            request_id: uuid::Uuid::new_v4().to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub database: String,
    pub uptime_seconds: u64,
}

/// Refresh trigger request
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct RefreshTriggerRequest {
    #[serde(default)]
    pub dry_run: bool,
}

/// Result of a completed (or dry-run) refresh pass
#[derive(Debug, Serialize, Deserialize)]
pub struct RefreshResultResponse {
    pub row_count: usize,
    pub unmapped_count: usize,
    pub warning_count: usize,
    pub duration_seconds: f64,
    pub timestamp: DateTime<Utc>,
    pub dry_run: bool,
}

/// Read-only snapshot/refresh status
#[derive(Debug, Serialize, Deserialize)]
pub struct RefreshStatusResponse {
    pub state: String, // "stale" | "refreshing" | "fresh"
    pub populated: bool,
    pub row_count: usize,
    pub unmapped_count: usize,
    pub total_revenue_minor: i64,
    pub order_date_from: Option<NaiveDate>,
    pub order_date_to: Option<NaiveDate>,
    pub distinct_channels: usize,
    pub generated_at: Option<DateTime<Utc>>,
}

/// Conversion query: ?sku=..&quantity=..&from=box&to=unit
#[derive(Debug, Serialize, Deserialize)]
pub struct ConvertQuery {
    pub sku: String,
    pub quantity: i64,
    pub from: String,
    pub to: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConvertResponse {
    pub sku: String,
    pub quantity: i64,
    pub from: String,
    pub to: String,
    pub result: f64,
    /// Exact canonical unit count the result was derived from.
    pub canonical_units: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BreakdownQuery {
    pub units: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BreakdownResponse {
    pub sku: String,
    #[serde(flatten)]
    pub breakdown: UnitBreakdown,
}

/// Admin rule-testing request
#[derive(Debug, Serialize, Deserialize)]
pub struct ResolveTestRequest {
    pub external_sku: String,
}

pub type ResolveTestResponse = ResolutionReport;

/// Rule create/update payload; id is taken from the path for updates.
#[derive(Debug, Serialize, Deserialize)]
pub struct RulePayload {
    pub source_pattern: String,
    pub pattern_type: String,
    pub target_sku: String,
    #[serde(default = "default_multiplier")]
    pub quantity_multiplier: i64,
    #[serde(default = "default_confidence")]
    pub confidence: i16,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_multiplier() -> i64 {
    1
}

fn default_confidence() -> i16 {
    100
}

fn default_true() -> bool {
    true
}

pub type RuleResponse = MappingRule;
pub type ProductPayload = CatalogProduct;

#[derive(Debug, Serialize, Deserialize)]
pub struct SummaryQuery {
    #[serde(default = "default_group_by")]
    pub group_by: String,
}

fn default_group_by() -> String {
    "category".to_string()
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SummaryResponse {
    pub group_by: String,
    pub groups: Vec<GroupTotal>,
    pub total_revenue_minor: i64,
}
