//! Domain layer for the downsampling query store
//!
//! # Domain Models
//!
//! - `DownsamplingQuery`: one source-to-aggregated-target transformation
//! - `AggregationField`: one (alias, field, function) triple of a query
//! - `QueryState`: lifecycle position of a query
//!
//! # Port Trait
//!
//! - `QueryStore`: primary storage abstraction
//!
//! # Lifecycle
//!
//! ```text
//! preview track:     PREVIEW_PENDING -> PREVIEW_DEPLOYED -> (removed on expiry)
//! production track:  PENDING -> DEPLOYED
//! either track:      -> DELETED -> (removed)
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::Result;

/// Base table name; the deployment prefix is prepended by the adapters.
pub const QUERY_TABLE: &str = "metrics_downsample_queries";

// ═══════════════════════════════════════════════════════════════════════════
// Domain Models
// ═══════════════════════════════════════════════════════════════════════════

/// Lifecycle state of a downsampling query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueryState {
    PreviewPending,
    PreviewDeployed,
    Pending,
    Deployed,
    Deleted,
}

impl QueryState {
    /// States that still need a controller invocation.
    pub const ACTIONABLE: [QueryState; 3] = [
        QueryState::Pending,
        QueryState::PreviewPending,
        QueryState::Deleted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueryState::PreviewPending => "PREVIEW_PENDING",
            QueryState::PreviewDeployed => "PREVIEW_DEPLOYED",
            QueryState::Pending => "PENDING",
            QueryState::Deployed => "DEPLOYED",
            QueryState::Deleted => "DELETED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PREVIEW_PENDING" => Some(QueryState::PreviewPending),
            "PREVIEW_DEPLOYED" => Some(QueryState::PreviewDeployed),
            "PENDING" => Some(QueryState::Pending),
            "DEPLOYED" => Some(QueryState::Deployed),
            "DELETED" => Some(QueryState::Deleted),
            _ => None,
        }
    }

    pub fn is_actionable(&self) -> bool {
        Self::ACTIONABLE.contains(self)
    }
}

impl std::fmt::Display for QueryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One aggregation of a source field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationField {
    pub alias: String,
    pub field: String,
    #[serde(rename = "func")]
    pub function: String,
}

impl AggregationField {
    pub fn new(
        alias: impl Into<String>,
        field: impl Into<String>,
        function: impl Into<String>,
    ) -> Self {
        Self {
            alias: alias.into(),
            field: field.into(),
            function: function.into(),
        }
    }
}

/// Downsampling query document
///
/// Owned by the store. Components read a copy, mutate it and write the whole
/// document back.
///
/// # Examples
///
/// ```rust
/// use downsampler_storage::domain::{AggregationField, DownsamplingQuery, QueryState};
///
/// let query = DownsamplingQuery::new("197601d5", "omni", "nsa_duration", QueryState::Pending)
///     .with_interval(60)
///     .with_field(AggregationField::new("sum_count", "count", "SUM"));
///
/// assert_eq!(query.query_id, "197601d5");
/// assert_eq!(query.fields.len(), 1);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownsamplingQuery {
    /// Display name
    #[serde(default)]
    pub nickname: String,
    pub query_id: String,
    #[serde(default)]
    pub query_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Source database
    pub db: String,
    /// Source retention policy
    #[serde(default)]
    pub rp: String,
    pub measurement: String,
    #[serde(default)]
    pub target_rp: String,
    #[serde(default)]
    pub target_measurement: String,
    /// Empty string in older documents means "no expiry recorded"
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_optional_timestamp"
    )]
    pub preview_expires_at: Option<DateTime<Utc>>,
    pub query_state: QueryState,
    #[serde(default)]
    pub fields: Vec<AggregationField>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Aggregation interval in seconds
    pub interval: u32,
    #[serde(default)]
    pub is_historic_downsampling: bool,
}

impl DownsamplingQuery {
    pub fn new(
        query_id: impl Into<String>,
        db: impl Into<String>,
        measurement: impl Into<String>,
        query_state: QueryState,
    ) -> Self {
        let now = Utc::now();
        Self {
            nickname: String::new(),
            query_id: query_id.into(),
            query_hash: String::new(),
            created_at: now,
            updated_at: now,
            db: db.into(),
            rp: String::new(),
            measurement: measurement.into(),
            target_rp: String::new(),
            target_measurement: String::new(),
            preview_expires_at: None,
            query_state,
            fields: Vec::new(),
            tags: Vec::new(),
            interval: 0,
            is_historic_downsampling: false,
        }
    }

    pub fn with_interval(mut self, seconds: u32) -> Self {
        self.interval = seconds;
        self
    }

    pub fn with_field(mut self, field: AggregationField) -> Self {
        self.fields.push(field);
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn with_preview_expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.preview_expires_at = Some(expires_at);
        self
    }
}

fn deserialize_optional_timestamp<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref() {
        None | Some("") => Ok(None),
        Some(value) => DateTime::parse_from_rfc3339(value)
            .map(|ts| Some(ts.with_timezone(&Utc)))
            .map_err(serde::de::Error::custom),
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Port Trait: QueryStore
// ═══════════════════════════════════════════════════════════════════════════

/// Downsampling query storage abstraction
///
/// # Implementations
///
/// - `SqliteQueryStore`: SQLite adapter (feature `sqlite`)
/// - `InMemoryQueryStore`: process-local map, for tests and dry runs
#[async_trait]
pub trait QueryStore: Send + Sync {
    /// All queries currently in `state`
    async fn list_by_state(&self, state: QueryState) -> Result<Vec<DownsamplingQuery>>;

    /// All queries whose state is one of `states`
    async fn list_by_states(&self, states: &[QueryState]) -> Result<Vec<DownsamplingQuery>>;

    /// Queries in PENDING, PREVIEW_PENDING or DELETED
    async fn list_actionable(&self) -> Result<Vec<DownsamplingQuery>> {
        self.list_by_states(&QueryState::ACTIONABLE).await
    }

    /// Single query by id; `None` when absent
    async fn get(&self, query_id: &str) -> Result<Option<DownsamplingQuery>>;

    /// Insert or replace the whole document
    async fn put(&self, query: &DownsamplingQuery) -> Result<()>;

    /// Remove by id; removing an absent id succeeds
    async fn delete(&self, query_id: &str) -> Result<()>;

    /// Cheap reachability check
    async fn ping(&self) -> Result<()>;
}
