use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::task;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::{
    analyzer::parse_document_value,
    config::Config,
    corpus::Corpus,
    diagram,
    error::IndexError,
    models::{IndexStats, SearchQuery, WorkflowRecord},
    query::{deep_search, QueryEngine},
    rate_limit::{RateLimitHeaders, RateLimiter},
    store::{IndexStore, StoreSource},
};

const ANONYMOUS_CLIENT: &str = "anonymous";
const FORWARDED_FOR: &str = "x-forwarded-for";
/// Extra time a blocking task gets past its own deadline before the request
/// is abandoned with a timeout.
const DEADLINE_GRACE: Duration = Duration::from_millis(1_000);

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<IndexStore>,
    pub corpus: Arc<Corpus>,
    pub deep_limiter: Arc<RateLimiter>,
}

impl AppState {
    pub fn new(config: Config, store: IndexStore, corpus: Corpus) -> Self {
        let deep_limiter =
            RateLimiter::new(config.deep_search_per_minute, config.deep_search_burst);
        Self {
            config: Arc::new(config),
            store: Arc::new(store),
            corpus: Arc::new(corpus),
            deep_limiter: Arc::new(deep_limiter),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ApiError {
    code: &'static str,
    message: String,
    http_status: StatusCode,
    rate: Option<RateLimitHeaders>,
}

impl ApiError {
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new("INVALID_ARGUMENT", message, StatusCode::BAD_REQUEST)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("NOT_FOUND", message, StatusCode::NOT_FOUND)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new("TIMEOUT", message, StatusCode::GATEWAY_TIMEOUT)
    }

    pub fn rate_limited(headers: RateLimitHeaders) -> Self {
        Self {
            rate: Some(headers),
            ..Self::new(
                "RATE_LIMITED",
                "Rate limit exceeded",
                StatusCode::TOO_MANY_REQUESTS,
            )
        }
    }

    /// Logs `detail` under a fresh trace id; the client only sees the id.
    pub fn internal(detail: impl std::fmt::Display) -> Self {
        let trace_id = Uuid::new_v4();
        error!(%trace_id, "Internal error: {detail}");
        Self::new(
            "INTERNAL",
            format!("Internal error (trace id {trace_id})"),
            StatusCode::INTERNAL_SERVER_ERROR,
        )
    }

    fn new(code: &'static str, message: impl Into<String>, http_status: StatusCode) -> Self {
        Self {
            code,
            message: message.into(),
            http_status,
            rate: None,
        }
    }

    pub fn code(&self) -> &'static str {
        self.code
    }

    pub fn status(&self) -> StatusCode {
        self.http_status
    }
}

impl From<IndexError> for ApiError {
    fn from(err: IndexError) -> Self {
        match err {
            IndexError::EmptyQuery | IndexError::InvalidArgument(_) => {
                Self::invalid_argument(err.to_string())
            }
            IndexError::NotFound(_) => Self::not_found(err.to_string()),
            IndexError::Timeout(_) => Self::timeout(err.to_string()),
            IndexError::Parse { .. }
            | IndexError::Io { .. }
            | IndexError::EmptyCorpus(_)
            | IndexError::Serialize(_) => Self::internal(err),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": {
                "code": self.code,
                "message": self.message,
            }
        }));
        match self.rate {
            Some(rate) => (self.http_status, rate_headers(&rate), body).into_response(),
            None => (self.http_status, body).into_response(),
        }
    }
}

type ApiResult<T = Response> = Result<T, ApiError>;

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now(),
        "workflows": state.store.stats().total,
        "index_source": state.store.source(),
    }))
}

#[derive(Serialize)]
struct StatsResponse<'a> {
    #[serde(flatten)]
    stats: &'a IndexStats,
    generated_at: Option<chrono::DateTime<Utc>>,
    version: &'a str,
    index_source: StoreSource,
}

pub async fn stats(State(state): State<AppState>) -> Response {
    let store = &state.store;
    Json(StatsResponse {
        stats: store.stats(),
        generated_at: store.generated_at(),
        version: store.version(),
        index_source: store.source(),
    })
    .into_response()
}

#[derive(Debug, Default, Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub q: Option<String>,
    #[serde(default)]
    pub page: Option<usize>,
    #[serde(default)]
    pub per_page: Option<usize>,
    #[serde(default)]
    pub trigger: Option<String>,
    #[serde(default)]
    pub complexity: Option<String>,
    #[serde(default)]
    pub active_only: Option<bool>,
}

impl SearchParams {
    pub fn into_query(self, config: &Config) -> SearchQuery {
        SearchQuery {
            text: self.q.unwrap_or_default(),
            page: self.page.unwrap_or(1),
            per_page: self.per_page.unwrap_or(config.default_per_page),
            trigger: self.trigger,
            complexity: self.complexity,
            active_only: self.active_only.unwrap_or(false),
        }
        .normalized(config.max_per_page)
    }
}

pub async fn search_workflows(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Response {
    let query = params.into_query(&state.config);
    let result = QueryEngine::new(&state.store).search(&query);
    debug!(
        query = %query.text,
        total = result.total,
        page = result.page,
        "Workflow search"
    );
    Json(result).into_response()
}

#[derive(Debug, Default, Deserialize)]
pub struct DeepSearchParams {
    #[serde(default)]
    pub q: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

pub async fn deep_search_workflows(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<DeepSearchParams>,
) -> ApiResult {
    let client = client_key(&headers);
    let rate = state.deep_limiter.check(&client).await;
    if !rate.allowed {
        warn!(client = %client, "Deep search rate limit exceeded");
        return Err(ApiError::rate_limited(rate.headers));
    }

    let text = params.q.unwrap_or_default();
    if text.trim().is_empty() {
        return Err(IndexError::EmptyQuery.into());
    }
    let limit = params
        .limit
        .unwrap_or(state.config.deep_search_limit)
        .clamp(1, state.config.deep_search_max_limit);

    let result = deep_search_within(
        state.corpus.clone(),
        text,
        limit,
        state.config.deep_search_timeout,
    )
    .await?;

    if result.timed_out {
        warn!(
            query = %result.query,
            hits = result.total,
            "Deep search stopped at deadline"
        );
    }
    Ok((rate_headers(&rate.headers), Json(result)).into_response())
}

/// Runs a deep search on the blocking pool. Hitting `budget` yields the
/// partial result marked `timed_out`.
pub async fn deep_search_within(
    corpus: Arc<Corpus>,
    text: String,
    limit: usize,
    budget: Duration,
) -> ApiResult<crate::models::DeepSearchResult> {
    run_blocking(budget, "deep search", move |deadline| {
        deep_search(&corpus, &text, limit, Some(deadline))
    })
    .await
}

#[derive(Serialize)]
struct WorkflowDetail<'a> {
    metadata: Option<&'a WorkflowRecord>,
    raw_workflow: Value,
    placeholder: bool,
}

pub async fn get_workflow(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> ApiResult {
    let (raw_workflow, placeholder) = load_raw(&state, &filename).await?;
    Ok(Json(WorkflowDetail {
        metadata: state.store.find(&filename),
        raw_workflow,
        placeholder,
    })
    .into_response())
}

pub async fn get_workflow_diagram(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> ApiResult {
    let (raw, placeholder) = load_raw(&state, &filename).await?;
    let doc = parse_document_value(&filename, raw)?;
    let diagram = diagram::reconstruct(&doc);

    let workflow_name = state
        .store
        .find(&filename)
        .map(|record| record.name.clone())
        .unwrap_or_else(|| doc.name.clone());

    Ok(Json(json!({
        "diagram": diagram.to_mermaid(),
        "workflow_name": workflow_name,
        "node_count": diagram.nodes.len(),
        "nodes": diagram.nodes,
        "edges": diagram.edges,
        "unresolved": diagram.unresolved,
        "collisions": diagram.collisions,
        "placeholder": placeholder,
    }))
    .into_response())
}

pub async fn download_workflow(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> ApiResult {
    let (raw, _) = load_raw(&state, &filename).await?;
    let disposition = format!("attachment; filename=\"{}\"", filename.replace('"', ""));
    let disposition = HeaderValue::from_str(&disposition)
        .map_err(|_| ApiError::invalid_argument("filename is not a valid header value"))?;
    Ok((
        [
            (header::CONTENT_TYPE, HeaderValue::from_static("application/json")),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        Json(raw),
    )
        .into_response())
}

/// Raw document from the corpus, or the placeholder for an indexed record
/// whose file is gone.
async fn load_raw(state: &AppState, filename: &str) -> ApiResult<(Value, bool)> {
    let corpus = state.corpus.clone();
    let name = filename.to_string();
    let read = run_blocking(state.config.read_timeout, "reading workflow", move |deadline| {
        corpus.read_value_until(&name, Some(deadline))
    })
    .await;

    match read {
        Ok(value) => Ok((value, false)),
        Err(err) if err.code() == "NOT_FOUND" => match state.store.find(filename) {
            Some(record) => Ok((record.placeholder_document(), true)),
            None => Err(err),
        },
        Err(err) => Err(err),
    }
}

/// `work` receives a deadline fixed before the task is spawned; the outer
/// timeout only fires if the task overruns it by more than `DEADLINE_GRACE`.
async fn run_blocking<T, F>(budget: Duration, what: &'static str, work: F) -> ApiResult<T>
where
    F: FnOnce(Instant) -> crate::error::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let deadline = Instant::now() + budget;
    tokio::time::timeout(
        budget + DEADLINE_GRACE,
        task::spawn_blocking(move || work(deadline)),
    )
        .await
        .map_err(|_| ApiError::timeout(format!("Timed out while {what}")))?
        .map_err(|err| ApiError::internal(format!("{what} task failed: {err}")))?
        .map_err(ApiError::from)
}

/// First `x-forwarded-for` hop, or a shared anonymous bucket.
pub fn client_key(headers: &HeaderMap) -> String {
    headers
        .get(FORWARDED_FOR)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(ANONYMOUS_CLIENT)
        .to_string()
}

fn rate_headers(rate: &RateLimitHeaders) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in [
        ("x-ratelimit-limit", u64::from(rate.limit)),
        ("x-ratelimit-remaining", u64::from(rate.remaining)),
        ("x-ratelimit-reset", rate.reset_seconds),
    ] {
        headers.insert(HeaderName::from_static(name), HeaderValue::from(value));
    }
    headers
}
