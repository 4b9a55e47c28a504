//! # HTTP Client Module
//!
//! Single point of outbound communication with the ZdravScan backend.
//!
//! Every request reads the bearer token from the shared [`TokenReader`] at call
//! time, so token changes made by the auth session apply to the next request.
//! The client never retries on its own.

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::multipart::{Form, Part};
use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error};

use crate::api_errors::{ApiError, ApiResult};
use crate::client_config::ClientConfig;
use crate::models::{
    AuthRequest, AuthResponse, CategoryList, CreateSubscriptionRequest, HistoryPage, ImageFile,
    LiteratureDetail, LiteraturePage, LiteratureSearchResults, MessageResponse, Page, PlanList,
    ScanHistoryPage, ScanId, ScanRecord, Subscription, SubscriptionStatus, SubscriptionType, User,
};
use crate::token_store::TokenReader;

const JSON: &str = "application/json";

/// Extra headers, query parameters and JSON body for a single request
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    headers: HeaderMap,
    query: Vec<(String, String)>,
    body: Option<Value>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a header; caller headers override the JSON defaults
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn query(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    pub fn page(self, page: Page) -> Self {
        self.query("limit", page.limit).query("offset", page.offset)
    }

    pub fn json<B: Serialize + ?Sized>(mut self, body: &B) -> ApiResult<Self> {
        self.body = Some(serde_json::to_value(body)?);
        Ok(self)
    }
}

/// Filter for the literature list endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiteratureFilter {
    pub category: Option<String>,
    pub search: Option<String>,
    pub page: Page,
}

impl Default for LiteratureFilter {
    fn default() -> Self {
        Self {
            category: None,
            search: None,
            page: Page::new(20, 0),
        }
    }
}

/// REST client for the backend API
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    token: TokenReader,
}

impl ApiClient {
    /// Create a client for `config.api_url` reading its token from `token`
    pub fn new(config: &ClientConfig, token: TokenReader) -> ApiResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| ApiError::Transport(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: config.api_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Whether a bearer token would be attached to the next request
    pub fn has_token(&self) -> bool {
        self.token.is_present()
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url, endpoint)
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match self.token.current() {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Perform a JSON request against `endpoint` and parse the JSON response
    pub async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        endpoint: &str,
        options: RequestOptions,
    ) -> ApiResult<T> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(JSON));
        headers.insert(ACCEPT, HeaderValue::from_static(JSON));
        for (name, value) in options.headers.iter() {
            headers.insert(name.clone(), value.clone());
        }

        let mut builder = self.http.request(method.clone(), self.url(endpoint)).headers(headers);
        if !options.query.is_empty() {
            builder = builder.query(&options.query);
        }
        if let Some(body) = options.body {
            builder = builder.body(body.to_string());
        }

        debug!(method = %method, endpoint, "Sending API request");
        self.execute(self.authorize(builder), endpoint).await
    }

    pub async fn get<T: DeserializeOwned>(&self, endpoint: &str, options: RequestOptions) -> ApiResult<T> {
        self.request(Method::GET, endpoint, options).await
    }

    pub async fn post<T: DeserializeOwned>(&self, endpoint: &str, options: RequestOptions) -> ApiResult<T> {
        self.request(Method::POST, endpoint, options).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, endpoint: &str, options: RequestOptions) -> ApiResult<T> {
        self.request(Method::DELETE, endpoint, options).await
    }

    async fn execute<T: DeserializeOwned>(&self, builder: RequestBuilder, endpoint: &str) -> ApiResult<T> {
        let response = builder.send().await.map_err(|e| {
            error!(endpoint, error = %e, "API request failed without a response");
            ApiError::Transport(e.to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = error_message(status.as_u16(), &body);
            error!(endpoint, status = status.as_u16(), message = %message, "API request failed");
            return Err(ApiError::Request {
                status: status.as_u16(),
                message,
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        serde_json::from_slice(&bytes).map_err(|e| {
            error!(endpoint, error = %e, "Failed to parse API response");
            ApiError::Decode(e.to_string())
        })
    }

    /// Exchange the host-supplied init payload for an access token
    pub async fn authenticate(&self, init_data: &str) -> ApiResult<AuthResponse> {
        let request = AuthRequest {
            init_data: init_data.to_string(),
        };
        self.post("/api/auth", RequestOptions::new().json(&request)?).await
    }

    pub async fn current_user(&self) -> ApiResult<User> {
        self.get("/api/auth/me", RequestOptions::new()).await
    }

    /// Upload an image as multipart form data.
    ///
    /// No JSON content type is sent so reqwest can set the multipart boundary;
    /// the bearer token is still attached.
    pub async fn upload_image(&self, file: &ImageFile) -> ApiResult<ScanRecord> {
        let endpoint = "/api/scan/upload";
        let part = Part::bytes(file.bytes.clone())
            .file_name(file.file_name.clone())
            .mime_str(&file.mime_type)
            .map_err(|e| ApiError::Validation(format!("Invalid mime type {}: {e}", file.mime_type)))?;
        let form = Form::new().part("file", part);

        let builder = self
            .http
            .post(self.url(endpoint))
            .header(ACCEPT, JSON)
            .multipart(form);

        debug!(endpoint, file_name = %file.file_name, bytes = file.bytes.len(), "Uploading image");
        self.execute(self.authorize(builder), endpoint).await
    }

    pub async fn scan_result(&self, id: &ScanId) -> ApiResult<ScanRecord> {
        self.get(&format!("/api/scan/{id}"), RequestOptions::new()).await
    }

    pub async fn scan_history(&self, page: Page) -> ApiResult<ScanHistoryPage> {
        self.get("/api/scan", RequestOptions::new().page(page)).await
    }

    pub async fn query_history(&self, page: Page) -> ApiResult<HistoryPage> {
        self.get("/api/history", RequestOptions::new().page(page)).await
    }

    pub async fn clear_history(&self) -> ApiResult<MessageResponse> {
        self.delete("/api/history", RequestOptions::new()).await
    }

    pub async fn delete_history_item(&self, id: i64) -> ApiResult<MessageResponse> {
        self.delete(&format!("/api/history/{id}"), RequestOptions::new()).await
    }

    pub async fn literature(&self, filter: &LiteratureFilter) -> ApiResult<LiteraturePage> {
        let mut options = RequestOptions::new();
        if let Some(category) = &filter.category {
            options = options.query("category", category);
        }
        if let Some(search) = &filter.search {
            options = options.query("search", search);
        }
        self.get("/api/literature", options.page(filter.page)).await
    }

    pub async fn literature_detail(&self, id: i64) -> ApiResult<LiteratureDetail> {
        self.get(&format!("/api/literature/{id}"), RequestOptions::new()).await
    }

    pub async fn literature_categories(&self) -> ApiResult<CategoryList> {
        self.get("/api/literature/categories/", RequestOptions::new()).await
    }

    pub async fn search_literature(&self, query: &str, limit: u32) -> ApiResult<LiteratureSearchResults> {
        let options = RequestOptions::new().query("q", query).query("limit", limit);
        self.get("/api/literature/search/", options).await
    }

    pub async fn subscription_status(&self) -> ApiResult<SubscriptionStatus> {
        self.get("/api/subscription/status", RequestOptions::new()).await
    }

    pub async fn subscription_plans(&self) -> ApiResult<PlanList> {
        self.get("/api/subscription/plans", RequestOptions::new()).await
    }

    pub async fn create_subscription(&self, kind: SubscriptionType) -> ApiResult<Subscription> {
        let request = CreateSubscriptionRequest {
            subscription_type: kind,
        };
        self.post("/api/subscription/create", RequestOptions::new().json(&request)?)
            .await
    }

    pub async fn cancel_subscription(&self, id: i64) -> ApiResult<MessageResponse> {
        self.post(&format!("/api/subscription/{id}/cancel"), RequestOptions::new())
            .await
    }
}

/// Human-readable message for a failed response: `detail`, then `message`,
/// then `HTTP <status>`.
pub fn error_message(status: u16, body: &str) -> String {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let field = |key: &str| -> Option<String> {
        match parsed.as_ref()?.get(key)? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Null => None,
            Value::String(_) => None,
            other => Some(other.to_string()),
        }
    };

    field("detail")
        .or_else(|| field("message"))
        .unwrap_or_else(|| format!("HTTP {status}"))
}
