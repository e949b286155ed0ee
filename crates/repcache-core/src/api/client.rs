//! HTTP client for the coaching REST API.
//!
//! `ApiClient` issues bearer-authenticated JSON requests against a base URL
//! and implements `CoachApi` for the caches.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{header, Client, Method};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use super::{ApiError, CoachApi};
use crate::models::{
    CardioLogRequest, DashboardSummary, Exercise, FeeRecord, Macrocycle, Microcycle, MuscleGroup,
    StudentSummary, WeightEntry, WorkoutSession,
};

// ============================================================================
// Constants
// ============================================================================

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

/// Number of sessions in the short history view.
const RECENT_HISTORY_LIMIT: u32 = 20;

/// API client for the coaching backend.
/// Clone is cheap - reqwest::Client and the token slot are shared.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    token: Arc<RwLock<Option<String>>>,
}

impl ApiClient {
    pub fn new(base_url: &str, timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: Arc::new(RwLock::new(None)),
        })
    }

    /// Set the bearer token for authenticated requests
    pub fn set_token(&self, token: String) {
        *self.token.write().unwrap_or_else(PoisonError::into_inner) = Some(token);
    }

    pub fn clear_token(&self) {
        *self.token.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub fn has_token(&self) -> bool {
        self.token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn auth_headers(&self) -> Result<header::HeaderMap> {
        let mut headers = header::HeaderMap::new();
        let token = self.token.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(ref token) = *token {
            headers.insert(
                header::AUTHORIZATION,
                header::HeaderValue::from_str(&format!("Bearer {}", token))?,
            );
        }
        Ok(headers)
    }

    /// Check if response is successful, returning an error with body if not.
    /// Returns Ok(Some(response)) for success, Ok(None) for rate limit (should retry),
    /// or Err for other errors.
    async fn check_response_for_retry(
        response: reqwest::Response,
    ) -> Result<Option<reqwest::Response>> {
        if response.status().is_success() {
            Ok(Some(response))
        } else if response.status().as_u16() == 429 {
            Ok(None)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body).into())
        }
    }

    async fn send<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<reqwest::Response> {
        let url = self.url(path);
        let mut retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            let mut request = self
                .client
                .request(method.clone(), &url)
                .headers(self.auth_headers()?);
            if let Some(body) = body {
                request = request.json(body);
            }

            let response = request
                .send()
                .await
                .map_err(ApiError::from)
                .with_context(|| format!("Failed to send {} request to {}", method, url))?;

            match Self::check_response_for_retry(response).await? {
                Some(response) => return Ok(response),
                None => {
                    retries += 1;
                    if retries > MAX_RATE_LIMIT_RETRIES {
                        return Err(ApiError::RateLimited.into());
                    }
                    warn!(url = %url, retry = retries, backoff_ms, "Rate limited, backing off");
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms *= 2;
                }
            }
        }
    }

    async fn send_json<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<T> {
        let response = self.send(method, path, body).await?;
        response
            .json()
            .await
            .map_err(ApiError::from)
            .with_context(|| format!("Failed to parse JSON response from {}", path))
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        debug!(path, "GET");
        self.send_json::<T, ()>(Method::GET, path, None).await
    }

    pub async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<T> {
        debug!(path, "POST");
        self.send_json(Method::POST, path, Some(body)).await
    }

    pub async fn put<T: DeserializeOwned, B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<T> {
        debug!(path, "PUT");
        self.send_json(Method::PUT, path, Some(body)).await
    }

    pub async fn patch<T: DeserializeOwned, B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<T> {
        debug!(path, "PATCH");
        self.send_json(Method::PATCH, path, Some(body)).await
    }

    pub async fn delete(&self, path: &str) -> Result<()> {
        debug!(path, "DELETE");
        self.send::<()>(Method::DELETE, path, None).await?;
        Ok(())
    }
}

#[async_trait]
impl CoachApi for ApiClient {
    fn set_auth_token(&self, token: Option<&str>) {
        match token {
            Some(token) => self.set_token(token.to_string()),
            None => self.clear_token(),
        }
    }

    async fn fetch_macrocycles(&self, student_id: i64) -> Result<Vec<Macrocycle>> {
        self.get(&format!("students/{}/macrocycles", student_id)).await
    }

    async fn fetch_history(&self, student_id: i64) -> Result<Vec<WorkoutSession>> {
        self.get(&format!(
            "students/{}/history?limit={}",
            student_id, RECENT_HISTORY_LIMIT
        ))
        .await
    }

    async fn fetch_full_history(&self, student_id: i64) -> Result<Vec<WorkoutSession>> {
        self.get(&format!("students/{}/history", student_id)).await
    }

    async fn fetch_dashboard(&self, student_id: i64) -> Result<DashboardSummary> {
        self.get(&format!("students/{}/dashboard", student_id)).await
    }

    async fn fetch_fees(&self, student_id: i64) -> Result<Vec<FeeRecord>> {
        self.get(&format!("students/{}/fees", student_id)).await
    }

    async fn fetch_weight_history(&self, student_id: i64) -> Result<Vec<WeightEntry>> {
        self.get(&format!("students/{}/weight", student_id)).await
    }

    async fn fetch_microcycle(&self, microcycle_id: i64) -> Result<Microcycle> {
        self.get(&format!("microcycles/{}", microcycle_id)).await
    }

    async fn fetch_students_summary(&self) -> Result<Vec<StudentSummary>> {
        self.get("coach/students/summary").await
    }

    async fn fetch_exercise_catalog(&self) -> Result<Vec<Exercise>> {
        self.get("exercises").await
    }

    async fn fetch_muscle_groups(&self) -> Result<Vec<MuscleGroup>> {
        self.get("muscle-groups").await
    }

    async fn submit_cardio_log(&self, log: &CardioLogRequest) -> Result<WorkoutSession> {
        self.post("cardio-logs", log).await
    }
}
