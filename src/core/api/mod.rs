mod error;

pub use error::{ApiError, EXCERPT_LIMIT, extract_message, truncate};

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CACHE_CONTROL, HeaderMap, HeaderValue};
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::Serialize;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, warn};

/// Supplies business records from the platform API.
#[async_trait]
pub trait BusinessDataSource: Send + Sync {
    /// The user's organization record (`{"nombre_unidad": ...}` and friends).
    async fn organization_data(&self) -> Result<Value, ApiError>;

    /// Quote / bid payload for one business id.
    async fn quote_data(&self, business_id: &str) -> Result<Value, ApiError>;
}

/// Bid state reported back to the platform while a job runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BidState {
    #[serde(rename = "en_proceso")]
    InProgress,
    #[serde(rename = "completado")]
    Completed,
    Error,
}

/// One status update for a bid, in the platform's wire shape.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    #[serde(rename = "codigo_postulacion")]
    pub business_id: String,
    #[serde(rename = "estado")]
    pub state: BidState,
    #[serde(rename = "mensaje")]
    pub message: String,
    #[serde(rename = "paso")]
    pub step: String,
    /// RFC 3339.
    pub timestamp: String,
    #[serde(skip)]
    pub automation_id: String,
    #[serde(skip)]
    pub progress: u8,
}

impl StatusReport {
    /// Body for the status history endpoint: the update fields plus a
    /// `detalles` string carrying job context.
    pub fn log_entry(&self) -> Value {
        let details = json!({
            "automationId": self.automation_id,
            "progress": self.progress,
            "timestamp": self.timestamp,
        });
        json!({
            "codigo_postulacion": self.business_id,
            "estado": self.state,
            "mensaje": self.message,
            "paso": self.step,
            "detalles": details.to_string(),
        })
    }
}

/// Receives bid status updates. Delivery is best-effort: callers log
/// failures and carry on.
#[async_trait]
pub trait BidStatusSink: Send + Sync {
    /// Current state of the bid.
    async fn update_status(&self, report: &StatusReport) -> Result<(), ApiError>;

    /// Appends to the bid's status history.
    async fn insert_status_log(&self, report: &StatusReport) -> Result<(), ApiError>;
}

/// HTTP client for the platform API and for document downloads. Keeps a
/// cookie jar so the platform session rides along on every call.
pub struct PlatformClient {
    client: Client,
    api_base: String,
    timeout_secs: u64,
}

impl PlatformClient {
    pub fn new(api_base: &str, timeout_secs: u64) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(
            "x-requested-with",
            HeaderValue::from_static("XMLHttpRequest"),
        );
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));

        let client = Client::builder()
            .cookie_store(true)
            .default_headers(headers)
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            timeout_secs,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.api_base, path.trim_start_matches('/'))
    }

    fn request(&self, method: Method, url: &str) -> Result<RequestBuilder, ApiError> {
        let parsed = url::Url::parse(url).map_err(|e| ApiError::InvalidUrl(format!("{url}: {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ApiError::InvalidUrl(format!(
                "unsupported scheme '{}'",
                parsed.scheme()
            )));
        }
        Ok(self.client.request(method, parsed))
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Value, ApiError> {
        let res = builder.send().await.map_err(|e| self.transport_error(e))?;
        self.read_json(res).await
    }

    fn transport_error(&self, e: reqwest::Error) -> ApiError {
        if e.is_timeout() {
            ApiError::Timeout(self.timeout_secs)
        } else {
            ApiError::from_transport(&e.to_string(), self.timeout_secs)
        }
    }

    async fn read_json(&self, res: Response) -> Result<Value, ApiError> {
        let status = res.status();
        let body = res.text().await.map_err(|e| self.transport_error(e))?;
        if !status.is_success() {
            warn!("Platform call failed with HTTP {}", status.as_u16());
            return Err(ApiError::from_status(status.as_u16(), &body));
        }
        serde_json::from_str(&body).map_err(|e| {
            debug!("Non-JSON body: {}", truncate(&body, 120));
            ApiError::InvalidJson(e.to_string())
        })
    }

    /// Sends `body` as JSON when given (POST/PUT) and parses the JSON reply.
    pub async fn call(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
    ) -> Result<Value, ApiError> {
        let mut builder = self.request(method, url)?;
        if let Some(body) = body {
            builder = builder.json(body);
        }
        self.send(builder).await
    }

    pub async fn get_json(&self, url: &str) -> Result<Value, ApiError> {
        self.call(Method::GET, url, None).await
    }

    /// Fetches an arbitrary document with the session cookies and parses it as JSON.
    pub async fn download_document(&self, url: &str) -> Result<Value, ApiError> {
        debug!("Downloading document from {}", url);
        self.get_json(url).await
    }

    /// `{success:false, message}` envelopes count as failures; otherwise the
    /// named field (or the whole body) is returned.
    fn unwrap_envelope(body: Value, field: &str) -> Result<Value, ApiError> {
        if body.get("success").and_then(Value::as_bool) == Some(false) {
            let message = body
                .get("message")
                .or_else(|| body.get("error"))
                .and_then(Value::as_str)
                .unwrap_or("success=false")
                .to_string();
            return Err(ApiError::Rejected(message));
        }
        Ok(body.get(field).cloned().unwrap_or(body))
    }
}

#[async_trait]
impl BusinessDataSource for PlatformClient {
    async fn organization_data(&self) -> Result<Value, ApiError> {
        let body = self.get_json(&self.endpoint("organization-data")).await?;
        Self::unwrap_envelope(body, "organization")
    }

    async fn quote_data(&self, business_id: &str) -> Result<Value, ApiError> {
        let path = format!("cotizacion-data/{}", urlencode_segment(business_id));
        let body = self.get_json(&self.endpoint(&path)).await?;
        Self::unwrap_envelope(body, "data")
    }
}

#[async_trait]
impl BidStatusSink for PlatformClient {
    async fn update_status(&self, report: &StatusReport) -> Result<(), ApiError> {
        let body = serde_json::to_value(report).map_err(|e| ApiError::InvalidJson(e.to_string()))?;
        let url = self.endpoint("update-estado-postulacion");
        let reply = self.call(Method::POST, &url, Some(&body)).await?;
        if reply.get("success").and_then(Value::as_bool) == Some(false) {
            warn!(
                business_id = %report.business_id,
                "Platform flagged the status update: {}",
                extract_message(&reply.to_string())
            );
        }
        Ok(())
    }

    async fn insert_status_log(&self, report: &StatusReport) -> Result<(), ApiError> {
        let url = self.endpoint("insertar-estado-postulacion");
        self.call(Method::POST, &url, Some(&report.log_entry()))
            .await
            .map(|_| ())
    }
}

fn urlencode_segment(segment: &str) -> String {
    url::form_urlencoded::byte_serialize(segment.as_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn endpoints_join_cleanly() {
        let client = PlatformClient::new("https://api.example.test/ext/", 30).unwrap();
        assert_eq!(
            client.endpoint("/organization-data"),
            "https://api.example.test/ext/organization-data"
        );
    }

    #[test]
    fn envelope_unwrapping() {
        let org = PlatformClient::unwrap_envelope(
            json!({"success": true, "organization": {"nombre_unidad": "X"}}),
            "organization",
        )
        .unwrap();
        assert_eq!(org["nombre_unidad"], "X");

        let err = PlatformClient::unwrap_envelope(
            json!({"success": false, "message": "no access"}),
            "data",
        )
        .unwrap_err();
        assert_eq!(err, ApiError::Rejected("no access".into()));

        let bare = PlatformClient::unwrap_envelope(json!({"id": 1}), "data").unwrap();
        assert_eq!(bare["id"], 1);
    }

    #[tokio::test]
    async fn rejects_non_http_urls() {
        let client = PlatformClient::new("https://api.example.test", 30).unwrap();
        let err = client.download_document("file:///etc/passwd").await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidUrl(_)));
        let err = client.download_document("not a url").await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidUrl(_)));
    }

    #[test]
    fn status_reports_use_the_platform_field_names() {
        let report = StatusReport {
            business_id: "ABC-123".into(),
            state: BidState::InProgress,
            message: "Running fill_credentials".into(),
            step: "fill_credentials".into(),
            timestamp: "2023-11-14T22:13:20+00:00".into(),
            automation_id: "job-1".into(),
            progress: 40,
        };

        let update = serde_json::to_value(&report).unwrap();
        assert_eq!(
            update,
            json!({
                "codigo_postulacion": "ABC-123",
                "estado": "en_proceso",
                "mensaje": "Running fill_credentials",
                "paso": "fill_credentials",
                "timestamp": "2023-11-14T22:13:20+00:00",
            })
        );

        let entry = report.log_entry();
        assert_eq!(entry["estado"], "en_proceso");
        assert!(entry.get("timestamp").is_none());
        let details: Value = serde_json::from_str(entry["detalles"].as_str().unwrap()).unwrap();
        assert_eq!(details["automationId"], "job-1");
        assert_eq!(details["progress"], 40);

        let done = StatusReport {
            state: BidState::Completed,
            ..report.clone()
        };
        assert_eq!(serde_json::to_value(&done).unwrap()["estado"], "completado");
        let failed = StatusReport {
            state: BidState::Error,
            ..report
        };
        assert_eq!(serde_json::to_value(&failed).unwrap()["estado"], "error");
    }

    #[tokio::test]
    async fn unreachable_platform_surfaces_as_a_status_error() {
        let client = PlatformClient::new("http://127.0.0.1:9/api", 1).unwrap();
        let report = StatusReport {
            business_id: "ABC-123".into(),
            state: BidState::Completed,
            message: String::new(),
            step: "finalizado".into(),
            timestamp: String::new(),
            automation_id: "job-1".into(),
            progress: 100,
        };
        let err = client.update_status(&report).await.unwrap_err();
        assert!(matches!(err, ApiError::Network(_) | ApiError::Timeout(_)));
    }

    #[test]
    fn business_ids_are_path_safe() {
        assert_eq!(urlencode_segment("ABC-123"), "ABC-123");
        assert_eq!(urlencode_segment("a/b"), "a%2Fb");
    }
}
