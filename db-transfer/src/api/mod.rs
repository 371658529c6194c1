//! REST transport for the job backend.
//!
//! [`ApiClient`] owns the connection pool and the request envelope: the base URL,
//! authentication headers, and the mapping of non-2xx responses to
//! [`TransferError::Api`]. Pre-signed object-store URLs are fetched through
//! [`ApiClient::http`], which carries none of the API headers.

pub mod models;
pub mod services;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::config::Config;
use crate::utils::errors::{Result, TransferError};

const USER_AGENT: &str = concat!("db-transfer/", env!("CARGO_PKG_VERSION"));

#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    environment_id: String,
    headers: HeaderMap,
}

impl ApiClient {
    pub fn new(config: &Config) -> Result<Self> {
        // reqwest is built without gzip support, so bodies are never decoded behind our back
        let http = reqwest::Client::builder().user_agent(USER_AGENT).build()?;

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        insert_header(&mut headers, "x-session-token", &config.api.session_token)?;
        if let Some(pod) = &config.api.pod {
            insert_header(&mut headers, "x-pod-id", pod)?;
        }
        if let Some(users_id) = &config.api.users_id {
            insert_header(&mut headers, "x-users-id", users_id)?;
        }

        Ok(Self {
            http,
            base_url: config.base_url(),
            environment_id: config.api.environment_id.clone(),
            headers,
        })
    }

    /// Plain HTTP client for temp URLs.
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// `/environments/{env}/services/{service_id}{rest}`
    pub fn service_path(&self, service_id: &str, rest: &str) -> String {
        format!(
            "/environments/{}/services/{}{}",
            self.environment_id, service_id, rest
        )
    }

    pub fn environment_path(&self, rest: &str) -> String {
        format!("/environments/{}{}", self.environment_id, rest)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = self.url(path);
        debug!("{} {}", method, url);
        self.http.request(method, url).headers(self.headers.clone())
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let resp = self.request(Method::GET, path).send().await?;
        convert_response(resp).await
    }

    pub async fn post<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let resp = self.request(Method::POST, path).json(body).send().await?;
        convert_response(resp).await
    }

    pub async fn get_query<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T> {
        let resp = self.request(Method::GET, path).query(query).send().await?;
        convert_response(resp).await
    }

    pub async fn post_query<B, T>(&self, path: &str, query: &[(&str, &str)], body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let resp = self
            .request(Method::POST, path)
            .query(query)
            .json(body)
            .send()
            .await?;
        convert_response(resp).await
    }

    /// POST without a request body.
    pub async fn post_empty<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let resp = self.request(Method::POST, path).send().await?;
        convert_response(resp).await
    }
}

fn insert_header(headers: &mut HeaderMap, name: &'static str, value: &str) -> Result<()> {
    let value = HeaderValue::from_str(value)
        .map_err(|e| TransferError::Config(format!("invalid value for header {}: {}", name, e)))?;
    headers.insert(name, value);
    Ok(())
}

/// Map a response to `T`, turning any non-2xx status into [`TransferError::Api`].
pub async fn convert_response<T: DeserializeOwned>(resp: Response) -> Result<T> {
    let status = resp.status();
    if !status.is_success() {
        return Err(error_from_response(resp).await);
    }
    let bytes = resp.bytes().await?;
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(serde_json::from_slice(b"{}")?);
    }
    Ok(serde_json::from_slice(&bytes)?)
}

/// Consume a failed response into an error carrying its status and body.
pub async fn error_from_response(resp: Response) -> TransferError {
    let status = resp.status().as_u16();
    let body = resp
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    TransferError::Api { status, body }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Mock backend plumbing shared by the test modules.

    use crate::config::{ApiConfig, Config, LogConfig, ProgressConfig, TransferConfig};
    use axum::Router;
    use std::net::SocketAddr;

    pub const ENV_ID: &str = "env-1";
    pub const SERVICE_ID: &str = "svc-1";
    pub const SERVICE_LABEL: &str = "db01";

    /// Bind `router` on an ephemeral port and return its base URL.
    pub async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    /// Config pointing at a mock backend, with all delays zeroed.
    pub fn config(base_url: &str) -> Config {
        Config {
            api: ApiConfig {
                host: base_url.to_string(),
                host_version: String::new(),
                environment_id: ENV_ID.to_string(),
                session_token: "token".to_string(),
                pod: Some("pod01".to_string()),
                users_id: None,
            },
            transfer: TransferConfig {
                chunk_retry_delay_secs: 0,
                poll_interval_ms: 5,
                ..TransferConfig::default()
            },
            progress: ProgressConfig {
                enabled: false,
                interval_ms: 5,
            },
            log: LogConfig::default(),
        }
    }

    /// Service-scoped route path on the mock backend.
    pub fn route(rest: &str) -> String {
        format!("/environments/{}/services/{}{}", ENV_ID, SERVICE_ID, rest)
    }
}
