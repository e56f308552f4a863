use crate::auth::credentials::CredentialManager;
use crate::drive_service::drive_models::RestEnvelope;
use crate::error::{DriveError, Result};
use log::debug;
use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Asks the server to report failures in the envelope rather than the status line
const REST_HTTP_HEADER: &str = "Sec-Rest-Http";

/// HTTP client for the drive REST API
#[derive(Clone)]
pub struct RestClient {
    client: Client,
    base: String,
    credentials: Arc<CredentialManager>,
}

impl RestClient {
    pub fn new(base: &str, credentials: Arc<CredentialManager>, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        let mut base = base.to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        Ok(Self {
            client,
            base,
            credentials,
        })
    }

    /// Get full URL by prepending the REST base if needed
    pub fn get_full_url(&self, path: &str) -> String {
        if path.starts_with("http") {
            path.to_string()
        } else {
            format!("{}{}", self.base, path.trim_start_matches('/'))
        }
    }

    /// GET with parameters in the query string
    pub async fn get<T>(&self, path: &str, params: &[(&str, String)]) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let request = self.request(Method::GET, path).query(params);
        self.execute(Method::GET, path, request).await?.into_data()
    }

    /// POST with a JSON body
    pub async fn post<T, B>(&self, path: &str, body: &B) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let request = self.request(Method::POST, path).json(body);
        self.execute(Method::POST, path, request).await?.into_data()
    }

    /// PATCH with a JSON body
    pub async fn patch<T, B>(&self, path: &str, body: &B) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let request = self.request(Method::PATCH, path).json(body);
        self.execute(Method::PATCH, path, request).await?.into_data()
    }

    /// DELETE without body
    pub async fn delete(&self, path: &str) -> Result<()> {
        let request = self.request(Method::DELETE, path);
        self.execute(Method::DELETE, path, request).await?.into_unit()
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, self.get_full_url(path))
            .header(REST_HTTP_HEADER, "false")
    }

    async fn execute(&self, method: Method, path: &str, request: RequestBuilder) -> Result<RestEnvelope> {
        let request = self.credentials.authorize(request).await?;
        let started = Instant::now();
        let response = request.send().await?;
        let status = response.status();
        let body = response.bytes().await?;
        debug!(
            "{} {} -> {} in {:?}",
            method,
            path,
            status,
            started.elapsed()
        );

        match serde_json::from_slice::<RestEnvelope>(&body) {
            Ok(envelope) => Ok(envelope),
            Err(e) if status.is_success() => Err(DriveError::Decode(format!(
                "invalid envelope from {}: {}",
                path, e
            ))),
            Err(_) => Err(DriveError::Backend(format!(
                "{} {} returned status {}",
                method, path, status
            ))),
        }
    }
}
