//! # HTTP Transport Backend
//!
//! The app-side implementation of the core's `ServiceBackend` seam:
//! `local:` targets resolve against the in-process registry, everything
//! else goes over HTTP. Service invocations POST JSON; federated
//! sub-queries POST `application/sparql-query` and parse the SPARQL-JSON
//! answer.

use agora_core::{AgoraError, CallCredentials, InProcessBackend, ResultSet, ServiceBackend};
use async_trait::async_trait;
use serde_json::Value;

// =============================================================================
// HTTP BACKEND
// =============================================================================

/// Transport backend combining reqwest with the in-process registry.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    http: reqwest::Client,
    local: InProcessBackend,
}

impl HttpBackend {
    /// Create a backend; `local` answers `local:` targets in-process.
    #[must_use]
    pub fn new(local: InProcessBackend) -> Self {
        Self {
            http: reqwest::Client::new(),
            local,
        }
    }

    /// Attach auth material to an outgoing request.
    fn with_auth(
        request: reqwest::RequestBuilder,
        auth: Option<&CallCredentials>,
    ) -> reqwest::RequestBuilder {
        match auth {
            Some(creds) => request.header(&creds.header, &creds.value),
            None => request,
        }
    }

    /// Surface non-2xx answers as remote failures.
    async fn checked(response: reqwest::Response) -> Result<reqwest::Response, AgoraError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AgoraError::RemoteFailure(format!(
                "remote answered {status}: {body}"
            )));
        }
        Ok(response)
    }
}

#[async_trait]
impl ServiceBackend for HttpBackend {
    async fn invoke(
        &self,
        target: &str,
        payload: Value,
        auth: Option<&CallCredentials>,
    ) -> Result<Value, AgoraError> {
        if target.starts_with("local:") {
            return self.local.invoke(target, payload, auth).await;
        }
        let request = Self::with_auth(self.http.post(target).json(&payload), auth);
        let response = request
            .send()
            .await
            .map_err(|e| AgoraError::RemoteFailure(format!("cannot reach {target}: {e}")))?;
        Self::checked(response)
            .await?
            .json::<Value>()
            .await
            .map_err(|e| AgoraError::RemoteFailure(format!("malformed answer from {target}: {e}")))
    }

    async fn sparql(
        &self,
        target: &str,
        query: &str,
        auth: Option<&CallCredentials>,
    ) -> Result<ResultSet, AgoraError> {
        let request = Self::with_auth(
            self.http
                .post(target)
                .header(reqwest::header::CONTENT_TYPE, "application/sparql-query")
                .header(reqwest::header::ACCEPT, "application/sparql-results+json")
                .body(query.to_string()),
            auth,
        );
        let response = request
            .send()
            .await
            .map_err(|e| AgoraError::RemoteFailure(format!("cannot reach {target}: {e}")))?;
        let value = Self::checked(response)
            .await?
            .json::<Value>()
            .await
            .map_err(|e| {
                AgoraError::RemoteFailure(format!("malformed answer from {target}: {e}"))
            })?;
        ResultSet::from_sparql_json(&value)
    }
}
