//! GraphQL executor on top of the retrying [`ApiClient`]
//!
//! Sends `POST {query, variables}` and unwraps `{data, errors[]}`. A
//! structurally valid response carrying a non-empty `errors` array is a
//! permanent failure with the provider's messages.

use crate::client::{provider_errors, ApiClient};
use crate::error::{MetadataError, Result};
use bridge_traits::http::{HttpMethod, HttpRequest};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub struct GraphQlClient {
    api: ApiClient,
    endpoint: String,
}

impl GraphQlClient {
    pub fn new(api: ApiClient, endpoint: impl Into<String>) -> Self {
        Self {
            api,
            endpoint: endpoint.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Execute a query and return its `data` object
    ///
    /// # Errors
    ///
    /// - `PermanentApi` if the response carries `errors[]`
    /// - `InvalidResponse` if `data` is missing or null
    /// - any error from [`ApiClient::execute_json`]
    pub async fn execute(
        &self,
        query: &str,
        variables: Value,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        let request = HttpRequest::new(HttpMethod::Post, self.endpoint.as_str())
            .header("Accept", "application/json")
            .json(&json!({ "query": query, "variables": variables }))?;

        let mut body = self.api.execute_json(request, cancel).await?;

        let errors = provider_errors(&body);
        if !errors.is_empty() {
            debug!(errors = ?errors, "GraphQL response carried errors");
            return Err(MetadataError::PermanentApi {
                status: None,
                message: errors.join("; "),
            });
        }

        match body.get_mut("data").map(Value::take) {
            Some(data) if !data.is_null() => Ok(data),
            _ => Err(MetadataError::InvalidResponse(
                "GraphQL response has no data".to_string(),
            )),
        }
    }
}
