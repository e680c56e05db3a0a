//! REST API client for the ComfyUI HTTP endpoints.
//!
//! Wraps workflow submission, history retrieval, image download and the
//! cheap `/system_stats` health probe using [`reqwest`].

use std::time::Duration;

use serde::Deserialize;

/// HTTP client for a single ComfyUI instance.
pub struct ComfyUIApi {
    client: reqwest::Client,
    api_url: String,
}

/// Response returned by the ComfyUI `/prompt` endpoint after
/// successfully queuing a workflow.
#[derive(Debug, Deserialize)]
pub struct SubmitResponse {
    /// Server-assigned identifier for the queued prompt.
    pub prompt_id: String,
    /// Position in the execution queue.
    pub number: i32,
}

/// One image listed in a prompt's history outputs.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ImageRef {
    pub filename: String,
    #[serde(default)]
    pub subfolder: String,
    /// `output`, `temp` or `input`.
    #[serde(rename = "type", default = "default_image_kind")]
    pub kind: String,
}

fn default_image_kind() -> String {
    "output".to_string()
}

/// Errors from the ComfyUI REST API layer.
#[derive(Debug, thiserror::Error)]
pub enum ComfyUIApiError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// ComfyUI returned a non-2xx status code.
    #[error("ComfyUI API error ({status}): {body}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },
}

impl ComfyUIApi {
    /// Create a new API client for a ComfyUI instance.
    ///
    /// * `api_url` - Base HTTP URL, e.g. `http://host:8188`.
    pub fn new(api_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url,
        }
    }

    /// Create an API client reusing an existing [`reqwest::Client`]
    /// (useful for connection pooling across multiple instances).
    pub fn with_client(client: reqwest::Client, api_url: String) -> Self {
        Self { client, api_url }
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Submit a workflow for execution.
    ///
    /// Sends a `POST /prompt` request with the given workflow JSON and
    /// client ID. Node-level WebSocket messages for the prompt are routed
    /// to the connection opened with the same client ID.
    pub async fn submit_workflow(
        &self,
        workflow: &serde_json::Value,
        client_id: &str,
    ) -> Result<SubmitResponse, ComfyUIApiError> {
        let body = serde_json::json!({
            "prompt": workflow,
            "client_id": client_id,
        });

        let response = self
            .client
            .post(format!("{}/prompt", self.api_url))
            .json(&body)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Cheap liveness call: `GET /system_stats`, failing after `timeout`.
    pub async fn system_stats(
        &self,
        timeout: Duration,
    ) -> Result<serde_json::Value, ComfyUIApiError> {
        let response = self
            .client
            .get(format!("{}/system_stats", self.api_url))
            .timeout(timeout)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Retrieve execution history for a specific prompt.
    ///
    /// Sends a `GET /history/{prompt_id}` request. The returned JSON is
    /// keyed by prompt id and lists per-node outputs.
    pub async fn get_history(&self, prompt_id: &str) -> Result<serde_json::Value, ComfyUIApiError> {
        let response = self
            .client
            .get(format!("{}/history/{}", self.api_url, prompt_id))
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Download a produced image via `GET /view`.
    pub async fn get_image(&self, image: &ImageRef) -> Result<Vec<u8>, ComfyUIApiError> {
        let response = self
            .client
            .get(format!("{}/view", self.api_url))
            .query(&[
                ("filename", image.filename.as_str()),
                ("subfolder", image.subfolder.as_str()),
                ("type", image.kind.as_str()),
            ])
            .send()
            .await?;

        let response = Self::ensure_success(response).await?;
        Ok(response.bytes().await?.to_vec())
    }

    // ---- private helpers ----

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or a [`ComfyUIApiError::ApiError`]
    /// containing the status and body text on failure.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, ComfyUIApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ComfyUIApiError::ApiError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ComfyUIApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }
}

/// Images listed under `history[prompt_id].outputs`, as `(node_id, image)`
/// pairs in node-id order. Nodes without an `images` array are skipped.
pub fn output_images(history: &serde_json::Value, prompt_id: &str) -> Vec<(String, ImageRef)> {
    let Some(outputs) = history
        .get(prompt_id)
        .and_then(|entry| entry.get("outputs"))
        .and_then(|outputs| outputs.as_object())
    else {
        return Vec::new();
    };

    let mut nodes: Vec<_> = outputs.iter().collect();
    nodes.sort_by(|(a, _), (b, _)| node_order(a, b));

    nodes
        .into_iter()
        .flat_map(|(node_id, output)| {
            output
                .get("images")
                .and_then(|images| images.as_array())
                .into_iter()
                .flatten()
                .filter_map(|image| serde_json::from_value::<ImageRef>(image.clone()).ok())
                .map(move |image| (node_id.clone(), image))
        })
        .collect()
}

/// Numeric ids compare numerically, anything else lexically after them.
fn node_order(a: &str, b: &str) -> std::cmp::Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        (Ok(_), Err(_)) => std::cmp::Ordering::Less,
        (Err(_), Ok(_)) => std::cmp::Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn output_images_lists_nodes_in_numeric_order() {
        let history = json!({
            "p1": {
                "outputs": {
                    "10": { "images": [{ "filename": "b.png", "subfolder": "", "type": "output" }] },
                    "9": { "images": [
                        { "filename": "a.png", "subfolder": "x", "type": "temp" },
                        { "filename": "c.png" }
                    ] },
                    "12": { "text": ["not an image"] }
                }
            }
        });

        let images = output_images(&history, "p1");
        let names: Vec<_> = images
            .iter()
            .map(|(node, image)| (node.as_str(), image.filename.as_str()))
            .collect();
        assert_eq!(names, [("9", "a.png"), ("9", "c.png"), ("10", "b.png")]);
        assert_eq!(images[0].1.kind, "temp");
        assert_eq!(images[1].1.kind, "output");
        assert_eq!(images[0].1.subfolder, "x");
    }

    #[test]
    fn output_images_of_unknown_prompt_is_empty() {
        assert!(output_images(&json!({ "other": { "outputs": {} } }), "p1").is_empty());
        assert!(output_images(&json!({}), "p1").is_empty());
    }
}
