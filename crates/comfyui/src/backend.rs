//! The generation-backend seam.
//!
//! The job manager depends on exactly four backend operations: a cheap
//! health probe, graph submission, an event stream, and image retrieval.
//! [`GenerationBackend`] captures them; [`ComfyUIBackend`] implements them
//! over the REST and WebSocket clients.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;

use crate::api::{output_images, ComfyUIApi, ComfyUIApiError};
use crate::client::{ComfyUIClient, ComfyUIClientError};
use crate::messages::ComfyUIMessage;

/// Typed event stream of one backend connection.
pub type EventStream = BoxStream<'static, Result<ComfyUIMessage, BackendError>>;

/// One image produced by a prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputImage {
    pub node_id: String,
    pub filename: String,
    /// `output` for saved images, `temp` for previews.
    pub kind: String,
    pub bytes: Vec<u8>,
}

/// Errors surfaced by a generation backend.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("Backend unreachable: {0}")]
    Unreachable(String),

    #[error(transparent)]
    Api(#[from] ComfyUIApiError),

    #[error(transparent)]
    Client(#[from] ComfyUIClientError),

    /// The backend reported an execution error for our prompt.
    #[error("Execution failed at node {node_id}: {message}")]
    Execution { node_id: String, message: String },

    #[error("Execution of prompt {0} was interrupted")]
    Interrupted(String),

    /// No terminal event arrived within the completion timeout.
    #[error("No completion event within {0:?}")]
    Timeout(Duration),

    #[error("Event stream closed before completion")]
    StreamClosed,

    #[error("Prompt {0} produced no images")]
    NoOutput(String),
}

/// Operations the job manager needs from a remote generation backend.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Server code name this backend was built for.
    fn code_name(&self) -> &str;

    /// Fail fast (within `timeout`) if the backend is not reachable.
    async fn probe(&self, timeout: Duration) -> Result<(), BackendError>;

    /// Open an event stream. Open it before [`submit`](Self::submit) so no
    /// event of the submitted prompt is missed.
    async fn events(&self) -> Result<EventStream, BackendError>;

    /// Submit an API-format workflow; returns the backend request id.
    async fn submit(&self, workflow: &serde_json::Value) -> Result<String, BackendError>;

    /// Raw bytes of every image a finished prompt produced.
    async fn fetch_images(&self, prompt_id: &str) -> Result<Vec<OutputImage>, BackendError>;
}

/// HTTP and WebSocket base URLs for a server host.
///
/// Accepts `host:port`, `http(s)://host:port` or `ws(s)://host:port`.
pub fn endpoints(host: &str) -> (String, String) {
    let host = host.trim().trim_end_matches('/');
    if let Some(rest) = host.strip_prefix("https://") {
        (format!("https://{rest}"), format!("wss://{rest}"))
    } else if let Some(rest) = host.strip_prefix("http://") {
        (format!("http://{rest}"), format!("ws://{rest}"))
    } else if let Some(rest) = host.strip_prefix("wss://") {
        (format!("https://{rest}"), format!("wss://{rest}"))
    } else if let Some(rest) = host.strip_prefix("ws://") {
        (format!("http://{rest}"), format!("ws://{rest}"))
    } else {
        (format!("http://{host}"), format!("ws://{host}"))
    }
}

/// [`GenerationBackend`] backed by a ComfyUI server.
///
/// Every connection and submission uses the same client ID, generated once
/// per backend handle.
pub struct ComfyUIBackend {
    code_name: String,
    client_id: String,
    api: ComfyUIApi,
    ws: ComfyUIClient,
}

impl ComfyUIBackend {
    pub fn new(code_name: impl Into<String>, host: &str) -> Self {
        Self::with_http_client(code_name, host, reqwest::Client::new())
    }

    /// Share one [`reqwest::Client`] pool across backends.
    pub fn with_http_client(
        code_name: impl Into<String>,
        host: &str,
        http: reqwest::Client,
    ) -> Self {
        let code_name = code_name.into();
        let (api_url, ws_url) = endpoints(host);
        Self {
            client_id: uuid::Uuid::new_v4().to_string(),
            api: ComfyUIApi::with_client(http, api_url),
            ws: ComfyUIClient::new(code_name.clone(), ws_url),
            code_name,
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }
}

#[async_trait]
impl GenerationBackend for ComfyUIBackend {
    fn code_name(&self) -> &str {
        &self.code_name
    }

    async fn probe(&self, timeout: Duration) -> Result<(), BackendError> {
        self.api
            .system_stats(timeout)
            .await
            .map(|_| ())
            .map_err(|e| BackendError::Unreachable(format!("{}: {e}", self.api.api_url())))
    }

    async fn events(&self) -> Result<EventStream, BackendError> {
        let connection = self.ws.connect(&self.client_id).await?;
        Ok(connection
            .into_messages()
            .map(|message| message.map_err(BackendError::from))
            .boxed())
    }

    async fn submit(&self, workflow: &serde_json::Value) -> Result<String, BackendError> {
        let response = self.api.submit_workflow(workflow, &self.client_id).await?;
        tracing::debug!(
            backend = %self.code_name,
            prompt_id = %response.prompt_id,
            queue_position = response.number,
            "Workflow queued",
        );
        Ok(response.prompt_id)
    }

    async fn fetch_images(&self, prompt_id: &str) -> Result<Vec<OutputImage>, BackendError> {
        let history = self.api.get_history(prompt_id).await?;
        let refs = output_images(&history, prompt_id);
        if refs.is_empty() {
            return Err(BackendError::NoOutput(prompt_id.to_string()));
        }

        let mut images = Vec::with_capacity(refs.len());
        for (node_id, image) in refs {
            let bytes = self.api.get_image(&image).await?;
            images.push(OutputImage {
                node_id,
                filename: image.filename,
                kind: image.kind,
                bytes,
            });
        }
        Ok(images)
    }
}
