use std::future::Future;
use std::time::Duration;

use reqwest::Client;
use serde_json::Value;

use crate::error::{EngineError, Result};
use crate::types::{GenerationResult, ModelInfo};

fn normalize(endpoint: String) -> String {
    endpoint.trim_end_matches('/').to_string()
}

/// The engine's view of the compute server.
///
/// [`ForgeClient`] implements this over HTTP; tests drive the runner, probe
/// and poller with scripted fakes.
pub trait ComputeBackend: Send + Sync {
    /// Title of the currently loaded checkpoint.
    fn active_model(&self) -> impl Future<Output = Result<String>> + Send;

    /// Request a model switch / backend option change.
    fn switch_model(&self, options: &Value) -> impl Future<Output = Result<()>> + Send;

    /// Submit a generation payload to a txt2img/img2img endpoint.
    fn submit(&self, endpoint: &str, payload: &Value)
        -> impl Future<Output = Result<GenerationResult>> + Send;

    /// Raw progress document. One best-effort attempt; a failed poll is
    /// skipped, not retried.
    fn progress(&self) -> impl Future<Output = Result<Value>> + Send;
}

/// Async client for a Stable Diffusion WebUI / Forge server.
///
/// # Example
/// ```no_run
/// use forge_queue::ForgeClient;
///
/// # async fn example() -> forge_queue::Result<()> {
/// let client = ForgeClient::new("http://192.168.1.50:7860");
/// let models = client.list_models().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ForgeClient {
    http: Client,
    endpoint: String,
}

impl ForgeClient {
    /// Create a new client pointing at the given server.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            endpoint: normalize(endpoint.into()),
        }
    }

    /// Use a custom `reqwest::Client` (for connection pooling, TLS).
    pub fn with_http_client(mut self, client: Client) -> Self {
        self.http = client;
        self
    }

    /// Returns the configured endpoint URL.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        // The skip-warning header suppresses interstitial pages when the
        // server sits behind a tunneling proxy.
        self.http
            .get(format!("{}{}", self.endpoint, path))
            .header("ngrok-skip-browser-warning", "true")
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.http
            .post(format!("{}{}", self.endpoint, path))
            .header("ngrok-skip-browser-warning", "true")
    }

    fn network_err(&self, context: &str) -> impl FnOnce(reqwest::Error) -> EngineError + '_ {
        let context = format!("{} ({})", context, self.endpoint);
        move |e| EngineError::Network { context, source: e }
    }

    /// List the server's model catalog, sorted by display name. Doubles as
    /// the connection check.
    pub async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let resp = self
            .get("/sdapi/v1/sd-models")
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(self.network_err("Cannot reach server"))?;

        if !resp.status().is_success() {
            return Err(EngineError::Http {
                status: resp.status().as_u16(),
                body: resp.text().await.unwrap_or_default(),
            });
        }

        let mut models: Vec<ModelInfo> = resp
            .json()
            .await
            .map_err(self.network_err("Failed to parse model list"))?;
        models.sort_by(|a, b| {
            a.model_name
                .to_lowercase()
                .cmp(&b.model_name.to_lowercase())
        });
        Ok(models)
    }
}

impl ComputeBackend for ForgeClient {
    async fn active_model(&self) -> Result<String> {
        let resp = self
            .get("/sdapi/v1/options")
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(self.network_err("Failed to fetch server options"))?;

        if !resp.status().is_success() {
            return Err(EngineError::Http {
                status: resp.status().as_u16(),
                body: resp.text().await.unwrap_or_default(),
            });
        }

        let json: Value = resp
            .json()
            .await
            .map_err(self.network_err("Failed to parse server options"))?;
        json.get("sd_model_checkpoint")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| EngineError::InvalidResponse("Options missing sd_model_checkpoint".into()))
    }

    async fn switch_model(&self, options: &Value) -> Result<()> {
        let resp = self
            .post("/sdapi/v1/options")
            .timeout(Duration::from_secs(30))
            .json(options)
            .send()
            .await
            .map_err(self.network_err("Failed to send option change"))?;

        if !resp.status().is_success() {
            return Err(EngineError::Http {
                status: resp.status().as_u16(),
                body: resp.text().await.unwrap_or_default(),
            });
        }
        Ok(())
    }

    async fn submit(&self, endpoint: &str, payload: &Value) -> Result<GenerationResult> {
        // No client-side timeout here: generation latency is unbounded and
        // the retry budget is the only cap.
        let resp = self
            .post(endpoint)
            .json(payload)
            .send()
            .await
            .map_err(self.network_err("Generation request failed"))?;

        if !resp.status().is_success() {
            return Err(EngineError::Http {
                status: resp.status().as_u16(),
                body: resp.text().await.unwrap_or_default(),
            });
        }

        resp.json()
            .await
            .map_err(self.network_err("Failed to parse generation response"))
    }

    async fn progress(&self) -> Result<Value> {
        let resp = self
            .get("/sdapi/v1/progress")
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map_err(self.network_err("Failed to fetch progress"))?;

        if !resp.status().is_success() {
            return Err(EngineError::Http {
                status: resp.status().as_u16(),
                body: resp.text().await.unwrap_or_default(),
            });
        }

        resp.json()
            .await
            .map_err(self.network_err("Failed to parse progress"))
    }
}
