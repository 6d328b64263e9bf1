use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Generation profile for a job.
///
/// The mode decides which endpoint the payload is submitted to (inpaint jobs
/// go through img2img, everything else through txt2img) and how the payload
/// was shaped by the builder. It never changes how the runner executes a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobMode {
    /// Plain text-to-image (SDXL-class checkpoints).
    Standard,
    /// Distilled-guidance text-to-image (Flux-class checkpoints).
    Distilled,
    /// Image-to-image with a mask.
    Inpaint,
    /// Few-step turbo text-to-image.
    Turbo,
}

impl JobMode {
    /// API path the payload is submitted to.
    pub fn endpoint(&self) -> &'static str {
        match self {
            JobMode::Inpaint => "/sdapi/v1/img2img",
            _ => "/sdapi/v1/txt2img",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobMode::Standard => "standard",
            JobMode::Distilled => "distilled",
            JobMode::Inpaint => "inpaint",
            JobMode::Turbo => "turbo",
        }
    }
}

/// One generation request, immutable once enqueued.
///
/// The payload is an opaque JSON object forwarded verbatim to the server.
/// The engine reads only `steps`, `n_iter`, `enable_hr` and
/// `hr_second_pass_steps` out of it, for step accounting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub id: String,
    pub mode: JobMode,
    /// Checkpoint title the server must have active before this job runs.
    pub model_title: String,
    pub payload: Value,
    /// Short human label derived from the prompt prefix. Display only.
    pub desc: String,
    /// Creation stamp, RFC 3339.
    pub timestamp: String,
    /// Completion stamp, RFC 3339. Set by the runner when the job lands in
    /// the completed list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<String>,
}

impl JobDescriptor {
    pub fn new(mode: JobMode, model_title: impl Into<String>, payload: Value, desc: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            mode,
            model_title: model_title.into(),
            payload,
            desc: desc.into(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            finished_at: None,
        }
    }

    /// Sampling steps for one image, including the hires second pass when
    /// it is enabled.
    pub fn steps_per_image(&self) -> u32 {
        let base = self.payload.get("steps").and_then(Value::as_u64).unwrap_or(0) as u32;
        let hr_enabled = self
            .payload
            .get("enable_hr")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if hr_enabled {
            base + self
                .payload
                .get("hr_second_pass_steps")
                .and_then(Value::as_u64)
                .unwrap_or(0) as u32
        } else {
            base
        }
    }

    /// Total sampling steps for the whole job: `n_iter * steps_per_image`.
    pub fn total_steps(&self) -> u32 {
        let n_iter = self.payload.get("n_iter").and_then(Value::as_u64).unwrap_or(1) as u32;
        n_iter * self.steps_per_image()
    }
}

/// Observable engine state, decoupled from any presentation concern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunnerStatus {
    Idle,
    /// Waiting for the server to load the job's model.
    Aligning,
    Generating,
    /// Sampling finished; the server is encoding/transferring images.
    Finalizing,
    /// The drain halted on an error; the failed job is still at the head of
    /// the ongoing list.
    PausedOnError,
}

/// Response body of a successful generation call.
#[derive(Debug, Clone, Deserialize)]
pub struct GenerationResult {
    /// Base64-encoded output images.
    #[serde(default)]
    pub images: Vec<String>,
    /// Server-side generation info (JSON string).
    #[serde(default)]
    pub info: String,
}

/// One reading from the progress endpoint, already normalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressReading {
    /// `current` of `total` sampling steps done.
    Sampling { current: u32, total: u32 },
    /// Sampling done, server is producing/transferring images.
    Finalizing,
    /// Nothing reported yet this tick.
    Idle,
}

/// A model entry from the server catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub title: String,
    pub model_name: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn job_with(payload: Value) -> JobDescriptor {
        JobDescriptor::new(JobMode::Standard, "model.safetensors", payload, "test")
    }

    #[test]
    fn test_endpoint_per_mode() {
        assert_eq!(JobMode::Inpaint.endpoint(), "/sdapi/v1/img2img");
        assert_eq!(JobMode::Standard.endpoint(), "/sdapi/v1/txt2img");
        assert_eq!(JobMode::Distilled.endpoint(), "/sdapi/v1/txt2img");
        assert_eq!(JobMode::Turbo.endpoint(), "/sdapi/v1/txt2img");
    }

    #[test]
    fn test_total_steps_plain() {
        let job = job_with(json!({"steps": 20, "n_iter": 2}));
        assert_eq!(job.steps_per_image(), 20);
        assert_eq!(job.total_steps(), 40);
    }

    #[test]
    fn test_total_steps_with_hires() {
        let job = job_with(json!({
            "steps": 20,
            "n_iter": 2,
            "enable_hr": true,
            "hr_second_pass_steps": 10
        }));
        assert_eq!(job.steps_per_image(), 30);
        assert_eq!(job.total_steps(), 60);
    }

    #[test]
    fn test_hires_ignored_when_disabled() {
        // A present-but-false flag must not pull in the second pass steps.
        let job = job_with(json!({
            "steps": 20,
            "enable_hr": false,
            "hr_second_pass_steps": 10
        }));
        assert_eq!(job.total_steps(), 20);
    }

    #[test]
    fn test_missing_n_iter_defaults_to_one() {
        let job = job_with(json!({"steps": 15}));
        assert_eq!(job.total_steps(), 15);
    }

    #[test]
    fn test_descriptor_round_trip() {
        let job = job_with(json!({"steps": 10, "prompt": "a cat"}));
        let encoded = serde_json::to_string(&job).unwrap();
        let decoded: JobDescriptor = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.id, job.id);
        assert_eq!(decoded.mode, JobMode::Standard);
        assert_eq!(decoded.payload["prompt"], "a cat");
        assert!(decoded.finished_at.is_none());
    }
}
