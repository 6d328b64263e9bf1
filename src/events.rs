use serde::{Deserialize, Serialize};

use crate::types::JobDescriptor;

/// Emitted when a job starts executing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStartedEvent {
    pub job: JobDescriptor,
}

/// Emitted on each forwarded progress tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub label: String,
    pub current: u32,
    pub total: u32,
}

/// Emitted when a job completes. Carries the storage IDs the image store
/// returned for the job's output images.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobCompletedEvent {
    pub job: JobDescriptor,
    pub image_ids: Vec<String>,
}

/// Emitted once when a drain ends with the ongoing list empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchCompletedEvent {
    pub jobs_completed: usize,
}

/// Emitted when a job fails and the drain halts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobErrorEvent {
    pub job: JobDescriptor,
    pub error: String,
}

/// The engine's only obligations to the outside world. Rendering and
/// catalog browsing live behind this boundary.
pub trait EventSink: Send + Sync {
    fn job_started(&self, event: JobStartedEvent);
    fn progress(&self, event: ProgressEvent);
    fn job_completed(&self, event: JobCompletedEvent);
    fn batch_completed(&self, event: BatchCompletedEvent);
    fn error(&self, event: JobErrorEvent);
}

/// External store for generated image bytes. The engine decodes the
/// server's base64 payloads and hands the bytes over; it never keeps binary
/// image data itself.
pub trait ImageStore: Send + Sync {
    /// Persist one image, returning its storage ID.
    fn save_image(&self, bytes: &[u8]) -> anyhow::Result<String>;
}
