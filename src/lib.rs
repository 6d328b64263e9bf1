//! # forge-queue
//!
//! Persisted generation job queue and execution engine for Stable Diffusion
//! WebUI / [Forge](https://github.com/lllyasviel/stable-diffusion-webui-forge)
//! style HTTP APIs.
//!
//! The engine builds immutable job descriptors from UI state, keeps them in
//! a durable three-bucket queue (ongoing / next / completed), and drains the
//! ongoing bucket one job at a time against a remote compute server:
//! aligning the server's loaded model first, retrying the submission call
//! with backoff, polling generation progress, and emitting throttled status
//! notifications. Image bytes, rendering and catalogs stay behind narrow
//! ports ([`ImageStore`], [`EventSink`], [`NotificationSink`]).
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use forge_queue::{
//!     builder, EngineConfig, ForgeClient, JsonFileStore, QueueList, QueueRunner,
//!     QueueStore, UiSnapshot,
//! };
//!
//! # async fn example(
//! #     events: Arc<dyn forge_queue::EventSink>,
//! #     images: Arc<dyn forge_queue::ImageStore>,
//! #     notifications: impl forge_queue::NotificationSink + 'static,
//! # ) -> anyhow::Result<()> {
//! let config = EngineConfig::builder()
//!     .with_host("http://192.168.1.50:7860")
//!     .build();
//!
//! let store = Arc::new(QueueStore::load(Arc::new(JsonFileStore::new("queue.json")))?);
//! let backend = Arc::new(ForgeClient::new(&config.host));
//!
//! let snapshot = UiSnapshot {
//!     model_title: "DreamShaper.safetensors".into(),
//!     prompt: "a lighthouse at dusk, oil painting".into(),
//!     ..Default::default()
//! };
//! store.enqueue(QueueList::Ongoing, builder::build(&snapshot)?)?;
//!
//! let runner = QueueRunner::new(backend, store, config, notifications, events, images);
//! runner.process_queue().await?;
//! # Ok(())
//! # }
//! ```

pub mod align;
pub mod builder;
pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod notify;
pub mod progress;
pub mod retry;
pub mod runner;
pub mod storage;
pub mod store;
pub mod types;

pub use align::normalize_model_name;
pub use builder::{HiresOptions, InpaintOptions, UiSnapshot, VramProfile};
pub use client::{ComputeBackend, ForgeClient};
pub use config::{EngineConfig, EngineConfigBuilder};
pub use error::{EngineError, Result};
pub use events::{
    BatchCompletedEvent, EventSink, ImageStore, JobCompletedEvent, JobErrorEvent, JobStartedEvent,
    ProgressEvent,
};
pub use notify::{NotificationSink, NotificationThrottle};
pub use progress::PollerHandle;
pub use retry::RetryPolicy;
pub use runner::QueueRunner;
pub use storage::{JsonFileStore, MemoryStore, QueueStateRecord, StatePersistence};
pub use store::{QueueList, QueueStore};
pub use types::{
    GenerationResult, JobDescriptor, JobMode, ModelInfo, ProgressReading, RunnerStatus,
};
