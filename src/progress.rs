use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::client::ComputeBackend;
use crate::types::ProgressReading;

/// Normalize one raw progress document into a typed reading.
///
/// Prefers the fractional `progress` field (`round(p * job_total_steps)`);
/// falls back to the discrete `state` counters (`job_no * steps_per_image +
/// sampling_step`). A zero signal after sampling was observed means the
/// server is encoding/transferring images, not that progress reset.
pub fn read_progress(
    raw: &Value,
    job_total_steps: u32,
    steps_per_image: u32,
    was_sampling: bool,
) -> ProgressReading {
    if let Some(p) = raw.get("progress").and_then(Value::as_f64) {
        if p > 0.0 {
            let current = (p * f64::from(job_total_steps)).round() as u32;
            return ProgressReading::Sampling {
                current,
                total: job_total_steps,
            };
        }
    }

    if let Some(state) = raw.get("state") {
        let step = state
            .get("sampling_step")
            .and_then(Value::as_u64)
            .unwrap_or(0) as u32;
        let job_no = state.get("job_no").and_then(Value::as_u64).unwrap_or(0) as u32;
        let current = job_no * steps_per_image + step;
        if current > 0 {
            return ProgressReading::Sampling {
                current,
                total: job_total_steps,
            };
        }
    }

    if was_sampling {
        ProgressReading::Finalizing
    } else {
        ProgressReading::Idle
    }
}

/// Display form of a sampling reading. Kept pure so it can be tested apart
/// from the polling loop.
pub fn format_step_label(current: u32, total: u32) -> String {
    format!("Step {} / {}", current, total)
}

/// Handle to a running progress poll. Dropping it does not stop the poll;
/// call [`cancel()`](Self::cancel).
pub struct PollerHandle {
    cancelled: Arc<AtomicBool>,
    task: tokio::task::JoinHandle<()>,
}

impl PollerHandle {
    /// Stop polling. The flag is checked before each tick's callback, so no
    /// further ticks start; a callback already past that check on another
    /// worker may still deliver one final reading.
    pub fn cancel(self) {
        self.cancelled.store(true, Ordering::Relaxed);
        self.task.abort();
    }
}

/// Spawn a fixed-interval poll of the progress endpoint for one in-flight
/// job.
///
/// Every tick queries the backend once; a failed poll is skipped silently
/// and the next tick simply tries again. Readings are forwarded to
/// `on_tick` already normalized.
pub fn spawn_poller<B, F>(
    backend: Arc<B>,
    job_total_steps: u32,
    steps_per_image: u32,
    interval: Duration,
    on_tick: F,
) -> PollerHandle
where
    B: ComputeBackend + 'static,
    F: Fn(ProgressReading) + Send + Sync + 'static,
{
    let cancelled = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&cancelled);

    let task = tokio::spawn(async move {
        let mut was_sampling = false;
        loop {
            tokio::time::sleep(interval).await;
            if flag.load(Ordering::Relaxed) {
                return;
            }

            let raw = match backend.progress().await {
                Ok(raw) => raw,
                Err(_) => continue,
            };
            if flag.load(Ordering::Relaxed) {
                return;
            }

            let reading = read_progress(&raw, job_total_steps, steps_per_image, was_sampling);
            if let ProgressReading::Sampling { current, .. } = reading {
                was_sampling = was_sampling || current > 0;
            }
            if reading != ProgressReading::Idle {
                on_tick(reading);
            }
        }
    });

    PollerHandle { cancelled, task }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fractional_progress() {
        let raw = json!({"progress": 0.5});
        assert_eq!(
            read_progress(&raw, 40, 20, false),
            ProgressReading::Sampling {
                current: 20,
                total: 40
            }
        );
    }

    #[test]
    fn test_fractional_progress_rounds() {
        let raw = json!({"progress": 0.33});
        // round(0.33 * 20) = 7
        assert_eq!(
            read_progress(&raw, 20, 20, false),
            ProgressReading::Sampling {
                current: 7,
                total: 20
            }
        );
    }

    #[test]
    fn test_discrete_state_pairs() {
        let raw = json!({
            "progress": 0.0,
            "state": {"sampling_step": 5, "sampling_steps": 20, "job_no": 1}
        });
        // job 1 of steps_per_image 20, step 5 within it
        assert_eq!(
            read_progress(&raw, 40, 20, false),
            ProgressReading::Sampling {
                current: 25,
                total: 40
            }
        );
    }

    #[test]
    fn test_zero_before_any_sampling_is_idle() {
        let raw = json!({"progress": 0.0});
        assert_eq!(read_progress(&raw, 40, 20, false), ProgressReading::Idle);
    }

    #[test]
    fn test_zero_after_sampling_is_finalizing() {
        let raw = json!({"progress": 0.0});
        assert_eq!(
            read_progress(&raw, 40, 20, true),
            ProgressReading::Finalizing
        );
    }

    #[test]
    fn test_empty_document_is_idle() {
        assert_eq!(
            read_progress(&json!({}), 40, 20, false),
            ProgressReading::Idle
        );
    }

    #[test]
    fn test_step_label() {
        assert_eq!(format_step_label(7, 40), "Step 7 / 40");
    }

    struct MidSampling;

    impl crate::client::ComputeBackend for MidSampling {
        async fn active_model(&self) -> crate::error::Result<String> {
            Ok(String::new())
        }
        async fn switch_model(&self, _options: &Value) -> crate::error::Result<()> {
            Ok(())
        }
        async fn submit(
            &self,
            _endpoint: &str,
            _payload: &Value,
        ) -> crate::error::Result<crate::types::GenerationResult> {
            Ok(crate::types::GenerationResult {
                images: Vec::new(),
                info: String::new(),
            })
        }
        async fn progress(&self) -> crate::error::Result<Value> {
            Ok(json!({"progress": 0.5}))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_subsequent_ticks() {
        use std::sync::atomic::AtomicU32;

        let ticks = Arc::new(AtomicU32::new(0));
        let seen = Arc::clone(&ticks);
        let handle = spawn_poller(
            Arc::new(MidSampling),
            40,
            20,
            Duration::from_millis(100),
            move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
            },
        );

        tokio::time::sleep(Duration::from_millis(350)).await;
        let before = ticks.load(Ordering::SeqCst);
        assert_eq!(before, 3);

        handle.cancel();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), before);
    }
}
