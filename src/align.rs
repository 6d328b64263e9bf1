use serde_json::{json, Value};

use crate::client::ComputeBackend;
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::types::{JobDescriptor, JobMode};

/// Unet storage dtype forced during alignment and in job overrides.
pub(crate) const UNET_STORAGE_DTYPE: &str = "Automatic (fp16 LoRA)";

/// Reduce a checkpoint title to a comparable form: drop the trailing
/// `[hash]` decoration, normalize path separators, keep the final path
/// segment, lowercase.
///
/// Servers report the active model with decorations (`Foo/bar.safetensors
/// [abc123]`) that the job's title may not carry.
pub fn normalize_model_name(raw: &str) -> String {
    let no_hash = raw.split(" [").next().unwrap_or("").trim();
    no_hash
        .replace('\\', "/")
        .rsplit('/')
        .next()
        .unwrap_or("")
        .to_lowercase()
}

/// Option payload that asks the server to load the job's model.
///
/// Inpaint jobs additionally clear any lingering extra modules and reset the
/// VAE, so a previous distilled-profile run cannot poison the switch.
fn switch_payload(job: &JobDescriptor) -> Value {
    let mut payload = json!({
        "sd_model_checkpoint": job.model_title,
        "forge_unet_storage_dtype": UNET_STORAGE_DTYPE,
    });
    if job.mode == JobMode::Inpaint {
        payload["forge_additional_modules"] = json!([]);
        payload["sd_vae"] = json!("Automatic");
    }
    payload
}

/// Block until the server's active model matches the job's required model.
///
/// Polls the server options on a fixed interval; every
/// `align_switch_every`-th poll (including the first) re-issues the switch
/// command, since servers occasionally drop the initial request while busy.
/// Poll failures are skipped ticks; only the iteration cap is fatal.
pub async fn align<B: ComputeBackend>(
    backend: &B,
    job: &JobDescriptor,
    config: &EngineConfig,
) -> Result<()> {
    let wanted = normalize_model_name(&job.model_title);

    for attempt in 0..config.align_max_attempts {
        match backend.active_model().await {
            Ok(active) => {
                if normalize_model_name(&active) == wanted {
                    tracing::debug!(model = %job.model_title, attempt, "model aligned");
                    return Ok(());
                }
            }
            Err(e) => {
                tracing::warn!(attempt, error = %e, "alignment poll failed, skipping tick");
            }
        }

        if attempt % config.align_switch_every == 0 {
            tracing::debug!(model = %job.model_title, attempt, "requesting model switch");
            if let Err(e) = backend.switch_model(&switch_payload(job)).await {
                tracing::warn!(attempt, error = %e, "switch request failed");
            }
        }

        tokio::time::sleep(config.align_interval).await;
    }

    Err(EngineError::AlignmentTimeout {
        model: job.model_title.clone(),
        attempts: config.align_max_attempts,
    })
}
