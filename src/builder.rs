use serde_json::{json, Map, Value};

use crate::align::UNET_STORAGE_DTYPE;
use crate::error::{EngineError, Result};
use crate::types::{JobDescriptor, JobMode};

/// Distilled CFG fallback when the raw input is not a usable number.
const DEFAULT_DISTILLED_CFG: f64 = 3.5;

/// Minimum mask blur under soft inpainting. Below this the blended patch
/// shows a visible seam.
const SOFT_INPAINT_MIN_MASK_BLUR: u32 = 8;

/// Placeholder texts a model selector shows before the server catalog has
/// been fetched.
const MODEL_PLACEHOLDERS: [&str; 2] = ["Loading", "Link first"];

/// How much VRAM the backend should keep free for inference, in MiB.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VramProfile {
    /// Reserves 6 GiB. Safe on shared GPUs.
    Low,
    /// Reserves 4.5 GiB.
    #[default]
    Mid,
    /// Reserves 1 GiB. Fastest, risks OOM next to other GPU users.
    High,
}

impl VramProfile {
    pub fn inference_memory_mb(&self) -> u32 {
        match self {
            VramProfile::Low => 6144,
            VramProfile::Mid => 4608,
            VramProfile::High => 1024,
        }
    }
}

/// High-resolution refinement sub-parameters. Present in the payload only
/// when the toggle is on; the server distinguishes "disabled" from
/// "zero-valued but enabled".
#[derive(Debug, Clone)]
pub struct HiresOptions {
    pub scale: f64,
    pub upscaler: String,
    pub second_pass_steps: u32,
    pub denoising_strength: f64,
    pub cfg: f64,
}

/// Inpainting sub-parameters.
#[derive(Debug, Clone)]
pub struct InpaintOptions {
    /// Base64 source image (no data-URL prefix).
    pub source_image: String,
    /// Base64 mask; `None` paints over the whole picture.
    pub mask: Option<String>,
    pub denoising_strength: f64,
    pub mask_blur: u32,
    /// Masked-content fill mode: 0=fill, 1=original, 2=latent noise,
    /// 3=latent nothing.
    pub fill_mode: u32,
    /// Regenerate only the masked region at full resolution.
    pub masked_only: bool,
    /// Context padding around the masked region, in pixels.
    pub padding: u32,
    /// Blend the result with the soft-inpainting script.
    pub soft_inpainting: bool,
}

impl Default for InpaintOptions {
    fn default() -> Self {
        Self {
            source_image: String::new(),
            mask: None,
            denoising_strength: 0.75,
            mask_blur: 4,
            fill_mode: 1,
            masked_only: false,
            padding: 32,
            soft_inpainting: false,
        }
    }
}

/// Everything the builder reads out of the UI at enqueue time.
///
/// A snapshot is plain data; building a job from it has no side effects and
/// produces a fresh descriptor each call.
#[derive(Debug, Clone)]
pub struct UiSnapshot {
    pub mode: JobMode,
    /// Selected checkpoint title, possibly still a placeholder.
    pub model_title: String,
    pub prompt: String,
    pub negative_prompt: String,
    pub steps: u32,
    pub cfg_scale: f64,
    /// Distilled-guidance CFG as entered; non-finite values fall back to 3.5.
    pub distilled_cfg_scale: Option<f64>,
    pub width: u32,
    pub height: u32,
    pub batch_size: u32,
    pub n_iter: u32,
    pub sampler: String,
    pub scheduler: String,
    pub seed: i64,
    pub hires: Option<HiresOptions>,
    pub inpaint: Option<InpaintOptions>,
    pub vram_profile: VramProfile,
    /// Extra module checkpoints (VAE / text encoders) for distilled models.
    pub extra_modules: Vec<String>,
    /// Unet storage dtype override for distilled models.
    pub unet_storage_dtype: Option<String>,
    /// Arbitrary extra server-side overrides, merged last.
    pub overrides: Map<String, Value>,
}

impl Default for UiSnapshot {
    fn default() -> Self {
        Self {
            mode: JobMode::Standard,
            model_title: String::new(),
            prompt: String::new(),
            negative_prompt: String::new(),
            steps: 20,
            cfg_scale: 7.0,
            distilled_cfg_scale: None,
            width: 1024,
            height: 1024,
            batch_size: 1,
            n_iter: 1,
            sampler: "Euler".into(),
            scheduler: "Automatic".into(),
            seed: -1,
            hires: None,
            inpaint: None,
            vram_profile: VramProfile::default(),
            extra_modules: Vec::new(),
            unet_storage_dtype: None,
            overrides: Map::new(),
        }
    }
}

fn is_placeholder(title: &str) -> bool {
    title.trim().is_empty() || MODEL_PLACEHOLDERS.iter().any(|p| title.contains(p))
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

/// Build an immutable [`JobDescriptor`] from a UI snapshot.
///
/// Fails when no real model is selected or (for inpaint) the source image
/// is missing; both are configuration errors that never enter the queue.
pub fn build(snapshot: &UiSnapshot) -> Result<JobDescriptor> {
    if is_placeholder(&snapshot.model_title) {
        return Err(EngineError::NoModelSelected);
    }

    let mut overrides = Map::new();
    overrides.insert(
        "forge_inference_memory".into(),
        json!(snapshot.vram_profile.inference_memory_mb()),
    );
    overrides.insert("forge_unet_storage_dtype".into(), json!(UNET_STORAGE_DTYPE));

    let (payload, desc) = match snapshot.mode {
        JobMode::Inpaint => build_inpaint(snapshot, &mut overrides)?,
        JobMode::Distilled => build_distilled(snapshot, &mut overrides),
        JobMode::Standard | JobMode::Turbo => build_standard(snapshot, &mut overrides),
    };

    let mut payload = payload;
    for (key, value) in &snapshot.overrides {
        overrides.insert(key.clone(), value.clone());
    }
    payload["override_settings"] = Value::Object(overrides);

    Ok(JobDescriptor::new(
        snapshot.mode,
        snapshot.model_title.clone(),
        payload,
        desc,
    ))
}

fn hires_fields(payload: &mut Value, hires: &Option<HiresOptions>) {
    // Entirely absent when disabled, not zeroed.
    if let Some(hr) = hires {
        payload["enable_hr"] = json!(true);
        payload["hr_scale"] = json!(hr.scale);
        payload["hr_upscaler"] = json!(hr.upscaler);
        payload["hr_second_pass_steps"] = json!(hr.second_pass_steps);
        payload["denoising_strength"] = json!(hr.denoising_strength);
        payload["hr_cfg"] = json!(hr.cfg);
        payload["hr_additional_modules"] = json!(["Use same choices"]);
    }
}

fn build_standard(snapshot: &UiSnapshot, overrides: &mut Map<String, Value>) -> (Value, String) {
    overrides.insert("forge_additional_modules".into(), json!([]));
    overrides.insert("sd_vae".into(), json!("Automatic"));

    let mut payload = json!({
        "prompt": snapshot.prompt,
        "negative_prompt": snapshot.negative_prompt,
        "steps": snapshot.steps,
        "cfg_scale": snapshot.cfg_scale,
        "width": snapshot.width,
        "height": snapshot.height,
        "batch_size": snapshot.batch_size,
        "n_iter": snapshot.n_iter,
        "sampler_name": snapshot.sampler,
        "scheduler": snapshot.scheduler,
        "seed": snapshot.seed,
        "save_images": true,
    });
    hires_fields(&mut payload, &snapshot.hires);

    let desc = format!("{}...", truncate_chars(&snapshot.prompt, 30));
    (payload, desc)
}

fn build_distilled(snapshot: &UiSnapshot, overrides: &mut Map<String, Value>) -> (Value, String) {
    if !snapshot.extra_modules.is_empty() {
        overrides.insert(
            "forge_additional_modules".into(),
            json!(snapshot.extra_modules),
        );
    }
    if let Some(dtype) = &snapshot.unet_storage_dtype {
        overrides.insert("forge_unet_storage_dtype".into(), json!(dtype));
    }

    let distilled_cfg = snapshot
        .distilled_cfg_scale
        .filter(|v| v.is_finite())
        .unwrap_or(DEFAULT_DISTILLED_CFG);

    let mut payload = json!({
        "prompt": snapshot.prompt,
        "negative_prompt": "",
        "steps": snapshot.steps,
        "cfg_scale": snapshot.cfg_scale,
        "distilled_cfg_scale": distilled_cfg,
        "width": snapshot.width,
        "height": snapshot.height,
        "batch_size": snapshot.batch_size,
        "n_iter": snapshot.n_iter,
        "sampler_name": snapshot.sampler,
        "scheduler": snapshot.scheduler,
        "seed": snapshot.seed,
        "save_images": true,
    });
    hires_fields(&mut payload, &snapshot.hires);

    let desc = format!("{}...", truncate_chars(&snapshot.prompt, 30));
    (payload, desc)
}

fn build_inpaint(
    snapshot: &UiSnapshot,
    overrides: &mut Map<String, Value>,
) -> Result<(Value, String)> {
    let inp = snapshot
        .inpaint
        .as_ref()
        .ok_or_else(|| EngineError::MissingInput("inpaint parameters".into()))?;
    if inp.source_image.is_empty() {
        return Err(EngineError::MissingInput("inpaint source image".into()));
    }

    // A stale distilled run can leave extra modules loaded; clear them so
    // the inpaint checkpoint loads clean.
    overrides.insert("sd_model_checkpoint".into(), json!(snapshot.model_title));
    overrides.insert("forge_additional_modules".into(), json!([]));
    overrides.insert("sd_vae".into(), json!("Automatic"));

    let mut mask_blur = inp.mask_blur;
    if inp.soft_inpainting && mask_blur < SOFT_INPAINT_MIN_MASK_BLUR {
        mask_blur = SOFT_INPAINT_MIN_MASK_BLUR;
    }

    let mut payload = json!({
        "prompt": snapshot.prompt,
        "negative_prompt": snapshot.negative_prompt,
        "steps": snapshot.steps,
        "cfg_scale": snapshot.cfg_scale,
        "width": snapshot.width,
        "height": snapshot.height,
        "sampler_name": snapshot.sampler,
        "scheduler": snapshot.scheduler,
        "batch_size": 1,
        "n_iter": 1,
        "save_images": true,
        "mask_blur": mask_blur,
        "init_images": [inp.source_image],
        "denoising_strength": inp.denoising_strength,
        "resize_mode": 0,
    });

    if let Some(mask) = &inp.mask {
        payload["mask"] = json!(mask);
        payload["inpainting_mask_invert"] = json!(0);
        payload["inpainting_fill"] = json!(inp.fill_mode);
        if inp.masked_only {
            payload["inpaint_full_res"] = json!(true);
            payload["inpaint_full_res_padding"] = json!(inp.padding);
        } else {
            payload["inpaint_full_res"] = json!(false);
        }
    }

    if inp.soft_inpainting {
        payload["alwayson_scripts"] = json!({
            "soft inpainting": {
                "args": [true, 1.0, 0.5, 4.0, 0.0, 0.5, 2.0]
            }
        });
    }

    let desc = format!("Inpaint: {}...", truncate_chars(&snapshot.prompt, 20));
    Ok((payload, desc))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> UiSnapshot {
        UiSnapshot {
            model_title: "DreamShaper.safetensors [abc123]".into(),
            prompt: "a lighthouse at dusk".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_placeholder_model_rejected() {
        for title in ["", "  ", "Loading models...", "Link first"] {
            let snap = UiSnapshot {
                model_title: title.into(),
                ..snapshot()
            };
            assert!(matches!(build(&snap), Err(EngineError::NoModelSelected)));
        }
    }

    #[test]
    fn test_standard_payload_shape() {
        let job = build(&snapshot()).unwrap();
        assert_eq!(job.mode, JobMode::Standard);
        assert_eq!(job.payload["prompt"], "a lighthouse at dusk");
        assert_eq!(job.payload["steps"], 20);
        assert_eq!(job.payload["save_images"], true);
        let ov = &job.payload["override_settings"];
        assert_eq!(ov["forge_inference_memory"], 4608);
        assert_eq!(ov["forge_additional_modules"], json!([]));
        assert_eq!(ov["sd_vae"], "Automatic");
    }

    #[test]
    fn test_hires_fields_absent_when_disabled() {
        let job = build(&snapshot()).unwrap();
        assert!(job.payload.get("enable_hr").is_none());
        assert!(job.payload.get("hr_second_pass_steps").is_none());
    }

    #[test]
    fn test_hires_fields_present_when_enabled() {
        let snap = UiSnapshot {
            hires: Some(HiresOptions {
                scale: 1.5,
                upscaler: "Latent".into(),
                second_pass_steps: 10,
                denoising_strength: 0.4,
                cfg: 5.0,
            }),
            ..snapshot()
        };
        let job = build(&snap).unwrap();
        assert_eq!(job.payload["enable_hr"], true);
        assert_eq!(job.payload["hr_second_pass_steps"], 10);
        assert_eq!(job.payload["hr_additional_modules"], json!(["Use same choices"]));
        assert_eq!(job.total_steps(), 30);
    }

    #[test]
    fn test_distilled_cfg_fallback() {
        let base = UiSnapshot {
            mode: JobMode::Distilled,
            ..snapshot()
        };
        let job = build(&base).unwrap();
        assert_eq!(job.payload["distilled_cfg_scale"], 3.5);

        let nan = UiSnapshot {
            distilled_cfg_scale: Some(f64::NAN),
            ..base.clone()
        };
        assert_eq!(build(&nan).unwrap().payload["distilled_cfg_scale"], 3.5);

        let valid = UiSnapshot {
            distilled_cfg_scale: Some(2.0),
            ..base
        };
        assert_eq!(build(&valid).unwrap().payload["distilled_cfg_scale"], 2.0);
    }

    #[test]
    fn test_distilled_modules_and_dtype() {
        let snap = UiSnapshot {
            mode: JobMode::Distilled,
            extra_modules: vec!["ae.safetensors".into(), "clip_l.safetensors".into()],
            unet_storage_dtype: Some("bnb-nf4".into()),
            ..snapshot()
        };
        let ov = &build(&snap).unwrap().payload["override_settings"];
        assert_eq!(
            ov["forge_additional_modules"],
            json!(["ae.safetensors", "clip_l.safetensors"])
        );
        assert_eq!(ov["forge_unet_storage_dtype"], "bnb-nf4");
    }

    fn inpaint_snapshot() -> UiSnapshot {
        UiSnapshot {
            mode: JobMode::Inpaint,
            inpaint: Some(InpaintOptions {
                source_image: "c29tZWltYWdl".into(),
                mask: Some("bWFzaw==".into()),
                ..Default::default()
            }),
            ..snapshot()
        }
    }

    #[test]
    fn test_inpaint_requires_source_image() {
        let mut snap = inpaint_snapshot();
        snap.inpaint.as_mut().unwrap().source_image.clear();
        assert!(matches!(build(&snap), Err(EngineError::MissingInput(_))));

        let no_params = UiSnapshot {
            inpaint: None,
            ..inpaint_snapshot()
        };
        assert!(matches!(build(&no_params), Err(EngineError::MissingInput(_))));
    }

    #[test]
    fn test_inpaint_payload_shape() {
        let job = build(&inpaint_snapshot()).unwrap();
        assert_eq!(job.mode, JobMode::Inpaint);
        assert_eq!(job.payload["init_images"], json!(["c29tZWltYWdl"]));
        assert_eq!(job.payload["mask_blur"], 4);
        assert_eq!(job.payload["inpainting_fill"], 1);
        assert_eq!(job.payload["inpaint_full_res"], false);
        assert_eq!(job.payload["batch_size"], 1);
        assert!(job.desc.starts_with("Inpaint: "));
        let ov = &job.payload["override_settings"];
        assert_eq!(ov["forge_additional_modules"], json!([]));
    }

    #[test]
    fn test_inpaint_masked_only_padding() {
        let mut snap = inpaint_snapshot();
        {
            let inp = snap.inpaint.as_mut().unwrap();
            inp.masked_only = true;
            inp.padding = 48;
        }
        let job = build(&snap).unwrap();
        assert_eq!(job.payload["inpaint_full_res"], true);
        assert_eq!(job.payload["inpaint_full_res_padding"], 48);
    }

    #[test]
    fn test_soft_inpainting_raises_mask_blur_floor() {
        let mut snap = inpaint_snapshot();
        snap.inpaint.as_mut().unwrap().soft_inpainting = true;
        let job = build(&snap).unwrap();
        assert_eq!(job.payload["mask_blur"], 8);
        assert!(job.payload.get("alwayson_scripts").is_some());

        // Already above the floor: left alone.
        let mut snap = inpaint_snapshot();
        {
            let inp = snap.inpaint.as_mut().unwrap();
            inp.soft_inpainting = true;
            inp.mask_blur = 12;
        }
        assert_eq!(build(&snap).unwrap().payload["mask_blur"], 12);
    }

    #[test]
    fn test_explicit_overrides_merge_last() {
        let mut snap = snapshot();
        snap.overrides
            .insert("CLIP_stop_at_last_layers".into(), json!(2));
        let ov = &build(&snap).unwrap().payload["override_settings"];
        assert_eq!(ov["CLIP_stop_at_last_layers"], 2);
        assert_eq!(ov["forge_inference_memory"], 4608);
    }

    #[test]
    fn test_build_is_pure() {
        let snap = snapshot();
        let a = build(&snap).unwrap();
        let b = build(&snap).unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(a.payload, b.payload);
    }
}
