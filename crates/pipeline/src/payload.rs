//! Turns a job plus its template into the workflow submitted to a backend.

use std::path::Path;

use bowl_core::descriptors::IpAdapterSpec;
use bowl_core::error::CoreError;
use bowl_core::graph::{attach_ip_adapters, attach_loras, attach_regions, WorkflowGraph};
use bowl_db::models::job::Job;
use bowl_db::models::template::{Fixer, Generator};
use serde_json::{json, Value};

const TEXT_INPUT: &str = "text";
const IMAGE_INPUT: &str = "image";
const FILENAME_PREFIX_INPUT: &str = "filename_prefix";

/// The template a job executes against.
#[derive(Debug, Clone, Copy)]
pub enum Template<'a> {
    Generator(&'a Generator),
    Fixer(&'a Fixer),
}

impl Template<'_> {
    pub fn code_name(&self) -> &str {
        match self {
            Template::Generator(g) => &g.code_name,
            Template::Fixer(f) => &f.code_name,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Template::Generator(_) => "generator",
            Template::Fixer(_) => "fixer",
        }
    }

    fn workflow(&self) -> &Value {
        match self {
            Template::Generator(g) => &g.workflow_json,
            Template::Fixer(f) => &f.workflow_json,
        }
    }
}

/// Prefix the backend gives the saved image of `job_id`.
pub fn filename_prefix(job_id: i64) -> String {
    format!("bowl_{job_id}")
}

/// Resolve `path` against this process's working directory.
///
/// The backend reads image files itself and would otherwise resolve a
/// relative path against its own working directory.
pub fn absolute_image_path(path: &str) -> Result<String, CoreError> {
    let path = Path::new(path);
    let resolved = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::path::absolute(path).map_err(|e| {
            CoreError::Validation(format!("cannot resolve image path `{}`: {e}", path.display()))
        })?
    };
    Ok(resolved.to_string_lossy().into_owned())
}

/// Build the API-format workflow for `job`.
///
/// Titled inputs are written first (prompts, input image, save prefix);
/// generators then get LoRA, IP-adapter and region injection in that
/// order. A configured title that matches no node fails the job. Control,
/// IP-adapter and fixer source images are submitted as absolute paths.
pub fn build_payload(job: &Job, template: Template<'_>) -> Result<Value, CoreError> {
    tracing::debug!(
        job_id = job.id,
        template = template.code_name(),
        kind = template.kind(),
        "Building payload",
    );
    let mut graph = WorkflowGraph::from_json(template.workflow())?;

    match template {
        Template::Generator(generator) => {
            set_text(&mut graph, generator.positive_prompt_title.as_deref(), &job.positive_prompt)?;
            set_text(&mut graph, generator.negative_prompt_title.as_deref(), &job.negative_prompt)?;
            match (&generator.load_image_controlnet_title, &job.control_image) {
                (Some(title), Some(image)) => {
                    let image = absolute_image_path(image)?;
                    graph.set_titled_input(title, IMAGE_INPUT, json!(image))?;
                }
                (None, Some(_)) => tracing::warn!(
                    job_id = job.id,
                    generator = %generator.code_name,
                    "Generator has no control image node; control image ignored",
                ),
                _ => {}
            }
        }
        Template::Fixer(fixer) => {
            set_text(&mut graph, fixer.positive_prompt_title.as_deref(), &fixer.positive_prompt)?;
            set_text(&mut graph, fixer.negative_prompt_title.as_deref(), &fixer.negative_prompt)?;
            let source = job.source_image.as_deref().ok_or_else(|| {
                CoreError::Validation(format!("fixer job {} has no source image", job.id))
            })?;
            graph.set_titled_input(
                &fixer.load_image_title,
                IMAGE_INPUT,
                json!(absolute_image_path(source)?),
            )?;
        }
    }

    let save_title = match template {
        Template::Generator(g) => g.save_image_title.as_deref(),
        Template::Fixer(f) => f.save_image_title.as_deref(),
    };
    if let Some(title) = save_title {
        graph.set_titled_input(title, FILENAME_PREFIX_INPUT, json!(filename_prefix(job.id)))?;
    }

    if let Template::Generator(_) = template {
        graph = attach_loras(&graph, &job.loras)?;
        let adapters = job
            .ip_adapters
            .iter()
            .map(|spec| {
                Ok(IpAdapterSpec {
                    image_file: absolute_image_path(&spec.image_file)?,
                    ..spec.clone()
                })
            })
            .collect::<Result<Vec<_>, CoreError>>()?;
        graph = attach_ip_adapters(&graph, &adapters)?;
        graph = attach_regions(&graph, &job.region_prompts)?;
    }

    graph.to_json()
}

fn set_text(graph: &mut WorkflowGraph, title: Option<&str>, text: &str) -> Result<(), CoreError> {
    if let Some(title) = title {
        graph.set_titled_input(title, TEXT_INPUT, json!(text))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use bowl_core::descriptors::{LoraSpec, RegionPrompt, RegionRect};
    use bowl_db::models::status::JobStatus;

    use super::*;
    use crate::testing::{checkpoint_workflow, upscale_workflow};

    fn generator() -> Generator {
        Generator {
            id: 1,
            code_name: "anime".into(),
            workflow_json: checkpoint_workflow(),
            positive_prompt_title: Some("Positive Prompt".into()),
            negative_prompt_title: Some("Negative Prompt".into()),
            load_image_controlnet_title: None,
            save_image_title: Some("Save Image".into()),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }

    fn fixer() -> Fixer {
        Fixer {
            id: 2,
            code_name: "upscale".into(),
            workflow_json: upscale_workflow(),
            positive_prompt: String::new(),
            negative_prompt: String::new(),
            positive_prompt_title: None,
            negative_prompt_title: None,
            load_image_title: "Input Image".into(),
            save_image_title: Some("Save Image".into()),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }

    fn job() -> Job {
        Job {
            id: 41,
            project_id: 1,
            command_id: 7,
            group_items: Vec::new(),
            server_code_name: "local".into(),
            server_host: "127.0.0.1:8188".into(),
            generator_code_name: Some("anime".into()),
            fixer_code_name: None,
            parent_job_id: None,
            source_image: None,
            status_id: JobStatus::Waiting.id(),
            prompt_id: None,
            positive_prompt: "alice, sit".into(),
            negative_prompt: "blurry".into(),
            control_image: None,
            loras: Vec::new(),
            ip_adapters: Vec::new(),
            region_prompts: Vec::new(),
            result_path: "/results/command_7/a.png".into(),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn prompts_and_prefix_are_written_by_title() {
        let payload = build_payload(&job(), Template::Generator(&generator())).unwrap();
        assert_eq!(payload["6"]["inputs"]["text"], "alice, sit");
        assert_eq!(payload["7"]["inputs"]["text"], "blurry");
        assert_eq!(payload["9"]["inputs"]["filename_prefix"], "bowl_41");
        assert_eq!(payload.as_object().unwrap().len(), 7);
    }

    #[test]
    fn generator_injections_are_applied() {
        let mut job = job();
        job.loras = vec![LoraSpec::new("alice.safetensors")];
        job.region_prompts = vec![RegionPrompt {
            keyword: "right".into(),
            prompt: "happy".into(),
            mask_file: None,
            coordinates: Some(RegionRect {
                x: 256,
                y: 0,
                width: 256,
                height: 512,
            }),
        }];
        let payload = build_payload(&job, Template::Generator(&generator())).unwrap();

        let sampler_model = payload["3"]["inputs"]["model"][0].as_str().unwrap().to_string();
        assert_eq!(payload[&sampler_model]["class_type"], "LoraLoader");
        let positive = payload["3"]["inputs"]["positive"][0].as_str().unwrap().to_string();
        assert_eq!(payload[&positive]["class_type"], "ConditioningCombine");
    }

    #[test]
    fn fixer_reads_the_parent_image() {
        let mut job = job();
        job.generator_code_name = None;
        job.fixer_code_name = Some("upscale".into());
        job.loras = vec![LoraSpec::new("ignored.safetensors")];
        job.source_image = Some("/results/command_7/a.png".into());

        let payload = build_payload(&job, Template::Fixer(&fixer())).unwrap();
        assert_eq!(payload["1"]["inputs"]["image"], "/results/command_7/a.png");
        assert_eq!(payload["3"]["inputs"]["filename_prefix"], "bowl_41");
        assert_eq!(payload.as_object().unwrap().len(), 3);
    }

    #[test]
    fn relative_image_paths_are_submitted_absolute() {
        let cwd = std::env::current_dir().unwrap();

        let mut fixer_job = job();
        fixer_job.fixer_code_name = Some("upscale".into());
        fixer_job.source_image = Some("./results/command_7/a.png".into());
        let payload = build_payload(&fixer_job, Template::Fixer(&fixer())).unwrap();
        let submitted = payload["1"]["inputs"]["image"].as_str().unwrap();
        assert!(Path::new(submitted).is_absolute());
        assert!(Path::new(submitted).starts_with(&cwd));
        assert!(submitted.ends_with("command_7/a.png"));

        let mut generator = generator();
        generator.workflow_json["20"] = json!({
            "class_type": "LoadImage",
            "inputs": { "image": "" },
            "_meta": { "title": "Control Image" }
        });
        generator.load_image_controlnet_title = Some("Control Image".into());
        let mut generator_job = job();
        generator_job.control_image = Some("refs/pose.png".into());
        generator_job.ip_adapters = vec![IpAdapterSpec::new("refs/face.png")];
        let payload = build_payload(&generator_job, Template::Generator(&generator)).unwrap();
        assert_eq!(
            payload["20"]["inputs"]["image"],
            cwd.join("refs/pose.png").to_string_lossy().as_ref()
        );
        let adapter_image = payload
            .as_object()
            .unwrap()
            .values()
            .find(|node| node["_meta"]["title"].as_str().is_some_and(|t| t.starts_with("IP-Adapter Image")))
            .unwrap();
        assert!(Path::new(adapter_image["inputs"]["image"].as_str().unwrap()).is_absolute());
    }

    #[test]
    fn absolute_paths_are_kept() {
        assert_eq!(absolute_image_path("/data/a.png").unwrap(), "/data/a.png");
        assert_matches!(absolute_image_path(""), Err(CoreError::Validation(_)));
    }

    #[test]
    fn fixer_without_source_is_rejected() {
        let mut job = job();
        job.fixer_code_name = Some("upscale".into());
        assert_matches!(
            build_payload(&job, Template::Fixer(&fixer())),
            Err(CoreError::Validation(_))
        );
    }

    #[test]
    fn unmatched_title_is_invalid_graph() {
        let mut generator = generator();
        generator.positive_prompt_title = Some("Prompt".into());
        assert_matches!(
            build_payload(&job(), Template::Generator(&generator)),
            Err(CoreError::InvalidGraph(_))
        );
    }
}
