//! Test support: catalog seeding and a scripted generation backend.
//!
//! Compiled for this crate's tests and, through the `testing` feature, for
//! other crates' tests.

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bowl_comfyui::backend::{BackendError, EventStream, GenerationBackend, OutputImage};
use bowl_comfyui::messages::{
    ComfyUIMessage, ErrorData, ExecInfo, ExecutingData, ExecutionStartData, QueueStatus,
    StatusData,
};
use bowl_core::descriptors::{LoraSpec, RegionArea, RegionRect};
use bowl_db::models::group::{CreateGroup, Group};
use bowl_db::models::item::{CreateItem, Item};
use bowl_db::models::server::{CreateServer, Server};
use bowl_db::models::template::{CreateFixer, CreateGenerator, Fixer, Generator};
use futures::channel::mpsc::{unbounded, UnboundedSender};
use futures::StreamExt;
use serde_json::{json, Value};

use crate::backends::BackendFactory;
use crate::memory::InMemoryStore;

// ---------------------------------------------------------------------------
// Catalog seeding
// ---------------------------------------------------------------------------

pub const SERVER: &str = "local";
pub const SERVER_HOST: &str = "127.0.0.1:8188";
pub const GENERATOR: &str = "anime";
pub const FIXER: &str = "upscale";

/// Rows created by [`seed_catalog`].
#[derive(Debug, Clone)]
pub struct Seeded {
    pub server: Server,
    pub generator: Generator,
    pub fixer: Fixer,
    pub groups: HashMap<String, Group>,
    /// Keyed by item code name; names are unique across the seed.
    pub items: HashMap<String, Item>,
}

/// SD1.5 text-to-image workflow with titled prompt and save nodes.
pub fn checkpoint_workflow() -> Value {
    json!({
        "3": {
            "class_type": "KSampler",
            "inputs": {
                "seed": 42, "steps": 20, "cfg": 7.0,
                "sampler_name": "euler", "scheduler": "normal", "denoise": 1.0,
                "model": ["4", 0], "positive": ["6", 0],
                "negative": ["7", 0], "latent_image": ["5", 0]
            }
        },
        "4": {
            "class_type": "CheckpointLoaderSimple",
            "inputs": { "ckpt_name": "sd15.safetensors" }
        },
        "5": {
            "class_type": "EmptyLatentImage",
            "inputs": { "width": 512, "height": 512, "batch_size": 1 }
        },
        "6": {
            "class_type": "CLIPTextEncode",
            "inputs": { "text": "", "clip": ["4", 1] },
            "_meta": { "title": "Positive Prompt" }
        },
        "7": {
            "class_type": "CLIPTextEncode",
            "inputs": { "text": "", "clip": ["4", 1] },
            "_meta": { "title": "Negative Prompt" }
        },
        "8": {
            "class_type": "VAEDecode",
            "inputs": { "samples": ["3", 0], "vae": ["4", 2] }
        },
        "9": {
            "class_type": "SaveImage",
            "inputs": { "filename_prefix": "ComfyUI", "images": ["8", 0] },
            "_meta": { "title": "Save Image" }
        }
    })
}

/// Load, scale 2x, save.
pub fn upscale_workflow() -> Value {
    json!({
        "1": {
            "class_type": "LoadImage",
            "inputs": { "image": "" },
            "_meta": { "title": "Input Image" }
        },
        "2": {
            "class_type": "ImageScaleBy",
            "inputs": { "upscale_method": "lanczos", "scale_by": 2.0, "image": ["1", 0] }
        },
        "3": {
            "class_type": "SaveImage",
            "inputs": { "filename_prefix": "ComfyUI", "images": ["2", 0] },
            "_meta": { "title": "Save Image" }
        }
    })
}

fn item(group: &Group, code_name: &str, sort_order: i32) -> CreateItem {
    CreateItem {
        group_id: group.id,
        name: code_name.to_string(),
        code_name: code_name.to_string(),
        sort_order,
        positive_prompt: code_name.to_string(),
        ..Default::default()
    }
}

/// Server `local`, generator `anime`, fixer `upscale`, and the groups
/// `characters` (alice, bob), `poses` (sit, stand, jump) and `emotions`
/// (happy, sad, angry, calm).
pub async fn seed_catalog(store: &InMemoryStore) -> Seeded {
    let server = store
        .add_server(CreateServer {
            name: "Local".into(),
            code_name: SERVER.into(),
            host: SERVER_HOST.into(),
        })
        .await;
    let generator = store
        .add_generator(CreateGenerator {
            code_name: GENERATOR.into(),
            workflow_json: checkpoint_workflow(),
            positive_prompt_title: Some("Positive Prompt".into()),
            negative_prompt_title: Some("Negative Prompt".into()),
            load_image_controlnet_title: None,
            save_image_title: Some("Save Image".into()),
        })
        .await;
    let fixer = store
        .add_fixer(CreateFixer {
            code_name: FIXER.into(),
            workflow_json: upscale_workflow(),
            positive_prompt: String::new(),
            negative_prompt: String::new(),
            positive_prompt_title: None,
            negative_prompt_title: None,
            load_image_title: "Input Image".into(),
            save_image_title: Some("Save Image".into()),
        })
        .await;

    let mut groups = HashMap::new();
    let mut items = HashMap::new();
    let catalog: [(&str, &[&str]); 3] = [
        ("characters", &["alice", "bob"]),
        ("poses", &["sit", "stand", "jump"]),
        ("emotions", &["happy", "sad", "angry", "calm"]),
    ];
    for (group_code, item_codes) in catalog {
        let group = store
            .add_group(CreateGroup {
                name: group_code.into(),
                code_name: group_code.into(),
                description: None,
            })
            .await;
        for (order, code) in item_codes.iter().enumerate() {
            let mut input = item(&group, code, order as i32);
            if *code == "alice" {
                input.lora = Some(LoraSpec::new("alice.safetensors"));
                input.negative_prompt = "blurry".into();
            }
            let created = store.add_item(input).await;
            items.insert(created.code_name.clone(), created);
        }
        groups.insert(group.code_name.clone(), group);
    }

    Seeded {
        server,
        generator,
        fixer,
        groups,
        items,
    }
}

/// Group `layouts` with one layout item `split`: `left` as a mask, `right`
/// as a rectangle.
pub async fn seed_layouts(store: &InMemoryStore) -> Item {
    let group = store
        .add_group(CreateGroup {
            name: "Layouts".into(),
            code_name: "layouts".into(),
            description: None,
        })
        .await;
    let mut input = item(&group, "split", 0);
    input.positive_prompt = "two people".into();
    input.regions = vec![
        RegionArea {
            keyword: "left".into(),
            mask_file: Some("masks/left.png".into()),
            coordinates: None,
        },
        RegionArea {
            keyword: "right".into(),
            mask_file: None,
            coordinates: Some(RegionRect {
                x: 256,
                y: 0,
                width: 256,
                height: 512,
            }),
        },
    ];
    store.add_item(input).await
}

// ---------------------------------------------------------------------------
// Fake backend
// ---------------------------------------------------------------------------

/// How a [`FakeBackend`] answers submissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeOutcome {
    /// Start, execute node `3`, then report completion.
    Succeed,
    /// Start, then report an execution error on node `3`.
    Fail,
    /// Accept the prompt and never emit anything.
    Silent,
}

type Listener = UnboundedSender<Result<ComfyUIMessage, BackendError>>;

/// Scripted [`GenerationBackend`] that records submissions.
pub struct FakeBackend {
    code_name: String,
    reachable: AtomicBool,
    outcome: Mutex<FakeOutcome>,
    submitted: Mutex<Vec<Value>>,
    listeners: Mutex<Vec<Listener>>,
}

impl FakeBackend {
    pub fn new(code_name: impl Into<String>) -> Self {
        Self {
            code_name: code_name.into(),
            reachable: AtomicBool::new(true),
            outcome: Mutex::new(FakeOutcome::Succeed),
            submitted: Mutex::new(Vec::new()),
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn set_outcome(&self, outcome: FakeOutcome) {
        *self.outcome.lock().expect("fake backend lock") = outcome;
    }

    /// Every workflow submitted so far, in order.
    pub fn submitted(&self) -> Vec<Value> {
        self.submitted.lock().expect("fake backend lock").clone()
    }

    fn broadcast(&self, messages: Vec<ComfyUIMessage>) {
        let mut listeners = self.listeners.lock().expect("fake backend lock");
        listeners.retain(|tx| messages.iter().all(|m| tx.unbounded_send(Ok(m.clone())).is_ok()));
    }
}

fn executing(prompt_id: &str, node: Option<&str>) -> ComfyUIMessage {
    ComfyUIMessage::Executing(ExecutingData {
        node: node.map(str::to_string),
        prompt_id: prompt_id.to_string(),
    })
}

fn queue_status(remaining: i32) -> ComfyUIMessage {
    ComfyUIMessage::Status(StatusData {
        status: QueueStatus {
            exec_info: ExecInfo {
                queue_remaining: remaining,
            },
        },
    })
}

/// A tiny PNG, standing in for a generated image.
pub fn png_bytes() -> Result<Vec<u8>, image::ImageError> {
    let mut bytes = Vec::new();
    image::DynamicImage::ImageRgb8(image::RgbImage::new(4, 4))
        .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)?;
    Ok(bytes)
}

#[async_trait]
impl GenerationBackend for FakeBackend {
    fn code_name(&self) -> &str {
        &self.code_name
    }

    async fn probe(&self, _timeout: Duration) -> Result<(), BackendError> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BackendError::Unreachable(format!("{} is down", self.code_name)))
        }
    }

    async fn events(&self) -> Result<EventStream, BackendError> {
        let (tx, rx) = unbounded();
        self.listeners.lock().expect("fake backend lock").push(tx);
        Ok(rx.boxed())
    }

    async fn submit(&self, workflow: &Value) -> Result<String, BackendError> {
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(BackendError::Unreachable(format!("{} is down", self.code_name)));
        }
        let prompt_id = {
            let mut submitted = self.submitted.lock().expect("fake backend lock");
            submitted.push(workflow.clone());
            format!("fake-{}", submitted.len())
        };

        let start = ComfyUIMessage::ExecutionStart(ExecutionStartData {
            prompt_id: prompt_id.clone(),
        });
        let outcome = *self.outcome.lock().expect("fake backend lock");
        match outcome {
            FakeOutcome::Succeed => self.broadcast(vec![
                queue_status(1),
                start,
                executing(&prompt_id, Some("3")),
                executing(&prompt_id, None),
            ]),
            FakeOutcome::Fail => self.broadcast(vec![
                start,
                ComfyUIMessage::ExecutionError(ErrorData {
                    prompt_id: prompt_id.clone(),
                    node_id: "3".into(),
                    exception_message: "CUDA out of memory".into(),
                    exception_type: "RuntimeError".into(),
                }),
            ]),
            FakeOutcome::Silent => {}
        }
        Ok(prompt_id)
    }

    async fn fetch_images(&self, prompt_id: &str) -> Result<Vec<OutputImage>, BackendError> {
        let bytes = png_bytes().map_err(|_| BackendError::NoOutput(prompt_id.to_string()))?;
        Ok(vec![
            OutputImage {
                node_id: "8".into(),
                filename: "preview.png".into(),
                kind: "temp".into(),
                bytes: Vec::new(),
            },
            OutputImage {
                node_id: "9".into(),
                filename: format!("{prompt_id}.png"),
                kind: "output".into(),
                bytes,
            },
        ])
    }
}

/// [`BackendFactory`] handing out one shared [`FakeBackend`] per code name.
#[derive(Default)]
pub struct FakeFactory {
    backends: Mutex<HashMap<String, Arc<FakeBackend>>>,
    connects: AtomicUsize,
}

impl FakeFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// The backend for `code_name`, created on first use.
    pub fn backend(&self, code_name: &str) -> Arc<FakeBackend> {
        self.backends
            .lock()
            .expect("fake factory lock")
            .entry(code_name.to_string())
            .or_insert_with(|| Arc::new(FakeBackend::new(code_name)))
            .clone()
    }

    /// Number of handles built so far.
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

impl BackendFactory for FakeFactory {
    fn connect(&self, code_name: &str, _host: &str) -> Arc<dyn GenerationBackend> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.backend(code_name)
    }
}
