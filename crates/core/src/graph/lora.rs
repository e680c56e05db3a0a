//! LoRA attachment.
//!
//! Combined checkpoint loaders get a `LoraLoader` spliced after their MODEL
//! and CLIP outputs. Split (UNET) loaders get a `LoraLoaderModelOnly`
//! spliced after MODEL only. Several LoRAs form a chain, each node reading
//! from the previous one. VAE edges are never touched.

use serde_json::json;

use super::{
    Link, Node, NodeKind, WorkflowGraph, LORA_LOADER_CLASS, LORA_MODEL_ONLY_CLASS,
};
use crate::descriptors::LoraSpec;
use crate::error::CoreError;

const MODEL_SLOT: u32 = 0;
const CLIP_SLOT: u32 = 1;

/// Where the diffusion model enters the graph.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ModelSource {
    Combined(String),
    Split(String),
}

fn detect_model_source(graph: &WorkflowGraph) -> Result<ModelSource, CoreError> {
    if let Some(id) = graph.find_kind(NodeKind::CheckpointLoader) {
        return Ok(ModelSource::Combined(id.to_string()));
    }
    if let Some(id) = graph.find_kind(NodeKind::UnetLoader) {
        return Ok(ModelSource::Split(id.to_string()));
    }
    Err(CoreError::InvalidGraph(
        "no checkpoint or UNET loader to attach LoRAs to".into(),
    ))
}

/// Return a copy of `graph` with `loras` chained after the model source.
pub fn attach_loras(graph: &WorkflowGraph, loras: &[LoraSpec]) -> Result<WorkflowGraph, CoreError> {
    let mut out = graph.clone();
    if loras.is_empty() {
        return Ok(out);
    }

    match detect_model_source(graph)? {
        ModelSource::Combined(mut source) => {
            for lora in loras {
                source = splice_combined(&mut out, &source, lora);
            }
        }
        ModelSource::Split(mut source) => {
            for lora in loras {
                source = splice_model_only(&mut out, &source, lora);
            }
        }
    }
    Ok(out)
}

fn lora_title(lora: &LoraSpec) -> String {
    format!("Load LoRA - {}", lora.name)
}

fn splice_combined(graph: &mut WorkflowGraph, source: &str, lora: &LoraSpec) -> String {
    // Collected before insertion so the new node's own inputs stay on `source`.
    let model_edges = graph.consumers(source, MODEL_SLOT);
    let clip_edges = graph.consumers(source, CLIP_SLOT);

    let id = graph.add_node(
        Node::new(LORA_LOADER_CLASS)
            .with_title(lora_title(lora))
            .with_input("lora_name", json!(lora.name))
            .with_input("strength_model", json!(lora.strength_model))
            .with_input("strength_clip", json!(lora.strength_clip))
            .with_input("model", Link::new(source, MODEL_SLOT))
            .with_input("clip", Link::new(source, CLIP_SLOT)),
    );

    graph.redirect(&model_edges, &Link::new(&id, MODEL_SLOT));
    graph.redirect(&clip_edges, &Link::new(&id, CLIP_SLOT));
    id
}

fn splice_model_only(graph: &mut WorkflowGraph, source: &str, lora: &LoraSpec) -> String {
    let model_edges = graph.consumers(source, MODEL_SLOT);

    let id = graph.add_node(
        Node::new(LORA_MODEL_ONLY_CLASS)
            .with_title(lora_title(lora))
            .with_input("lora_name", json!(lora.name))
            .with_input("strength_model", json!(lora.strength_model))
            .with_input("model", Link::new(source, MODEL_SLOT)),
    );

    graph.redirect(&model_edges, &Link::new(&id, MODEL_SLOT));
    id
}
