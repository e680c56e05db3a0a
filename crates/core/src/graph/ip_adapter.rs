//! IP-adapter attachment.
//!
//! Per reference image: `LoadImage` + `IPAdapterModelLoader` +
//! `IPAdapterAdvanced`, with each apply node's `model` chained from the
//! previous one. The sampler ends up reading the last apply node.

use std::collections::HashMap;

use serde_json::json;

use super::{Input, Link, Node, WorkflowGraph, LOAD_IMAGE_CLASS};
use crate::descriptors::IpAdapterSpec;
use crate::error::CoreError;

pub const CLIP_VISION_LOADER_CLASS: &str = "CLIPVisionLoader";

pub const IPADAPTER_MODEL_LOADER_CLASS: &str = "IPAdapterModelLoader";

pub const IPADAPTER_APPLY_CLASS: &str = "IPAdapterAdvanced";

const COMBINE_EMBEDS: &str = "concat";

const EMBEDS_SCALING: &str = "V only";

/// Return a copy of `graph` with one adapter chain link per reference.
pub fn attach_ip_adapters(
    graph: &WorkflowGraph,
    adapters: &[IpAdapterSpec],
) -> Result<WorkflowGraph, CoreError> {
    let mut out = graph.clone();
    if adapters.is_empty() {
        return Ok(out);
    }

    let sampler = out.find_sampler()?;
    let mut model = out
        .node(&sampler)
        .and_then(|n| n.link("model"))
        .cloned()
        .ok_or_else(|| CoreError::InvalidGraph(format!("sampler {sampler} has no linked model")))?;

    // One CLIP vision loader per distinct model file.
    let mut clip_loaders: HashMap<String, String> = HashMap::new();

    for spec in adapters {
        let clip_vision = match clip_loaders.get(&spec.clip_vision_model) {
            Some(id) => id.clone(),
            None => {
                let id = out.add_node(
                    Node::new(CLIP_VISION_LOADER_CLASS)
                        .with_input("clip_name", json!(spec.clip_vision_model)),
                );
                clip_loaders.insert(spec.clip_vision_model.clone(), id.clone());
                id
            }
        };

        let image = out.add_node(
            Node::new(LOAD_IMAGE_CLASS)
                .with_title(format!("IP-Adapter Image - {}", spec.image_file))
                .with_input("image", json!(spec.image_file)),
        );
        let loader = out.add_node(
            Node::new(IPADAPTER_MODEL_LOADER_CLASS)
                .with_input("ipadapter_file", json!(spec.model_name)),
        );
        let apply = out.add_node(
            Node::new(IPADAPTER_APPLY_CLASS)
                .with_input("weight", json!(spec.weight))
                .with_input("weight_type", json!(spec.weight_type))
                .with_input("combine_embeds", json!(COMBINE_EMBEDS))
                .with_input("start_at", json!(spec.start_at))
                .with_input("end_at", json!(spec.end_at))
                .with_input("embeds_scaling", json!(EMBEDS_SCALING))
                .with_input("model", model.clone())
                .with_input("ipadapter", Link::new(&loader, 0))
                .with_input("image", Link::new(&image, 0))
                .with_input("clip_vision", Link::new(&clip_vision, 0)),
        );
        model = Link::new(apply, 0);
    }

    let node = out
        .node_mut(&sampler)
        .ok_or_else(|| CoreError::InvalidGraph(format!("sampler {sampler} disappeared")))?;
    node.inputs.insert("model".into(), Input::Link(model));
    Ok(out)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;
    use crate::descriptors::LoraSpec;
    use crate::graph::attach_loras;
    use crate::graph::fixtures::checkpoint_graph;

    #[test]
    fn adapters_chain_into_sampler_model() {
        let graph = checkpoint_graph();
        let out = attach_ip_adapters(
            &graph,
            &[IpAdapterSpec::new("face.png"), IpAdapterSpec::new("style.png")],
        )
        .unwrap();

        // 1 shared clip vision loader + 3 nodes per adapter.
        assert_eq!(out.len(), graph.len() + 7);
        let clip_vision_count = out
            .nodes()
            .filter(|(_, n)| n.class_type == CLIP_VISION_LOADER_CLASS)
            .count();
        assert_eq!(clip_vision_count, 1);

        let sampler_model = out.node("3").unwrap().link("model").unwrap().clone();
        let last = out.node(&sampler_model.node).unwrap();
        assert_eq!(last.class_type, IPADAPTER_APPLY_CLASS);

        let previous = last.link("model").unwrap();
        let first = out.node(&previous.node).unwrap();
        assert_eq!(first.class_type, IPADAPTER_APPLY_CLASS);
        assert_eq!(first.link("model"), Some(&Link::new("4", 0)));
        assert_eq!(first.inputs.get("embeds_scaling"), Some(&Input::Value(json!("V only"))));
    }

    #[test]
    fn adapters_follow_lora_chain() {
        let with_lora = attach_loras(&checkpoint_graph(), &[LoraSpec::new("a.safetensors")]).unwrap();
        let out = attach_ip_adapters(&with_lora, &[IpAdapterSpec::new("face.png")]).unwrap();

        let apply_id = &out.node("3").unwrap().link("model").unwrap().node;
        assert_eq!(out.node(apply_id).unwrap().link("model"), Some(&Link::new("10", 0)));
    }

    #[test]
    fn distinct_clip_models_get_their_own_loader() {
        let mut second = IpAdapterSpec::new("style.png");
        second.clip_vision_model = "CLIP-ViT-bigG.safetensors".into();
        let out = attach_ip_adapters(&checkpoint_graph(), &[IpAdapterSpec::new("face.png"), second])
            .unwrap();
        let loaders = out
            .nodes()
            .filter(|(_, n)| n.class_type == CLIP_VISION_LOADER_CLASS)
            .count();
        assert_eq!(loaders, 2);
    }

    #[test]
    fn missing_sampler_is_invalid_graph() {
        let graph = WorkflowGraph::from_json(&json!({
            "4": { "class_type": "CheckpointLoaderSimple", "inputs": {} }
        }))
        .unwrap();
        assert_matches!(
            attach_ip_adapters(&graph, &[IpAdapterSpec::new("face.png")]),
            Err(CoreError::InvalidGraph(_))
        );
    }
}
