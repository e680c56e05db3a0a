//! Region-conditioning attachment.
//!
//! Walks back from the sampler's `positive` input through control-net
//! application nodes to the base `CLIPTextEncode`. Each region prompt gets
//! its own text encoder (sharing the base CLIP link) restricted by a mask
//! or an area, and is folded into the running conditioning with
//! `ConditioningCombine`. The node that consumed the base conditioning is
//! rewired once, to the last combine node.

use serde_json::json;

use super::{
    Input, Link, Node, NodeKind, WorkflowGraph, CLIP_TEXT_ENCODE_CLASS, LOAD_IMAGE_CLASS,
};
use crate::descriptors::{RegionPrompt, RegionRect};
use crate::error::CoreError;

pub const IMAGE_TO_MASK_CLASS: &str = "ImageToMask";

pub const CONDITIONING_SET_MASK_CLASS: &str = "ConditioningSetMask";

pub const CONDITIONING_SET_AREA_CLASS: &str = "ConditioningSetArea";

pub const CONDITIONING_COMBINE_CLASS: &str = "ConditioningCombine";

const MASK_CHANNEL: &str = "red";

const REGION_STRENGTH: f64 = 1.0;

/// The input that receives the final combined positive conditioning.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ConditioningSink {
    consumer: String,
    input: String,
    base: String,
}

/// Region geometry after validation.
enum Restriction<'a> {
    Mask(&'a str),
    Area(RegionRect),
}

fn restriction(region: &RegionPrompt) -> Result<Restriction<'_>, CoreError> {
    match (&region.mask_file, &region.coordinates) {
        (Some(mask), None) => Ok(Restriction::Mask(mask)),
        (None, Some(rect)) => Ok(Restriction::Area(*rect)),
        (Some(_), Some(_)) => Err(CoreError::Validation(format!(
            "region `{}` sets both a mask file and coordinates",
            region.keyword
        ))),
        (None, None) => Err(CoreError::Validation(format!(
            "region `{}` needs a mask file or coordinates",
            region.keyword
        ))),
    }
}

fn trace_positive(graph: &WorkflowGraph, sampler: &str) -> Result<ConditioningSink, CoreError> {
    let mut consumer = sampler.to_string();
    let mut input = "positive".to_string();

    // A chain longer than the graph must contain a cycle.
    for _ in 0..=graph.len() {
        let link = graph
            .node(&consumer)
            .and_then(|n| n.link(&input))
            .ok_or_else(|| {
                CoreError::InvalidGraph(format!("input `{input}` of node {consumer} is not linked"))
            })?;
        let upstream = graph.node(&link.node).ok_or_else(|| {
            CoreError::InvalidGraph(format!("node {consumer} links to missing node {}", link.node))
        })?;

        match upstream.kind() {
            NodeKind::TextEncode => {
                return Ok(ConditioningSink {
                    base: link.node.clone(),
                    consumer,
                    input,
                })
            }
            NodeKind::ControlNetApplyAdvanced => {
                consumer = link.node.clone();
                input = "positive".to_string();
            }
            NodeKind::ControlNetApply => {
                consumer = link.node.clone();
                input = "conditioning".to_string();
            }
            _ => {
                return Err(CoreError::InvalidGraph(format!(
                    "unsupported node `{}` in positive conditioning chain",
                    upstream.class_type
                )))
            }
        }
    }

    Err(CoreError::InvalidGraph(
        "positive conditioning chain does not terminate".into(),
    ))
}

/// Return a copy of `graph` with each region prompt folded into the
/// positive conditioning, left to right.
pub fn attach_regions(
    graph: &WorkflowGraph,
    regions: &[RegionPrompt],
) -> Result<WorkflowGraph, CoreError> {
    let restrictions = regions
        .iter()
        .map(restriction)
        .collect::<Result<Vec<_>, _>>()?;

    let mut out = graph.clone();
    if regions.is_empty() {
        return Ok(out);
    }

    let sampler = out.find_sampler()?;
    let sink = trace_positive(&out, &sampler)?;
    let clip = out
        .node(&sink.base)
        .and_then(|n| n.link("clip"))
        .cloned()
        .ok_or_else(|| {
            CoreError::InvalidGraph(format!("text encoder {} has no linked clip", sink.base))
        })?;
    let mut running = out
        .node(&sink.consumer)
        .and_then(|n| n.link(&sink.input))
        .cloned()
        .ok_or_else(|| CoreError::InvalidGraph("positive conditioning is not linked".into()))?;

    for (region, restriction) in regions.iter().zip(restrictions) {
        let encode = out.add_node(
            Node::new(CLIP_TEXT_ENCODE_CLASS)
                .with_title(format!("Region Prompt - {}", region.keyword))
                .with_input("text", json!(region.prompt))
                .with_input("clip", clip.clone()),
        );

        let restricted = match restriction {
            Restriction::Mask(mask_file) => {
                let image = out.add_node(
                    Node::new(LOAD_IMAGE_CLASS)
                        .with_title(format!("Region Mask - {}", region.keyword))
                        .with_input("image", json!(mask_file)),
                );
                let mask = out.add_node(
                    Node::new(IMAGE_TO_MASK_CLASS)
                        .with_input("image", Link::new(&image, 0))
                        .with_input("channel", json!(MASK_CHANNEL)),
                );
                out.add_node(
                    Node::new(CONDITIONING_SET_MASK_CLASS)
                        .with_input("conditioning", Link::new(&encode, 0))
                        .with_input("mask", Link::new(&mask, 0))
                        .with_input("strength", json!(REGION_STRENGTH))
                        .with_input("set_cond_area", json!("default")),
                )
            }
            Restriction::Area(rect) => out.add_node(
                Node::new(CONDITIONING_SET_AREA_CLASS)
                    .with_input("conditioning", Link::new(&encode, 0))
                    .with_input("width", json!(rect.width))
                    .with_input("height", json!(rect.height))
                    .with_input("x", json!(rect.x))
                    .with_input("y", json!(rect.y))
                    .with_input("strength", json!(REGION_STRENGTH)),
            ),
        };

        let combine = out.add_node(
            Node::new(CONDITIONING_COMBINE_CLASS)
                .with_input("conditioning_1", running)
                .with_input("conditioning_2", Link::new(&restricted, 0)),
        );
        running = Link::new(combine, 0);
    }

    let consumer = out.node_mut(&sink.consumer).ok_or_else(|| {
        CoreError::InvalidGraph(format!("conditioning consumer {} disappeared", sink.consumer))
    })?;
    consumer.inputs.insert(sink.input, Input::Link(running));
    Ok(out)
}
