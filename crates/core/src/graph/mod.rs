//! Typed model of a ComfyUI API-format workflow graph.
//!
//! A workflow is a map of node id to node record. Any input whose value is
//! a two-element `[node_id, output_slot]` array is an edge and is parsed
//! into [`Input::Link`]; everything else stays a literal [`serde_json::Value`].
//! Unknown node fields and `_meta` entries are preserved on round-trip.
//!
//! The injectors in [`lora`], [`ip_adapter`] and [`region`] each take a
//! graph by reference and return a new one. They rewire only the edges
//! they enumerate through [`WorkflowGraph::consumers`].

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoreError;

pub mod ip_adapter;
pub mod lora;
pub mod region;

pub use ip_adapter::attach_ip_adapters;
pub use lora::attach_loras;
pub use region::attach_regions;

// ---------------------------------------------------------------------------
// ComfyUI node class types
// ---------------------------------------------------------------------------

/// Substring shared by all combined (model + clip + vae) loaders.
pub const CHECKPOINT_LOADER_MARKER: &str = "CheckpointLoader";

/// Diffusion-model-only loader used by split architectures.
pub const UNET_LOADER_CLASS: &str = "UNETLoader";

pub const KSAMPLER_CLASS: &str = "KSampler";

pub const KSAMPLER_ADVANCED_CLASS: &str = "KSamplerAdvanced";

pub const CLIP_TEXT_ENCODE_CLASS: &str = "CLIPTextEncode";

pub const LOAD_IMAGE_CLASS: &str = "LoadImage";

pub const LORA_LOADER_CLASS: &str = "LoraLoader";

pub const LORA_MODEL_ONLY_CLASS: &str = "LoraLoaderModelOnly";

pub const CONTROLNET_APPLY_CLASS: &str = "ControlNetApply";

pub const CONTROLNET_APPLY_ADVANCED_CLASS: &str = "ControlNetApplyAdvanced";

/// Node kinds the injectors care about. Everything else is [`NodeKind::Other`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    CheckpointLoader,
    UnetLoader,
    Sampler,
    TextEncode,
    ControlNetApply,
    ControlNetApplyAdvanced,
    LoadImage,
    LoraLoader,
    Other,
}

impl NodeKind {
    pub fn of(class_type: &str) -> Self {
        match class_type {
            KSAMPLER_CLASS | KSAMPLER_ADVANCED_CLASS => NodeKind::Sampler,
            CLIP_TEXT_ENCODE_CLASS => NodeKind::TextEncode,
            CONTROLNET_APPLY_CLASS => NodeKind::ControlNetApply,
            CONTROLNET_APPLY_ADVANCED_CLASS => NodeKind::ControlNetApplyAdvanced,
            LOAD_IMAGE_CLASS => NodeKind::LoadImage,
            UNET_LOADER_CLASS => NodeKind::UnetLoader,
            LORA_LOADER_CLASS | LORA_MODEL_ONLY_CLASS => NodeKind::LoraLoader,
            other if other.contains(CHECKPOINT_LOADER_MARKER) => NodeKind::CheckpointLoader,
            _ => NodeKind::Other,
        }
    }
}

// ---------------------------------------------------------------------------
// Edges and inputs
// ---------------------------------------------------------------------------

/// Reference to one output slot of a node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Link {
    pub node: String,
    pub slot: u32,
}

impl Link {
    pub fn new(node: impl Into<String>, slot: u32) -> Self {
        Self {
            node: node.into(),
            slot,
        }
    }
}

/// A directed edge: `from` feeds input `input` of node `to`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    pub from: Link,
    pub to: String,
    pub input: String,
}

/// A node input: either an edge or a literal widget value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Value", into = "Value")]
pub enum Input {
    Link(Link),
    Value(Value),
}

impl From<Value> for Input {
    fn from(value: Value) -> Self {
        if let Value::Array(items) = &value {
            if let [node, slot] = items.as_slice() {
                let node = match node {
                    Value::String(id) => Some(id.clone()),
                    Value::Number(n) if n.is_u64() => Some(n.to_string()),
                    _ => None,
                };
                let slot = slot.as_u64().and_then(|s| u32::try_from(s).ok());
                if let (Some(node), Some(slot)) = (node, slot) {
                    return Input::Link(Link { node, slot });
                }
            }
        }
        Input::Value(value)
    }
}

impl From<Input> for Value {
    fn from(input: Input) -> Self {
        match input {
            Input::Link(link) => Value::Array(vec![Value::String(link.node), link.slot.into()]),
            Input::Value(value) => value,
        }
    }
}

impl From<Link> for Input {
    fn from(link: Link) -> Self {
        Input::Link(link)
    }
}

// ---------------------------------------------------------------------------
// Nodes
// ---------------------------------------------------------------------------

/// The `_meta` block ComfyUI attaches to nodes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeMeta {
    #[serde(default)]
    pub title: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub class_type: String,
    #[serde(default)]
    pub inputs: IndexMap<String, Input>,
    #[serde(rename = "_meta", default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<NodeMeta>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl Node {
    pub fn new(class_type: impl Into<String>) -> Self {
        Self {
            class_type: class_type.into(),
            inputs: IndexMap::new(),
            meta: None,
            extra: serde_json::Map::new(),
        }
    }

    pub fn with_input(mut self, name: &str, input: impl Into<Input>) -> Self {
        self.inputs.insert(name.to_string(), input.into());
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.meta = Some(NodeMeta {
            title: title.into(),
            extra: serde_json::Map::new(),
        });
        self
    }

    pub fn kind(&self) -> NodeKind {
        NodeKind::of(&self.class_type)
    }

    pub fn title(&self) -> Option<&str> {
        self.meta.as_ref().map(|m| m.title.as_str())
    }

    /// The edge feeding `input`, if that input is linked.
    pub fn link(&self, input: &str) -> Option<&Link> {
        match self.inputs.get(input) {
            Some(Input::Link(link)) => Some(link),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Graph
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowGraph {
    nodes: IndexMap<String, Node>,
}

impl WorkflowGraph {
    pub fn from_json(value: &Value) -> Result<Self, CoreError> {
        serde_json::from_value(value.clone())
            .map_err(|e| CoreError::InvalidGraph(format!("malformed workflow JSON: {e}")))
    }

    pub fn to_json(&self) -> Result<Value, CoreError> {
        serde_json::to_value(self)
            .map_err(|e| CoreError::Internal(format!("failed to serialize workflow: {e}")))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn node_mut(&mut self, id: &str) -> Option<&mut Node> {
        self.nodes.get_mut(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = (&str, &Node)> {
        self.nodes.iter().map(|(id, node)| (id.as_str(), node))
    }

    /// One past the largest numeric node id, skipping any id already taken.
    pub fn next_node_id(&self) -> String {
        let max = self
            .nodes
            .keys()
            .filter_map(|id| id.parse::<u64>().ok())
            .max()
            .unwrap_or(0);
        let mut next = max + 1;
        while self.nodes.contains_key(&next.to_string()) {
            next += 1;
        }
        next.to_string()
    }

    /// Insert a node under a fresh id and return that id.
    pub fn add_node(&mut self, node: Node) -> String {
        let id = self.next_node_id();
        self.nodes.insert(id.clone(), node);
        id
    }

    /// Every linked input in the graph.
    pub fn edges(&self) -> Vec<Edge> {
        self.nodes
            .iter()
            .flat_map(|(id, node)| {
                node.inputs.iter().filter_map(move |(input, value)| match value {
                    Input::Link(link) => Some(Edge {
                        from: link.clone(),
                        to: id.clone(),
                        input: input.clone(),
                    }),
                    Input::Value(_) => None,
                })
            })
            .collect()
    }

    /// Edges reading output `slot` of node `source`.
    pub fn consumers(&self, source: &str, slot: u32) -> Vec<Edge> {
        self.edges()
            .into_iter()
            .filter(|e| e.from.node == source && e.from.slot == slot)
            .collect()
    }

    /// Point each listed edge's target input at `to`.
    pub fn redirect(&mut self, edges: &[Edge], to: &Link) {
        for edge in edges {
            if let Some(node) = self.nodes.get_mut(&edge.to) {
                node.inputs.insert(edge.input.clone(), Input::Link(to.clone()));
            }
        }
    }

    /// First node (in template order) of the given kind.
    pub fn find_kind(&self, kind: NodeKind) -> Option<&str> {
        self.nodes
            .iter()
            .find(|(_, node)| node.kind() == kind)
            .map(|(id, _)| id.as_str())
    }

    /// The sampler node every injection anchors on.
    pub fn find_sampler(&self) -> Result<String, CoreError> {
        self.find_kind(NodeKind::Sampler)
            .map(str::to_string)
            .ok_or_else(|| CoreError::InvalidGraph("no sampler node found".into()))
    }

    /// Set `input` on every node whose `_meta.title` equals `title`.
    ///
    /// Returns the number of nodes updated; zero matches is an error.
    pub fn set_titled_input(
        &mut self,
        title: &str,
        input: &str,
        value: Value,
    ) -> Result<usize, CoreError> {
        let mut updated = 0;
        for node in self.nodes.values_mut() {
            if node.title() == Some(title) {
                node.inputs.insert(input.to_string(), Input::Value(value.clone()));
                updated += 1;
            }
        }
        if updated == 0 {
            return Err(CoreError::InvalidGraph(format!("no node titled `{title}`")));
        }
        Ok(updated)
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use serde_json::json;

    use super::WorkflowGraph;

    /// Minimal SD1.5 text-to-image graph with a combined checkpoint loader.
    pub(crate) fn checkpoint_graph() -> WorkflowGraph {
        WorkflowGraph::from_json(&json!({
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
        }))
        .expect("fixture graph parses")
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::fixtures::checkpoint_graph;
    use super::*;

    #[test]
    fn links_and_literals_are_distinguished() {
        let graph = checkpoint_graph();
        let sampler = graph.node("3").unwrap();
        assert_eq!(sampler.link("model"), Some(&Link::new("4", 0)));
        assert_matches!(sampler.inputs.get("seed"), Some(Input::Value(v)) if v == &json!(42));
        assert_eq!(sampler.kind(), NodeKind::Sampler);
    }

    #[test]
    fn numeric_link_ids_are_normalized() {
        let graph = WorkflowGraph::from_json(&json!({
            "1": { "class_type": "VAEDecode", "inputs": { "vae": [2, 2] } }
        }))
        .unwrap();
        assert_eq!(graph.node("1").unwrap().link("vae"), Some(&Link::new("2", 2)));
    }

    #[test]
    fn serialization_preserves_meta_and_unknown_fields() {
        let raw = json!({
            "6": {
                "class_type": "CLIPTextEncode",
                "inputs": { "text": "hi", "clip": ["4", 1] },
                "_meta": { "title": "Positive Prompt", "color": "#335" },
                "is_changed": ["abc"]
            }
        });
        let graph = WorkflowGraph::from_json(&raw).unwrap();
        assert_eq!(graph.to_json().unwrap(), raw);
    }

    #[test]
    fn next_id_skips_past_largest_numeric_id() {
        let graph = WorkflowGraph::from_json(&json!({
            "3": { "class_type": "A", "inputs": {} },
            "10": { "class_type": "B", "inputs": {} },
            "sampler": { "class_type": "C", "inputs": {} }
        }))
        .unwrap();
        assert_eq!(graph.next_node_id(), "11");
    }

    #[test]
    fn next_id_starts_at_one_without_numeric_ids() {
        assert_eq!(WorkflowGraph::default().next_node_id(), "1");
    }

    #[test]
    fn consumers_are_scoped_to_one_output_slot() {
        let graph = checkpoint_graph();
        let clip_users: Vec<_> = graph.consumers("4", 1).into_iter().map(|e| e.to).collect();
        assert_eq!(clip_users, vec!["6", "7"]);
        let vae_users = graph.consumers("4", 2);
        assert_eq!(vae_users.len(), 1);
        assert_eq!(vae_users[0].input, "vae");
    }

    #[test]
    fn set_titled_input_updates_matching_node() {
        let mut graph = checkpoint_graph();
        let updated = graph
            .set_titled_input("Positive Prompt", "text", json!("a castle"))
            .unwrap();
        assert_eq!(updated, 1);
        assert_matches!(
            graph.node("6").unwrap().inputs.get("text"),
            Some(Input::Value(v)) if v == &json!("a castle")
        );
    }

    #[test]
    fn set_titled_input_without_match_is_invalid_graph() {
        let mut graph = checkpoint_graph();
        assert_matches!(
            graph.set_titled_input("Missing", "text", json!("x")),
            Err(CoreError::InvalidGraph(_))
        );
    }

    #[test]
    fn find_sampler_reports_missing_sampler() {
        assert_matches!(
            WorkflowGraph::default().find_sampler(),
            Err(CoreError::InvalidGraph(_))
        );
    }
}
