//! Derives a job's prompts and conditioning from its contributing items.
//!
//! Used both when a command expands and when a job is reloaded, so a job
//! is always reconstructible from its `(group_id, item_id, slot)` list.

use bowl_core::descriptors::{IpAdapterSpec, LoraSpec, RegionPrompt};
use bowl_db::models::item::Item;
use bowl_db::models::job::{ItemSlot, JobRefresh};

const FRAGMENT_SEPARATOR: &str = ", ";

/// One item's contribution to a job.
#[derive(Debug, Clone, Copy)]
pub struct Contribution<'a> {
    pub slot: &'a ItemSlot,
    pub item: &'a Item,
}

/// Join non-empty, trimmed prompt fragments.
pub fn join_fragments<'a>(fragments: impl IntoIterator<Item = &'a str>) -> String {
    fragments
        .into_iter()
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .collect::<Vec<_>>()
        .join(FRAGMENT_SEPARATOR)
}

/// Build the catalog-derived content of a job.
///
/// Main prompts come from base and layout items in order. Each region
/// keyword's prompt comes from its own items; their negatives join the
/// main negative. Region geometry is taken from the layout item, and
/// keywords the layout no longer defines are dropped.
pub fn assemble(contributions: &[Contribution<'_>]) -> JobRefresh {
    let is_main = |c: &&Contribution<'_>| matches!(c.slot, ItemSlot::Base | ItemSlot::Layout);

    let positive_prompt = join_fragments(
        contributions
            .iter()
            .filter(is_main)
            .map(|c| c.item.positive_prompt.as_str()),
    );
    let negative_prompt = join_fragments(
        contributions
            .iter()
            .filter(is_main)
            .chain(contributions.iter().filter(|c| !is_main(c)))
            .map(|c| c.item.negative_prompt.as_str()),
    );

    let layout = contributions
        .iter()
        .find(|c| matches!(c.slot, ItemSlot::Layout))
        .map(|c| c.item);

    let mut keywords: Vec<&str> = Vec::new();
    for c in contributions {
        if let ItemSlot::Region { keyword } = c.slot {
            if !keywords.contains(&keyword.as_str()) {
                keywords.push(keyword);
            }
        }
    }

    let mut region_prompts = Vec::with_capacity(keywords.len());
    for keyword in keywords {
        let area = layout.and_then(|l| l.regions.iter().find(|r| r.keyword == keyword));
        let Some(area) = area else {
            tracing::warn!(keyword, "Layout does not define region, dropping its prompt");
            continue;
        };
        let prompt = join_fragments(contributions.iter().filter_map(|c| match c.slot {
            ItemSlot::Region { keyword: k } if k == keyword => Some(c.item.positive_prompt.as_str()),
            _ => None,
        }));
        region_prompts.push(RegionPrompt::from_area(area, prompt));
    }

    let mut loras: Vec<LoraSpec> = Vec::new();
    let mut ip_adapters: Vec<IpAdapterSpec> = Vec::new();
    let mut control_image = None;
    for c in contributions {
        if let Some(lora) = &c.item.lora {
            if !loras.iter().any(|l| l.name == lora.name) {
                loras.push(lora.clone());
            }
        }
        if let Some(adapter) = &c.item.ip_adapter {
            if !ip_adapters.iter().any(|a| a.image_file == adapter.image_file) {
                ip_adapters.push(adapter.clone());
            }
        }
        if let Some(image) = &c.item.control_image {
            control_image = Some(image.clone());
        }
    }

    JobRefresh {
        positive_prompt,
        negative_prompt,
        control_image,
        loras,
        ip_adapters,
        region_prompts,
    }
}
