//! The combinatorial expansion engine.
//!
//! Every top-level selection contributes one *option list*: plain and
//! merged selections offer one option per resolved item; the region-coded
//! selection offers one option per (layout, keyword combination). The jobs
//! are the Cartesian product of those lists in declaration order, so an
//! empty list anywhere collapses the batch to zero jobs.

use std::collections::HashSet;
use std::path::Path;

use bowl_core::command::{GroupSelection, ItemFilter, ParsedCommand};
use bowl_core::naming::{fixer_result_path, ResultName};
use bowl_db::models::command::CommandRecord;
use bowl_db::models::item::Item;
use bowl_db::models::job::{GroupItemRef, ItemSlot, Job, JobRefresh, NewJob};
use itertools::Itertools;

use crate::assembly::{assemble, Contribution};
use crate::error::PipelineResult;
use crate::store::AssetCatalog;
use crate::validation::{validate_command, ResolvedRefs};

/// Items one option contributes, with the slot each fills.
type SlottedItems = Vec<(ItemSlot, Item)>;

/// Jobs produced by one run of a command, parents before children.
#[derive(Debug, Clone, Default)]
pub struct Expansion {
    pub jobs: Vec<NewJob>,
    /// Number of primary (generator) jobs.
    pub primaries: usize,
}

impl Expansion {
    pub fn produced(&self) -> usize {
        self.jobs.len()
    }
}

/// Cartesian product that yields one empty combination for zero lists.
fn product<T: Clone>(lists: Vec<Vec<T>>) -> Vec<Vec<T>> {
    if lists.is_empty() {
        return vec![Vec::new()];
    }
    lists.into_iter().multi_cartesian_product().collect()
}

/// Expand a stored command into new jobs.
///
/// Validation runs first; nothing is produced unless every reference
/// resolves and the command is structurally consistent.
pub async fn expand(
    command: &ParsedCommand,
    record: &CommandRecord,
    catalog: &dyn AssetCatalog,
    results_dir: &Path,
) -> PipelineResult<Expansion> {
    let refs = validate_command(command, catalog).await?;

    let mut option_lists: Vec<Vec<SlottedItems>> = Vec::with_capacity(command.group_selections.len());
    for selection in &command.group_selections {
        option_lists.push(selection_options(selection, &refs, catalog).await?);
    }

    let fixer_key = (!command.fixers.is_empty()).then(|| format!("fixers={}", command.fixers.join(">")));

    let mut jobs: Vec<NewJob> = Vec::new();
    for combination in product(option_lists) {
        let slotted: Vec<&(ItemSlot, Item)> = combination.iter().flatten().collect();
        let contributions: Vec<Contribution<'_>> = slotted
            .iter()
            .map(|(slot, item)| Contribution { slot, item })
            .collect();
        let content = assemble(&contributions);

        let group_items: Vec<GroupItemRef> = slotted
            .iter()
            .map(|(slot, item)| GroupItemRef::new(item.group_id, item.id, slot.clone()))
            .collect();
        let mut identity: Vec<String> = group_items.iter().map(GroupItemRef::identity).collect();
        identity.extend(fixer_key.clone());

        let result_path = ResultName {
            server: &refs.server.code_name,
            generator: &refs.generator.code_name,
            command_id: record.id,
            code_names: slotted.iter().map(|(_, item)| item.code_name.as_str()).collect(),
            identity,
        }
        .path_in(results_dir);

        jobs.push(NewJob {
            project_id: record.project_id,
            command_id: record.id,
            group_items,
            server_code_name: refs.server.code_name.clone(),
            server_host: refs.server.host.clone(),
            generator_code_name: Some(refs.generator.code_name.clone()),
            positive_prompt: content.positive_prompt,
            negative_prompt: content.negative_prompt,
            control_image: content.control_image,
            loras: content.loras,
            ip_adapters: content.ip_adapters,
            region_prompts: content.region_prompts,
            result_path: result_path.to_string_lossy().into_owned(),
            ..Default::default()
        });
    }

    let primaries = jobs.len();
    for (stage, fixer) in refs.fixers.iter().enumerate() {
        for index in 0..primaries {
            let parent_index = stage * primaries + index;
            let parent = &jobs[parent_index];
            let result_path = fixer_result_path(Path::new(&parent.result_path), &fixer.code_name);
            let job = NewJob {
                project_id: record.project_id,
                command_id: record.id,
                group_items: parent.group_items.clone(),
                server_code_name: parent.server_code_name.clone(),
                server_host: parent.server_host.clone(),
                fixer_code_name: Some(fixer.code_name.clone()),
                parent: Some(parent_index),
                source_image: Some(parent.result_path.clone()),
                result_path: result_path.to_string_lossy().into_owned(),
                ..Default::default()
            };
            jobs.push(job);
        }
    }

    tracing::info!(
        command_id = record.id,
        primaries,
        produced = jobs.len(),
        "Expanded command",
    );
    Ok(Expansion { jobs, primaries })
}

/// Option list of one top-level selection.
async fn selection_options(
    selection: &GroupSelection,
    refs: &ResolvedRefs,
    catalog: &dyn AssetCatalog,
) -> PipelineResult<Vec<SlottedItems>> {
    let GroupSelection::Region {
        group_code_name,
        branches,
    } = selection
    else {
        let items = resolve_items(selection, refs, catalog).await?;
        return Ok(items
            .into_iter()
            .map(|item| vec![(ItemSlot::Base, item)])
            .collect());
    };

    let layout_group = refs.group(group_code_name)?;
    let layouts: Vec<SlottedItems> = catalog
        .list_items(layout_group.id, &ItemFilter::All)
        .await?
        .into_iter()
        .map(|item| vec![(ItemSlot::Layout, item)])
        .collect();

    let mut lists = vec![layouts];
    for branch in branches {
        let slot = ItemSlot::Region {
            keyword: branch.keyword.clone(),
        };
        let mut factors: Vec<Vec<Item>> = Vec::with_capacity(branch.selections.len());
        for sub in &branch.selections {
            factors.push(resolve_items(sub, refs, catalog).await?);
        }
        lists.push(
            product(factors)
                .into_iter()
                .map(|items| items.into_iter().map(|item| (slot.clone(), item)).collect())
                .collect(),
        );
    }

    Ok(product(lists)
        .into_iter()
        .map(|parts| parts.into_iter().flatten().collect())
        .collect())
}

/// Items of a plain or merged selection, de-duplicated by id.
async fn resolve_items(
    selection: &GroupSelection,
    refs: &ResolvedRefs,
    catalog: &dyn AssetCatalog,
) -> PipelineResult<Vec<Item>> {
    let mut seen: HashSet<i64> = HashSet::new();
    let mut items = Vec::new();
    for group_ref in selection.group_refs() {
        let group = refs.group(&group_ref.group_code_name)?;
        for item in catalog.list_items(group.id, &group_ref.filter).await? {
            if seen.insert(item.id) {
                items.push(item);
            }
        }
    }
    Ok(items)
}

/// Re-derive a job's catalog content from its current item state.
///
/// Items deleted since expansion are skipped. Fixer jobs carry no
/// catalog content of their own.
pub async fn rederive(job: &Job, catalog: &dyn AssetCatalog) -> PipelineResult<JobRefresh> {
    if job.is_fixer() {
        return Ok(JobRefresh::default());
    }

    let mut found: Vec<(&ItemSlot, Item)> = Vec::with_capacity(job.group_items.len());
    for entry in &job.group_items {
        match catalog.find_item(entry.item_id).await? {
            Some(item) => found.push((&entry.slot, item)),
            None => tracing::warn!(
                job_id = job.id,
                item_id = entry.item_id,
                "Item no longer exists, skipping on reload",
            ),
        }
    }

    let contributions: Vec<Contribution<'_>> = found
        .iter()
        .map(|(slot, item)| Contribution { slot: *slot, item })
        .collect();
    Ok(assemble(&contributions))
}
