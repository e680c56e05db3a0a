//! Reference and structural validation of a parsed command.
//!
//! Every unknown code name is collected before failing, so the caller gets
//! the full list in one [`CoreError::Reference`]. Structural problems are
//! checked only once all references resolve.

use std::collections::{BTreeSet, HashMap};

use bowl_core::command::{GroupRef, GroupSelection, ItemFilter, ParsedCommand, RegionBranch};
use bowl_core::error::CoreError;
use bowl_db::models::group::Group;
use bowl_db::models::server::Server;
use bowl_db::models::template::{Fixer, Generator};

use crate::error::PipelineResult;
use crate::store::AssetCatalog;

/// Everything a command names, resolved against the catalog.
#[derive(Debug, Clone)]
pub struct ResolvedRefs {
    pub server: Server,
    pub generator: Generator,
    /// In chain order.
    pub fixers: Vec<Fixer>,
    /// Every group named anywhere in the command, by code name.
    pub groups: HashMap<String, Group>,
}

impl ResolvedRefs {
    pub fn group(&self, code_name: &str) -> Result<&Group, CoreError> {
        self.groups
            .get(code_name)
            .ok_or_else(|| CoreError::Reference(vec![format!("Unknown group `{code_name}`")]))
    }
}

/// Resolve every reference in `command`, then check its structure.
pub async fn validate_command(
    command: &ParsedCommand,
    catalog: &dyn AssetCatalog,
) -> PipelineResult<ResolvedRefs> {
    let mut errors: Vec<String> = Vec::new();

    let server = catalog.find_server(&command.server_code_name).await?;
    if server.is_none() {
        errors.push(format!("Unknown server `{}`", command.server_code_name));
    }

    let generator = catalog.find_generator(&command.generator_code_name).await?;
    if generator.is_none() {
        errors.push(format!("Unknown generator `{}`", command.generator_code_name));
    }

    let mut fixers = Vec::with_capacity(command.fixers.len());
    for code_name in &command.fixers {
        match catalog.find_fixer(code_name).await? {
            Some(fixer) => fixers.push(fixer),
            None => errors.push(format!("Unknown fixer `{code_name}`")),
        }
    }

    let mut groups: HashMap<String, Group> = HashMap::new();
    let mut refs: Vec<&GroupRef> = Vec::new();
    let mut region_groups: Vec<&str> = Vec::new();
    collect_refs(&command.group_selections, &mut refs, &mut region_groups);

    for code_name in region_groups {
        resolve_group(catalog, code_name, &mut groups, &mut errors).await?;
    }
    for group_ref in refs {
        let Some(group) =
            resolve_group(catalog, &group_ref.group_code_name, &mut groups, &mut errors).await?
        else {
            continue;
        };
        let named = group_ref.filter.named_items();
        if named.is_empty() {
            continue;
        }
        let known: BTreeSet<String> = catalog
            .list_items(group.id, &ItemFilter::All)
            .await?
            .into_iter()
            .map(|i| i.code_name)
            .collect();
        for item in named {
            if !known.contains(item) {
                errors.push(format!(
                    "Unknown item `{item}` in group `{}`",
                    group_ref.group_code_name
                ));
            }
        }
    }

    let (Some(server), Some(generator)) = (server, generator) else {
        return Err(CoreError::Reference(errors).into());
    };
    if !errors.is_empty() {
        return Err(CoreError::Reference(errors).into());
    }

    check_structure(command)?;
    let refs = ResolvedRefs {
        server,
        generator,
        fixers,
        groups,
    };
    check_region_keywords(command, &refs, catalog).await?;
    Ok(refs)
}

async fn resolve_group(
    catalog: &dyn AssetCatalog,
    code_name: &str,
    groups: &mut HashMap<String, Group>,
    errors: &mut Vec<String>,
) -> PipelineResult<Option<Group>> {
    if let Some(group) = groups.get(code_name) {
        return Ok(Some(group.clone()));
    }
    match catalog.find_group(code_name).await? {
        Some(group) => {
            groups.insert(code_name.to_string(), group.clone());
            Ok(Some(group))
        }
        None => {
            let message = format!("Unknown group `{code_name}`");
            if !errors.contains(&message) {
                errors.push(message);
            }
            Ok(None)
        }
    }
}

fn collect_refs<'a>(
    selections: &'a [GroupSelection],
    refs: &mut Vec<&'a GroupRef>,
    region_groups: &mut Vec<&'a str>,
) {
    for selection in selections {
        match selection {
            GroupSelection::Region {
                group_code_name,
                branches,
            } => {
                region_groups.push(group_code_name);
                for branch in branches {
                    collect_refs(&branch.selections, refs, region_groups);
                }
            }
            other => refs.extend(other.group_refs()),
        }
    }
}

fn check_structure(command: &ParsedCommand) -> Result<(), CoreError> {
    if command.region_selection_count() > 1 {
        return Err(CoreError::Validation(
            "only one region-coded selection is allowed per command".into(),
        ));
    }
    for branch in region_branches(command) {
        if branch.selections.iter().any(GroupSelection::is_region) {
            return Err(CoreError::Validation(format!(
                "region `{}` contains a nested region-coded selection",
                branch.keyword
            )));
        }
    }
    Ok(())
}

fn region_branches(command: &ParsedCommand) -> impl Iterator<Item = &RegionBranch> {
    command
        .group_selections
        .iter()
        .filter_map(|s| match s {
            GroupSelection::Region { branches, .. } => Some(branches.iter()),
            _ => None,
        })
        .flatten()
}

/// Every layout item of the region group must define exactly the
/// command's keywords.
async fn check_region_keywords(
    command: &ParsedCommand,
    refs: &ResolvedRefs,
    catalog: &dyn AssetCatalog,
) -> PipelineResult<()> {
    let Some(GroupSelection::Region {
        group_code_name,
        branches,
    }) = command.group_selections.iter().find(|s| s.is_region())
    else {
        return Ok(());
    };

    let requested: BTreeSet<&str> = branches.iter().map(|b| b.keyword.as_str()).collect();
    let group = refs.group(group_code_name)?;

    for layout in catalog.list_items(group.id, &ItemFilter::All).await? {
        let available: BTreeSet<&str> = layout.regions.iter().map(|r| r.keyword.as_str()).collect();
        if available == requested {
            continue;
        }
        let missing: Vec<&str> = requested.difference(&available).copied().collect();
        let extra: Vec<&str> = available.difference(&requested).copied().collect();
        return Err(CoreError::Validation(format!(
            "layout `{}` in group `{group_code_name}` does not match the requested regions \
             (missing: [{}], extra: [{}])",
            layout.code_name,
            missing.join(", "),
            extra.join(", "),
        ))
        .into());
    }
    Ok(())
}
