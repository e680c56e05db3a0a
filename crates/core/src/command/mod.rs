//! The command language: `server -$ generator : <groups> [> fixer]*`.
//!
//! [`parse`] turns command text into an immutable [`ParsedCommand`]. The
//! parsed value is also what gets persisted as a command's `command_json`.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

mod parser;

pub use parser::parse;

/// Item filter attached to one group reference.
///
/// Include-only and exclude are mutually exclusive by construction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "items", rename_all = "snake_case")]
pub enum ItemFilter {
    #[default]
    All,
    IncludeOnly(Vec<String>),
    Exclude(BTreeSet<String>),
}

impl ItemFilter {
    /// Whether an item with this code name passes the filter.
    pub fn admits(&self, code_name: &str) -> bool {
        match self {
            ItemFilter::All => true,
            ItemFilter::IncludeOnly(names) => names.iter().any(|n| n == code_name),
            ItemFilter::Exclude(names) => !names.contains(code_name),
        }
    }

    /// Item code names mentioned by the filter, for reference checks.
    pub fn named_items(&self) -> Vec<&str> {
        match self {
            ItemFilter::All => Vec::new(),
            ItemFilter::IncludeOnly(names) => names.iter().map(String::as_str).collect(),
            ItemFilter::Exclude(names) => names.iter().map(String::as_str).collect(),
        }
    }
}

/// A group named by code name plus its item filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupRef {
    pub group_code_name: String,
    #[serde(default)]
    pub filter: ItemFilter,
}

/// One keyword of a region-coded selection and the selections feeding it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionBranch {
    pub keyword: String,
    pub selections: Vec<GroupSelection>,
}

/// One ` x `-separated factor of a command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GroupSelection {
    /// `name`, `name(a, b)` or `name(~a, ~b)`.
    Single(GroupRef),
    /// `a and b(x) and c(~y)`: the groups' items are unioned.
    Merged { groups: Vec<GroupRef> },
    /// `layouts{left: knights x poses, right: mages}`.
    Region {
        group_code_name: String,
        branches: Vec<RegionBranch>,
    },
}

impl GroupSelection {
    pub fn is_merged(&self) -> bool {
        matches!(self, GroupSelection::Merged { .. })
    }

    pub fn is_region(&self) -> bool {
        matches!(self, GroupSelection::Region { .. })
    }

    /// Display name; merged selections join their group names with `+`.
    pub fn code_name(&self) -> String {
        match self {
            GroupSelection::Single(group) => group.group_code_name.clone(),
            GroupSelection::Merged { groups } => groups
                .iter()
                .map(|g| g.group_code_name.as_str())
                .collect::<Vec<_>>()
                .join("+"),
            GroupSelection::Region {
                group_code_name, ..
            } => group_code_name.clone(),
        }
    }

    /// Include-only list of a single-group selection.
    pub fn include_only(&self) -> Option<&[String]> {
        match self {
            GroupSelection::Single(GroupRef {
                filter: ItemFilter::IncludeOnly(names),
                ..
            }) => Some(names),
            _ => None,
        }
    }

    /// Exclude set of a single-group selection.
    pub fn exclude(&self) -> Option<&BTreeSet<String>> {
        match self {
            GroupSelection::Single(GroupRef {
                filter: ItemFilter::Exclude(names),
                ..
            }) => Some(names),
            _ => None,
        }
    }

    /// Group references resolved directly by this selection. Region
    /// branches are not included.
    pub fn group_refs(&self) -> Vec<&GroupRef> {
        match self {
            GroupSelection::Single(group) => vec![group],
            GroupSelection::Merged { groups } => groups.iter().collect(),
            GroupSelection::Region { .. } => Vec::new(),
        }
    }
}

/// A fully parsed command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedCommand {
    pub server_code_name: String,
    pub generator_code_name: String,
    pub group_selections: Vec<GroupSelection>,
    /// Post-processing chain, applied in order.
    #[serde(default)]
    pub fixers: Vec<String>,
}

impl ParsedCommand {
    /// Number of top-level region-coded selections.
    pub fn region_selection_count(&self) -> usize {
        self.group_selections.iter().filter(|s| s.is_region()).count()
    }
}
