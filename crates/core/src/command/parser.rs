//! Depth-aware, left-to-right parser for command text.
//!
//! Whitespace runs are collapsed first, so ` x `, ` and ` and ` > ` are
//! matched as literal tokens. Every split tracks `()`/`{}` nesting and only
//! cuts at depth zero; there is no backtracking.

use std::sync::LazyLock;

use regex::Regex;

use super::{GroupRef, GroupSelection, ItemFilter, ParsedCommand, RegionBranch};
use crate::error::CoreError;

/// `server -$ generator : rest`
const HEADER_PATTERN: &str = r"^(\w+)\s*-\$\s*(\w+)\s*:\s*(.+)$";

static HEADER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(HEADER_PATTERN).expect("valid regex"));

static NAME_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\w+$").expect("valid regex"));

static ITEM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\w-]+$").expect("valid regex"));

const PRODUCT_SEP: &str = " x ";
const MERGE_SEP: &str = " and ";
const FIXER_SEP: &str = " > ";
const REGION_SEP: &str = ",";
const EXCLUDE_MARK: char = '~';

/// Parse command text into a [`ParsedCommand`].
///
/// Fails with [`CoreError::Syntax`] carrying the original text when the
/// command does not follow the grammar.
pub fn parse(text: &str) -> Result<ParsedCommand, CoreError> {
    let normalized = text.split_whitespace().collect::<Vec<_>>().join(" ");

    let caps = HEADER_RE
        .captures(&normalized)
        .ok_or_else(|| CoreError::syntax(text, "expected `server -$ generator : groups`"))?;
    let server_code_name = caps[1].to_string();
    let generator_code_name = caps[2].to_string();
    let body = caps.get(3).map_or("", |m| m.as_str());

    let stages = split_top_level(body, FIXER_SEP, text)?;
    let (groups_expr, fixer_exprs) = stages
        .split_first()
        .ok_or_else(|| CoreError::syntax(text, "missing group expression"))?;

    let fixers = fixer_exprs
        .iter()
        .map(|f| {
            let f = f.trim();
            if NAME_RE.is_match(f) {
                Ok(f.to_string())
            } else {
                Err(CoreError::syntax(text, format!("invalid fixer name `{f}`")))
            }
        })
        .collect::<Result<Vec<_>, _>>()?;

    let group_selections = parse_expression(groups_expr, text)?;

    Ok(ParsedCommand {
        server_code_name,
        generator_code_name,
        group_selections,
        fixers,
    })
}

// ---------------------------------------------------------------------------
// Expressions
// ---------------------------------------------------------------------------

fn parse_expression(expr: &str, text: &str) -> Result<Vec<GroupSelection>, CoreError> {
    let expr = expr.trim();
    if expr.is_empty() {
        return Err(CoreError::syntax(text, "empty group expression"));
    }
    split_top_level(expr, PRODUCT_SEP, text)?
        .into_iter()
        .map(|factor| parse_factor(factor.trim(), text))
        .collect()
}

fn parse_factor(factor: &str, text: &str) -> Result<GroupSelection, CoreError> {
    if factor.is_empty() {
        return Err(CoreError::syntax(text, "empty factor between ` x ` operators"));
    }

    if let Some(open) = factor.find('{') {
        return parse_region(factor, open, text);
    }

    let conjuncts = split_top_level(factor, MERGE_SEP, text)?;
    if conjuncts.len() > 1 {
        let groups = conjuncts
            .into_iter()
            .map(|c| parse_group_ref(c, text))
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(GroupSelection::Merged { groups });
    }

    parse_group_ref(factor, text).map(GroupSelection::Single)
}

fn parse_region(factor: &str, open: usize, text: &str) -> Result<GroupSelection, CoreError> {
    let name = factor[..open].trim();
    if !NAME_RE.is_match(name) {
        return Err(CoreError::syntax(text, format!("invalid group name `{name}`")));
    }
    let inner = factor[open + 1..]
        .strip_suffix('}')
        .ok_or_else(|| CoreError::syntax(text, format!("region selection `{name}` must end with `}}`")))?;

    let mut branches: Vec<RegionBranch> = Vec::new();
    for entry in split_top_level(inner, REGION_SEP, text)? {
        let (keyword, sub_expr) = entry.split_once(':').ok_or_else(|| {
            CoreError::syntax(text, format!("region entry `{}` must be `keyword: expression`", entry.trim()))
        })?;
        let keyword = keyword.trim();
        if !NAME_RE.is_match(keyword) {
            return Err(CoreError::syntax(text, format!("invalid region keyword `{keyword}`")));
        }
        if branches.iter().any(|b| b.keyword == keyword) {
            return Err(CoreError::syntax(text, format!("duplicate region keyword `{keyword}`")));
        }
        branches.push(RegionBranch {
            keyword: keyword.to_string(),
            selections: parse_expression(sub_expr, text)?,
        });
    }

    Ok(GroupSelection::Region {
        group_code_name: name.to_string(),
        branches,
    })
}

fn parse_group_ref(expr: &str, text: &str) -> Result<GroupRef, CoreError> {
    let expr = expr.trim();
    let Some(open) = expr.find('(') else {
        if !NAME_RE.is_match(expr) {
            return Err(CoreError::syntax(text, format!("invalid group name `{expr}`")));
        }
        return Ok(GroupRef {
            group_code_name: expr.to_string(),
            filter: ItemFilter::All,
        });
    };

    let name = expr[..open].trim();
    if !NAME_RE.is_match(name) {
        return Err(CoreError::syntax(text, format!("invalid group name `{name}`")));
    }
    let inner = expr[open + 1..]
        .strip_suffix(')')
        .ok_or_else(|| CoreError::syntax(text, format!("item list of `{name}` must end with `)`")))?;
    if inner.contains(['(', ')', '{', '}']) {
        return Err(CoreError::syntax(text, format!("nested brackets in item list of `{name}`")));
    }

    let tokens: Vec<&str> = inner.split(',').map(str::trim).collect();
    let exclude = tokens.first().is_some_and(|t| t.starts_with(EXCLUDE_MARK));

    let mut names = Vec::with_capacity(tokens.len());
    for token in tokens {
        if !exclude && token.starts_with(EXCLUDE_MARK) {
            return Err(CoreError::syntax(
                text,
                format!("`~` must prefix the first item of `{name}` to exclude"),
            ));
        }
        let item = token.trim_start_matches(EXCLUDE_MARK).trim();
        if !ITEM_RE.is_match(item) {
            return Err(CoreError::syntax(text, format!("invalid item name `{item}` in `{name}`")));
        }
        names.push(item.to_string());
    }

    let filter = if exclude {
        ItemFilter::Exclude(names.into_iter().collect())
    } else {
        ItemFilter::IncludeOnly(names)
    };

    Ok(GroupRef {
        group_code_name: name.to_string(),
        filter,
    })
}

// ---------------------------------------------------------------------------
// Depth-aware splitting
// ---------------------------------------------------------------------------

/// Split `expr` on `sep` wherever bracket depth is zero.
///
/// Mismatched or unclosed brackets are syntax errors. `sep` must start
/// with an ASCII byte so every cut lands on a char boundary.
fn split_top_level<'a>(expr: &'a str, sep: &str, text: &str) -> Result<Vec<&'a str>, CoreError> {
    let bytes = expr.as_bytes();
    let sep = sep.as_bytes();
    let mut open: Vec<u8> = Vec::new();
    let mut parts = Vec::new();
    let mut start = 0;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'(' | b'{' => open.push(bytes[i]),
            b')' => {
                if open.pop() != Some(b'(') {
                    return Err(CoreError::syntax(text, "unbalanced `)`"));
                }
            }
            b'}' => {
                if open.pop() != Some(b'{') {
                    return Err(CoreError::syntax(text, "unbalanced `}`"));
                }
            }
            _ if open.is_empty() && bytes[i..].starts_with(sep) => {
                parts.push(&expr[start..i]);
                i += sep.len();
                start = i;
                continue;
            }
            _ => {}
        }
        i += 1;
    }

    if !open.is_empty() {
        return Err(CoreError::syntax(text, "unclosed bracket"));
    }
    parts.push(&expr[start..]);
    Ok(parts)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn product_with_exclude_and_include_filters() {
        let cmd = parse("srv -$ gen: characters x poses(~jumping) x emotions(sad)").unwrap();

        assert_eq!(cmd.server_code_name, "srv");
        assert_eq!(cmd.generator_code_name, "gen");
        assert_eq!(cmd.group_selections.len(), 3);
        assert_eq!(cmd.group_selections[0].code_name(), "characters");
        assert!(cmd.group_selections[0].include_only().is_none());

        let excluded = cmd.group_selections[1].exclude().unwrap();
        assert_eq!(excluded.len(), 1);
        assert!(excluded.contains("jumping"));

        assert_eq!(
            cmd.group_selections[2].include_only(),
            Some(&["sad".to_string()][..])
        );
        assert!(cmd.fixers.is_empty());
    }

    #[test]
    fn merged_selection_with_fixer_chain() {
        let cmd = parse("srv -$ gen: a and b(x) > f1 > f2").unwrap();

        assert_eq!(cmd.group_selections.len(), 1);
        let selection = &cmd.group_selections[0];
        assert!(selection.is_merged());
        assert_eq!(selection.code_name(), "a+b");

        let refs = selection.group_refs();
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].filter, ItemFilter::All);
        assert_eq!(refs[1].filter, ItemFilter::IncludeOnly(vec!["x".into()]));
        assert_eq!(cmd.fixers, vec!["f1", "f2"]);
    }

    #[test]
    fn collapses_whitespace_runs() {
        let cmd =
            parse("server   -$ workflow_anime:   character x  poses(~jumping) x emotions(sad)")
                .unwrap();
        assert_eq!(cmd.generator_code_name, "workflow_anime");
        assert_eq!(cmd.group_selections.len(), 3);
    }

    #[test]
    fn space_before_item_list_is_accepted() {
        let cmd = parse("srv -$ gen: characters (alice, bob)").unwrap();
        assert_eq!(
            cmd.group_selections[0].include_only(),
            Some(&["alice".to_string(), "bob".to_string()][..])
        );
    }

    #[test]
    fn exclude_marker_applies_to_whole_list() {
        let cmd = parse("srv -$ gen: poses(~sit, ~stand)").unwrap();
        let excluded = cmd.group_selections[0].exclude().unwrap();
        assert_eq!(excluded.len(), 2);
        assert!(excluded.contains("sit") && excluded.contains("stand"));
    }

    #[test]
    fn region_selection_keeps_nested_product_inside_braces() {
        let cmd = parse(
            "srv -$ gen: styles x scene{left: knights x poses(sit), right: mages and elves(~old)}",
        )
        .unwrap();

        assert_eq!(cmd.group_selections.len(), 2);
        assert_eq!(cmd.region_selection_count(), 1);

        let GroupSelection::Region {
            group_code_name,
            branches,
        } = &cmd.group_selections[1]
        else {
            panic!("expected region selection");
        };
        assert_eq!(group_code_name, "scene");
        assert_eq!(branches.len(), 2);
        assert_eq!(branches[0].keyword, "left");
        assert_eq!(branches[0].selections.len(), 2);
        assert_eq!(branches[1].keyword, "right");
        assert_eq!(branches[1].selections.len(), 1);
        assert!(branches[1].selections[0].is_merged());
    }

    #[test]
    fn region_followed_by_fixer() {
        let cmd = parse("srv -$ gen: scene{a: knights, b: mages} x poses > upscale").unwrap();
        assert_eq!(cmd.group_selections.len(), 2);
        assert_eq!(cmd.fixers, vec!["upscale"]);
    }

    #[test]
    fn parsed_command_survives_json_storage() {
        let cmd = parse("srv -$ gen: a(~x) x scene{l: b and c(y)} > fix").unwrap();
        let stored = serde_json::to_value(&cmd).unwrap();
        let restored: ParsedCommand = serde_json::from_value(stored).unwrap();
        assert_eq!(restored, cmd);
    }

    #[test]
    fn missing_header_is_syntax_error() {
        let err = parse("characters x poses").unwrap_err();
        assert_matches!(err, CoreError::Syntax { ref text, .. } if text == "characters x poses");
    }

    #[test]
    fn unbalanced_brackets_are_syntax_errors() {
        assert_matches!(parse("srv -$ gen: poses(sit"), Err(CoreError::Syntax { .. }));
        assert_matches!(parse("srv -$ gen: scene{a: b"), Err(CoreError::Syntax { .. }));
        assert_matches!(parse("srv -$ gen: poses)"), Err(CoreError::Syntax { .. }));
    }

    #[test]
    fn empty_item_list_is_syntax_error() {
        assert_matches!(parse("srv -$ gen: poses()"), Err(CoreError::Syntax { .. }));
    }

    #[test]
    fn dangling_product_operator_is_syntax_error() {
        assert_matches!(parse("srv -$ gen: poses x"), Err(CoreError::Syntax { .. }));
        assert_matches!(parse("srv -$ gen: x poses"), Err(CoreError::Syntax { .. }));
    }

    #[test]
    fn misplaced_exclude_marker_is_syntax_error() {
        assert_matches!(parse("srv -$ gen: poses(sit, ~stand)"), Err(CoreError::Syntax { .. }));
    }

    #[test]
    fn duplicate_region_keyword_is_syntax_error() {
        assert_matches!(
            parse("srv -$ gen: scene{a: knights, a: mages}"),
            Err(CoreError::Syntax { .. })
        );
    }

    #[test]
    fn invalid_fixer_is_syntax_error() {
        assert_matches!(parse("srv -$ gen: poses > "), Err(CoreError::Syntax { .. }));
    }
}
