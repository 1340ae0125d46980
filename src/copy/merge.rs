//! Merge functions for copy rules that must not clobber hand-edited files.

use crate::config::MergeStrategy;
use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;
use thiserror::Error;
use toml_edit::{DocumentMut, Item, Table, TableLike};

#[derive(Error, Debug)]
pub enum MergeError {
    #[error("invalid TOML in {side} manifest: {message}")]
    InvalidToml { side: &'static str, message: String },
}

static GEM_VERSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*\w+\.version[ \t]*=.*$").expect("gem version regex")
});

static GEM_HOMEPAGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*\w+\.homepage[ \t]*=.*$").expect("gem homepage regex")
});

static GEM_DEPENDENCY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?m)^[ \t]*\w+\.add_(?:runtime_|development_)?dependency[ \t]*\(?[ \t]*["']([^"']+)["'].*$"#,
    )
    .expect("gem dependency regex")
});

static GEM_END: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^end[ \t]*$").expect("gem end regex"));

/// Dependency table names; unioned at the top level and under every
/// `target.<platform>` table.
const DEPENDENCY_KINDS: [&str; 3] = ["dependencies", "dev-dependencies", "build-dependencies"];

/// Combine freshly generated `source` with the existing `dest`.
pub fn merge(strategy: MergeStrategy, source: &str, dest: &str) -> Result<String, MergeError> {
    match strategy {
        MergeStrategy::Overwrite => Ok(source.to_string()),
        MergeStrategy::Gemspec => Ok(merge_gemspec(source, dest)),
        MergeStrategy::Toml => merge_toml(source, dest),
    }
}

/// Merge a Ruby gemspec.
///
/// The generated gemspec wins, except that the destination's version and
/// homepage are kept and dependencies declared only in the destination are
/// carried over after the last generated dependency.
pub fn merge_gemspec(source: &str, dest: &str) -> String {
    let mut merged = source.to_string();

    for field in [&*GEM_VERSION, &*GEM_HOMEPAGE] {
        let generated = field.find(&merged).map(|m| m.range());
        if let (Some(kept), Some(range)) = (field.find(dest), generated) {
            merged.replace_range(range, kept.as_str());
        }
    }

    let declared: HashSet<&str> = GEM_DEPENDENCY
        .captures_iter(&merged)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
        .collect();

    let mut carried = String::new();
    let mut carried_names = HashSet::new();
    for caps in GEM_DEPENDENCY.captures_iter(dest) {
        let name = &caps[1];
        if declared.contains(name) || !carried_names.insert(name.to_string()) {
            continue;
        }
        carried.push('\n');
        carried.push_str(&caps[0]);
    }
    if carried.is_empty() {
        return merged;
    }

    match GEM_DEPENDENCY.find_iter(&merged).last().map(|m| m.end()) {
        Some(at) => merged.insert_str(at, &carried),
        None => {
            // No generated dependencies: put the block on its own lines
            // before the closing `end`
            let block = format!("{}\n", carried.trim_start_matches('\n'));
            match GEM_END.find_iter(&merged).last().map(|m| m.start()) {
                Some(at) => merged.insert_str(at, &block),
                None => {
                    if !merged.is_empty() && !merged.ends_with('\n') {
                        merged.push('\n');
                    }
                    merged.push_str(&block);
                }
            }
        }
    }
    merged
}

/// Merge a TOML manifest: generated keys win, destination-only dependency
/// entries survive.
pub fn merge_toml(source: &str, dest: &str) -> Result<String, MergeError> {
    let mut merged = source
        .parse::<DocumentMut>()
        .map_err(|e| MergeError::InvalidToml {
            side: "generated",
            message: e.to_string(),
        })?;
    let existing = dest
        .parse::<DocumentMut>()
        .map_err(|e| MergeError::InvalidToml {
            side: "destination",
            message: e.to_string(),
        })?;

    let mut paths: Vec<Vec<&str>> = DEPENDENCY_KINDS.iter().map(|kind| vec![*kind]).collect();
    paths.push(vec!["workspace", "dependencies"]);
    if let Some(targets) = table_like(existing.as_table(), &["target"]) {
        for (platform, _) in targets.iter() {
            for kind in DEPENDENCY_KINDS {
                paths.push(vec!["target", platform, kind]);
            }
        }
    }

    for path in &paths {
        let Some(kept) = table_like(existing.as_table(), path) else {
            continue;
        };

        let generated = table_like(merged.as_table(), path);
        let missing: Vec<(String, Item)> = kept
            .iter()
            .filter(|(key, _)| !generated.is_some_and(|table| table.contains_key(key)))
            .map(|(key, item)| (key.to_string(), item.clone()))
            .collect();
        if missing.is_empty() {
            continue;
        }

        let Some(target) = table_like_mut(merged.as_table_mut(), path) else {
            continue;
        };
        for (key, item) in missing {
            target.insert(&key, item);
        }
    }

    Ok(merged.to_string())
}

fn table_like<'a>(root: &'a Table, path: &[&str]) -> Option<&'a dyn TableLike> {
    let mut current: &dyn TableLike = root;
    for key in path {
        current = current.get(key)?.as_table_like()?;
    }
    Some(current)
}

/// Walk to the table at `path`, creating missing segments. Created parents
/// are implicit so no empty `[workspace]` or `[target]` header is emitted.
fn table_like_mut<'a>(root: &'a mut Table, path: &[&str]) -> Option<&'a mut dyn TableLike> {
    let mut current: &mut dyn TableLike = root;
    for (idx, key) in path.iter().enumerate() {
        if !current.contains_key(key) {
            let mut table = Table::new();
            table.set_implicit(idx + 1 < path.len());
            current.insert(key, Item::Table(table));
        }
        current = current.get_mut(key)?.as_table_like_mut()?;
    }
    Some(current)
}
