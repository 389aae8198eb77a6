//! Item and rule definition loading.
//!
//! Item files are `items*.toml` with `[[item]]` tables, rule files are
//! `rules*.toml` with `[[rule]]` tables, both read from the definitions
//! directory in file name order.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use itemhub_domain::error::HubError;
use itemhub_domain::item::{Item, ItemDefinition, ItemStore};
use itemhub_domain::rule::Rule;
use itemhub_domain::time::Timestamp;

#[derive(Debug, Default, Deserialize)]
struct ItemFile {
    #[serde(default, rename = "item")]
    items: Vec<ItemDefinition>,
}

#[derive(Debug, Default, Deserialize)]
struct RuleFile {
    #[serde(default, rename = "rule")]
    rules: Vec<Rule>,
}

/// Errors that abort startup (or a rule reload).
#[derive(Debug, thiserror::Error)]
pub enum DefinitionError {
    #[error("failed to read {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid definition in {}", path.display())]
    Invalid {
        path: PathBuf,
        #[source]
        source: HubError,
    },
}

/// Build the item store from every item file in `dir`.
///
/// # Errors
///
/// Returns [`DefinitionError`] on unreadable or unparsable files, invalid
/// items and duplicate item names.
pub fn load_items(dir: &Path, now: Timestamp) -> Result<ItemStore, DefinitionError> {
    let mut store = ItemStore::new();
    for path in definition_files(dir, "items")? {
        let file: ItemFile = read_toml(&path)?;
        for definition in file.items {
            Item::from_definition(definition, now)
                .and_then(|item| store.add_item(item))
                .map_err(|source| DefinitionError::Invalid {
                    path: path.clone(),
                    source,
                })?;
        }
    }
    tracing::info!(items = store.len(), dir = %dir.display(), "loaded items");
    Ok(store)
}

/// Read and validate every rule file in `dir`.
///
/// # Errors
///
/// Returns [`DefinitionError`] on unreadable or unparsable files and
/// invalid rules.
pub fn load_rules(dir: &Path) -> Result<Vec<Rule>, DefinitionError> {
    let mut rules = Vec::new();
    for path in definition_files(dir, "rules")? {
        let file: RuleFile = read_toml(&path)?;
        for rule in file.rules {
            rule.validate().map_err(|source| DefinitionError::Invalid {
                path: path.clone(),
                source,
            })?;
            rules.push(rule);
        }
    }
    tracing::info!(rules = rules.len(), dir = %dir.display(), "loaded rules");
    Ok(rules)
}

fn read_toml<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, DefinitionError> {
    let content = std::fs::read_to_string(path).map_err(|source| DefinitionError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&content).map_err(|source| DefinitionError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn definition_files(dir: &Path, prefix: &str) -> Result<Vec<PathBuf>, DefinitionError> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!(dir = %dir.display(), "definitions directory not found");
            return Ok(Vec::new());
        }
        Err(source) => {
            return Err(DefinitionError::Io {
                path: dir.to_path_buf(),
                source,
            });
        }
    };

    let mut files = Vec::new();
    for entry in entries {
        let path = entry
            .map_err(|source| DefinitionError::Io {
                path: dir.to_path_buf(),
                source,
            })?
            .path();
        let matches = path.is_file()
            && path.extension().is_some_and(|ext| ext == "toml")
            && path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .is_some_and(|stem| stem.starts_with(prefix));
        if matches {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use itemhub_domain::time;
    use tempfile::TempDir;

    fn write(dir: &TempDir, file: &str, content: &str) {
        std::fs::write(dir.path().join(file), content).unwrap();
    }

    const ITEMS: &str = r#"
        [[item]]
        name = "lamp"
        type = "switch"
        input = { channel = "virtual", device = "lamp-1" }
        output = { channel = "virtual", device = "lamp-1" }

        [[item]]
        name = "log_item"
        type = "text"
    "#;

    const RULES: &str = r#"
        [[rule]]
        name = "lamp on"

        [rule.trigger]
        items = [{ item_id = "lamp", to = "ON" }]

        [[rule.action]]
        service = "set_item"
        item_id = "log_item"
        value = "triggered"
    "#;

    #[test]
    fn should_load_items_from_all_item_files() {
        let dir = TempDir::new().unwrap();
        write(&dir, "items.toml", ITEMS);
        write(
            &dir,
            "items_extra.toml",
            "[[item]]\nname = \"temp\"\ntype = \"number\"\n",
        );
        write(&dir, "notes.toml", "this is not toml {{");

        let store = load_items(dir.path(), time::now()).unwrap();

        assert_eq!(store.len(), 3);
        assert!(store.get_item("temp").is_some());
        assert_eq!(store.items_with_input("virtual").len(), 1);
    }

    #[test]
    fn should_fail_when_item_names_collide_across_files() {
        let dir = TempDir::new().unwrap();
        write(&dir, "items_a.toml", ITEMS);
        write(&dir, "items_b.toml", "[[item]]\nname = \"lamp\"\ntype = \"switch\"\n");

        let err = load_items(dir.path(), time::now()).unwrap_err();

        assert!(matches!(
            err,
            DefinitionError::Invalid {
                source: HubError::DuplicateItem(_),
                ..
            }
        ));
    }

    #[test]
    fn should_load_and_validate_rules() {
        let dir = TempDir::new().unwrap();
        write(&dir, "rules.toml", RULES);

        let rules = load_rules(dir.path()).unwrap();

        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].name, "lamp on");
    }

    #[test]
    fn should_fail_when_rule_file_does_not_parse() {
        let dir = TempDir::new().unwrap();
        write(&dir, "rules.toml", "[[rule]\nname = ");

        assert!(matches!(
            load_rules(dir.path()),
            Err(DefinitionError::Parse { .. })
        ));
    }

    #[test]
    fn should_fail_when_rule_schedule_is_invalid() {
        let dir = TempDir::new().unwrap();
        write(
            &dir,
            "rules.toml",
            r#"
            [[rule]]
            name = "bad"
            trigger = { time = "* * * *" }

            [[rule.action]]
            service = "log"
            message = "never"
            "#,
        );

        assert!(matches!(
            load_rules(dir.path()),
            Err(DefinitionError::Invalid { .. })
        ));
    }

    #[test]
    fn should_return_nothing_when_directory_is_missing() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("missing");
        assert!(load_rules(&missing).unwrap().is_empty());
        assert!(load_items(&missing, time::now()).unwrap().is_empty());
    }
}
