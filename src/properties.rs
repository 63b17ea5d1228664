//! Structure-preserving editing of `key=value` files such as
//! `server.properties` and `eula.txt`.
//!
//! A file is held as an ordered list of [`PropertyLine`]s. Writing it back
//! reproduces every line verbatim except the values that were explicitly
//! updated. Keys that are not already present are never appended.

use std::{collections::HashMap, path::Path};

use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::error::PropertiesError;

#[cfg(windows)]
pub const LINE_ENDING: &str = "\r\n";
#[cfg(not(windows))]
pub const LINE_ENDING: &str = "\n";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyLine {
    Comment(String),
    KeyValue { key: String, value: String },
    /// Blank or unrecognised; written back untouched.
    Opaque(String),
}

/// A key/value pair as exchanged with the UI.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Property {
    pub key: String,
    pub value: String,
}

impl Property {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

impl PropertyLine {
    fn from_line(line: &str) -> Self {
        if line.starts_with('#') {
            return PropertyLine::Comment(line.to_string());
        }

        match line.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() && !key.trim_start().starts_with('#') => {
                PropertyLine::KeyValue {
                    key: key.to_string(),
                    value: value.to_string(),
                }
            }
            _ => PropertyLine::Opaque(line.to_string()),
        }
    }

    /// The key as used for lookups: surrounding whitespace is not significant.
    pub fn key(&self) -> Option<&str> {
        match self {
            PropertyLine::KeyValue { key, .. } => Some(key.trim()),
            _ => None,
        }
    }
}

pub fn parse(text: &str) -> Vec<PropertyLine> {
    text.replace("\r\n", "\n")
        .split('\n')
        .map(PropertyLine::from_line)
        .collect()
}

/// Replaces values in place for keys present in `updates`.
pub fn apply(lines: &[PropertyLine], updates: &HashMap<String, String>) -> Vec<PropertyLine> {
    lines
        .iter()
        .map(|line| match line {
            PropertyLine::KeyValue { key, .. } => match updates.get(key.trim()) {
                Some(value) => PropertyLine::KeyValue {
                    key: key.clone(),
                    value: value.clone(),
                },
                None => line.clone(),
            },
            other => other.clone(),
        })
        .collect()
}

pub fn serialize(lines: &[PropertyLine]) -> String {
    lines
        .iter()
        .map(|line| match line {
            PropertyLine::Comment(raw) | PropertyLine::Opaque(raw) => raw.clone(),
            PropertyLine::KeyValue { key, value } => format!("{key}={value}"),
        })
        .collect::<Vec<_>>()
        .join(LINE_ENDING)
}

/// The key/value lines only, in file order.
pub fn pairs(lines: &[PropertyLine]) -> Vec<Property> {
    lines
        .iter()
        .filter_map(|line| match line {
            PropertyLine::KeyValue { key, value } => Some(Property::new(key.trim(), value.clone())),
            _ => None,
        })
        .collect()
}

/// `Ok(None)` when the file does not exist yet.
pub async fn load(path: &Path) -> Result<Option<Vec<PropertyLine>>, PropertiesError> {
    match fs::read_to_string(path).await {
        Ok(content) => Ok(Some(parse(&content))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(PropertiesError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        }),
    }
}

pub async fn store(path: &Path, lines: &[PropertyLine]) -> Result<(), PropertiesError> {
    fs::write(path, serialize(lines))
        .await
        .map_err(|e| PropertiesError::Write {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
}

/// Flips `eula=false` to `eula=true`, keeping the rest of the file intact.
/// A missing file is created with just the accepted flag.
pub async fn accept_eula(path: &Path) -> Result<(), PropertiesError> {
    let lines = match load(path).await? {
        Some(lines) => {
            let updates = HashMap::from([("eula".to_string(), "true".to_string())]);
            apply(&lines, &updates)
        }
        None => vec![PropertyLine::KeyValue {
            key: "eula".to_string(),
            value: "true".to_string(),
        }],
    };
    store(path, &lines).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_are_tagged_by_shape() {
        let lines = parse("#Minecraft server properties\n\nmotd=A = B\n=nokey\nfoo\n  #x=1");
        assert_eq!(
            lines,
            vec![
                PropertyLine::Comment("#Minecraft server properties".to_string()),
                PropertyLine::Opaque(String::new()),
                PropertyLine::KeyValue {
                    key: "motd".to_string(),
                    value: "A = B".to_string()
                },
                PropertyLine::Opaque("=nokey".to_string()),
                PropertyLine::Opaque("foo".to_string()),
                PropertyLine::Opaque("  #x=1".to_string()),
            ]
        );
    }

    #[test]
    fn no_op_update_round_trips() {
        let text = [
            "#Minecraft server properties",
            "#Mon Jan 01 00:00:00 UTC 2024",
            "enable-jmx-monitoring=false",
            "",
            "  spaced = value ",
            "level-seed=",
            "garbage line",
            "",
        ]
        .join(LINE_ENDING);
        let out = serialize(&apply(&parse(&text), &HashMap::new()));
        assert_eq!(out, text);
    }

    #[test]
    fn selective_update_keeps_order_and_comments() {
        let updates = HashMap::from([("a".to_string(), "9".to_string())]);
        let out = apply(&parse("#c\na=1\nb=2"), &updates);
        assert_eq!(serialize(&out), ["#c", "a=9", "b=2"].join(LINE_ENDING));
    }

    #[test]
    fn unknown_keys_are_not_appended() {
        let updates = HashMap::from([("new-key".to_string(), "x".to_string())]);
        let out = apply(&parse("a=1"), &updates);
        assert_eq!(out, parse("a=1"));
    }

    #[test]
    fn lookup_ignores_padding_around_keys() {
        let updates = HashMap::from([("spaced".to_string(), "v2".to_string())]);
        let out = apply(&parse(" spaced =v1"), &updates);
        assert_eq!(serialize(&out), " spaced =v2");
        assert_eq!(pairs(&out), vec![Property::new("spaced", "v2")]);
    }

    #[tokio::test]
    async fn eula_flag_is_flipped_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("eula.txt");
        std::fs::write(&path, "#By changing the setting below to TRUE...\n#date\neula=false\n").unwrap();

        accept_eula(&path).await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            content,
            ["#By changing the setting below to TRUE...", "#date", "eula=true", ""].join(LINE_ENDING)
        );
    }

    #[tokio::test]
    async fn missing_eula_file_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("eula.txt");
        accept_eula(&path).await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "eula=true");
    }

    #[tokio::test]
    async fn missing_file_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(load(&dir.path().join("server.properties")).await.unwrap(), None);
    }
}
