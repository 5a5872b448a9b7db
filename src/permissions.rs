//! Per-server command allow-list.
//!
//! Loaded once at startup from a JSON file and never mutated afterwards.
//! Servers that are not listed may run nothing.

use crate::error::ConfigLoadError;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::info;

#[derive(Debug, Default, Deserialize)]
struct ServerEntry {
    #[serde(default)]
    allowed_commands: Vec<String>,
}

#[derive(Debug, Default)]
pub struct PermissionStore {
    servers: HashMap<String, Vec<String>>,
}

impl PermissionStore {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigLoadError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| ConfigLoadError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let store = Self::from_json(&raw).map_err(|source| ConfigLoadError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        info!(
            target: "events",
            "Loaded command permissions for {} server(s) from {}",
            store.servers.len(),
            path.display()
        );
        Ok(store)
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        let parsed: HashMap<String, ServerEntry> = serde_json::from_str(raw)?;
        let servers = parsed
            .into_iter()
            .map(|(server, entry)| {
                // keep first occurrence order, drop repeats
                let mut commands: Vec<String> = Vec::with_capacity(entry.allowed_commands.len());
                for name in entry.allowed_commands {
                    if !commands.contains(&name) {
                        commands.push(name);
                    }
                }
                (server, commands)
            })
            .collect();
        Ok(Self { servers })
    }

    pub fn is_allowed(&self, server_id: &str, command: &str) -> bool {
        self.servers
            .get(server_id)
            .is_some_and(|allowed| allowed.iter().any(|name| name == command))
    }

    /// Commands outside a server (DMs) are never allowed.
    pub fn is_allowed_in(&self, guild_id: Option<u64>, command: &str) -> bool {
        match guild_id {
            Some(id) => self.is_allowed(&id.to_string(), command),
            None => false,
        }
    }

    pub fn allowed_commands(&self, server_id: &str) -> &[String] {
        self.servers
            .get(server_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"{
        "111": { "allowed_commands": ["ping", "hello", "help", "ping"] },
        "222": { "allowed_commands": [] },
        "333": {}
    }"#;

    #[test]
    fn unknown_servers_allow_nothing() {
        let store = PermissionStore::from_json(SAMPLE).unwrap();
        for command in ["ping", "hello", "help", "anything"] {
            assert!(!store.is_allowed("999", command));
            assert!(!store.is_allowed("", command));
        }
        assert!(!store.is_allowed_in(None, "ping"));
    }

    #[test]
    fn listed_commands_are_allowed_per_server() {
        let store = PermissionStore::from_json(SAMPLE).unwrap();
        assert!(store.is_allowed("111", "ping"));
        assert!(store.is_allowed_in(Some(111), "help"));
        assert!(!store.is_allowed("111", "shutdown"));
        assert!(!store.is_allowed("222", "ping"));
        assert!(!store.is_allowed("333", "ping"));
    }

    #[test]
    fn duplicate_entries_are_collapsed_in_order() {
        let store = PermissionStore::from_json(SAMPLE).unwrap();
        assert_eq!(store.allowed_commands("111"), ["ping", "hello", "help"]);
        assert!(store.allowed_commands("999").is_empty());
    }

    #[test]
    fn load_reports_missing_and_malformed_files() {
        let dir = tempfile::tempdir().unwrap();

        let missing = PermissionStore::load(dir.path().join("servers.json"));
        assert!(matches!(missing, Err(ConfigLoadError::Read { .. })));

        let broken_path = dir.path().join("broken.json");
        let mut broken = fs::File::create(&broken_path).unwrap();
        broken.write_all(b"{ \"111\": [").unwrap();
        let malformed = PermissionStore::load(&broken_path);
        assert!(matches!(malformed, Err(ConfigLoadError::Parse { .. })));

        let good_path = dir.path().join("good.json");
        fs::write(&good_path, SAMPLE).unwrap();
        let store = PermissionStore::load(&good_path).unwrap();
        assert!(store.is_allowed("111", "hello"));
    }
}
