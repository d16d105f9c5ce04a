use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;

use crate::defaults;
use crate::error::{Error, Result};
use crate::paths;
use crate::utils::io;

/// Resolved project configuration: flat keys to JSON values.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Config {
    values: BTreeMap<String, Value>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(map: Map<String, Value>) -> Self {
        Self {
            values: map.into_iter().collect(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        self.values.insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// Overlay `other` on top of this config; `other` wins on conflicts.
    pub fn merge(&mut self, other: Config) {
        self.values.extend(other.values);
    }

    fn require(&self, key: &str) -> Result<&Value> {
        self.values
            .get(key)
            .ok_or_else(|| Error::config_missing_key(key, None))
    }

    pub fn get_str(&self, key: &str) -> Result<&str> {
        let value = self.require(key)?;
        value
            .as_str()
            .ok_or_else(|| invalid(key, value, "expected a string"))
    }

    pub fn get_bool(&self, key: &str) -> Result<bool> {
        let value = self.require(key)?;
        value
            .as_bool()
            .ok_or_else(|| invalid(key, value, "expected true or false"))
    }

    pub fn get_u64(&self, key: &str) -> Result<u64> {
        let value = self.require(key)?;
        value
            .as_u64()
            .ok_or_else(|| invalid(key, value, "expected a non-negative integer"))
    }

    pub fn get_list(&self, key: &str) -> Result<Vec<String>> {
        let value = self.require(key)?;
        let items = value
            .as_array()
            .ok_or_else(|| invalid(key, value, "expected a list of strings"))?;
        items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| invalid(key, value, "expected a list of strings"))
            })
            .collect()
    }
}

fn invalid(key: &str, value: &Value, problem: &str) -> Error {
    Error::config_invalid_value(key, Some(value.to_string()), problem)
}

/// Source of resolved configuration for a project root.
pub trait ConfigLoader {
    /// Full configuration; the user file must exist.
    fn load(&self, root: &Path) -> Result<Config>;

    /// Defaults overlaid by user values; a missing user file yields defaults.
    fn load_full(&self, root: &Path) -> Result<Config>;

    /// User values only.
    fn load_minimal(&self, root: &Path) -> Result<Config>;
}

/// Reads `<root>/config.json`, a flat JSON object.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonConfigLoader;

impl JsonConfigLoader {
    fn read_user(path: &Path) -> Result<Option<Config>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = io::read_file(path, "read config")?;
        let value: Value = serde_json::from_str(&content)
            .map_err(|e| Error::config_invalid_json(path.display().to_string(), e))?;
        match value {
            Value::Object(map) => Ok(Some(Config::from_map(map))),
            other => Err(Error::config_invalid_value(
                "config.json",
                Some(other.to_string()),
                "top level must be an object",
            )),
        }
    }
}

impl ConfigLoader for JsonConfigLoader {
    fn load(&self, root: &Path) -> Result<Config> {
        let path = paths::config_file(root);
        let user = Self::read_user(&path)?.ok_or_else(|| {
            Error::config_missing_key("config.json", Some(path.display().to_string()))
                .with_hint(format!("Create {} first", path.display()))
        })?;
        let mut config = Config::from_map(defaults::values());
        config.merge(user);
        Ok(config)
    }

    fn load_full(&self, root: &Path) -> Result<Config> {
        let mut config = Config::from_map(defaults::values());
        if let Some(user) = Self::read_user(&paths::config_file(root))? {
            config.merge(user);
        }
        Ok(config)
    }

    fn load_minimal(&self, root: &Path) -> Result<Config> {
        Ok(Self::read_user(&paths::config_file(root))?.unwrap_or_default())
    }
}
