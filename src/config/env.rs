// pgbackup/src/config/env.rs
use std::collections::HashMap;
use std::str::FromStr;

use crate::errors::{BackupError, Result};

/// Read-only view over key/value settings.
///
/// Production reads the process environment; tests hand in a map.
pub struct Env<'a> {
    lookup: Box<dyn Fn(&str) -> Option<String> + 'a>,
}

impl<'a> Env<'a> {
    pub fn process() -> Self {
        Self {
            lookup: Box::new(|key| std::env::var(key).ok()),
        }
    }

    pub fn from_map(vars: &'a HashMap<String, String>) -> Self {
        Self {
            lookup: Box::new(move |key| vars.get(key).cloned()),
        }
    }

    /// Raw value, with empty strings treated as unset.
    pub fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    /// First key that is set wins.
    pub fn get_any(&self, keys: &[&str]) -> Option<String> {
        keys.iter().find_map(|key| self.get(key))
    }

    pub fn string(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    pub fn parsed<T>(&self, key: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(key) {
            Some(v) => v
                .parse::<T>()
                .map_err(|e| BackupError::Config(format!("invalid {key} '{v}': {e}"))),
            None => Ok(default),
        }
    }

    pub fn flag(&self, keys: &[&str], default: bool) -> Result<bool> {
        for key in keys {
            if let Some(v) = self.get(key) {
                return parse_bool(&v)
                    .ok_or_else(|| BackupError::Config(format!("invalid {key} '{v}': expected true or false")));
            }
        }
        Ok(default)
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn empty_values_count_as_unset() {
        let map = vars(&[("A", "  ")]);
        let env = Env::from_map(&map);
        assert_eq!(env.get("A"), None);
        assert_eq!(env.string("A", "fallback"), "fallback");
    }

    #[test]
    fn get_any_prefers_first_key() {
        let map = vars(&[("NEW", "n"), ("OLD", "o")]);
        let env = Env::from_map(&map);
        assert_eq!(env.get_any(&["NEW", "OLD"]).as_deref(), Some("n"));
        assert_eq!(env.get_any(&["MISSING", "OLD"]).as_deref(), Some("o"));
    }

    #[test]
    fn parsed_reports_key_on_error() {
        let map = vars(&[("RETRY_COUNT", "three")]);
        let env = Env::from_map(&map);
        let err = env.parsed::<u32>("RETRY_COUNT", 3).unwrap_err();
        assert!(err.to_string().contains("RETRY_COUNT"));
    }

    #[test]
    fn flag_accepts_common_spellings() {
        let map = vars(&[("A", "TRUE"), ("B", "0"), ("C", "maybe")]);
        let env = Env::from_map(&map);
        assert!(env.flag(&["A"], false).unwrap());
        assert!(!env.flag(&["B"], true).unwrap());
        assert!(env.flag(&["C"], true).is_err());
        assert!(env.flag(&["D"], true).unwrap());
    }
}
