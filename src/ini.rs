//! Minimal order-preserving reader/writer for `application.ini` and `.desktop` files.
//!
//! Keys are case sensitive, comments are dropped, and output is written as
//! `key=value` without spaces around the delimiter.

use crate::errors::*;
use indexmap::IndexMap;
use std::fmt;
use std::path::Path;
use tokio::fs;

pub type Section = IndexMap<String, String>;

#[derive(Debug, PartialEq, Default, Clone)]
pub struct Ini {
    pub sections: IndexMap<String, Section>,
}

impl Ini {
    pub fn parse(text: &str) -> Result<Self> {
        let mut ini = Ini::default();
        let mut current = None;

        for (idx, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }

            if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                ini.sections.entry(name.to_string()).or_default();
                current = Some(name.to_string());
            } else if let Some((key, value)) = line.split_once('=') {
                let section = current
                    .as_ref()
                    .with_context(|| anyhow!("Key outside of any section on line {}", idx + 1))?;
                ini.sections
                    .entry(section.clone())
                    .or_default()
                    .insert(key.trim_end().to_string(), value.trim_start().to_string());
            } else {
                bail!("Unrecognized input on line {}: {:?}", idx + 1, line);
            }
        }

        Ok(ini)
    }

    pub async fn read(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .await
            .with_context(|| anyhow!("Failed to read ini file: {path:?}"))?;
        Self::parse(&text).with_context(|| anyhow!("Failed to parse ini file: {path:?}"))
    }

    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.sections.get(section)?.get(key).map(String::as_str)
    }

    pub fn require(&self, section: &str, key: &str) -> Result<&str> {
        self.get(section, key)
            .with_context(|| anyhow!("Missing key {key:?} in section [{section}]"))
    }

    pub fn set<V: Into<String>>(&mut self, section: &str, key: &str, value: V) {
        self.sections
            .entry(section.to_string())
            .or_default()
            .insert(key.to_string(), value.into());
    }
}

impl fmt::Display for Ini {
    fn fmt(&self, w: &mut fmt::Formatter) -> fmt::Result {
        for (name, section) in &self.sections {
            writeln!(w, "[{name}]")?;
            for (key, value) in section {
                writeln!(w, "{key}={value}")?;
            }
            writeln!(w)?;
        }
        Ok(())
    }
}
