use crate::errors::*;
use crate::hash::HashAlgo;
use indexmap::IndexMap;
use std::fmt;
use std::str;

/// Parsed apt `Release` file
#[derive(Debug, PartialEq, Eq, Default, Clone)]
pub struct ReleaseFile {
    pub fields: IndexMap<String, String>,
    pub checksums: IndexMap<String, Vec<ChecksumEntry>>,
}

impl fmt::Display for ReleaseFile {
    fn fmt(&self, w: &mut fmt::Formatter) -> fmt::Result {
        for (key, value) in &self.fields {
            writeln!(w, "{key}: {value}")?;
        }
        for (key, checksums) in &self.checksums {
            writeln!(w, "{key}:")?;
            for entry in checksums {
                writeln!(w, " {entry}")?;
            }
        }
        Ok(())
    }
}

impl ReleaseFile {
    pub fn parse(mut bytes: &[u8]) -> Result<Self> {
        let mut release = ReleaseFile::default();
        while !bytes.is_empty() {
            let (line, trailing) = match memchr::memchr(b'\n', bytes) {
                Some(idx) => (&bytes[..idx], &bytes[idx + 1..]),
                None => (bytes, &b""[..]),
            };
            bytes = trailing;

            let line = str::from_utf8(line).context("Failed to utf-8 decode line in Release")?;
            if line.is_empty() {
                continue;
            }

            if let Some(line) = line.strip_prefix(' ') {
                let (_section, group) = release
                    .checksums
                    .last_mut()
                    .context("Can't add checksums if no section has started yet")?;
                let entry = ChecksumEntry::parse(line).context("Failed to parse checksum line")?;
                group.push(entry);
            } else if let Some((key, value)) = line.split_once(": ") {
                release.fields.insert(key.to_string(), value.to_string());
            } else if let Some(key) = line.strip_suffix(':') {
                release.checksums.insert(key.to_string(), Vec::new());
            } else {
                bail!("Unrecognized input: {:?}", line);
            }
        }

        Ok(release)
    }

    /// Checksum sections for hash algorithms we know how to verify
    pub fn hash_sections(&self) -> impl Iterator<Item = (HashAlgo, &[ChecksumEntry])> {
        self.checksums
            .iter()
            .filter_map(|(name, entries)| Some((name.parse().ok()?, entries.as_slice())))
    }

    /// All index files referenced from the checksum sections, except Release itself
    pub fn indexed_paths(&self) -> Vec<&str> {
        let mut paths = self
            .checksums
            .values()
            .flatten()
            .map(|entry| entry.path.as_str())
            .filter(|path| *path != "Release")
            .collect::<Vec<_>>();
        paths.sort();
        paths.dedup();
        paths
    }
}

#[derive(Debug, PartialEq, Eq, Default, Clone)]
pub struct ChecksumEntry {
    pub hash: String,
    pub size: u64,
    pub path: String,
}

impl fmt::Display for ChecksumEntry {
    fn fmt(&self, w: &mut fmt::Formatter) -> fmt::Result {
        write!(w, "{} {} {}", self.hash, self.size, self.path)
    }
}

impl ChecksumEntry {
    pub fn parse(line: &str) -> Result<Self> {
        let mut parts = line.split_whitespace();
        let (Some(hash), Some(size), Some(path), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            bail!("Expected `hash size path`: {line:?}");
        };
        let size = size.parse().context("Failed to parse size as number")?;
        Ok(ChecksumEntry {
            hash: hash.to_string(),
            size,
            path: path.to_string(),
        })
    }
}
