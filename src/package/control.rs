use crate::config::Maintainer;
use crate::errors::*;
use crate::hash::HashAlgo;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;

/// Everything that ends up in `DEBIAN/control`
#[derive(Debug, Clone, PartialEq)]
pub struct DebMetadata {
    pub client: String,
    pub package: String,
    pub version: String,
    pub arch: String,
    pub dependencies: String,
    pub section: String,
    pub description: String,
}

impl DebMetadata {
    pub fn filename(&self) -> String {
        crate::release::deb_filename(&self.package, &self.version, &self.arch)
    }

    pub fn control(&self, maintainer: &Maintainer) -> String {
        format!(
            "Package: {}\n\
             Architecture: {}\n\
             Depends: {}\n\
             Maintainer: {}\n\
             Section: {}\n\
             Priority: optional\n\
             Version: {}\n\
             Description: {}\n",
            self.package,
            self.arch,
            self.dependencies,
            maintainer.email,
            self.section,
            self.version,
            self.description,
        )
    }

    pub fn changes(&self, maintainer: &Maintainer, deb: &[u8], date: DateTime<Utc>) -> String {
        let filename = self.filename();
        let size = deb.len();
        let md5 = HashAlgo::Md5.hex_digest(deb);
        let sha1 = HashAlgo::Sha1.hex_digest(deb);
        let sha256 = HashAlgo::Sha256.hex_digest(deb);

        format!(
            "Format: 1.8\n\
             Date: {date}\n\
             Source: {package}\n\
             Binary: {package}\n\
             Architecture: {arch}\n\
             Version: {version}\n\
             Distribution: unstable\n\
             Urgency: medium\n\
             Maintainer: {email}\n\
             Changed-By: {name} <{email}>\n\
             Description:\n \
             {package} - {description}\n\
             Checksums-Sha1:\n \
             {sha1} {size} {filename}\n\
             Checksums-Sha256:\n \
             {sha256} {size} {filename}\n\
             Files:\n \
             {md5} {size} {section} optional {filename}\n",
            date = date.format("%a, %d %b %Y %H:%M:%S %z"),
            package = self.package,
            arch = self.arch,
            version = self.version,
            email = maintainer.email,
            name = maintainer.name,
            description = self.description,
            section = self.section,
        )
    }
}

/// Parse a single `Key: value` control paragraph, continuation lines get joined with newlines
pub fn parse_paragraph(text: &str) -> Result<IndexMap<String, String>> {
    let mut fields = IndexMap::<String, String>::new();
    for line in text.lines() {
        if line.is_empty() {
            break;
        }
        if line.starts_with([' ', '\t']) {
            let (_key, value) = fields
                .last_mut()
                .context("Continuation line before first field")?;
            value.push('\n');
            value.push_str(line.trim_start());
        } else if let Some((key, value)) = line.split_once(':') {
            fields.insert(key.to_string(), value.trim().to_string());
        } else {
            bail!("Unrecognized input in control paragraph: {line:?}");
        }
    }
    Ok(fields)
}

/// Parse `apt-cache depends` output into the list of direct dependencies
pub fn parse_apt_cache_depends(text: &str) -> Vec<String> {
    text.lines()
        .filter_map(|line| line.trim().strip_prefix("Depends:"))
        .map(|dep| dep.trim().to_string())
        // virtual packages show up as <name>
        .filter(|dep| !dep.is_empty() && !dep.starts_with('<'))
        .filter(|dep| dep != "lsb-release")
        .filter(|dep| !dep.contains("gcc"))
        .collect()
}

/// Deduplicate and sort dependencies into a `Depends:` value
pub fn join_dependencies<I: IntoIterator<Item = String>>(deps: I) -> String {
    let mut deps = deps
        .into_iter()
        .map(|dep| dep.trim().to_string())
        .filter(|dep| !dep.is_empty())
        .collect::<Vec<_>>();
    deps.sort();
    deps.dedup();
    deps.join(", ")
}
