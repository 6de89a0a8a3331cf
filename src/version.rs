use crate::config::ClientConfig;
use crate::errors::*;
use indexmap::IndexMap;

/// Append the configured bump suffix, if any, to an upstream version
pub fn bumped(client: &ClientConfig, version: &str) -> String {
    if let Some(bump) = client.bump.get(version) {
        format!("{version}-{bump}")
    } else {
        version.to_string()
    }
}

/// Split a package version into the upstream version and its bump suffix
pub fn unbumped(version: &str) -> (&str, Option<&str>) {
    match version.rsplit_once('-') {
        Some((upstream, bump)) if !upstream.is_empty() && !bump.is_empty() => (upstream, Some(bump)),
        _ => (version, None),
    }
}

/// Normalize a pre-release version into something usable in a debian version.
///
/// `+` and `~` get escaped in urls by b2 and github respectively, `:` would
/// be read as an epoch and `-` is reserved for bumps.
pub fn prerelease_version(raw: &str, suffix: &str, delim: Option<&str>) -> String {
    let version = raw.replace(suffix, "");
    if let Some(delim) = delim {
        version.replace('+', delim)
    } else {
        version
    }
}

/// Numeric sort key for juris-m versions like `6.0.30m3`
pub fn jurism_sort_key(version: &str) -> Result<Vec<u64>> {
    version
        .split(['m', '.'])
        .map(|part| {
            part.parse::<u64>()
                .with_context(|| anyhow!("Failed to parse juris-m version component {part:?} in {version:?}"))
        })
        .collect()
}

/// Keep only the most recent `mN` increment for every base version, ordered ascending
pub fn latest_per_base<'a, I: IntoIterator<Item = &'a str>>(versions: I) -> Result<Vec<String>> {
    let mut keyed = Vec::new();
    for version in versions {
        let key = jurism_sort_key(version)?;
        keyed.push((key, version));
    }
    keyed.sort();

    let mut latest = IndexMap::new();
    for (_key, version) in keyed {
        let base = version.rsplit_once('m').map(|(base, _)| base).unwrap_or(version);
        // later increments of the same base replace earlier ones
        latest.insert(base, version.to_string());
    }

    Ok(latest.into_values().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> ClientConfig {
        let mut client = ClientConfig::default();
        client.bump.insert("6.0.26".to_string(), "1".to_string());
        client
    }

    #[test]
    fn test_bumped() {
        let client = client();
        assert_eq!(bumped(&client, "6.0.26"), "6.0.26-1");
        assert_eq!(bumped(&client, "6.0.27"), "6.0.27");
    }

    #[test]
    fn test_unbumped() {
        assert_eq!(unbumped("6.0.26-1"), ("6.0.26", Some("1")));
        assert_eq!(unbumped("6.0.26"), ("6.0.26", None));
        assert_eq!(unbumped("7.1.3+9a1c-2"), ("7.1.3+9a1c", Some("2")));
        assert_eq!(unbumped("6.0.26-"), ("6.0.26-", None));
    }

    #[test]
    fn test_prerelease_version() {
        assert_eq!(
            prerelease_version("7.1-beta.3+9a1c3b2", "-beta", None),
            "7.1.3+9a1c3b2"
        );
        assert_eq!(
            prerelease_version("7.1-beta.3+9a1c3b2", "-beta", Some(".")),
            "7.1.3.9a1c3b2"
        );
        assert_eq!(prerelease_version("7.1-dev.12", "-dev", None), "7.1.12");
    }

    #[test]
    fn test_jurism_sort_key() -> Result<()> {
        assert_eq!(jurism_sort_key("6.0.30m3")?, vec![6, 0, 30, 3]);
        assert!(jurism_sort_key("6.0.x").is_err());
        assert!(jurism_sort_key("6.0.30m10")? > jurism_sort_key("6.0.30m9")?);
        Ok(())
    }

    #[test]
    fn test_latest_per_base() -> Result<()> {
        let list = ["6.0.30m9", "6.0.29m1", "6.0.30m10", "6.0.30m2", "6.0.29m4"];
        assert_eq!(latest_per_base(list)?, vec!["6.0.29m4", "6.0.30m10"]);
        Ok(())
    }

    #[test]
    fn test_latest_per_base_empty() -> Result<()> {
        assert!(latest_per_base([])?.is_empty());
        Ok(())
    }
}
