//! Package manifest (`package.json`) parsing.
//!
//! Plugin discovery decides whether a package is a resource plugin by looking
//! at the `pulumi` section of its manifest. This module models the manifest
//! fields the host reads and resolves the plugin name, version, and download
//! server from them.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::{HostError, HostResult};

/// The conventional manifest file name.
pub const MANIFEST_FILE: &str = "package.json";

/// The package name of the NodeJS SDK.
pub const SDK_PACKAGE: &str = "@pulumi/pulumi";

/// The fields of `package.json` the host cares about. Everything else is
/// ignored on decode.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PackageManifest {
    pub name: String,
    pub version: String,
    pub main: String,
    pub dependencies: BTreeMap<String, String>,
    #[serde(rename = "devDependencies")]
    pub dev_dependencies: BTreeMap<String, String>,
    #[serde(rename = "pulumi")]
    pub plugin: PluginSection,
}

/// The `pulumi` section of a manifest marking a package as a resource plugin.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PluginSection {
    pub resource: bool,
    pub name: Option<String>,
    pub version: Option<String>,
    pub server: Option<String>,
}

/// A resolved plugin record extracted from a manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginSpec {
    pub name: String,
    pub version: String,
    pub server: String,
}

/// Reads and decodes a manifest from disk.
pub fn read_manifest(path: &Path) -> HostResult<PackageManifest> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

/// Extracts the plugin record from a manifest, or `None` when the package is
/// not a resource plugin.
pub fn plugin_info(manifest: &PackageManifest) -> HostResult<Option<PluginSpec>> {
    if !manifest.plugin.resource {
        return Ok(None);
    }
    Ok(Some(PluginSpec {
        name: plugin_name(manifest)?,
        version: plugin_version(manifest)?,
        server: manifest.plugin.server.clone().unwrap_or_default(),
    }))
}

/// Resolves the plugin name: an explicit `pulumi.name` wins, first-party
/// `@pulumi/<name>` packages derive it from the package name, and third-party
/// packages must spell it out.
fn plugin_name(manifest: &PackageManifest) -> HostResult<String> {
    if let Some(name) = &manifest.plugin.name {
        if !name.is_empty() {
            return Ok(name.clone());
        }
    }
    if manifest.name.is_empty() {
        return Err(HostError::Manifest(
            "missing expected \"name\" property".to_string(),
        ));
    }
    if let Some(stripped) = manifest.name.strip_prefix("@pulumi/") {
        return Ok(stripped.to_string());
    }
    Err(HostError::Manifest(format!(
        "Missing property \"name\" for the third-party plugin '{}' inside package.json under the \"pulumi\" section.",
        manifest.name
    )))
}

/// Resolves the plugin version, preferring `pulumi.version` over the package
/// version, and normalizes it to carry a leading `v`.
fn plugin_version(manifest: &PackageManifest) -> HostResult<String> {
    let version = match &manifest.plugin.version {
        Some(version) if !version.is_empty() => version.clone(),
        _ => manifest.version.clone(),
    };
    if version.is_empty() {
        return Err(HostError::Manifest(
            "missing expected \"version\" property".to_string(),
        ));
    }
    if version.starts_with('v') {
        Ok(version)
    } else {
        Ok(format!("v{version}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(raw: &str) -> PackageManifest {
        serde_json::from_str(raw).unwrap()
    }

    #[test]
    fn first_party_package_derives_name_and_version() {
        let manifest = decode(
            r#"{"name": "@pulumi/aws", "version": "5.1.0", "pulumi": {"resource": true}}"#,
        );
        let spec = plugin_info(&manifest).unwrap().unwrap();
        assert_eq!(spec.name, "aws");
        assert_eq!(spec.version, "v5.1.0");
        assert_eq!(spec.server, "");
    }

    #[test]
    fn explicit_plugin_name_wins() {
        let manifest = decode(
            r#"{"name": "whatever", "version": "0.1.0",
                "pulumi": {"resource": true, "name": "acmecorp", "server": "example.com/dl"}}"#,
        );
        let spec = plugin_info(&manifest).unwrap().unwrap();
        assert_eq!(spec.name, "acmecorp");
        assert_eq!(spec.server, "example.com/dl");
    }

    #[test]
    fn third_party_package_without_plugin_name_fails() {
        let manifest =
            decode(r#"{"name": "third-party", "version": "1.0.0", "pulumi": {"resource": true}}"#);
        let err = plugin_info(&manifest).unwrap_err();
        let text = err.to_string();
        assert!(text.contains("third-party"));
        assert!(text.contains("\"pulumi\" section"));
    }

    #[test]
    fn missing_package_name_fails() {
        let manifest = decode(r#"{"version": "1.0.0", "pulumi": {"resource": true}}"#);
        let err = plugin_info(&manifest).unwrap_err();
        assert_eq!(err.to_string(), "missing expected \"name\" property");
    }

    #[test]
    fn missing_version_fails() {
        let manifest = decode(r#"{"name": "@pulumi/aws", "pulumi": {"resource": true}}"#);
        let err = plugin_info(&manifest).unwrap_err();
        assert_eq!(err.to_string(), "missing expected \"version\" property");
    }

    #[test]
    fn version_normalization_is_idempotent() {
        let manifest = decode(
            r#"{"name": "@pulumi/aws", "pulumi": {"resource": true, "version": "v5.1.0"}}"#,
        );
        let spec = plugin_info(&manifest).unwrap().unwrap();
        assert_eq!(spec.version, "v5.1.0");
    }

    #[test]
    fn non_plugin_package_yields_none() {
        let manifest = decode(r#"{"name": "left-pad", "version": "1.3.0"}"#);
        assert!(plugin_info(&manifest).unwrap().is_none());
    }

    #[test]
    fn plugin_version_section_wins_over_package_version() {
        let manifest = decode(
            r#"{"name": "@pulumi/aws", "version": "0.0.1",
                "pulumi": {"resource": true, "version": "5.1.0"}}"#,
        );
        let spec = plugin_info(&manifest).unwrap().unwrap();
        assert_eq!(spec.version, "v5.1.0");
    }
}
