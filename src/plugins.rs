//! Plugin discovery over a program's module tree.
//!
//! `GetRequiredPlugins` answers "which resource plugins will this program
//! need" by walking the program directory, decoding every `package.json`
//! found under a `node_modules` directory, and collecting the packages whose
//! manifest marks them as a resource plugin.
//!
//! The walk follows symbolic links (package managers link workspace packages
//! freely) and guards against cycles by tracking resolved absolute paths.
//! Per-entry failures never abort the walk; they are accumulated and returned
//! next to the partial result.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use semver::Version;

use crate::error::HostError;
use crate::grpc::PluginDependency;
use crate::manifest::{self, MANIFEST_FILE, SDK_PACKAGE};
use crate::version;

/// Every copy of the `@pulumi/pulumi` SDK seen during a walk, in discovery
/// order. The first entry is the pivot all later entries are checked against.
#[derive(Debug, Default)]
pub struct PulumiVersionMap {
    entries: Vec<(PathBuf, Version)>,
}

impl PulumiVersionMap {
    fn record(&mut self, path: PathBuf, version: Version) {
        if !self.entries.iter().any(|(p, _)| p == &path) {
            self.entries.push((path, version));
        }
    }

    pub fn entries(&self) -> &[(PathBuf, Version)] {
        &self.entries
    }
}

/// An incompatible pair of SDK copies found in one module tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionMismatch {
    pub first_path: PathBuf,
    pub first_version: Version,
    pub other_path: PathBuf,
    pub other_version: Version,
    pub reason: &'static str,
}

/// Walks `root` and returns the plugins found, the SDK copies seen, and the
/// accumulated per-entry failures.
pub fn discover_plugins(root: &Path) -> (Vec<PluginDependency>, PulumiVersionMap, Vec<HostError>) {
    let mut plugins = Vec::new();
    let mut versions = PulumiVersionMap::default();
    let mut visited = HashSet::new();
    let mut errors = Vec::new();
    walk(
        root,
        false,
        &mut plugins,
        &mut versions,
        &mut visited,
        &mut errors,
    );
    (plugins, versions, errors)
}

fn walk(
    dir: &Path,
    in_node_modules: bool,
    plugins: &mut Vec<PluginDependency>,
    versions: &mut PulumiVersionMap,
    visited: &mut HashSet<PathBuf>,
    errors: &mut Vec<HostError>,
) {
    let dir = match std::fs::canonicalize(dir) {
        Ok(resolved) => resolved,
        Err(err) => {
            errors.push(err.into());
            return;
        }
    };
    if !visited.insert(dir.clone()) {
        return;
    }

    let entries = match std::fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(err) => {
            errors.push(err.into());
            return;
        }
    };

    // Children of a directory named node_modules are packages; the flag
    // carries down the rest of the subtree.
    let child_in_node_modules =
        in_node_modules || dir.file_name().is_some_and(|name| name == "node_modules");

    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                errors.push(err.into());
                continue;
            }
        };
        let path = entry.path();
        let file_type = match entry.file_type() {
            Ok(file_type) => file_type,
            Err(err) => {
                errors.push(err.into());
                continue;
            }
        };

        // Resolve links before the cycle check; a link to an already-visited
        // directory must be recognized as visited.
        let (resolved, is_dir) = if file_type.is_symlink() {
            let target = match std::fs::canonicalize(&path) {
                Ok(target) => target,
                Err(err) => {
                    errors.push(err.into());
                    continue;
                }
            };
            let metadata = match std::fs::metadata(&target) {
                Ok(metadata) => metadata,
                Err(err) => {
                    errors.push(err.into());
                    continue;
                }
            };
            (target, metadata.is_dir())
        } else {
            (path, file_type.is_dir())
        };

        if is_dir {
            walk(
                &resolved,
                child_in_node_modules,
                plugins,
                versions,
                visited,
                errors,
            );
        } else if in_node_modules && entry.file_name() == MANIFEST_FILE {
            inspect_manifest(&resolved, plugins, versions, errors);
        }
    }
}

fn inspect_manifest(
    path: &Path,
    plugins: &mut Vec<PluginDependency>,
    versions: &mut PulumiVersionMap,
    errors: &mut Vec<HostError>,
) {
    let manifest = match manifest::read_manifest(path) {
        Ok(manifest) => manifest,
        Err(err) => {
            errors.push(err);
            return;
        }
    };

    if manifest.name == SDK_PACKAGE {
        match Version::parse(&manifest.version) {
            Ok(version) => versions.record(path.to_path_buf(), version),
            Err(err) => errors.push(err.into()),
        }
    }

    match manifest::plugin_info(&manifest) {
        Ok(Some(spec)) => plugins.push(PluginDependency {
            name: spec.name,
            kind: "resource".to_string(),
            version: spec.version,
            server: spec.server,
        }),
        Ok(None) => {}
        Err(err) => errors.push(err),
    }
}

/// Finds the first SDK copy incompatible with the first one recorded, if any.
pub fn find_version_mismatch(versions: &PulumiVersionMap) -> Option<VersionMismatch> {
    let entries = versions.entries();
    let (first_path, first_version) = entries.first()?;
    for (path, version) in &entries[1..] {
        let (ok, reason) = version::compatible(first_version, version);
        if !ok {
            return Some(VersionMismatch {
                first_path: first_path.clone(),
                first_version: first_version.clone(),
                other_path: path.clone(),
                other_version: version.clone(),
                reason,
            });
        }
    }
    None
}

/// Prints at most one warning to stderr when the module tree mixes
/// incompatible SDK copies. Discovery still succeeds.
pub fn warn_on_version_mismatch(versions: &PulumiVersionMap) {
    if let Some(mismatch) = find_version_mismatch(versions) {
        eprintln!(
            "warning: found incompatible versions of @pulumi/pulumi: {} at {} and {} at {}: {}",
            mismatch.first_version,
            mismatch.first_path.display(),
            mismatch.other_version,
            mismatch.other_path.display(),
            mismatch.reason,
        );
    }
}
