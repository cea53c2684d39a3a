//! Program dependency enumeration.
//!
//! `GetProgramDependencies` reports the packages a program actually resolves
//! to. The package managers already know; the host shells out to whichever
//! one owns the program's lockfile and parses its JSON output:
//!
//! - a `yarn.lock` means `yarn list --json`,
//! - a `package-lock.json` means `npm ls --json --depth=0`.
//!
//! When the caller asks for direct dependencies only, the enumerated records
//! are intersected with the names declared in the program's `package.json`.
//!
//! `InstallDependencies` uses the same lockfile probe to pick the tool and
//! streams its output back to the engine.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::process::Stdio;

use serde::Deserialize;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::mpsc;
use tonic::Status;

use crate::error::{HostError, HostResult};
use crate::grpc::{DependencyInfo, InstallDependenciesResponse};
use crate::manifest::{PackageManifest, MANIFEST_FILE};

const YARN_LOCK: &str = "yarn.lock";
const NPM_LOCK: &str = "package-lock.json";

/// Enumerates the program's dependencies. With `transitive` false the result
/// is restricted to the packages declared in the program manifest.
pub async fn enumerate(dir: &Path, transitive: bool) -> HostResult<Vec<DependencyInfo>> {
    let yarn_lock = dir.join(YARN_LOCK);
    let npm_lock = dir.join(NPM_LOCK);

    let dependencies = if yarn_lock.exists() {
        parse_yarn_list(&run_tool(dir, "yarn", &["list", "--json"]).await?)?
    } else if npm_lock.exists() {
        parse_npm_ls(&run_tool(dir, "npm", &["ls", "--json", "--depth=0"]).await?)?
    } else {
        return Err(HostError::Dependencies(format!(
            "could not find either {} or {}",
            yarn_lock.display(),
            npm_lock.display()
        )));
    };

    if transitive {
        return Ok(dependencies);
    }
    intersect_declared(dependencies, &dir.join(MANIFEST_FILE)).await
}

async fn run_tool(dir: &Path, tool: &str, args: &[&str]) -> HostResult<String> {
    let output = Command::new(tool)
        .args(args)
        .current_dir(dir)
        .output()
        .await?;
    if !output.status.success() {
        return Err(HostError::Dependencies(format!(
            "`{} {}` failed: {}",
            tool,
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[derive(Deserialize)]
struct YarnListOutput {
    data: YarnListData,
}

#[derive(Deserialize)]
struct YarnListData {
    #[serde(default)]
    trees: Vec<YarnTree>,
}

#[derive(Deserialize)]
struct YarnTree {
    name: String,
}

/// Parses `yarn list --json` output. Each tree entry is a `name@version`
/// string; scoped packages contain an `@` in the name, so the split takes the
/// last one.
pub(crate) fn parse_yarn_list(stdout: &str) -> HostResult<Vec<DependencyInfo>> {
    let parsed: YarnListOutput = serde_json::from_str(stdout)?;
    parsed
        .data
        .trees
        .iter()
        .map(|tree| split_yarn_entry(&tree.name))
        .collect()
}

fn split_yarn_entry(entry: &str) -> HostResult<DependencyInfo> {
    match entry.rsplit_once('@') {
        Some((name, version)) if !name.is_empty() && !version.is_empty() => Ok(DependencyInfo {
            name: name.to_string(),
            version: version.to_string(),
        }),
        _ => Err(HostError::Dependencies(format!(
            "could not parse dependency '{entry}' from yarn list output"
        ))),
    }
}

#[derive(Deserialize)]
struct NpmLsOutput {
    #[serde(default)]
    dependencies: BTreeMap<String, NpmLsEntry>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct NpmLsEntry {
    version: String,
}

/// Parses `npm ls --json --depth=0` output.
pub(crate) fn parse_npm_ls(stdout: &str) -> HostResult<Vec<DependencyInfo>> {
    let parsed: NpmLsOutput = serde_json::from_str(stdout)?;
    Ok(parsed
        .dependencies
        .into_iter()
        .map(|(name, entry)| DependencyInfo {
            name,
            version: entry.version,
        })
        .collect())
}

/// Restricts enumerated records to the names declared in the manifest's
/// `dependencies` and `devDependencies`. Each declared name consumes at most
/// one record; enumeration order is preserved.
pub(crate) async fn intersect_declared(
    dependencies: Vec<DependencyInfo>,
    manifest_path: &Path,
) -> HostResult<Vec<DependencyInfo>> {
    let raw = tokio::fs::read_to_string(manifest_path)
        .await
        .map_err(|_| {
            HostError::Dependencies(format!(
                "could not find {}. Please include this in your report and run \
                 pulumi about --transitive to get a list of used packages",
                manifest_path.display()
            ))
        })?;
    let manifest: PackageManifest = serde_json::from_str(&raw)?;

    let mut declared: HashSet<String> = manifest.dependencies.keys().cloned().collect();
    declared.extend(manifest.dev_dependencies.keys().cloned());

    let mut result = Vec::new();
    for dependency in dependencies {
        if declared.remove(&dependency.name) {
            result.push(dependency);
        }
    }
    Ok(result)
}

/// Installs the program's dependencies with whichever package manager owns
/// the lockfile, streaming the tool's output as it arrives. A non-zero exit
/// fails the stream.
pub async fn stream_install(
    dir: PathBuf,
    tx: mpsc::Sender<Result<InstallDependenciesResponse, Status>>,
) -> HostResult<()> {
    let tool = if dir.join(YARN_LOCK).exists() {
        "yarn"
    } else {
        "npm"
    };
    let _ = tx
        .send(Ok(InstallDependenciesResponse {
            stdout: format!("Installing dependencies with {tool}...\n\n").into_bytes(),
            stderr: Vec::new(),
        }))
        .await;

    let mut child = Command::new(tool)
        .arg("install")
        .current_dir(&dir)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|err| HostError::Dependencies(format!("could not run {tool} install: {err}")))?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let out_pump = async {
        if let Some(stdout) = stdout {
            pump_output(stdout, tx.clone(), true).await;
        }
    };
    let err_pump = async {
        if let Some(stderr) = stderr {
            pump_output(stderr, tx.clone(), false).await;
        }
    };
    futures::future::join(out_pump, err_pump).await;

    let status = child.wait().await?;

    if !status.success() {
        return Err(HostError::Dependencies(format!(
            "{tool} install failed with {status}"
        )));
    }
    Ok(())
}

async fn pump_output<R>(
    mut reader: R,
    tx: mpsc::Sender<Result<InstallDependenciesResponse, Status>>,
    is_stdout: bool,
) where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut buf = [0u8; 4096];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let chunk = buf[..n].to_vec();
                let message = if is_stdout {
                    InstallDependenciesResponse {
                        stdout: chunk,
                        stderr: Vec::new(),
                    }
                } else {
                    InstallDependenciesResponse {
                        stdout: Vec::new(),
                        stderr: chunk,
                    }
                };
                if tx.send(Ok(message)).await.is_err() {
                    break;
                }
            }
        }
    }
}
