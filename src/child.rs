//! Child process supervision.
//!
//! The host runs the user program by spawning `node` against the SDK's run
//! shim. This module owns the contract with that shim: the argument list and
//! environment handed to it, the interpreter lookup and run-module
//! resolution, and the classification of the child's exit.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};

use tokio::process::Command;

use crate::config;
use crate::error::{HostError, HostResult};
use crate::grpc::{RunRequest, RunResponse};

/// The module the interpreter resolves to find the SDK's run shim.
pub const RUN_MODULE: &str = "@pulumi/pulumi/cmd/run";

/// Exit code by which the child signals "error already reported, print
/// nothing more".
pub const BAIL_EXIT_CODE: i32 = 32;

/// TypeScript-related host options applied to the child environment.
#[derive(Debug, Clone, Default)]
pub struct TypescriptOptions {
    pub enabled: bool,
    pub tsconfig: Option<String>,
}

/// Locates the `node` interpreter on `PATH`.
pub fn find_node() -> HostResult<PathBuf> {
    which::which("node").map_err(|_| HostError::MissingSdk)
}

/// Resolves the run shim through the interpreter's own module resolver with a
/// single-shot probe, rooted at the program's working directory.
pub async fn resolve_run_module(node: &Path, pwd: &Path) -> HostResult<String> {
    let probe = format!("console.log(require.resolve('{RUN_MODULE}'))");
    let output = Command::new(node)
        .arg("-e")
        .arg(probe)
        .current_dir(pwd)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|_| HostError::MissingSdk)?;
    if !output.status.success() {
        return Err(HostError::MissingSdk);
    }
    let resolved = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if resolved.is_empty() {
        return Err(HostError::MissingSdk);
    }
    Ok(resolved)
}

/// Builds the argument list for the run shim. Flags with empty values are
/// omitted entirely; `--query-mode` and `--parallel` are always present. Any
/// configured extra interpreter arguments are shell-split and placed before
/// the shim path.
pub fn build_argv(
    request: &RunRequest,
    run_path: &str,
    monitor_address: &str,
    engine_address: &str,
    pipes_directory: &str,
    tracing_endpoint: &str,
    nodeargs: &str,
) -> HostResult<Vec<String>> {
    let mut args = shell_words::split(nodeargs)
        .map_err(|err| HostError::Config(format!("could not parse node arguments: {err}")))?;
    args.push(run_path.to_string());

    push_flag(&mut args, "--monitor", monitor_address);
    push_flag(&mut args, "--engine", engine_address);
    push_flag(&mut args, "--sync", pipes_directory);
    push_flag(&mut args, "--organization", &request.organization);
    push_flag(&mut args, "--project", &request.project);
    push_flag(&mut args, "--stack", &request.stack);
    push_flag(&mut args, "--pwd", &request.pwd);
    if request.dry_run {
        args.push("--dry-run".to_string());
    }
    push_flag(&mut args, "--query-mode", &request.query_mode.to_string());
    push_flag(&mut args, "--parallel", &request.parallel.to_string());
    push_flag(&mut args, "--tracing", tracing_endpoint);

    if request.program.is_empty() {
        args.push(".".to_string());
    } else {
        args.push(request.program.clone());
    }
    args.extend(request.args.iter().cloned());
    Ok(args)
}

fn push_flag(args: &mut Vec<String>, name: &str, value: &str) {
    if !value.is_empty() {
        args.push(name.to_string());
        args.push(value.to_string());
    }
}

/// Builds the extra environment for the child: the serialized config payloads
/// and, in TypeScript mode, the transpilation switches.
pub fn build_env(
    request: &RunRequest,
    typescript: &TypescriptOptions,
) -> HostResult<Vec<(String, String)>> {
    let mut env = vec![
        (
            "PULUMI_CONFIG".to_string(),
            config::construct_config(&request.config)?,
        ),
        (
            "PULUMI_CONFIG_SECRET_KEYS".to_string(),
            config::construct_secret_keys(&request.config_secret_keys)?,
        ),
    ];
    if typescript.enabled {
        env.push(("PULUMI_NODEJS_TYPESCRIPT".to_string(), "true".to_string()));
        if let Some(tsconfig) = &typescript.tsconfig {
            env.push(("PULUMI_NODEJS_TSCONFIG_PATH".to_string(), tsconfig.clone()));
        }
    }
    Ok(env)
}

/// Spawns the interpreter and waits for it to exit, classifying the result.
/// The child inherits the host's stdout and stderr; both are flushed before
/// classification so no buffered output is lost.
pub async fn supervise(
    program: &Path,
    argv: Vec<String>,
    env: Vec<(String, String)>,
    pwd: Option<&Path>,
) -> RunResponse {
    let mut command = Command::new(program);
    command
        .args(&argv)
        .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .kill_on_drop(true);
    if let Some(dir) = pwd {
        command.current_dir(dir);
    }

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(err) => return launch_failure(&err),
    };
    let status = match child.wait().await {
        Ok(status) => status,
        Err(err) => return launch_failure(&err),
    };

    flush_host_output();
    classify_exit(status)
}

/// Maps an exit status to the Run response contract.
pub fn classify_exit(status: ExitStatus) -> RunResponse {
    match status.code() {
        Some(0) => RunResponse {
            error: String::new(),
            bail: false,
        },
        Some(BAIL_EXIT_CODE) => RunResponse {
            error: String::new(),
            bail: true,
        },
        code => RunResponse {
            error: format!(
                "Program exited with non-zero exit code: {}",
                code.unwrap_or(-1)
            ),
            bail: false,
        },
    }
}

fn launch_failure(err: &std::io::Error) -> RunResponse {
    flush_host_output();
    RunResponse {
        error: format!("Problem executing program (could not run language executor): {err}"),
        bail: false,
    }
}

fn flush_host_output() {
    let _ = std::io::stdout().flush();
    let _ = std::io::stderr().flush();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn base_request() -> RunRequest {
        RunRequest {
            project: String::new(),
            stack: String::new(),
            pwd: String::new(),
            program: String::new(),
            args: Vec::new(),
            config: HashMap::new(),
            dry_run: false,
            parallel: 0,
            monitor_address: String::new(),
            query_mode: false,
            config_secret_keys: Vec::new(),
            organization: String::new(),
        }
    }

    #[test]
    fn argv_omits_empty_values_and_keeps_flag_order() {
        let request = RunRequest {
            organization: "acme".into(),
            stack: "dev".into(),
            dry_run: true,
            ..base_request()
        };
        let argv = build_argv(&request, "/r/run", "127.0.0.1:5000", "", "/tmp/p", "", "").unwrap();
        assert_eq!(
            argv,
            vec![
                "/r/run",
                "--monitor",
                "127.0.0.1:5000",
                "--sync",
                "/tmp/p",
                "--organization",
                "acme",
                "--stack",
                "dev",
                "--dry-run",
                "--query-mode",
                "false",
                "--parallel",
                "0",
                ".",
            ]
        );
    }

    #[test]
    fn nodeargs_are_shell_split_before_the_run_path() {
        let request = base_request();
        let argv = build_argv(
            &request,
            "/r/run",
            "",
            "",
            "",
            "",
            "--max-old-space-size=4096 --no-warnings",
        )
        .unwrap();
        assert_eq!(argv[0], "--max-old-space-size=4096");
        assert_eq!(argv[1], "--no-warnings");
        assert_eq!(argv[2], "/r/run");
    }

    #[test]
    fn trailing_request_args_follow_the_program() {
        let request = RunRequest {
            program: "index.js".into(),
            args: vec!["--flag".into(), "value".into()],
            ..base_request()
        };
        let argv = build_argv(&request, "/r/run", "", "", "", "", "").unwrap();
        let tail: Vec<&str> = argv.iter().rev().take(3).rev().map(String::as_str).collect();
        assert_eq!(tail, vec!["index.js", "--flag", "value"]);
    }

    #[test]
    fn env_serializes_config_and_secret_keys() {
        let mut request = base_request();
        request
            .config
            .insert("foo:bar".to_string(), "1".to_string());
        let env = build_env(&request, &TypescriptOptions::default()).unwrap();
        let map: HashMap<_, _> = env.into_iter().collect();
        assert_eq!(map["PULUMI_CONFIG"], r#"{"foo:config:bar":"1"}"#);
        assert_eq!(map["PULUMI_CONFIG_SECRET_KEYS"], "[]");
        assert!(!map.contains_key("PULUMI_NODEJS_TYPESCRIPT"));
    }

    #[test]
    fn typescript_mode_sets_transpilation_switches() {
        let request = base_request();
        let typescript = TypescriptOptions {
            enabled: true,
            tsconfig: Some("tsconfig.prod.json".into()),
        };
        let env = build_env(&request, &typescript).unwrap();
        let map: HashMap<_, _> = env.into_iter().collect();
        assert_eq!(map["PULUMI_NODEJS_TYPESCRIPT"], "true");
        assert_eq!(map["PULUMI_NODEJS_TSCONFIG_PATH"], "tsconfig.prod.json");
    }

    #[test]
    fn malformed_config_key_is_rejected_before_launch() {
        let mut request = base_request();
        request
            .config
            .insert("not-a-key".to_string(), "1".to_string());
        let err = build_env(&request, &TypescriptOptions::default()).unwrap_err();
        assert!(err.to_string().contains("not-a-key"));
    }

    #[cfg(unix)]
    mod exit_classification {
        use super::super::*;
        use std::os::unix::process::ExitStatusExt;

        fn status(code: i32) -> ExitStatus {
            ExitStatus::from_raw(code << 8)
        }

        #[test]
        fn exit_zero_is_success() {
            let response = classify_exit(status(0));
            assert_eq!(response.error, "");
            assert!(!response.bail);
        }

        #[test]
        fn bail_sentinel_yields_empty_error_and_bail() {
            let response = classify_exit(status(BAIL_EXIT_CODE));
            assert_eq!(response.error, "");
            assert!(response.bail);
        }

        #[test]
        fn other_exit_codes_are_reported() {
            let response = classify_exit(status(7));
            assert_eq!(response.error, "Program exited with non-zero exit code: 7");
            assert!(!response.bail);
        }

        #[test]
        fn signal_death_reports_negative_one() {
            // Terminated by SIGKILL: no exit code.
            let response = classify_exit(ExitStatus::from_raw(9));
            assert_eq!(response.error, "Program exited with non-zero exit code: -1");
        }
    }
}
