//! `hodos code`: run the coding CLI against the local proxy.

use crate::service;
use anyhow::{Context, Result};
use colored::Colorize;
use hodos_config::{HodosConfig, HodosPaths};
use hodos_service::{EnsureOutcome, ServiceSession};
use std::path::Path;
use std::process::ExitStatus;
use tokio::process::{Child, Command};

const DEFAULT_COMMAND: &str = "claude";
const COMMAND_ENV: &str = "CLAUDE_PATH";

pub async fn run_code(paths: &HodosPaths, args: Vec<String>) -> Result<i32> {
    let config = service::load(paths)?;
    let mut supervisor = service::supervisor(paths, Some(&config))?;

    if let EnsureOutcome::Started(pid) = supervisor.ensure_running().await? {
        eprintln!(
            "{} on port {} (pid {})",
            "hodos started".green(),
            config.port,
            pid.map_or_else(|| "?".to_string(), |p| p.to_string())
        );
    }

    let session = ServiceSession::begin(supervisor.registry().clone());
    let status = run_child(&config, &args).await;
    let remaining = session.end();

    if remaining == 0 && config.service.stop_when_idle {
        tracing::info!("last session ended, stopping service");
        supervisor.stop();
    }

    Ok(exit_code(status?))
}

fn command_name(config: &HodosConfig) -> String {
    std::env::var(COMMAND_ENV)
        .ok()
        .filter(|c| !c.trim().is_empty())
        .or_else(|| config.code.command.clone())
        .unwrap_or_else(|| DEFAULT_COMMAND.to_string())
}

/// Split a configured command into program and leading arguments.
///
/// An existing path is taken whole, so executables under directories with
/// spaces still work. Anything else is split on whitespace, which allows
/// `CLAUDE_PATH="node /opt/claude/cli.js"`. No shell quoting is applied.
fn command_line(command: &str) -> (String, Vec<String>) {
    let command = command.trim();
    if Path::new(command).exists() {
        return (command.to_string(), Vec::new());
    }

    let mut parts = command.split_whitespace().map(str::to_string);
    let program = parts.next().unwrap_or_else(|| DEFAULT_COMMAND.to_string());
    (program, parts.collect())
}

fn child_env(config: &HodosConfig) -> Vec<(&'static str, String)> {
    let mut env = vec![
        (
            "ANTHROPIC_BASE_URL",
            format!("http://127.0.0.1:{}", config.port),
        ),
        ("API_TIMEOUT_MS", config.code.api_timeout_ms.to_string()),
    ];

    match config.api_key.as_deref().filter(|k| !k.is_empty()) {
        Some(key) => env.push(("ANTHROPIC_API_KEY", key.to_string())),
        None => env.push(("ANTHROPIC_AUTH_TOKEN", "test".to_string())),
    }

    if let Some(model) = &config.code.small_fast_model {
        env.push(("ANTHROPIC_SMALL_FAST_MODEL", model.clone()));
    }
    env
}

async fn run_child(config: &HodosConfig, args: &[String]) -> Result<ExitStatus> {
    let (program, leading) = command_line(&command_name(config));
    let mut cmd = Command::new(&program);
    cmd.args(&leading).args(args).envs(child_env(config));
    if config.api_key.as_deref().is_some_and(|k| !k.is_empty()) {
        cmd.env_remove("ANTHROPIC_AUTH_TOKEN");
    }

    let mut child = cmd
        .spawn()
        .with_context(|| format!("failed to launch `{}`", program))?;
    tracing::debug!(program = %program, pid = ?child.id(), "launched coding CLI");

    wait_for_child(&mut child)
        .await
        .with_context(|| format!("failed waiting for `{}`", program))
}

/// Wait for the child so the session is released only after it exited.
///
/// Ctrl-C in a terminal already reaches the child through the process
/// group, so it is only noted here. SIGTERM sent to `hodos` is passed on.
#[cfg(unix)]
async fn wait_for_child(child: &mut Child) -> std::io::Result<ExitStatus> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    let mut interrupt = signal(SignalKind::interrupt())?;

    loop {
        tokio::select! {
            status = child.wait() => return status,
            _ = interrupt.recv() => {
                tracing::debug!("interrupt received, waiting for the coding CLI");
            }
            _ = terminate.recv() => {
                tracing::info!("terminate received, stopping the coding CLI");
                forward_terminate(child);
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_child(child: &mut Child) -> std::io::Result<ExitStatus> {
    loop {
        tokio::select! {
            status = child.wait() => return status,
            _ = tokio::signal::ctrl_c() => {
                tracing::debug!("interrupt received, waiting for the coding CLI");
            }
        }
    }
}

#[cfg(unix)]
fn forward_terminate(child: &Child) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(pid) = child.id().and_then(|id| i32::try_from(id).ok()) else {
        return;
    };
    if let Err(e) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
        tracing::warn!(pid, error = %e, "failed to signal the coding CLI");
    }
}

fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    1
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> HodosConfig {
        let mut config = HodosConfig::default();
        config.port = 4567;
        config
    }

    fn lookup<'a>(env: &'a [(&'static str, String)], key: &str) -> Option<&'a str> {
        env.iter().find(|(k, _)| *k == key).map(|(_, v)| v.as_str())
    }

    #[test]
    fn test_child_env_without_api_key() {
        let env = child_env(&config());
        assert_eq!(
            lookup(&env, "ANTHROPIC_BASE_URL"),
            Some("http://127.0.0.1:4567")
        );
        assert_eq!(lookup(&env, "API_TIMEOUT_MS"), Some("600000"));
        assert_eq!(lookup(&env, "ANTHROPIC_AUTH_TOKEN"), Some("test"));
        assert_eq!(lookup(&env, "ANTHROPIC_API_KEY"), None);
        assert_eq!(lookup(&env, "ANTHROPIC_SMALL_FAST_MODEL"), None);
    }

    #[test]
    fn test_child_env_with_api_key_and_fast_model() {
        let mut config = config();
        config.api_key = Some("proxy-key".to_string());
        config.code.small_fast_model = Some("local,qwen3-small".to_string());

        let env = child_env(&config);
        assert_eq!(lookup(&env, "ANTHROPIC_API_KEY"), Some("proxy-key"));
        assert_eq!(lookup(&env, "ANTHROPIC_AUTH_TOKEN"), None);
        assert_eq!(
            lookup(&env, "ANTHROPIC_SMALL_FAST_MODEL"),
            Some("local,qwen3-small")
        );
    }

    #[test]
    fn test_command_line_splits_program_and_arguments() {
        let (program, args) = command_line("node /opt/claude/cli.js --verbose");
        assert_eq!(program, "node");
        assert_eq!(args, vec!["/opt/claude/cli.js", "--verbose"]);

        let (program, args) = command_line("  claude ");
        assert_eq!(program, "claude");
        assert!(args.is_empty());
    }

    #[test]
    fn test_command_line_keeps_existing_path_with_spaces() {
        let dir = tempfile::TempDir::new().unwrap();
        let exe = dir.path().join("my tools").join("claude");
        std::fs::create_dir_all(exe.parent().unwrap()).unwrap();
        std::fs::write(&exe, "").unwrap();

        let (program, args) = command_line(exe.to_str().unwrap());
        assert_eq!(program, exe.to_str().unwrap());
        assert!(args.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_forward_terminate_stops_child() {
        let mut child = Command::new("sleep").arg("30").spawn().unwrap();
        forward_terminate(&child);
        let status = child.wait().await.unwrap();
        assert_eq!(exit_code(status), 143);
    }

    #[cfg(unix)]
    #[test]
    fn test_exit_code_propagates() {
        use std::os::unix::process::ExitStatusExt;
        assert_eq!(exit_code(ExitStatus::from_raw(3 << 8)), 3);
        assert_eq!(exit_code(ExitStatus::from_raw(15)), 143);
    }
}
