//! `start`, `stop`, `restart` and `status`.

use anyhow::{bail, Context, Result};
use colored::Colorize;
use hodos_config::{load_config, HodosConfig, HodosPaths, DEFAULT_PORT};
use hodos_proxy::{serve, ServeOptions};
use hodos_service::{
    EnsureOutcome, LaunchSpec, ProcessRegistry, ServiceSupervisor, StartupDescriptor, StopOutcome,
};
use hodos_telemetry::TelemetryConfig;
use std::io::IsTerminal;

pub fn telemetry_config(config: &HodosConfig) -> TelemetryConfig {
    TelemetryConfig {
        level: config.log.level.clone(),
        json_output: config.log.json_output,
    }
}

pub fn load(paths: &HodosPaths) -> Result<HodosConfig> {
    let resolved = load_config(paths).context("failed to load configuration")?;
    tracing::debug!(path = %resolved.path.display(), format = ?resolved.format, "loaded configuration");
    Ok(resolved.config)
}

/// Supervisor for the service described by `config`. Without a config
/// (stop and status) only the registry side is meaningful.
pub fn supervisor(paths: &HodosPaths, config: Option<&HodosConfig>) -> Result<ServiceSupervisor> {
    let port = config.map_or(DEFAULT_PORT, |c| c.port);
    let mut descriptor = StartupDescriptor::new(port, paths.home());
    if let Some(host) = config.and_then(|c| c.host.as_deref()) {
        descriptor = descriptor.with_host(host);
    }

    let executable = config.and_then(|c| c.service.executable.clone());
    let launch = LaunchSpec::service(executable, descriptor)?;
    Ok(ServiceSupervisor::new(
        ProcessRegistry::from_paths(paths),
        launch,
    ))
}

pub async fn run_start(paths: &HodosPaths, detach: bool) -> Result<()> {
    let registry = ProcessRegistry::from_paths(paths);
    if let Some(pid) = registry.read_pid().filter(|_| registry.is_running()) {
        println!("{} (pid {})", "hodos is already running".yellow(), pid);
        return Ok(());
    }

    let config = load(paths)?;

    if detach {
        let mut supervisor = supervisor(paths, Some(&config))?;
        let outcome = supervisor.ensure_running().await?;
        let pid = match outcome {
            EnsureOutcome::Started(pid) | EnsureOutcome::AlreadyRunning(pid) => pid,
        };
        println!(
            "{} on port {} (pid {})",
            "hodos started".green().bold(),
            config.port,
            pid.map_or_else(|| "?".to_string(), |p| p.to_string())
        );
        return Ok(());
    }

    paths
        .ensure_dirs()
        .with_context(|| format!("failed to create {}", paths.home().display()))?;

    let telemetry = telemetry_config(&config);
    // Held until `serve` returns so buffered log lines are written out.
    let _log_guard = if std::io::stderr().is_terminal() {
        hodos_telemetry::init_subscriber(&telemetry);
        None
    } else {
        Some(
            hodos_telemetry::init_file_subscriber(&telemetry, &paths.service_log_file())
                .context("failed to open service log")?,
        )
    };

    let mut effective = config.clone();
    if let Some(port) = StartupDescriptor::port_override() {
        effective.port = port;
    }
    if let Some(host) = StartupDescriptor::host_override() {
        effective.host = Some(host);
    }

    let bind = effective.bind_host();
    if bind.forced_loopback {
        tracing::warn!(
            requested = ?effective.host,
            host = %bind.host,
            "no api_key configured, refusing to listen beyond loopback"
        );
    }

    serve(
        &effective,
        paths,
        ServeOptions {
            host: bind.host,
            port: effective.port,
            registry: Some(registry),
        },
    )
    .await
}

fn report_stop(outcome: &StopOutcome) {
    match *outcome {
        StopOutcome::Stopped {
            pid,
            signalled: true,
        } => println!("{} (pid {})", "hodos stopped".green().bold(), pid),
        StopOutcome::Stopped {
            pid,
            signalled: false,
        } => println!(
            "{} (pid {} was not running)",
            "removed stale marker".yellow(),
            pid
        ),
        StopOutcome::NotRunning => println!("{}", "hodos is not running".yellow()),
    }
}

pub fn run_stop(paths: &HodosPaths) -> Result<()> {
    let config = load(paths).ok();
    let mut supervisor = supervisor(paths, config.as_ref())?;

    report_stop(&supervisor.stop());
    Ok(())
}

pub async fn run_restart(paths: &HodosPaths) -> Result<()> {
    let config = load(paths)?;
    let mut supervisor = supervisor(paths, Some(&config))?;

    let (stopped, _) = supervisor.restart().await?;
    if stopped != StopOutcome::NotRunning {
        report_stop(&stopped);
    }

    if !supervisor.wait_until_running().await {
        bail!(
            "service did not start within {:?}",
            supervisor.policy().timeout
        );
    }

    let pid = supervisor.registry().read_pid();
    println!(
        "{} on port {} (pid {})",
        "hodos restarted".green().bold(),
        config.port,
        pid.map_or_else(|| "?".to_string(), |p| p.to_string())
    );
    Ok(())
}

pub fn run_status(paths: &HodosPaths) -> Result<()> {
    let config = load(paths).ok();
    let port = config.as_ref().map_or(DEFAULT_PORT, |c| c.port);
    let status = supervisor(paths, config.as_ref())?.status();

    println!("{}", "─".repeat(40).dimmed());
    if status.running {
        println!("{}: {}", "Status".cyan(), "running".green().bold());
    } else {
        println!("{}: {}", "Status".cyan(), "not running".red().bold());
    }
    if let Some(pid) = status.pid.filter(|_| status.running) {
        println!("{}: {}", "PID".cyan(), pid);
    }
    println!("{}: {}", "Port".cyan(), port);
    if status.running {
        println!(
            "{}: {}",
            "Endpoint".cyan(),
            format!("http://127.0.0.1:{}", port).yellow()
        );
    }
    println!("{}: {}", "Marker".cyan(), status.marker.display());
    println!("{}: {}", "Sessions".cyan(), status.reference_count);
    println!("{}", "─".repeat(40).dimmed());

    if config.is_none() {
        println!(
            "{}",
            format!(
                "No usable configuration found in {}",
                paths.home().display()
            )
            .dimmed()
        );
    }
    Ok(())
}
