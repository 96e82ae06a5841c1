//! `linkwatch`: watch camera drop directories and record inspection images.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use anyhow::{Context, bail};
use clap::Parser;
use parking_lot::RwLock;

use linkwatch::cli::Cli;
use linkwatch::config::{CONFIG_DIR, SETTINGS_FILE, Settings};
use linkwatch::inspection::{DetectTarget, JsonInspectionLog, ReloadTarget};
use linkwatch::watcher::{ExecutionMode, FileEvent, FileWatcher, StopHandle};
use linkwatch::{log_event, logging};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let settings_path = match &cli.config {
        Some(path) => path.clone(),
        None => Settings::find_workspace_config()
            .unwrap_or_else(|| PathBuf::from(CONFIG_DIR).join(SETTINGS_FILE)),
    };
    let settings_path = std::path::absolute(&settings_path)
        .with_context(|| format!("resolving {}", settings_path.display()))?;

    let settings = Settings::load_from(&settings_path)
        .with_context(|| format!("loading {}", settings_path.display()))?;
    logging::init_with_config(&settings.logging);
    settings
        .validate()
        .with_context(|| format!("invalid settings in {}", settings_path.display()))?;
    log_event!("main", "loaded settings", "{}", settings_path.display());

    for path in &cli.paths {
        if !path.is_dir() {
            bail!("Could not locate the directory {}", path.display());
        }
    }

    let recursive = cli.recursive || settings.watcher.recursive;
    let mode = ExecutionMode::from_synchronous(cli.synchronous || settings.watcher.synchronous);

    let mut paths = cli.paths.clone();
    let config_dir = settings_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(CONFIG_DIR));
    if config_dir.is_dir() {
        paths.push(config_dir.clone());
    } else {
        tracing::warn!(
            "[main] config directory {} does not exist; settings will not be reloaded",
            config_dir.display()
        );
    }

    let watcher = FileWatcher::builder()
        .paths(paths)
        .recursive(recursive)
        .mode(mode)
        .poll_interval(settings.watcher.poll_interval())
        .build()
        .context("starting watcher")?;

    let log_path = settings.inspection.resolved_log_path(&config_dir);
    let log = Arc::new(
        JsonInspectionLog::open(&log_path)
            .with_context(|| format!("opening inspection log {}", log_path.display()))?,
    );
    let settings = Arc::new(RwLock::new(settings));

    watcher.register_target(
        ReloadTarget::new(Arc::clone(&settings), &settings_path),
        FileEvent::CloseWrite,
        None,
    )?;
    watcher.register_target(
        DetectTarget::new(Arc::clone(&settings), log, &config_dir),
        FileEvent::CloseWrite,
        None,
    )?;

    stop_on_ctrl_c(watcher.stop_handle())?;

    log_event!("main", "starting filewatcher");
    watcher.start()?;
    Ok(())
}

/// Stop the watcher on Ctrl-C from a helper thread running a small runtime.
fn stop_on_ctrl_c(handle: StopHandle) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("building signal runtime")?;

    thread::Builder::new()
        .name("linkwatch-signal".to_string())
        .spawn(move || {
            runtime.block_on(async {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => {
                        log_event!("main", "interrupt received");
                        handle.stop();
                    }
                    Err(e) => tracing::error!("[main] failed to listen for Ctrl-C: {e}"),
                }
            });
        })
        .context("spawning signal thread")?;

    Ok(())
}
