#[cfg(target_os = "windows")]
mod app;
mod cli;
#[cfg_attr(not(target_os = "windows"), allow(dead_code))]
mod frame_loop;
#[cfg_attr(not(target_os = "windows"), allow(dead_code))]
mod launch;
mod tracing_helper;

use std::{
    env::current_exe,
    path::{Path, PathBuf},
    process::ExitCode,
};

use anyhow::{anyhow, Result};
use clap::Parser;
use katanga_lib::config::{Settings, CONFIG_FILE_NAME};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::cli::Cli;

fn exe_dir() -> Result<PathBuf> {
    let exe = current_exe()?;
    let dir = exe
        .parent()
        .ok_or_else(|| anyhow!("{} has no parent directory", exe.display()))?;
    Ok(dir.to_owned())
}

fn report_fatal(err: &anyhow::Error) {
    error!("{:#}", err);
    #[cfg(target_os = "windows")]
    katanga_lib::win32::show_fatal_dialog(env!("CARGO_PKG_NAME"), &format!("{:#}", err));
    #[cfg(not(target_os = "windows"))]
    eprintln!("{}: {:#}", env!("CARGO_PKG_NAME"), err);
}

async fn cancel_on_ctrl_c(cancel: CancellationToken) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("Ctrl-C unavailable: {}", err);
        return;
    }
    info!("exit requested");
    cancel.cancel();
}

#[cfg(target_os = "windows")]
async fn run_platform(
    cli: &Cli,
    settings: Settings,
    exe_dir: &Path,
    cancel: CancellationToken,
) -> Result<()> {
    app::run(cli, settings, exe_dir, cancel).await
}

#[cfg(not(target_os = "windows"))]
async fn run_platform(
    _cli: &Cli,
    _settings: Settings,
    _exe_dir: &Path,
    _cancel: CancellationToken,
) -> Result<()> {
    Err(anyhow!("{} needs Windows", env!("CARGO_PKG_NAME")))
}

async fn run(cli: Cli) -> Result<()> {
    let exe_dir = exe_dir()?;
    tracing_helper::init_tracing(&exe_dir, concat!(env!("CARGO_PKG_NAME"), ".log"), true);
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| exe_dir.join(CONFIG_FILE_NAME));
    let settings = Settings::load(&config_path)?;

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_ctrl_c(cancel.clone()));
    run_platform(&cli, settings, &exe_dir, cancel).await
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            report_fatal(&err);
            ExitCode::FAILURE
        }
    }
}
