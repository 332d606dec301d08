// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Scale Invariant

// Generic modules (cross-platform)
mod fbge_edge;
mod fbgt_types;
mod fbgm_menu;
mod fbgw_watch;
mod fbgq_queue;
mod fbgo_open;
mod fbgb_bar;
mod fbgr_registry;
mod fbgf_config;

// Windows shell
#[cfg(windows)] mod fbws_shell;

use tracing::error;
use tracing_subscriber::EnvFilter;

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[cfg(not(windows))]
fn main() {
    init_logging();
    error!("FolderBar currently only supports Windows");
    std::process::exit(1);
}

#[cfg(windows)]
fn main() {
    init_logging();

    let instance = match single_instance::SingleInstance::new("folderbar-top-bar") {
        Ok(instance) => instance,
        Err(e) => {
            error!(error = %e, "could not create instance lock");
            std::process::exit(1);
        }
    };
    if !instance.is_single() {
        tracing::info!("another folder bar is already running");
        return;
    }

    let config_path = fbgf_config::config_path();
    let settings = fbgf_config::load_or_default();
    tracing::info!(root = ?settings.root, config = %config_path.display(), "starting folder bar");

    if let Err(e) = fbws_shell::run(settings, config_path) {
        error!(error = %e, "folder bar failed");
        std::process::exit(1);
    }
}
