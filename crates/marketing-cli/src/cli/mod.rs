use crate::logging;
use anyhow::Context;
use clap::Parser;
use marketing_core::audit::{AuditContext, AuditLogger, AuditStatus};
use marketing_core::config::{
    ConfigFile, SyncConfiguration, default_config_path, default_content_root,
};
use marketing_core::content_store::{FsContentStore, cleanup_assets};
use marketing_core::cookies::{TRACKING_COOKIE, fetch_tracking_cookie, login_cookie_params};
use marketing_core::handlers::Dispatcher;
use marketing_core::lists::{ListCache, fetch_list_map, resolve_or_create_user_list};
use marketing_core::model::{SiteInfo, SyncRequest, UserChangeEvent};
use marketing_core::queue::{QueueSummary, SyncQueue, WorkerDeps, WorkerPool};
use marketing_core::task::SystemClock;
use marketing_providers::{client_for, credentials};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

mod app;
mod args;
mod config_cmd;
mod misc_cmd;
mod sync_cmd;

use args::*;

use config_cmd::{handle_config, handle_credentials};
use misc_cmd::{handle_cleanup_assets, handle_cookie, handle_list};
use sync_cmd::{handle_change_email, handle_sync_user, handle_worker};

pub async fn run() -> anyhow::Result<()> {
    app::run().await
}

fn resolve_config_path(explicit: Option<&Path>) -> anyhow::Result<PathBuf> {
    match explicit {
        Some(path) => Ok(path.to_path_buf()),
        None => default_config_path(),
    }
}

fn record_outcome(
    audit: &AuditLogger,
    event: &str,
    result: &anyhow::Result<()>,
    details: Option<Value>,
) {
    let outcome = match result {
        Ok(()) => audit.record(event, AuditStatus::Ok, details, None),
        Err(err) => audit.record(event, AuditStatus::Failed, details, Some(&err.to_string())),
    };
    if let Err(err) = outcome {
        warn!(event, error = %err, "failed to write audit entry");
    }
}
