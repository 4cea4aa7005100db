use super::*;

pub(super) async fn handle_list(
    args: ListArgs,
    config_path: &Path,
    audit: &AuditLogger,
) -> anyhow::Result<()> {
    let config = SyncConfiguration::load(config_path)?;
    let client = client_for(&config).context("build provider client")?;
    match args.command {
        ListCommands::Show => {
            let lists = fetch_list_map(&client).await;
            let mut names: Vec<_> = lists.into_values().collect();
            names.sort_by(|a, b| a.name.cmp(&b.name));
            for list in names {
                println!(
                    "{}\t{}",
                    list.name,
                    list.list_id.as_deref().unwrap_or("-")
                );
            }
            Ok(())
        }
        ListCommands::Ensure(args) => {
            let cache = ListCache::new();
            let result = match resolve_or_create_user_list(&client, &cache, &args.name).await {
                Some(list) => {
                    println!(
                        "List ready: {} ({})",
                        list.name,
                        list.list_id.as_deref().unwrap_or("no id")
                    );
                    Ok(())
                }
                None => Err(anyhow::anyhow!("could not resolve or create list {}", args.name)),
            };
            record_outcome(
                audit,
                "list.ensure",
                &result,
                Some(serde_json::json!({"list": args.name})),
            );
            result
        }
    }
}

pub(super) async fn handle_cookie(
    args: CookieArgs,
    config_path: &Path,
    audit: &AuditLogger,
) -> anyhow::Result<()> {
    let config = SyncConfiguration::load(config_path)?;
    if !config.enabled {
        println!("Sync is disabled; no cookie requested");
        return Ok(());
    }
    let client = client_for(&config).context("build provider client")?;
    let today = time::OffsetDateTime::now_utc().date();
    let params = login_cookie_params(&args.email, args.interest.as_deref(), today);
    let cookie = fetch_tracking_cookie(&client, &config, &args.email, params).await;
    let status = if cookie.is_some() {
        AuditStatus::Ok
    } else {
        AuditStatus::Skipped
    };
    let context = AuditContext {
        task: Some("cookie".to_string()),
        email: Some(args.email.clone()),
        attempt: None,
    };
    if let Err(err) = audit.record_with_context("command.cookie", status, context, None, None) {
        warn!(error = %err, "failed to write audit entry");
    }
    match cookie {
        Some(cookie) => println!("{TRACKING_COOKIE}={cookie}"),
        None => println!("No {TRACKING_COOKIE} cookie returned"),
    }
    Ok(())
}

/// Never fails; problems are only reported through the log.
pub(super) fn handle_cleanup_assets(args: CleanupAssetsArgs, audit: Option<&AuditLogger>) {
    let root = match args.root {
        Some(root) => root,
        None => match default_content_root() {
            Ok(root) => root,
            Err(err) => {
                info!("Error:");
                info!("{err}");
                return;
            }
        },
    };
    let deleted = cleanup_assets(&FsContentStore::new(root.clone()));
    let status = if deleted.is_some() {
        AuditStatus::Ok
    } else {
        AuditStatus::Failed
    };
    let details = serde_json::json!({"root": root.display().to_string(), "deleted": deleted});
    if let Some(audit) = audit
        && let Err(err) = audit.record("command.cleanup_assets", status, Some(details), None)
    {
        warn!(error = %err, "failed to write audit entry");
    }
}
