use super::*;

pub async fn run() -> anyhow::Result<()> {
    let log_buffer = logging::LogBuffer::new(200);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(logging::LogLayer::new(log_buffer.clone()))
        .init();

    let cli = Cli::parse();
    let command = match cli.command {
        Commands::CleanupAssets(args) => {
            info!(command = "cleanup-assets", "Running command");
            let audit = AuditLogger::new()
                .inspect_err(|err| warn!(error = %err, "audit log unavailable"))
                .ok();
            handle_cleanup_assets(args, audit.as_ref());
            report_problems(&log_buffer);
            return Ok(());
        }
        command => command,
    };

    let audit = AuditLogger::new()?;
    let config_path = resolve_config_path(cli.config.as_deref())?;
    info!(
        command = command_label(&command),
        config = %config_path.display(),
        "Running command"
    );

    let result = match command {
        Commands::Config(args) => handle_config(args, &config_path, &audit),
        Commands::Credentials(args) => handle_credentials(args, &config_path, &audit),
        Commands::SyncUser(args) => handle_sync_user(args, &config_path, &audit).await,
        Commands::ChangeEmail(args) => handle_change_email(args, &config_path, &audit).await,
        Commands::List(args) => handle_list(args, &config_path, &audit).await,
        Commands::Cookie(args) => handle_cookie(args, &config_path, &audit).await,
        Commands::Worker(args) => handle_worker(args, &config_path, &audit).await,
        Commands::CleanupAssets(_) => Ok(()),
    };

    if let Err(err) = &result {
        let _ = audit.record("app.error", AuditStatus::Failed, None, Some(&err.to_string()));
    }
    report_problems(&log_buffer);

    result
}

fn report_problems(buffer: &logging::LogBuffer) {
    let problems = buffer.problems();
    if problems.is_empty() {
        return;
    }
    eprintln!("{} warning(s) or error(s) logged during this run:", problems.len());
    for entry in problems {
        eprintln!("  {}", entry.format_compact());
    }
}

fn command_label(command: &Commands) -> &'static str {
    match command {
        Commands::Config(_) => "config",
        Commands::Credentials(_) => "credentials",
        Commands::SyncUser(_) => "sync-user",
        Commands::ChangeEmail(_) => "change-email",
        Commands::List(_) => "list",
        Commands::Cookie(_) => "cookie",
        Commands::Worker(_) => "worker",
        Commands::CleanupAssets(_) => "cleanup-assets",
    }
}
