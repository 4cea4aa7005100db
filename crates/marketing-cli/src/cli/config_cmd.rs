use super::*;

pub(super) fn handle_config(
    args: ConfigArgs,
    config_path: &Path,
    audit: &AuditLogger,
) -> anyhow::Result<()> {
    match args.command {
        ConfigCommands::Init(args) => handle_init(args, config_path, audit),
        ConfigCommands::Show => handle_show(config_path),
        ConfigCommands::Set(args) => handle_set(args, config_path, audit),
    }
}

fn handle_init(
    args: ConfigInitArgs,
    config_path: &Path,
    audit: &AuditLogger,
) -> anyhow::Result<()> {
    let result: anyhow::Result<()> = (|| {
        if config_path.exists() && !args.force {
            anyhow::bail!(
                "config already exists at {} (use --force to overwrite)",
                config_path.display()
            );
        }
        let mut config = SyncConfiguration::default();
        if let Some(api_key) = args.api_key {
            config.api_key = api_key;
        }
        config.enabled = args.enable;
        config.save(config_path)?;
        println!("Config saved to {}", config_path.display());
        Ok(())
    })();
    record_outcome(audit, "config.init", &result, None);
    result
}

fn handle_show(config_path: &Path) -> anyhow::Result<()> {
    let mut config = SyncConfiguration::load(config_path)?;
    if config.api_secret.is_some() {
        config.api_secret = Some("<redacted>".to_string());
    }
    let rendered = serde_json::to_string_pretty(&config).context("serialize config")?;
    println!("{rendered}");
    Ok(())
}

fn handle_set(args: ConfigSetArgs, config_path: &Path, audit: &AuditLogger) -> anyhow::Result<()> {
    let result: anyhow::Result<()> = (|| {
        let mut config = SyncConfiguration::load(config_path)?;
        config.set_field(&args.key, &args.value)?;
        config.save(config_path)?;
        println!("Set {} in {}", args.key, config_path.display());
        Ok(())
    })();
    record_outcome(
        audit,
        "config.set",
        &result,
        Some(serde_json::json!({"key": args.key})),
    );
    result
}

pub(super) fn handle_credentials(
    args: CredentialsArgs,
    config_path: &Path,
    audit: &AuditLogger,
) -> anyhow::Result<()> {
    let config = SyncConfiguration::load(config_path)?;
    if config.api_key.is_empty() {
        anyhow::bail!("api_key is not configured; run `config set --key api_key` first");
    }
    let (event, result) = match args.command {
        CredentialsCommands::Set(args) => (
            "credentials.set",
            credentials::set_secret(&config.api_key, &args.secret),
        ),
        CredentialsCommands::Delete => (
            "credentials.delete",
            credentials::delete_secret(&config.api_key),
        ),
    };
    if result.is_ok() {
        println!(
            "Keyring entry updated for {}",
            credentials::account_for(&config.api_key)
        );
    }
    record_outcome(audit, event, &result, None);
    result
}
