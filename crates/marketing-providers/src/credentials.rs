use anyhow::Context;
use keyring::Entry;
use marketing_core::config::SyncConfiguration;

const SERVICE: &str = "marketing-sync";

pub fn account_for(api_key: &str) -> String {
    format!("sailthru:{api_key}")
}

pub fn get_secret(api_key: &str) -> anyhow::Result<String> {
    let entry = Entry::new(SERVICE, &account_for(api_key)).context("open keyring entry")?;
    entry.get_password().context("read API secret from keyring")
}

pub fn set_secret(api_key: &str, secret: &str) -> anyhow::Result<()> {
    let entry = Entry::new(SERVICE, &account_for(api_key)).context("open keyring entry")?;
    entry
        .set_password(secret)
        .context("write API secret to keyring")
}

pub fn delete_secret(api_key: &str) -> anyhow::Result<()> {
    let entry = Entry::new(SERVICE, &account_for(api_key)).context("open keyring entry")?;
    entry
        .delete_credential()
        .context("delete API secret from keyring")
}

/// Secret from the config file when present, otherwise from the keyring.
pub fn resolve_secret(config: &SyncConfiguration) -> anyhow::Result<String> {
    if let Some(secret) = config
        .api_secret
        .as_deref()
        .filter(|secret| !secret.is_empty())
    {
        return Ok(secret.to_string());
    }
    if config.api_key.is_empty() {
        anyhow::bail!("api_key is not configured");
    }
    get_secret(&config.api_key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_secret_wins() {
        let config = SyncConfiguration {
            api_key: "key".to_string(),
            api_secret: Some("secret".to_string()),
            ..SyncConfiguration::default()
        };
        assert_eq!(resolve_secret(&config).unwrap(), "secret");
    }

    #[test]
    fn missing_key_is_an_error() {
        let config = SyncConfiguration::default();
        let err = resolve_secret(&config).unwrap_err();
        assert!(err.to_string().contains("api_key"));
    }

    #[test]
    fn account_is_namespaced() {
        assert_eq!(account_for("abc"), "sailthru:abc");
    }
}
