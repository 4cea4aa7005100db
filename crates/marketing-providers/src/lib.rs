pub mod credentials;
mod http;
pub mod sailthru;

pub use sailthru::SailthruClient;

use marketing_core::config::SyncConfiguration;

/// Builds the provider client described by the configuration.
pub fn client_for(config: &SyncConfiguration) -> anyhow::Result<SailthruClient> {
    let secret = credentials::resolve_secret(config)?;
    SailthruClient::new(
        &config.api_url,
        &config.api_key,
        &secret,
        std::time::Duration::from_secs(config.request_timeout_secs),
    )
}
