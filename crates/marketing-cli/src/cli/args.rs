use super::*;

#[derive(Parser)]
#[command(name = "marketing-sync", author, version, about)]
pub(super) struct Cli {
    #[arg(long, global = true, help = "Path to the sync configuration file")]
    pub(super) config: Option<PathBuf>,
    #[command(subcommand)]
    pub(super) command: Commands,
}

#[derive(clap::Subcommand)]
pub(super) enum Commands {
    #[command(about = "Manage the sync configuration")]
    Config(ConfigArgs),
    #[command(about = "Manage the provider API secret in the OS keyring")]
    Credentials(CredentialsArgs),
    #[command(about = "Push changed user fields to the marketing provider")]
    SyncUser(SyncUserArgs),
    #[command(about = "Rename a user's email address at the marketing provider")]
    ChangeEmail(ChangeEmailArgs),
    #[command(about = "Manage provider user lists")]
    List(ListArgs),
    #[command(about = "Fetch the tracking cookie for a user")]
    Cookie(CookieArgs),
    #[command(about = "Run queued sync requests from a JSONL file or stdin")]
    Worker(WorkerArgs),
    #[command(about = "Remove Mac OS metadata files for all courses in the content store")]
    CleanupAssets(CleanupAssetsArgs),
}

#[derive(Parser)]
pub(super) struct ConfigArgs {
    #[command(subcommand)]
    pub(super) command: ConfigCommands,
}

#[derive(clap::Subcommand)]
pub(super) enum ConfigCommands {
    #[command(about = "Write a config file with defaults")]
    Init(ConfigInitArgs),
    #[command(about = "Print the current config")]
    Show,
    #[command(about = "Set a single config field")]
    Set(ConfigSetArgs),
}

#[derive(Parser)]
pub(super) struct ConfigInitArgs {
    #[arg(long)]
    pub(super) api_key: Option<String>,
    #[arg(long, help = "Enable syncing right away")]
    pub(super) enable: bool,
    #[arg(long, help = "Overwrite an existing config file")]
    pub(super) force: bool,
}

#[derive(Parser)]
pub(super) struct ConfigSetArgs {
    #[arg(long)]
    pub(super) key: String,
    #[arg(long)]
    pub(super) value: String,
}

#[derive(Parser)]
pub(super) struct CredentialsArgs {
    #[command(subcommand)]
    pub(super) command: CredentialsCommands,
}

#[derive(clap::Subcommand)]
pub(super) enum CredentialsCommands {
    #[command(about = "Store the API secret for the configured API key")]
    Set(SetSecretArgs),
    #[command(about = "Remove the stored API secret")]
    Delete,
}

#[derive(Parser)]
pub(super) struct SetSecretArgs {
    #[arg(long)]
    pub(super) secret: String,
}

#[derive(Parser)]
pub(super) struct SyncUserArgs {
    #[arg(long)]
    pub(super) email: String,
    #[arg(long = "field", value_name = "NAME=VALUE", help = "Changed field; repeatable")]
    pub(super) fields: Vec<String>,
    #[arg(long, help = "Treat as a registration: assign a list and send the welcome email")]
    pub(super) new_user: bool,
    #[arg(long, requires = "site_domain")]
    pub(super) site_id: Option<u64>,
    #[arg(long, requires = "site_id")]
    pub(super) site_domain: Option<String>,
    #[arg(long)]
    pub(super) site_name: Option<String>,
    #[arg(long, default_value_t = 300, help = "Stop waiting for pending retries after this long")]
    pub(super) max_wait_secs: u64,
}

#[derive(Parser)]
pub(super) struct ChangeEmailArgs {
    #[arg(long, help = "New email address")]
    pub(super) email: String,
    #[arg(long)]
    pub(super) old_email: String,
    #[arg(long, default_value_t = 300, help = "Stop waiting for pending retries after this long")]
    pub(super) max_wait_secs: u64,
}

#[derive(Parser)]
pub(super) struct ListArgs {
    #[command(subcommand)]
    pub(super) command: ListCommands,
}

#[derive(clap::Subcommand)]
pub(super) enum ListCommands {
    #[command(about = "Print the provider's user lists")]
    Show,
    #[command(about = "Find a user list by name, creating it when missing")]
    Ensure(EnsureListArgs),
}

#[derive(Parser)]
pub(super) struct EnsureListArgs {
    #[arg(long)]
    pub(super) name: String,
}

#[derive(Parser)]
pub(super) struct CookieArgs {
    #[arg(long)]
    pub(super) email: String,
    #[arg(long, help = "Value of the anonymous_interest cookie")]
    pub(super) interest: Option<String>,
}

#[derive(Parser)]
pub(super) struct WorkerArgs {
    #[arg(long, help = "JSONL file of sync requests; reads stdin when omitted")]
    pub(super) input: Option<PathBuf>,
    #[arg(long, default_value_t = 4)]
    pub(super) jobs: usize,
    #[arg(
        long,
        help = "Stop waiting for pending retries after this long; waits indefinitely when omitted"
    )]
    pub(super) max_wait_secs: Option<u64>,
}

#[derive(Parser)]
pub(super) struct CleanupAssetsArgs {
    #[arg(long, help = "Content store root; defaults to the platform data dir")]
    pub(super) root: Option<PathBuf>,
}
