use super::*;
use std::io::Read;
use std::time::Duration;

pub(super) async fn handle_sync_user(
    args: SyncUserArgs,
    config_path: &Path,
    audit: &AuditLogger,
) -> anyhow::Result<()> {
    let mut event = UserChangeEvent::new(args.email.clone());
    for raw in &args.fields {
        let (field, value) = parse_field(raw)?;
        event = event.with_change(&field, value);
    }
    let site = site_from_args(args.site_id, args.site_domain, args.site_name);
    let request = SyncRequest::from_event(event, site, args.new_user);
    let max_wait = Some(Duration::from_secs(args.max_wait_secs));
    let result = run_and_report(config_path, audit, vec![request], 1, max_wait).await;
    record_outcome(
        audit,
        "command.sync_user",
        &result,
        Some(serde_json::json!({"email": args.email, "new_user": args.new_user})),
    );
    result
}

pub(super) async fn handle_change_email(
    args: ChangeEmailArgs,
    config_path: &Path,
    audit: &AuditLogger,
) -> anyhow::Result<()> {
    let request = SyncRequest::UpdateEmail {
        new_email: args.email.clone(),
        old_email: args.old_email.clone(),
    };
    let max_wait = Some(Duration::from_secs(args.max_wait_secs));
    let result = run_and_report(config_path, audit, vec![request], 1, max_wait).await;
    record_outcome(
        audit,
        "command.change_email",
        &result,
        Some(serde_json::json!({"email": args.email, "old_email": args.old_email})),
    );
    result
}

pub(super) async fn handle_worker(
    args: WorkerArgs,
    config_path: &Path,
    audit: &AuditLogger,
) -> anyhow::Result<()> {
    let result = async {
        let input = match &args.input {
            Some(path) => std::fs::read_to_string(path)
                .with_context(|| format!("read requests from {}", path.display()))?,
            None => {
                let mut input = String::new();
                std::io::stdin()
                    .read_to_string(&mut input)
                    .context("read requests from stdin")?;
                input
            }
        };
        let requests = parse_requests(&input)?;
        info!(requests = requests.len(), jobs = args.jobs, "starting sync worker");
        let max_wait = args.max_wait_secs.map(Duration::from_secs);
        run_and_report(config_path, audit, requests, args.jobs, max_wait).await
    }
    .await;
    record_outcome(
        audit,
        "command.worker",
        &result,
        Some(serde_json::json!({"jobs": args.jobs})),
    );
    result
}

async fn run_and_report(
    config_path: &Path,
    audit: &AuditLogger,
    requests: Vec<SyncRequest>,
    jobs: usize,
    max_wait: Option<Duration>,
) -> anyhow::Result<()> {
    let summary = run_requests(config_path, audit, requests, jobs, max_wait).await?;
    println!(
        "Sync complete: {} done, {} skipped, {} retried, {} failed",
        summary.done, summary.noop, summary.retried, summary.failed
    );
    if summary.failed > 0 {
        anyhow::bail!("{} sync task(s) failed", summary.failed);
    }
    Ok(())
}

async fn run_requests(
    config_path: &Path,
    audit: &AuditLogger,
    requests: Vec<SyncRequest>,
    jobs: usize,
    max_wait: Option<Duration>,
) -> anyhow::Result<QueueSummary> {
    let config = SyncConfiguration::load(config_path)?;
    if !config.enabled {
        info!(requests = requests.len(), "sync disabled; skipping requests");
        return Ok(QueueSummary {
            noop: u32::try_from(requests.len()).unwrap_or(u32::MAX),
            ..QueueSummary::default()
        });
    }
    let client = client_for(&config).context("build provider client")?;
    let (queue, receiver) = SyncQueue::new(config.retry_delay_secs);
    let deps = WorkerDeps {
        config: Arc::new(ConfigFile::new(config_path.to_path_buf())),
        client: Arc::new(client),
        clock: Arc::new(SystemClock),
        lists: ListCache::new(),
        audit: Some(audit.clone()),
    };
    let pool = WorkerPool::spawn(queue.clone(), receiver, deps, jobs);
    for request in requests {
        queue.dispatch(request);
    }
    if !wait_for_queue(&queue, max_wait).await {
        warn!(
            pending = queue.pending(),
            "gave up waiting for queued retries; they will not run"
        );
    }
    Ok(pool.shutdown().await)
}

/// Waits for the queue to drain. `false` when `max_wait` elapsed first.
pub(super) async fn wait_for_queue(queue: &SyncQueue, max_wait: Option<Duration>) -> bool {
    match max_wait {
        Some(limit) => tokio::time::timeout(limit, queue.wait_idle()).await.is_ok(),
        None => {
            queue.wait_idle().await;
            true
        }
    }
}

/// Parses `name=value`; the value is taken as JSON when it parses, otherwise as a string.
pub(super) fn parse_field(raw: &str) -> anyhow::Result<(String, Value)> {
    let (name, value) = raw
        .split_once('=')
        .with_context(|| format!("expected NAME=VALUE, got {raw:?}"))?;
    let name = name.trim();
    if name.is_empty() {
        anyhow::bail!("field name is empty in {raw:?}");
    }
    let value =
        serde_json::from_str::<Value>(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((name.to_string(), value))
}

pub(super) fn parse_requests(input: &str) -> anyhow::Result<Vec<SyncRequest>> {
    input
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            serde_json::from_str::<SyncRequest>(line)
                .with_context(|| format!("parse sync request on line {}", index + 1))
        })
        .collect()
}

pub(super) fn site_from_args(
    id: Option<u64>,
    domain: Option<String>,
    name: Option<String>,
) -> Option<SiteInfo> {
    let (id, domain) = (id?, domain?);
    Some(SiteInfo {
        id,
        name: name.unwrap_or_else(|| domain.clone()),
        domain,
    })
}

