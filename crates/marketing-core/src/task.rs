use crate::config::SyncConfiguration;
use crate::lists::{ListCache, list_for_new_user};
use crate::model::{SiteInfo, SyncJob, SyncRequest, UserChangeEvent, map_changes};
use crate::provider::{ErrorKind, MarketingClient, ProviderError};
use serde_json::{Value, json};
use thiserror::Error;
use time::OffsetDateTime;
use time::macros::format_description;
use tracing::{error, info, warn};

pub trait Clock: Send + Sync {
    fn now_utc(&self) -> OffsetDateTime;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now_utc(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

#[derive(Debug, Error)]
pub enum RetryError {
    #[error("sync queue is closed")]
    QueueClosed,
}

/// Re-dispatches a job as a fresh invocation with the given attempt number.
pub trait Retrier: Send + Sync {
    fn schedule_retry(&self, attempt: u32, job: SyncJob) -> Result<(), RetryError>;
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SyncOutcome {
    Noop,
    Done,
    Retrying { attempt: u32 },
    Failed,
}

pub struct TaskContext<'a> {
    pub config: &'a SyncConfiguration,
    pub client: &'a dyn MarketingClient,
    pub retrier: &'a dyn Retrier,
    pub lists: &'a ListCache,
    pub clock: &'a dyn Clock,
}

pub async fn run_job(ctx: &TaskContext<'_>, job: SyncJob) -> SyncOutcome {
    let attempt = job.attempt;
    match job.request {
        SyncRequest::UpdateUser {
            event,
            site,
            new_user,
        } => sync_user(ctx, &event, site.as_ref(), new_user, attempt).await,
        SyncRequest::UpdateEmail {
            new_email,
            old_email,
        } => sync_email_change(ctx, &new_email, &old_email, attempt).await,
    }
}

pub async fn sync_user(
    ctx: &TaskContext<'_>,
    event: &UserChangeEvent,
    site: Option<&SiteInfo>,
    new_user: bool,
    attempt: u32,
) -> SyncOutcome {
    if !ctx.config.enabled {
        return SyncOutcome::Noop;
    }

    let mut renamed = None;
    if let Some((old_email, new_email)) = email_rename(event) {
        if let Err(err) = ctx.client.post("user", rename_params(old_email, new_email)).await {
            error!(
                email = %new_email,
                old_email = %old_email,
                code = ?err.code(),
                error = %err,
                "failed to rename user in marketing provider"
            );
            let job = update_job(event, site, new_user, attempt);
            return retry_or_fail(ctx, job, &err);
        }
        info!(email = %new_email, old_email = %old_email, "user email renamed");
        renamed = Some(after_rename(event, new_email));
    }
    let event = renamed.as_ref().unwrap_or(event);
    if renamed.is_some() && event.changes.is_empty() && !new_user {
        return SyncOutcome::Done;
    }
    let job = || update_job(event, site, new_user, attempt);

    let params = user_params(ctx, event, site, new_user).await;
    if let Err(err) = ctx.client.post("user", params).await {
        error!(
            email = %event.email,
            code = ?err.code(),
            error = %err,
            "failed to add/update user in marketing provider"
        );
        return retry_or_fail(ctx, job(), &err);
    }

    let template = match ctx.config.welcome_template() {
        Some(template) if new_user => template,
        _ => return SyncOutcome::Done,
    };
    let params = welcome_params(ctx, &event.email, template);
    if let Err(err) = ctx.client.post("send", params).await {
        error!(
            email = %event.email,
            code = ?err.code(),
            error = %err,
            "failed to schedule welcome email in marketing provider"
        );
        return retry_or_fail(ctx, job(), &err);
    }
    info!(email = %event.email, template, "welcome email scheduled");
    SyncOutcome::Done
}

pub async fn sync_email_change(
    ctx: &TaskContext<'_>,
    new_email: &str,
    old_email: &str,
    attempt: u32,
) -> SyncOutcome {
    if !ctx.config.enabled || new_email == old_email {
        return SyncOutcome::Noop;
    }
    match ctx.client.post("user", rename_params(old_email, new_email)).await {
        Ok(_) => SyncOutcome::Done,
        Err(err) => {
            error!(
                email = %new_email,
                old_email = %old_email,
                code = ?err.code(),
                error = %err,
                "failed to update user email in marketing provider"
            );
            let job = SyncJob {
                request: SyncRequest::UpdateEmail {
                    new_email: new_email.to_string(),
                    old_email: old_email.to_string(),
                },
                attempt,
            };
            retry_or_fail(ctx, job, &err)
        }
    }
}

fn update_job(
    event: &UserChangeEvent,
    site: Option<&SiteInfo>,
    new_user: bool,
    attempt: u32,
) -> SyncJob {
    SyncJob {
        request: SyncRequest::UpdateUser {
            event: event.clone(),
            site: site.cloned(),
            new_user,
        },
        attempt,
    }
}

/// `(old, new)` when the event moves the user to a different email address.
fn email_rename(event: &UserChangeEvent) -> Option<(&str, &str)> {
    if let Some(old_email) = event.renamed_from() {
        return Some((old_email, event.email.as_str()));
    }
    event
        .changes
        .get("email")
        .and_then(Value::as_str)
        .filter(|new_email| *new_email != event.email)
        .map(|new_email| (event.email.as_str(), new_email))
}

// The same event keyed by the new address, with the rename itself consumed.
fn after_rename(event: &UserChangeEvent, new_email: &str) -> UserChangeEvent {
    let mut changes = event.changes.clone();
    changes.remove("email");
    UserChangeEvent {
        email: new_email.to_string(),
        previous_email: None,
        changes,
    }
}

fn rename_params(old_email: &str, new_email: &str) -> Value {
    json!({
        "id": old_email,
        "key": "email",
        "keysconflict": "merge",
        "keys": {"email": new_email},
    })
}

fn retry_or_fail(ctx: &TaskContext<'_>, job: SyncJob, err: &ProviderError) -> SyncOutcome {
    if err.kind(&ctx.config.retryable_error_codes) == ErrorKind::Permanent {
        return SyncOutcome::Failed;
    }
    if job.attempt >= ctx.config.max_retries {
        warn!(
            task = job.request.label(),
            email = %job.request.email(),
            attempts = job.attempt + 1,
            max_retries = ctx.config.max_retries,
            "retries exhausted"
        );
        return SyncOutcome::Failed;
    }
    let attempt = job.attempt + 1;
    match ctx.retrier.schedule_retry(attempt, job) {
        Ok(()) => SyncOutcome::Retrying { attempt },
        Err(retry_err) => {
            warn!(error = %retry_err, "unable to schedule retry");
            SyncOutcome::Failed
        }
    }
}

async fn user_params(
    ctx: &TaskContext<'_>,
    event: &UserChangeEvent,
    site: Option<&SiteInfo>,
    new_user: bool,
) -> Value {
    let mut vars = map_changes(&event.changes);
    vars.insert(
        "last_changed_time".into(),
        Value::from(ctx.clock.now_utc().unix_timestamp()),
    );
    let mut params = json!({"id": event.email, "key": "email", "vars": vars});
    if new_user
        && let Some(list) = list_for_new_user(ctx.client, ctx.lists, ctx.config, site).await
    {
        let mut lists = serde_json::Map::new();
        lists.insert(list, Value::from(1));
        params["lists"] = Value::Object(lists);
    }
    params
}

fn welcome_params(ctx: &TaskContext<'_>, email: &str, template: &str) -> Value {
    let delay = time::Duration::seconds(
        i64::try_from(ctx.config.welcome_send_delay_secs).unwrap_or(i64::MAX),
    );
    json!({
        "email": email,
        "template": template,
        "schedule_time": schedule_time(ctx.clock.now_utc().saturating_add(delay)),
    })
}

pub fn schedule_time(at: OffsetDateTime) -> String {
    at.format(format_description!(
        "[year]-[month]-[day]T[hour]:[minute]:[second]Z"
    ))
    .unwrap_or_else(|_| at.unix_timestamp().to_string())
}
