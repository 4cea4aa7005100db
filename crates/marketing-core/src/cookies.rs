use crate::config::SyncConfiguration;
use crate::provider::MarketingClient;
use serde_json::{Value, json};
use std::time::{Duration, Instant};
use time::macros::format_description;
use time::{Date, OffsetDateTime};
use tracing::{error, info};

pub const TRACKING_COOKIE: &str = "sailthru_hid";

pub fn login_cookie_params(email: &str, anonymous_interest: Option<&str>, today: Date) -> Value {
    let last_login = today
        .format(format_description!("[year]-[month]-[day]"))
        .unwrap_or_else(|_| today.to_string());
    let mut params = json!({
        "id": email,
        "fields": {"keys": 1},
        "vars": {"last_login_date": last_login},
    });
    if let Some(interest) = anonymous_interest {
        params["cookies"] = json!({"anonymous_interest": interest});
    }
    params
}

/// Looks up the provider's tracking cookie for a user. Never fails; `None` on any problem.
pub async fn fetch_tracking_cookie(
    client: &dyn MarketingClient,
    config: &SyncConfiguration,
    user_email: &str,
    params: Value,
) -> Option<String> {
    if !config.enabled {
        return None;
    }
    info!(
        email = user_email,
        cookies = ?params.get("cookies"),
        "requesting tracking cookie"
    );
    let started_at = OffsetDateTime::now_utc();
    let started = Instant::now();
    let result = tokio::time::timeout(
        Duration::from_millis(config.cookie_timeout_ms),
        client.post("user", params),
    )
    .await;
    let elapsed = started.elapsed();
    let ended_at = OffsetDateTime::now_utc();
    info!(
        "Started at {} and ended at {}, time spent:{} milliseconds",
        format_timestamp(started_at),
        format_timestamp(ended_at),
        elapsed.as_millis()
    );

    let response = match result {
        Ok(Ok(response)) => response,
        Ok(Err(err)) => {
            error!(email = user_email, error = %err, "failed to obtain tracking cookie");
            return None;
        }
        Err(_) => {
            error!(
                email = user_email,
                timeout_ms = config.cookie_timeout_ms,
                "timed out obtaining tracking cookie"
            );
            return None;
        }
    };
    let cookie = response
        .get("keys")
        .and_then(|keys| keys.get("cookie"))
        .and_then(Value::as_str);
    match cookie {
        Some(cookie) => Some(cookie.to_string()),
        None => {
            error!(email = user_email, "no tracking cookie returned");
            None
        }
    }
}

fn format_timestamp(at: OffsetDateTime) -> String {
    at.format(format_description!(
        "[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:6]"
    ))
    .unwrap_or_else(|_| at.unix_timestamp().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeClient, LogCapture, api_error, body, transport_error};
    use time::macros::date;

    fn config() -> SyncConfiguration {
        SyncConfiguration {
            enabled: true,
            ..SyncConfiguration::default()
        }
    }

    fn params() -> Value {
        login_cookie_params("test@edx.org", Some("cookie_content"), date!(2017 - 05 - 01))
    }

    #[test]
    fn login_params_include_interest_cookie() {
        assert_eq!(
            params(),
            json!({
                "id": "test@edx.org",
                "fields": {"keys": 1},
                "vars": {"last_login_date": "2017-05-01"},
                "cookies": {"anonymous_interest": "cookie_content"},
            })
        );
        let params = login_cookie_params("test@edx.org", None, date!(2017 - 05 - 01));
        assert!(params.get("cookies").is_none());
    }

    #[tokio::test]
    async fn cookie_is_extracted_from_keys() {
        let logs = LogCapture::default();
        let _guard = logs.install();
        let client =
            FakeClient::new().post_returns(body(json!({"keys": {"cookie": "test_cookie"}})));
        let cookie = fetch_tracking_cookie(&client, &config(), "test@edx.org", params()).await;
        assert_eq!(cookie.as_deref(), Some("test_cookie"));
        let call = client.last_post();
        assert_eq!(call.resource, "user");
        assert_eq!(call.params, params());
        assert!(
            logs.messages()
                .iter()
                .any(|message| {
                    message.starts_with("Started at ") && message.ends_with(" milliseconds")
                })
        );
    }

    #[tokio::test]
    async fn lookup_is_logged_with_and_without_interest_cookie() {
        let logs = LogCapture::default();
        let _guard = logs.install();
        let client = FakeClient::new().post_returns(body(json!({"keys": {"cookie": "c"}})));
        let bare = login_cookie_params("test@edx.org", None, date!(2017 - 05 - 01));

        fetch_tracking_cookie(&client, &config(), "test@edx.org", params()).await;
        fetch_tracking_cookie(&client, &config(), "test@edx.org", bare).await;

        let requested = logs
            .messages()
            .iter()
            .filter(|message| message.as_str() == "requesting tracking cookie")
            .count();
        assert_eq!(requested, 2);
        assert_eq!(logs.errors(), 0);
    }

    #[tokio::test]
    async fn error_paths_return_none() {
        let client =
            FakeClient::new().post_returns(body(json!({"keys": {"cookiexx": "test_cookie"}})));
        assert!(fetch_tracking_cookie(&client, &config(), "a@b.c", params()).await.is_none());

        let client = FakeClient::new().post_returns(api_error(99));
        assert!(fetch_tracking_cookie(&client, &config(), "a@b.c", params()).await.is_none());

        let client = FakeClient::new().post_returns(transport_error());
        assert!(fetch_tracking_cookie(&client, &config(), "a@b.c", params()).await.is_none());
    }

    #[tokio::test]
    async fn disabled_config_skips_lookup() {
        let client = FakeClient::new();
        let config = SyncConfiguration::default();
        assert!(fetch_tracking_cookie(&client, &config, "a@b.c", params()).await.is_none());
        assert!(client.calls().is_empty());
    }
}
