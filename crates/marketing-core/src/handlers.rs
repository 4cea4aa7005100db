use crate::config::SyncConfiguration;
use crate::cookies::{TRACKING_COOKIE, fetch_tracking_cookie, login_cookie_params};
use crate::model::{SiteInfo, SyncRequest, UserChangeEvent, UserRecord, user_vars};
use crate::provider::MarketingClient;
use time::Date;
use tracing::{debug, info};

const WATCHED_TABLES: [&str; 3] = ["auth_user", "auth_userprofile", "user_api_userpreference"];

const WATCHED_FIELDS: [&str; 10] = [
    "username",
    "is_active",
    "name",
    "gender",
    "education",
    "age",
    "level_of_education",
    "year_of_birth",
    "country",
    "pref-lang",
];

/// Fire-and-forget hand-off of a sync request to the task runtime.
pub trait Dispatcher: Send + Sync {
    fn dispatch(&self, request: SyncRequest);
}

#[derive(Clone, Copy, Debug)]
pub struct FieldChange<'a> {
    pub table: &'a str,
    pub setting: &'a str,
    pub old_value: Option<&'a str>,
}

fn full_profile_event(user: &UserRecord, config: &SyncConfiguration) -> UserChangeEvent {
    UserChangeEvent {
        email: user.email.clone(),
        previous_email: None,
        changes: user_vars(user, &config.default_language),
    }
}

/// Returns whether a sync was dispatched. `None` stands for an anonymous user.
pub fn on_user_registered(
    config: &SyncConfiguration,
    user: Option<&UserRecord>,
    site: Option<SiteInfo>,
    dispatcher: &dyn Dispatcher,
) -> bool {
    if !config.enabled {
        return false;
    }
    let Some(user) = user else {
        return false;
    };
    dispatcher.dispatch(SyncRequest::UpdateUser {
        event: full_profile_event(user, config),
        site,
        new_user: true,
    });
    true
}

pub fn on_user_field_changed(
    config: &SyncConfiguration,
    user: Option<&UserRecord>,
    change: FieldChange<'_>,
    site: Option<SiteInfo>,
    dispatcher: &dyn Dispatcher,
) -> bool {
    let Some(user) = user else {
        return false;
    };
    if !WATCHED_TABLES.contains(&change.table) {
        return false;
    }
    if !config.enabled {
        return false;
    }
    if WATCHED_FIELDS.contains(&change.setting) {
        dispatcher.dispatch(SyncRequest::UpdateUser {
            event: full_profile_event(user, config),
            site,
            new_user: false,
        });
        return true;
    }
    if change.setting == "email" {
        let Some(old_email) = change.old_value else {
            debug!(email = %user.email, "email change without previous address");
            return false;
        };
        dispatcher.dispatch(SyncRequest::UpdateEmail {
            new_email: user.email.clone(),
            old_email: old_email.to_string(),
        });
        return true;
    }
    false
}

/// Cookie to set on the login response, as `(name, value)`.
pub async fn on_user_login(
    client: &dyn MarketingClient,
    config: &SyncConfiguration,
    user: Option<&UserRecord>,
    anonymous_interest: Option<&str>,
    today: Date,
) -> Option<(&'static str, String)> {
    if !config.enabled {
        return None;
    }
    let user = user?;
    let params = login_cookie_params(&user.email, anonymous_interest, today);
    let cookie = fetch_tracking_cookie(client, config, &user.email, params).await?;
    info!(
        "{TRACKING_COOKIE} cookie:{cookie} successfully retrieved for user {}",
        user.email
    );
    Some((TRACKING_COOKIE, cookie))
}
