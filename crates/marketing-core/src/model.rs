use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::Date;
use time::macros::format_description;

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct SiteInfo {
    pub id: u64,
    pub domain: String,
    pub name: String,
}

/// Changed fields for one user, keyed by the application's field names.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UserChangeEvent {
    pub email: String,
    #[serde(default)]
    pub previous_email: Option<String>,
    #[serde(default)]
    pub changes: Map<String, Value>,
}

impl UserChangeEvent {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            previous_email: None,
            changes: Map::new(),
        }
    }

    pub fn with_change(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.changes.insert(field.to_string(), value.into());
        self
    }

    pub fn with_previous_email(mut self, previous: impl Into<String>) -> Self {
        self.previous_email = Some(previous.into());
        self
    }

    /// The prior address when this event renames the user's identifier.
    pub fn renamed_from(&self) -> Option<&str> {
        self.previous_email
            .as_deref()
            .filter(|previous| *previous != self.email)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SyncRequest {
    UpdateUser {
        event: UserChangeEvent,
        #[serde(default)]
        site: Option<SiteInfo>,
        #[serde(default)]
        new_user: bool,
    },
    UpdateEmail {
        new_email: String,
        old_email: String,
    },
}

impl SyncRequest {
    pub fn from_event(event: UserChangeEvent, site: Option<SiteInfo>, new_user: bool) -> Self {
        if let Some(old_email) = event.renamed_from() {
            return SyncRequest::UpdateEmail {
                old_email: old_email.to_string(),
                new_email: event.email,
            };
        }
        SyncRequest::UpdateUser {
            event,
            site,
            new_user,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SyncRequest::UpdateUser { .. } => "update_user",
            SyncRequest::UpdateEmail { .. } => "update_email",
        }
    }

    pub fn email(&self) -> &str {
        match self {
            SyncRequest::UpdateUser { event, .. } => &event.email,
            SyncRequest::UpdateEmail { new_email, .. } => new_email,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SyncJob {
    pub request: SyncRequest,
    #[serde(default)]
    pub attempt: u32,
}

impl SyncJob {
    pub fn new(request: SyncRequest) -> Self {
        Self {
            request,
            attempt: 0,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub name: Option<String>,
    pub gender: Option<String>,
    pub level_of_education: Option<String>,
    pub year_of_birth: Option<i32>,
    pub country: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub username: String,
    pub email: String,
    pub is_active: bool,
    pub date_joined: Date,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub profile: Option<UserProfile>,
}

/// Provider-side variable name for an application field name.
pub fn provider_field_name(field: &str) -> &str {
    match field {
        "pref-lang" | "language" => "ui_lang",
        "is_active" => "activated",
        "name" => "fullname",
        "level_of_education" => "education",
        other => other,
    }
}

pub fn map_changes(changes: &Map<String, Value>) -> Map<String, Value> {
    changes
        .iter()
        .map(|(field, value)| {
            let key = provider_field_name(field);
            let value = match (key, value) {
                ("activated", Value::Bool(active)) => Value::from(u8::from(*active)),
                _ => value.clone(),
            };
            (key.to_string(), value)
        })
        .collect()
}

/// Full variable set sent on registration and on watched field changes.
pub fn user_vars(user: &UserRecord, default_language: &str) -> Map<String, Value> {
    let mut vars = Map::new();
    vars.insert("username".into(), Value::from(user.username.clone()));
    vars.insert("activated".into(), Value::from(u8::from(user.is_active)));
    let joined = user
        .date_joined
        .format(format_description!("[year]-[month]-[day]"))
        .unwrap_or_else(|_| user.date_joined.to_string());
    vars.insert("joined_date".into(), Value::from(joined));
    let language = user.language.as_deref().unwrap_or(default_language);
    vars.insert("ui_lang".into(), Value::from(language));
    if let Some(profile) = &user.profile {
        vars.insert("fullname".into(), Value::from(profile.name.clone()));
        vars.insert("gender".into(), Value::from(profile.gender.clone()));
        vars.insert(
            "education".into(),
            Value::from(profile.level_of_education.clone()),
        );
        if let Some(year) = profile.year_of_birth {
            vars.insert("year_of_birth".into(), Value::from(year));
        }
        vars.insert(
            "country".into(),
            Value::from(profile.country.clone().unwrap_or_default()),
        );
    }
    vars
}
