use crate::config::SyncConfiguration;
use crate::model::SiteInfo;
use crate::provider::MarketingClient;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct UserList {
    pub name: String,
    #[serde(default)]
    pub list_id: Option<String>,
}

pub type ListMap = HashMap<String, UserList>;

/// Process-wide snapshot of the provider's named lists.
#[derive(Clone, Debug, Default)]
pub struct ListCache {
    lists: Arc<Mutex<ListMap>>,
}

impl ListCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn snapshot(&self) -> ListMap {
        self.lists
            .lock()
            .map(|lists| lists.clone())
            .unwrap_or_default()
    }

    fn replace(&self, lists: ListMap) {
        if let Ok(mut guard) = self.lists.lock() {
            *guard = lists;
        }
    }
}

pub async fn fetch_list_map(client: &dyn MarketingClient) -> ListMap {
    let response = match client.get("list", json!({})).await {
        Ok(response) => response,
        Err(err) => {
            error!(error = %err, "failed to read lists from marketing provider");
            return ListMap::new();
        }
    };
    let Some(lists) = response.get("lists").and_then(Value::as_array) else {
        warn!("list response missing lists");
        return ListMap::new();
    };
    let mut map = ListMap::new();
    for entry in lists {
        match serde_json::from_value::<UserList>(entry.clone()) {
            Ok(list) => {
                map.insert(list.name.clone(), list);
            }
            Err(err) => warn!(error = %err, "skipping malformed list entry"),
        }
    }
    map
}

pub async fn create_user_list(client: &dyn MarketingClient, name: &str) -> bool {
    let params = json!({"list": name, "primary": 0, "public_name": name});
    match client.post("list", params).await {
        Ok(_) => {
            info!(list = name, "created user list");
            true
        }
        Err(err) => {
            error!(list = name, error = %err, "failed to create user list");
            false
        }
    }
}

/// Returns the named list, creating it when absent. `None` means skip list assignment.
pub async fn resolve_or_create_user_list(
    client: &dyn MarketingClient,
    cache: &ListCache,
    name: &str,
) -> Option<UserList> {
    let mut lists = cache.snapshot();
    if lists.is_empty() {
        lists = fetch_list_map(client).await;
        cache.replace(lists.clone());
    }
    if let Some(list) = lists.get(name) {
        return Some(list.clone());
    }
    if !create_user_list(client, name).await {
        return None;
    }
    let lists = fetch_list_map(client).await;
    cache.replace(lists.clone());
    let list = lists.get(name).cloned();
    if list.is_none() {
        warn!(list = name, "created list not visible in provider listing");
    }
    list
}

pub fn list_name_for_site(site: Option<&SiteInfo>, default_site_id: u64) -> Option<String> {
    let site = site.filter(|site| site.id != default_site_id)?;
    Some(format!("{}_user_list", site.domain.replace('.', "_")))
}

/// List a newly registered user joins; falls back to the configured default list.
pub async fn list_for_new_user(
    client: &dyn MarketingClient,
    cache: &ListCache,
    config: &SyncConfiguration,
    site: Option<&SiteInfo>,
) -> Option<String> {
    let default_list = (!config.new_user_list.is_empty()).then(|| config.new_user_list.clone());
    let name = match list_name_for_site(site, config.default_site_id) {
        Some(name) => name,
        None => default_list.clone()?,
    };
    match resolve_or_create_user_list(client, cache, &name).await {
        Some(list) => Some(list.name),
        None => default_list,
    }
}

impl From<&str> for UserList {
    fn from(name: &str) -> Self {
        Self {
            name: name.to_string(),
            list_id: None,
        }
    }
}
