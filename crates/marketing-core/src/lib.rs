pub mod audit;
pub mod config;
pub mod content_store;
pub mod cookies;
pub mod handlers;
pub mod lists;
pub mod model;
pub mod provider;
pub mod queue;
pub mod task;

#[cfg(test)]
pub(crate) mod testing;
