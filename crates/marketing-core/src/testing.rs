use crate::model::SyncJob;
use crate::provider::{MarketingClient, ProviderError, ProviderFuture, ProviderResponse};
use crate::task::{Clock, RetryError, Retrier};
use serde_json::Value;
use std::collections::VecDeque;
use std::fmt::Debug;
use std::sync::{Arc, Mutex};
use time::OffsetDateTime;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;

type Reply = Result<ProviderResponse, ProviderError>;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Method {
    Get,
    Post,
}

#[derive(Clone, Debug)]
pub(crate) struct Call {
    pub(crate) method: Method,
    pub(crate) resource: String,
    pub(crate) params: Value,
}

struct Replies {
    scripted: VecDeque<Reply>,
    fallback: Reply,
}

impl Replies {
    fn new() -> Self {
        Self {
            scripted: VecDeque::new(),
            fallback: Ok(ProviderResponse::ok()),
        }
    }

    fn next(&mut self) -> Reply {
        self.scripted
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

/// Records every call and answers from a script, falling back to a fixed reply.
pub(crate) struct FakeClient {
    calls: Mutex<Vec<Call>>,
    posts: Mutex<Replies>,
    gets: Mutex<Replies>,
}

impl FakeClient {
    pub(crate) fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            posts: Mutex::new(Replies::new()),
            gets: Mutex::new(Replies::new()),
        }
    }

    pub(crate) fn post_returns(self, reply: Reply) -> Self {
        self.posts.lock().unwrap().fallback = reply;
        self
    }

    pub(crate) fn get_returns(self, reply: Reply) -> Self {
        self.gets.lock().unwrap().fallback = reply;
        self
    }

    pub(crate) fn then_post(self, reply: Reply) -> Self {
        self.posts.lock().unwrap().scripted.push_back(reply);
        self
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn posts(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|call| call.method == Method::Post)
            .collect()
    }

    pub(crate) fn gets(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|call| call.method == Method::Get)
            .collect()
    }

    pub(crate) fn last_post(&self) -> Call {
        self.posts().pop().expect("no post calls recorded")
    }

    fn record(&self, method: Method, resource: &str, params: Value) {
        self.calls.lock().unwrap().push(Call {
            method,
            resource: resource.to_string(),
            params,
        });
    }
}

impl MarketingClient for FakeClient {
    fn post<'a>(
        &'a self,
        resource: &'a str,
        params: Value,
    ) -> ProviderFuture<'a, ProviderResponse> {
        self.record(Method::Post, resource, params);
        let reply = self.posts.lock().unwrap().next();
        Box::pin(async move { reply })
    }

    fn get<'a>(&'a self, resource: &'a str, params: Value) -> ProviderFuture<'a, ProviderResponse> {
        self.record(Method::Get, resource, params);
        let reply = self.gets.lock().unwrap().next();
        Box::pin(async move { reply })
    }
}

pub(crate) fn api_error(code: i64) -> Reply {
    Err(ProviderError::api(code, "Got an error"))
}

pub(crate) fn transport_error() -> Reply {
    Err(ProviderError::transport("client error"))
}

pub(crate) fn body(value: Value) -> Reply {
    Ok(ProviderResponse::new(value))
}

#[derive(Default)]
pub(crate) struct RecordingRetrier {
    scheduled: Mutex<Vec<(u32, SyncJob)>>,
}

impl RecordingRetrier {
    pub(crate) fn scheduled(&self) -> Vec<(u32, SyncJob)> {
        self.scheduled.lock().unwrap().clone()
    }
}

impl Retrier for RecordingRetrier {
    fn schedule_retry(&self, attempt: u32, job: SyncJob) -> Result<(), RetryError> {
        self.scheduled.lock().unwrap().push((attempt, job));
        Ok(())
    }
}

pub(crate) struct FixedClock(pub(crate) OffsetDateTime);

impl Clock for FixedClock {
    fn now_utc(&self) -> OffsetDateTime {
        self.0
    }
}

/// Captures events emitted on the current thread.
#[derive(Clone, Default)]
pub(crate) struct LogCapture {
    events: Arc<Mutex<Vec<(Level, String)>>>,
}

impl LogCapture {
    pub(crate) fn install(&self) -> tracing::subscriber::DefaultGuard {
        tracing_subscriber::registry().with(self.clone()).set_default()
    }

    pub(crate) fn errors(&self) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(level, _)| *level == Level::ERROR)
            .count()
    }

    pub(crate) fn messages(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|(_, message)| message.clone())
            .collect()
    }
}

impl<S: Subscriber> Layer<S> for LogCapture {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        self.events
            .lock()
            .unwrap()
            .push((*event.metadata().level(), visitor.message));
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
}

impl tracing::field::Visit for MessageVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        }
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        }
    }
}
