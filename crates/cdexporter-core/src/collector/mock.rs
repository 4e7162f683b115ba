//! In-memory test doubles for the control API and the metric sink.
//!
//! `MockApi` replays scripted results and falls back to success when its
//! script is exhausted; `RecordingSink` keeps every update it receives and
//! can be told to reject updates for one category.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, VecDeque};

use crate::classify::QueueCategory;
use crate::collector::fetch::FetchError;
use crate::collector::session::{AuthError, Session, SignOutError};
use crate::collector::traits::ControlApi;
use crate::metrics::{MetricSink, PublishError, process_metric_name};

/// Scripted [`ControlApi`].
#[derive(Debug, Default)]
pub struct MockApi {
    sign_on_results: RefCell<VecDeque<Result<Session, AuthError>>>,
    query_results: RefCell<VecDeque<Result<String, FetchError>>>,
    sign_out_results: RefCell<VecDeque<Result<(), SignOutError>>>,
    sign_on_calls: Cell<usize>,
    query_calls: Cell<usize>,
    sign_out_calls: Cell<usize>,
}

impl MockApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues the result of the next unscripted sign-on.
    pub fn push_sign_on(&self, result: Result<Session, AuthError>) {
        self.sign_on_results.borrow_mut().push_back(result);
    }

    /// Queues a sign-on failure with the given status.
    pub fn reject_sign_on(&self, status: u16) {
        self.push_sign_on(Err(AuthError::Rejected {
            status,
            body: "rejected".to_string(),
        }));
    }

    pub fn push_query(&self, result: Result<String, FetchError>) {
        self.query_results.borrow_mut().push_back(result);
    }

    /// Queues a successful query whose body lists records with these queues.
    pub fn push_records(&self, queues: &[&str]) {
        self.push_query(Ok(records_body(queues)));
    }

    pub fn push_sign_out(&self, result: Result<(), SignOutError>) {
        self.sign_out_results.borrow_mut().push_back(result);
    }

    pub fn sign_on_calls(&self) -> usize {
        self.sign_on_calls.get()
    }

    pub fn query_calls(&self) -> usize {
        self.query_calls.get()
    }

    pub fn sign_out_calls(&self) -> usize {
        self.sign_out_calls.get()
    }
}

/// JSON array body with one record per queue value.
pub fn records_body(queues: &[&str]) -> String {
    let records: Vec<serde_json::Value> = queues
        .iter()
        .map(|q| serde_json::json!({ "queue": q }))
        .collect();
    serde_json::Value::Array(records).to_string()
}

impl ControlApi for MockApi {
    fn sign_on(&self) -> Result<Session, AuthError> {
        let n = self.sign_on_calls.get() + 1;
        self.sign_on_calls.set(n);
        if let Some(result) = self.sign_on_results.borrow_mut().pop_front() {
            return result;
        }
        Session::new(
            format!("Bearer mock-{}", n),
            format!("csrf-{}", n),
            format!("JSESSIONID=mock-{}", n),
        )
        .ok_or(AuthError::MissingArtifact("authorization"))
    }

    fn query_queue(&self, _session: &Session) -> Result<String, FetchError> {
        self.query_calls.set(self.query_calls.get() + 1);
        self.query_results
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| Ok("[]".to_string()))
    }

    fn sign_out(&self, _session: &Session) -> Result<(), SignOutError> {
        self.sign_out_calls.set(self.sign_out_calls.get() + 1);
        self.sign_out_results.borrow_mut().pop_front().unwrap_or(Ok(()))
    }
}

/// One update received by [`RecordingSink`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricUpdate {
    Set(u64),
    Add(i64),
}

/// [`MetricSink`] that records updates in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    values: RefCell<BTreeMap<QueueCategory, i64>>,
    updates: RefCell<Vec<(QueueCategory, MetricUpdate)>>,
    process_counts: RefCell<BTreeMap<String, u64>>,
    scrape_errors: Cell<u64>,
    failing: Cell<Option<QueueCategory>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects every update for `category` until reset with `None`.
    pub fn set_failing(&self, category: Option<QueueCategory>) {
        self.failing.set(category);
    }

    /// Current exposed value of a category.
    pub fn value(&self, category: QueueCategory) -> i64 {
        self.values.borrow().get(&category).copied().unwrap_or(0)
    }

    pub fn updates(&self) -> Vec<(QueueCategory, MetricUpdate)> {
        self.updates.borrow().clone()
    }

    pub fn clear_updates(&self) {
        self.updates.borrow_mut().clear();
    }

    pub fn process_counts(&self) -> BTreeMap<String, u64> {
        self.process_counts.borrow().clone()
    }

    pub fn scrape_errors(&self) -> u64 {
        self.scrape_errors.get()
    }

    fn check(&self, category: QueueCategory) -> Result<(), PublishError> {
        if self.failing.get() == Some(category) {
            return Err(PublishError::Rejected {
                metric: process_metric_name(category).to_string(),
                reason: "injected failure".to_string(),
            });
        }
        Ok(())
    }
}

impl MetricSink for RecordingSink {
    fn set_processes(&self, category: QueueCategory, value: u64) -> Result<(), PublishError> {
        self.check(category)?;
        self.values.borrow_mut().insert(category, value as i64);
        self.updates
            .borrow_mut()
            .push((category, MetricUpdate::Set(value)));
        Ok(())
    }

    fn add_processes(&self, category: QueueCategory, delta: i64) -> Result<(), PublishError> {
        self.check(category)?;
        *self.values.borrow_mut().entry(category).or_default() += delta;
        self.updates
            .borrow_mut()
            .push((category, MetricUpdate::Add(delta)));
        Ok(())
    }

    fn set_process_counts(&self, counts: &BTreeMap<String, u64>) -> Result<(), PublishError> {
        *self.process_counts.borrow_mut() = counts.clone();
        Ok(())
    }

    fn record_scrape_error(&self) {
        self.scrape_errors.set(self.scrape_errors.get() + 1);
    }
}
