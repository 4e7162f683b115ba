//! Poll loop controller.
//!
//! Each cycle runs to completion before the next one starts:
//! ensure session → fetch → classify → project. Any failure counts one
//! scrape error for the cycle, drops the session and tries to sign on again
//! right away; if that also fails the next cycle starts with a sign-on.
//! Only the initial sign-on in [`PollLoop::start`] is fatal.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::classify::{CategoryCounts, ClassifyError, classify_payload};
use crate::collector::{AuthError, ControlApi, FetchError, QueueFetcher, SessionManager};
use crate::config::{PollConfig, ResponseFormat};
use crate::metrics::{MetricSink, PublishError};
use crate::projector::MetricProjector;

/// Granularity of the interruptible sleep between cycles.
const SLEEP_SLICE: Duration = Duration::from_millis(100);

/// Stage of a cycle, used to label failures in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectPhase {
    SignOn,
    Fetch,
    Classify,
    Publish,
}

impl fmt::Display for CollectPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollectPhase::SignOn => f.write_str("signon"),
            CollectPhase::Fetch => f.write_str("fetch"),
            CollectPhase::Classify => f.write_str("classify"),
            CollectPhase::Publish => f.write_str("publish"),
        }
    }
}

/// Error type for a failed cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectError {
    SignOn(AuthError),
    Fetch(FetchError),
    Classify(ClassifyError),
    Publish(PublishError),
}

impl CollectError {
    pub fn phase(&self) -> CollectPhase {
        match self {
            CollectError::SignOn(_) => CollectPhase::SignOn,
            CollectError::Fetch(_) => CollectPhase::Fetch,
            CollectError::Classify(_) => CollectPhase::Classify,
            CollectError::Publish(_) => CollectPhase::Publish,
        }
    }
}

impl fmt::Display for CollectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollectError::SignOn(e) => write!(f, "{}: {}", self.phase(), e),
            CollectError::Fetch(e) => write!(f, "{}: {}", self.phase(), e),
            CollectError::Classify(e) => write!(f, "{}: {}", self.phase(), e),
            CollectError::Publish(e) => write!(f, "{}: {}", self.phase(), e),
        }
    }
}

impl std::error::Error for CollectError {}

impl From<AuthError> for CollectError {
    fn from(e: AuthError) -> Self {
        CollectError::SignOn(e)
    }
}

impl From<FetchError> for CollectError {
    fn from(e: FetchError) -> Self {
        CollectError::Fetch(e)
    }
}

impl From<ClassifyError> for CollectError {
    fn from(e: ClassifyError) -> Self {
        CollectError::Classify(e)
    }
}

impl From<PublishError> for CollectError {
    fn from(e: PublishError) -> Self {
        CollectError::Publish(e)
    }
}

/// What one cycle did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Collected(CategoryCounts),
    Failed {
        phase: CollectPhase,
        /// Whether a fresh session was obtained after the failure.
        reauthenticated: bool,
    },
}

/// State owned by the loop and threaded through every cycle.
#[derive(Debug)]
pub struct CollectorState {
    pub sessions: SessionManager,
    pub projector: MetricProjector,
    pub cycles: u64,
    pub failed_cycles: u64,
}

/// Drives collection at a fixed interval.
pub struct PollLoop<A: ControlApi, S: MetricSink> {
    api: A,
    sink: S,
    format: ResponseFormat,
    interval: Duration,
    state: CollectorState,
}

impl<A: ControlApi, S: MetricSink> PollLoop<A, S> {
    /// Creates a loop without a session; the first cycle signs on.
    pub fn new(api: A, sink: S, config: &PollConfig) -> Self {
        Self {
            api,
            sink,
            format: config.format,
            interval: config.interval,
            state: CollectorState {
                sessions: SessionManager::new(),
                projector: MetricProjector::new(config.mode),
                cycles: 0,
                failed_cycles: 0,
            },
        }
    }

    /// Creates a loop and performs the initial sign-on.
    ///
    /// An error here is the one startup-fatal condition.
    pub fn start(api: A, sink: S, config: &PollConfig) -> Result<Self, AuthError> {
        let mut poll = Self::new(api, sink, config);
        poll.state.sessions.authenticate(&poll.api)?;
        Ok(poll)
    }

    pub fn state(&self) -> &CollectorState {
        &self.state
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    fn collect(&mut self) -> Result<CategoryCounts, CollectError> {
        let session = self.state.sessions.ensure(&self.api)?;
        let body = QueueFetcher::fetch(&self.api, session)?;
        let classification = classify_payload(self.format, &body)?;
        if classification.ignored > 0 {
            debug!(ignored = classification.ignored, "records outside the taxonomy");
        }
        self.state.projector.project(&self.sink, &classification)?;
        Ok(classification.counts)
    }

    /// Runs one cycle and applies the failure policy.
    pub fn run_cycle(&mut self) -> CycleOutcome {
        self.state.cycles += 1;
        let cycle = self.state.cycles;

        match self.collect() {
            Ok(counts) => {
                for (category, count) in counts.iter() {
                    info!(cycle, "Processes in {}: {}", category, count);
                }
                CycleOutcome::Collected(counts)
            }
            Err(e) => {
                let phase = e.phase();
                self.state.failed_cycles += 1;
                self.sink.record_scrape_error();
                warn!(cycle, %phase, error = %e, "metric collection failed");

                self.state.sessions.invalidate();
                // A sign-on that just failed is retried on the next tick.
                let reauthenticated = phase != CollectPhase::SignOn && {
                    info!(cycle, "attempting to re-login");
                    match self.state.sessions.authenticate(&self.api) {
                        Ok(_) => {
                            info!(cycle, "re-login successful");
                            true
                        }
                        Err(e) => {
                            error!(cycle, error = %e, "re-login failed, will retry in next interval");
                            false
                        }
                    }
                };

                CycleOutcome::Failed {
                    phase,
                    reauthenticated,
                }
            }
        }
    }

    /// Runs cycles until `running` is cleared.
    pub fn run(&mut self, running: &AtomicBool) {
        info!(interval_secs = self.interval.as_secs(), "starting collection loop");

        while running.load(Ordering::SeqCst) {
            let t0 = Instant::now();
            self.run_cycle();

            let elapsed = t0.elapsed();
            if elapsed > self.interval / 2 {
                warn!(
                    duration_ms = elapsed.as_millis() as u64,
                    interval_ms = self.interval.as_millis() as u64,
                    "cycle exceeded 50% of interval"
                );
            }

            sleep_while_running(self.interval, running);
        }
    }

    /// Signs the current session out, best-effort.
    pub fn shutdown(&mut self) {
        info!(
            cycles = self.state.cycles,
            failed_cycles = self.state.failed_cycles,
            "stopping collection loop"
        );
        self.state.sessions.release(&self.api);
    }
}

/// Sleeps for `interval`, returning early once `running` is cleared.
pub fn sleep_while_running(interval: Duration, running: &AtomicBool) {
    let mut remaining = interval;
    while remaining > Duration::ZERO && running.load(Ordering::SeqCst) {
        let sleep_time = remaining.min(SLEEP_SLICE);
        std::thread::sleep(sleep_time);
        remaining = remaining.saturating_sub(sleep_time);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::QueueCategory::{Exec, Hold, Timer, Wait};
    use crate::collector::{MockApi, RecordingSink};
    use crate::config::{Credentials, PublishMode};

    fn config(mode: PublishMode) -> PollConfig {
        let mut config = PollConfig::new(
            "https://cdws.local:9443",
            Credentials {
                user: "admin".to_string(),
                password: "secret".to_string(),
            },
            "10.0.0.5",
        );
        config.mode = mode;
        config.interval = Duration::from_millis(10);
        config
    }

    fn started(mode: PublishMode) -> PollLoop<MockApi, RecordingSink> {
        PollLoop::start(MockApi::new(), RecordingSink::new(), &config(mode)).unwrap()
    }

    #[test]
    fn initial_sign_on_failure_is_fatal() {
        let api = MockApi::new();
        api.reject_sign_on(401);
        let result = PollLoop::start(api, RecordingSink::new(), &config(PublishMode::Gauge));
        assert!(matches!(result, Err(AuthError::Rejected { status: 401, .. })));
    }

    #[test]
    fn successful_cycle_publishes_gauges() {
        let mut poll = started(PublishMode::Gauge);
        poll.api().push_records(&["HOLD", "HOLD", "WAIT"]);

        let outcome = poll.run_cycle();
        let CycleOutcome::Collected(counts) = outcome else {
            panic!("expected success, got {:?}", outcome);
        };
        assert_eq!(counts.get(Hold), 2);
        assert_eq!(poll.sink().value(Hold), 2);
        assert_eq!(poll.sink().value(Wait), 1);
        assert_eq!(poll.sink().value(Timer), 0);
        assert_eq!(poll.sink().value(Exec), 0);
        assert_eq!(poll.sink().scrape_errors(), 0);
        assert_eq!(poll.api().sign_on_calls(), 1);
    }

    #[test]
    fn fetch_failure_reauthenticates_and_keeps_values() {
        let mut poll = started(PublishMode::Gauge);
        poll.api().push_records(&["HOLD", "WAIT"]);
        poll.run_cycle();

        poll.api().push_query(Err(FetchError::Status {
            status: 401,
            body: "expired".to_string(),
        }));
        let outcome = poll.run_cycle();
        assert_eq!(
            outcome,
            CycleOutcome::Failed {
                phase: CollectPhase::Fetch,
                reauthenticated: true,
            }
        );
        assert_eq!(poll.sink().scrape_errors(), 1);
        assert_eq!(poll.api().sign_on_calls(), 2);
        assert_eq!(poll.sink().value(Hold), 1);
        assert_eq!(poll.sink().value(Wait), 1);
        assert!(poll.state().sessions.is_authenticated());

        // Next cycle uses the fresh session without another sign-on.
        poll.api().push_records(&["EXEC"]);
        assert!(matches!(poll.run_cycle(), CycleOutcome::Collected(_)));
        assert_eq!(poll.api().sign_on_calls(), 2);
    }

    #[test]
    fn failed_reauthentication_counts_once_and_retries_next_cycle() {
        let mut poll = started(PublishMode::Gauge);

        poll.api().push_query(Err(FetchError::Timeout));
        poll.api().reject_sign_on(503);
        let outcome = poll.run_cycle();
        assert_eq!(
            outcome,
            CycleOutcome::Failed {
                phase: CollectPhase::Fetch,
                reauthenticated: false,
            }
        );
        assert_eq!(poll.sink().scrape_errors(), 1);
        assert!(!poll.state().sessions.is_authenticated());

        // Sign-on rejected again: no fetch, one more error, no exit.
        poll.api().reject_sign_on(503);
        let queries_before = poll.api().query_calls();
        let outcome = poll.run_cycle();
        assert_eq!(
            outcome,
            CycleOutcome::Failed {
                phase: CollectPhase::SignOn,
                reauthenticated: false,
            }
        );
        assert_eq!(poll.api().query_calls(), queries_before);
        assert_eq!(poll.sink().scrape_errors(), 2);

        // Upstream back: the cycle signs on and collects.
        poll.api().push_records(&["TIMER"]);
        assert!(matches!(poll.run_cycle(), CycleOutcome::Collected(_)));
        assert_eq!(poll.sink().value(Timer), 1);
        assert_eq!(poll.sink().scrape_errors(), 2);
        assert_eq!(poll.state().failed_cycles, 2);
        assert_eq!(poll.state().cycles, 3);
    }

    #[test]
    fn malformed_payload_fails_classify_phase() {
        let mut poll = started(PublishMode::Gauge);
        poll.api().push_query(Ok("<html>maintenance</html>".to_string()));

        let outcome = poll.run_cycle();
        assert!(matches!(
            outcome,
            CycleOutcome::Failed {
                phase: CollectPhase::Classify,
                ..
            }
        ));
        assert_eq!(poll.sink().scrape_errors(), 1);
    }

    #[test]
    fn publish_failure_counts_once_and_baseline_holds() {
        let mut poll = started(PublishMode::Delta);
        poll.api().push_records(&["HOLD", "HOLD"]);
        poll.run_cycle();
        assert_eq!(poll.state().projector.baseline().get(Hold), 2);

        poll.sink().set_failing(Some(Hold));
        poll.api().push_records(&["HOLD", "HOLD", "HOLD", "HOLD", "HOLD"]);
        let outcome = poll.run_cycle();
        assert!(matches!(
            outcome,
            CycleOutcome::Failed {
                phase: CollectPhase::Publish,
                ..
            }
        ));
        assert_eq!(poll.sink().scrape_errors(), 1);
        assert_eq!(poll.state().projector.baseline().get(Hold), 2);

        poll.sink().set_failing(None);
        poll.sink().clear_updates();
        poll.api().push_records(&["HOLD", "HOLD", "HOLD"]);
        poll.run_cycle();
        assert_eq!(
            poll.sink().updates(),
            vec![(Hold, crate::collector::mock::MetricUpdate::Add(1))]
        );
        assert_eq!(poll.sink().value(Hold), 3);
    }

    #[test]
    fn multiple_failures_in_one_cycle_count_once() {
        let mut poll = started(PublishMode::Delta);

        // Publish fails, then the re-login fails as well.
        poll.sink().set_failing(Some(Hold));
        poll.api().push_records(&["HOLD"]);
        poll.api().reject_sign_on(500);
        poll.run_cycle();

        assert_eq!(poll.sink().scrape_errors(), 1);
        assert_eq!(poll.state().failed_cycles, 1);
    }

    #[test]
    fn run_stops_when_flag_cleared() {
        let mut poll = started(PublishMode::Gauge);
        let running = AtomicBool::new(false);
        poll.run(&running);
        assert_eq!(poll.state().cycles, 0);
    }

    #[test]
    fn shutdown_signs_out_and_tolerates_failure() {
        let mut poll = started(PublishMode::Gauge);
        poll.api()
            .push_sign_out(Err(crate::collector::SignOutError::Transport(
                "reset".to_string(),
            )));
        poll.shutdown();
        assert_eq!(poll.api().sign_out_calls(), 1);
        assert!(!poll.state().sessions.is_authenticated());

        // Already released: nothing to sign out.
        poll.shutdown();
        assert_eq!(poll.api().sign_out_calls(), 1);
    }

    #[test]
    fn sleep_returns_early_when_stopped() {
        let running = AtomicBool::new(false);
        let t0 = Instant::now();
        sleep_while_running(Duration::from_secs(5), &running);
        assert!(t0.elapsed() < Duration::from_secs(1));
    }
}
