//! Loading indicator rotation.
//!
//! While a request is outstanding the rotator publishes one status string from a fixed
//! list, moving to the next string every interval and wrapping after the last. The
//! recurring timer lives in a spawned tokio task owned by a [`TimerHandle`]; stopping,
//! restarting or dropping the rotator releases it.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use snafu::{Snafu, ensure};
use tokio::sync::{oneshot, watch};
use tokio::time::{self, Instant, MissedTickBehavior};

pub const DEFAULT_LOADING_MESSAGES: [&str; 3] =
    ["Getting Advice....", "Got The Advice..", "Preparing..."];
pub const DEFAULT_LOADING_INTERVAL: Duration = Duration::from_secs(6);

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum RotatorError {
    #[snafu(display("loading status list is empty on `{stage}`"))]
    EmptyStatusList { stage: &'static str },
    #[snafu(display("loading status interval must be non-zero on `{stage}`"))]
    ZeroInterval { stage: &'static str },
}

pub type RotatorResult<T> = Result<T, RotatorError>;

/// Circular cursor over a non-empty list of status strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusCycle {
    messages: Vec<String>,
    index: usize,
}

impl StatusCycle {
    /// Fails with [`RotatorError::EmptyStatusList`] when `messages` yields nothing.
    pub fn new<I, S>(messages: I) -> RotatorResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let messages = messages.into_iter().map(Into::into).collect::<Vec<_>>();
        ensure!(
            !messages.is_empty(),
            EmptyStatusListSnafu {
                stage: "status-cycle-new",
            }
        );

        Ok(Self { messages, index: 0 })
    }

    pub fn current(&self) -> &str {
        &self.messages[self.index]
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Moves to the next status, wrapping after the last one.
    pub fn advance(&mut self) -> &str {
        self.index = (self.index + 1) % self.messages.len();
        self.current()
    }

    pub fn reset(&mut self) {
        self.index = 0;
    }
}

/// Status strings and the delay between them. Validated by [`LoadingRotator::new`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotatorConfig {
    pub messages: Vec<String>,
    pub interval: Duration,
}

impl Default for RotatorConfig {
    fn default() -> Self {
        Self {
            messages: DEFAULT_LOADING_MESSAGES
                .iter()
                .map(|message| message.to_string())
                .collect(),
            interval: DEFAULT_LOADING_INTERVAL,
        }
    }
}

impl RotatorConfig {
    pub fn new<I, S>(messages: I, interval: Duration) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            messages: messages.into_iter().map(Into::into).collect(),
            interval,
        }
    }
}

/// What the loading indicator should show right now.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LoadingState {
    pub active: bool,
    /// Blank while inactive.
    pub status: String,
    // Bumped on every start so a timer from an earlier episode can never publish.
    pub(crate) episode: u64,
}

impl LoadingState {
    fn active(status: &str, episode: u64) -> Self {
        Self {
            active: true,
            status: status.to_string(),
            episode,
        }
    }

    fn inactive(episode: u64) -> Self {
        Self {
            active: false,
            status: String::new(),
            episode,
        }
    }
}

/// Owns one recurring timer task. Cancelling is idempotent and also happens on drop.
pub struct TimerHandle {
    cancel_tx: Option<oneshot::Sender<()>>,
}

impl TimerHandle {
    fn new(cancel_tx: oneshot::Sender<()>) -> Self {
        Self {
            cancel_tx: Some(cancel_tx),
        }
    }

    /// Returns true only for the call that actually cancelled the timer.
    pub fn cancel(&mut self) -> bool {
        self.cancel_tx
            .take()
            .map(|tx| {
                let _ = tx.send(());
                true
            })
            .unwrap_or(false)
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Publishes the loading status while a request is outstanding.
pub struct LoadingRotator {
    cycle: StatusCycle,
    interval: Duration,
    state_tx: watch::Sender<LoadingState>,
    timer: Option<TimerHandle>,
    episode: u64,
    live_timers: Arc<AtomicUsize>,
}

impl LoadingRotator {
    /// Rejects an empty status list and a zero interval.
    pub fn new(config: RotatorConfig) -> RotatorResult<Self> {
        ensure!(
            !config.interval.is_zero(),
            ZeroIntervalSnafu {
                stage: "loading-rotator-new",
            }
        );
        let cycle = StatusCycle::new(config.messages)?;
        let (state_tx, _) = watch::channel(LoadingState::default());

        Ok(Self {
            cycle,
            interval: config.interval,
            state_tx,
            timer: None,
            episode: 0,
            live_timers: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_running(&self) -> bool {
        self.timer.is_some()
    }

    /// Number of timer tasks that have not exited yet.
    pub fn live_timers(&self) -> usize {
        self.live_timers.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> LoadingState {
        self.state_tx.borrow().clone()
    }

    /// Receiver that observes every status change.
    pub fn subscribe(&self) -> watch::Receiver<LoadingState> {
        self.state_tx.subscribe()
    }

    /// Shows the first status immediately and schedules rotation.
    ///
    /// Restarting while running replaces the old timer. Must be called inside a tokio
    /// runtime.
    pub fn start(&mut self) {
        self.release_timer();

        self.episode = self.episode.wrapping_add(1);
        let mut cycle = self.cycle.clone();
        cycle.reset();
        self.state_tx
            .send_replace(LoadingState::active(cycle.current(), self.episode));

        let (cancel_tx, cancel_rx) = oneshot::channel();
        tokio::spawn(run_rotation(
            cycle,
            self.interval,
            self.episode,
            self.state_tx.clone(),
            cancel_rx,
            LiveTimerGuard::enter(self.live_timers.clone()),
        ));
        self.timer = Some(TimerHandle::new(cancel_tx));

        tracing::debug!(
            episode = self.episode,
            interval_ms = u64::try_from(self.interval.as_millis()).unwrap_or(u64::MAX),
            "loading rotator started"
        );
    }

    /// Stops rotation and blanks the status. Returns false when nothing was running.
    pub fn stop(&mut self) -> bool {
        if !self.release_timer() {
            return false;
        }

        self.state_tx
            .send_replace(LoadingState::inactive(self.episode));
        tracing::debug!(episode = self.episode, "loading rotator stopped");
        true
    }

    /// Follows the external "request outstanding" signal.
    pub fn set_outstanding(&mut self, outstanding: bool) {
        match (outstanding, self.is_running()) {
            (true, false) => self.start(),
            (false, true) => {
                self.stop();
            }
            _ => {}
        }
    }

    fn release_timer(&mut self) -> bool {
        let Some(mut timer) = self.timer.take() else {
            return false;
        };
        timer.cancel();
        true
    }
}

struct LiveTimerGuard(Arc<AtomicUsize>);

impl LiveTimerGuard {
    fn enter(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for LiveTimerGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

async fn run_rotation(
    mut cycle: StatusCycle,
    interval: Duration,
    episode: u64,
    state_tx: watch::Sender<LoadingState>,
    mut cancel_rx: oneshot::Receiver<()>,
    _live: LiveTimerGuard,
) {
    let mut ticker = time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = &mut cancel_rx => break,
            _ = ticker.tick() => {
                let status = cycle.advance().to_string();
                let published = state_tx.send_if_modified(|state| {
                    if !state.active || state.episode != episode {
                        return false;
                    }
                    state.status = status;
                    true
                });

                if !published {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INTERVAL: Duration = Duration::from_millis(6_000);
    // Sample just after each tick so the timer task has already published.
    const NUDGE: Duration = Duration::from_millis(1);

    fn abc_rotator() -> LoadingRotator {
        LoadingRotator::new(RotatorConfig::new(["A", "B", "C"], INTERVAL))
            .expect("valid rotator config")
    }

    #[test]
    fn status_cycle_wraps() {
        let mut cycle = StatusCycle::new(["A", "B", "C"]).expect("non-empty list");
        assert_eq!(cycle.current(), "A");
        assert_eq!(cycle.advance(), "B");
        assert_eq!(cycle.advance(), "C");
        assert_eq!(cycle.advance(), "A");
        cycle.advance();
        cycle.reset();
        assert_eq!(cycle.index(), 0);
    }

    #[test]
    fn empty_status_list_fails_fast() {
        let error = StatusCycle::new(Vec::<String>::new()).expect_err("empty list must fail");
        assert!(matches!(error, RotatorError::EmptyStatusList { .. }));

        let error = LoadingRotator::new(RotatorConfig::new(Vec::<String>::new(), INTERVAL))
            .err()
            .expect("empty list must fail");
        assert!(matches!(error, RotatorError::EmptyStatusList { .. }));
    }

    #[test]
    fn zero_interval_is_rejected() {
        let error = LoadingRotator::new(RotatorConfig::new(["A"], Duration::ZERO))
            .err()
            .expect("zero interval must fail");
        assert!(matches!(error, RotatorError::ZeroInterval { .. }));
    }

    #[test]
    fn defaults_match_the_stock_messages() {
        let rotator =
            LoadingRotator::new(RotatorConfig::default()).expect("stock config is valid");
        assert_eq!(rotator.interval(), DEFAULT_LOADING_INTERVAL);
        assert_eq!(rotator.cycle.current(), "Getting Advice....");
        assert_eq!(rotator.cycle.messages.len(), 3);
        assert!(!rotator.state().active);
    }

    #[tokio::test(start_paused = true)]
    async fn rotates_once_per_interval_and_wraps() {
        let mut rotator = abc_rotator();
        rotator.start();
        assert!(rotator.state().active);
        assert_eq!(rotator.state().status, "A");

        time::sleep(INTERVAL + NUDGE).await;
        assert_eq!(rotator.state().status, "B");

        time::sleep(INTERVAL).await;
        assert_eq!(rotator.state().status, "C");

        time::sleep(INTERVAL).await;
        assert_eq!(rotator.state().status, "A");

        rotator.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn stop_before_first_tick_leaves_no_timer() {
        let mut rotator = abc_rotator();
        let mut updates = rotator.subscribe();
        rotator.start();
        assert!(rotator.stop());

        let after_stop = rotator.state();
        assert!(!after_stop.active);
        assert!(after_stop.status.is_empty());
        let _ = updates.borrow_and_update();

        time::sleep(INTERVAL * 4).await;
        assert_eq!(rotator.live_timers(), 0);
        assert_eq!(rotator.state(), after_stop);
        assert!(!updates.has_changed().expect("sender alive"));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_idempotent() {
        let mut rotator = abc_rotator();
        assert!(!rotator.stop());

        rotator.start();
        assert!(rotator.stop());
        assert!(!rotator.stop());
        assert!(!rotator.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_start_stop_keeps_a_single_timer() {
        let mut rotator = abc_rotator();
        for _ in 0..5 {
            rotator.start();
            rotator.stop();
        }
        rotator.start();
        rotator.start();

        time::sleep(NUDGE).await;
        assert_eq!(rotator.live_timers(), 1);
        assert_eq!(rotator.state().status, "A");

        time::sleep(INTERVAL).await;
        assert_eq!(rotator.state().status, "B");

        rotator.stop();
        time::sleep(NUDGE).await;
        assert_eq!(rotator.live_timers(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_begins_again_from_first_status() {
        let mut rotator = abc_rotator();
        rotator.start();
        time::sleep(INTERVAL + NUDGE).await;
        assert_eq!(rotator.state().status, "B");

        rotator.stop();
        rotator.start();
        assert_eq!(rotator.state().status, "A");
        rotator.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn outstanding_signal_is_edge_triggered() {
        let mut rotator = abc_rotator();
        rotator.set_outstanding(true);
        time::sleep(INTERVAL + NUDGE).await;

        // A repeated "true" must not restart the cycle.
        rotator.set_outstanding(true);
        assert_eq!(rotator.state().status, "B");

        rotator.set_outstanding(false);
        assert!(!rotator.state().active);
        rotator.set_outstanding(false);
        assert!(!rotator.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_rotator_releases_the_timer() {
        let rotator = {
            let mut rotator = abc_rotator();
            rotator.start();
            rotator.live_timers.clone()
        };

        time::sleep(NUDGE).await;
        assert_eq!(rotator.load(Ordering::SeqCst), 0);
    }
}
