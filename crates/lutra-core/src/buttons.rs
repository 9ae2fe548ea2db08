// ── Pico button press tracking ──
//
// The hub only reports raw Press/Release transitions. This module
// classifies them into single, double, and long presses and publishes
// the classified events, one watcher task per actively tracked button.
//
// Timing: a press that releases within the double-click window and sees
// no second press is a single press. A second press/release pair inside
// the tracking window is a double press. A press still held when the
// double-click window closes is a long press, reported as ongoing on
// every poll until release.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use lutra_leap::ButtonAction;

use crate::broker::Publication;
use crate::model::{Device, DeviceId};
use crate::topics;

const DOUBLE_CLICK_WINDOW: Duration = Duration::from_millis(500);
const POLL_INTERVAL: Duration = Duration::from_millis(250);
const TRACKING_WINDOW: Duration = Duration::from_secs(5);

pub const EVENT_SINGLE_PRESS: &str = "single_press";
pub const EVENT_DOUBLE_PRESS: &str = "double_press";
pub const EVENT_LONG_PRESS_ONGOING: &str = "long_press_ongoing";
pub const EVENT_LONG_PRESS_FINISHED: &str = "long_press_finished";

// ── State machine ────────────────────────────────────────────────────

/// Progress of one tracked press sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ButtonState {
    NotPressed,
    FirstPressAwaitingRelease,
    FirstPressAndFirstRelease,
    SecondPressAwaitingRelease,
    DoublePressFinished,
}

impl ButtonState {
    fn awaiting_press(self) -> bool {
        matches!(self, Self::NotPressed | Self::FirstPressAndFirstRelease)
    }

    fn awaiting_release(self) -> bool {
        matches!(
            self,
            Self::FirstPressAwaitingRelease | Self::SecondPressAwaitingRelease
        )
    }

    fn accepts(self, action: ButtonAction) -> bool {
        match action {
            ButtonAction::Press => self.awaiting_press(),
            ButtonAction::Release => self.awaiting_release(),
        }
    }

    fn advanced(self) -> Self {
        match self {
            Self::NotPressed => Self::FirstPressAwaitingRelease,
            Self::FirstPressAwaitingRelease => Self::FirstPressAndFirstRelease,
            Self::FirstPressAndFirstRelease => Self::SecondPressAwaitingRelease,
            Self::SecondPressAwaitingRelease | Self::DoublePressFinished => {
                Self::DoublePressFinished
            }
        }
    }
}

// ── Watcher ──────────────────────────────────────────────────────────

struct ButtonWatcher {
    state: Mutex<ButtonState>,
    started_at: Instant,
    finished: AtomicBool,
}

impl ButtonWatcher {
    fn new() -> Self {
        Self {
            state: Mutex::new(ButtonState::NotPressed),
            started_at: Instant::now(),
            finished: AtomicBool::new(false),
        }
    }

    /// Advance the state machine. Rejects out-of-order transitions
    /// (e.g. two presses without a release) without changing state.
    fn apply(&self, action: ButtonAction) -> Result<(), ButtonState> {
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if !state.accepts(action) {
            return Err(*state);
        }
        *state = state.advanced();
        Ok(())
    }

    fn state(&self) -> ButtonState {
        match self.state.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn finish(&self) {
        self.finished.store(true, Ordering::Release);
    }

    fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    fn is_timed_out(&self) -> bool {
        self.started_at.elapsed() > TRACKING_WINDOW
    }
}

// ── Tracker ──────────────────────────────────────────────────────────

/// Owns the active watchers. Driven only by the event router, so the
/// map itself needs no synchronization; watcher state is shared with
/// the spawned watch tasks.
pub(crate) struct ButtonTracker {
    topic_prefix: String,
    publish_tx: mpsc::Sender<Publication>,
    watchers: HashMap<(DeviceId, u8), Arc<ButtonWatcher>>,
}

impl ButtonTracker {
    pub(crate) fn new(topic_prefix: String, publish_tx: mpsc::Sender<Publication>) -> Self {
        Self {
            topic_prefix,
            publish_tx,
            watchers: HashMap::new(),
        }
    }

    /// Feed one raw button transition into the tracker.
    pub(crate) fn record(&mut self, device: &Arc<Device>, number: u8, action: ButtonAction) {
        let key = (device.id, number);

        let live = self
            .watchers
            .get(&key)
            .filter(|watcher| !watcher.is_finished() && !watcher.is_timed_out())
            .cloned();

        match live {
            Some(watcher) => {
                if let Err(state) = watcher.apply(action) {
                    warn!(
                        device = %device.id,
                        button = number,
                        ?state,
                        ?action,
                        "out-of-order button transition; resetting tracker"
                    );
                    watcher.finish();
                    self.watchers.remove(&key);
                }
            }
            None => {
                if action != ButtonAction::Press {
                    debug!(
                        device = %device.id,
                        button = number,
                        "release without a tracked press ignored"
                    );
                    return;
                }
                let watcher = Arc::new(ButtonWatcher::new());
                // A fresh watcher always accepts the initial press.
                let _ = watcher.apply(ButtonAction::Press);
                self.watchers.insert(key, Arc::clone(&watcher));

                let topic = topics::button_event_topic(&self.topic_prefix, device, number);
                tokio::spawn(watch_button(watcher, topic, self.publish_tx.clone()));
            }
        }
    }
}

// ── Watch loop ───────────────────────────────────────────────────────

async fn watch_button(
    watcher: Arc<ButtonWatcher>,
    topic: String,
    publish_tx: mpsc::Sender<Publication>,
) {
    let window_end = Instant::now() + TRACKING_WINDOW;

    tokio::time::sleep(DOUBLE_CLICK_WINDOW).await;
    match watcher.state() {
        ButtonState::FirstPressAndFirstRelease => {
            emit(&publish_tx, &topic, EVENT_SINGLE_PRESS).await;
            watcher.finish();
            return;
        }
        ButtonState::DoublePressFinished => {
            emit(&publish_tx, &topic, EVENT_DOUBLE_PRESS).await;
            watcher.finish();
            return;
        }
        ButtonState::FirstPressAwaitingRelease => {
            emit(&publish_tx, &topic, EVENT_LONG_PRESS_ONGOING).await;
        }
        state => trace!(%topic, ?state, "still tracking"),
    }

    while Instant::now() < window_end {
        tokio::time::sleep(POLL_INTERVAL).await;
        match watcher.state() {
            ButtonState::FirstPressAndFirstRelease => {
                emit(&publish_tx, &topic, EVENT_LONG_PRESS_FINISHED).await;
                watcher.finish();
                return;
            }
            ButtonState::DoublePressFinished => {
                emit(&publish_tx, &topic, EVENT_DOUBLE_PRESS).await;
                watcher.finish();
                return;
            }
            ButtonState::FirstPressAwaitingRelease => {
                emit(&publish_tx, &topic, EVENT_LONG_PRESS_ONGOING).await;
            }
            state => trace!(%topic, ?state, "still tracking"),
        }
    }

    watcher.finish();
    debug!(%topic, "tracking window ended without a terminal state");
}

async fn emit(publish_tx: &mpsc::Sender<Publication>, topic: &str, event: &str) {
    let _ = publish_tx
        .send(Publication::transient(topic.to_owned(), event.to_owned()))
        .await;
}

// ── Tests ────────────────────────────────────────────────────────────
