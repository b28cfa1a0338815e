/// Audio context lifecycle
///
/// Owns the single [`AudioOutput`] and the state machine around it:
///
/// ```text
/// Uninitialized ─> PendingInteraction ─> Initializing ─> Running <─> Suspended
///                                              │
///                                              └─> Disabled (construction failed)
/// ```
///
/// When a user gesture is required the output is created suspended and resumed by
/// the first [`ContextManager::notify_user_interaction`]. Ready callbacks queue until
/// then.
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use super::output::AudioOutput;
use crate::error::AudioError;
use crate::messaging::{Event, EventBus};

/// Builds the platform output; called once per `initialize`
pub type OutputFactory = Box<dyn Fn() -> Result<Arc<dyn AudioOutput>, AudioError> + Send + Sync>;

type ReadyCallback = Box<dyn FnOnce() + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContextState {
    Uninitialized,
    PendingInteraction,
    Initializing,
    Running,
    Suspended,
    Disabled,
}

impl ContextState {
    pub fn description(&self) -> &'static str {
        match self {
            ContextState::Uninitialized => "not initialized",
            ContextState::PendingInteraction => "waiting for user interaction",
            ContextState::Initializing => "initializing",
            ContextState::Running => "running",
            ContextState::Suspended => "suspended",
            ContextState::Disabled => "disabled",
        }
    }
}

impl fmt::Display for ContextState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

struct Inner {
    state: ContextState,
    output: Option<Arc<dyn AudioOutput>>,
    awaiting_gesture: bool,
    interacted: bool,
    pending: Vec<ReadyCallback>,
}

pub struct ContextManager {
    factory: OutputFactory,
    require_gesture: bool,
    inner: Mutex<Inner>,
    bus: EventBus,
}

impl ContextManager {
    pub fn new(factory: OutputFactory, require_gesture: bool, bus: EventBus) -> Self {
        Self {
            factory,
            require_gesture,
            inner: Mutex::new(Inner {
                state: ContextState::Uninitialized,
                output: None,
                awaiting_gesture: false,
                interacted: false,
                pending: Vec::new(),
            }),
            bus,
        }
    }

    pub fn state(&self) -> ContextState {
        self.inner.lock().state
    }

    pub fn is_running(&self) -> bool {
        self.state() == ContextState::Running
    }

    /// Create the output. Failure disables audio for the session; never returns an error.
    pub fn initialize(&self) -> ContextState {
        let mut transitions = Vec::new();
        {
            let mut inner = self.inner.lock();
            if inner.state != ContextState::Uninitialized {
                return inner.state;
            }
            if self.require_gesture && !inner.interacted {
                transitions.push(set_state(&mut inner, ContextState::PendingInteraction));
            }
            transitions.push(set_state(&mut inner, ContextState::Initializing));
        }
        self.publish(transitions);

        let created = (self.factory)();

        let mut transitions = Vec::new();
        let mut ready = Vec::new();
        let state = {
            let mut inner = self.inner.lock();
            match created {
                Ok(output) => {
                    if self.require_gesture && !inner.interacted {
                        output.suspend();
                        inner.awaiting_gesture = true;
                        transitions.push(set_state(&mut inner, ContextState::Suspended));
                        tracing::info!("Audio context suspended until first user interaction");
                    } else {
                        transitions.push(set_state(&mut inner, ContextState::Running));
                        ready = std::mem::take(&mut inner.pending);
                        tracing::info!("Audio context running");
                    }
                    inner.output = Some(output);
                }
                Err(e) => {
                    tracing::warn!("Audio context unavailable, audio disabled: {}", e);
                    inner.pending.clear();
                    transitions.push(set_state(&mut inner, ContextState::Disabled));
                }
            }
            inner.state
        };

        self.publish(transitions);
        run_callbacks(ready);
        state
    }

    /// Forwarded by the host on its first click, touch or key press. Handled once.
    pub fn notify_user_interaction(&self) {
        let mut transitions = Vec::new();
        let ready = {
            let mut inner = self.inner.lock();
            if inner.interacted {
                return;
            }
            inner.interacted = true;
            if !inner.awaiting_gesture {
                return;
            }
            inner.awaiting_gesture = false;
            if let Some(output) = &inner.output {
                output.resume();
            }
            transitions.push(set_state(&mut inner, ContextState::Running));
            tracing::info!("Audio context resumed after user interaction");
            std::mem::take(&mut inner.pending)
        };

        self.publish(transitions);
        run_callbacks(ready);
    }

    /// Run `callback` now if running, otherwise once the context starts running.
    /// Dropped when audio is disabled.
    pub fn on_ready<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut inner = self.inner.lock();
            match inner.state {
                ContextState::Running => {}
                ContextState::Disabled => {
                    tracing::debug!("Audio disabled, dropping ready callback");
                    return;
                }
                _ => {
                    inner.pending.push(Box::new(callback));
                    return;
                }
            }
        }
        callback();
    }

    /// Pause output, e.g. when the host app is backgrounded
    pub fn suspend(&self) {
        let mut transitions = Vec::new();
        {
            let mut inner = self.inner.lock();
            if inner.state != ContextState::Running {
                return;
            }
            if let Some(output) = &inner.output {
                output.suspend();
            }
            transitions.push(set_state(&mut inner, ContextState::Suspended));
        }
        self.publish(transitions);
    }

    /// Undo [`suspend`](Self::suspend). Does nothing while a user gesture is still required.
    pub fn resume(&self) {
        let mut transitions = Vec::new();
        let ready = {
            let mut inner = self.inner.lock();
            if inner.state != ContextState::Suspended {
                return;
            }
            if inner.awaiting_gesture {
                tracing::debug!("Resume ignored, waiting for user interaction");
                return;
            }
            if let Some(output) = &inner.output {
                output.resume();
            }
            transitions.push(set_state(&mut inner, ContextState::Running));
            std::mem::take(&mut inner.pending)
        };
        self.publish(transitions);
        run_callbacks(ready);
    }

    /// Release the output. `initialize` may be called again afterwards, except after a
    /// construction failure: `Disabled` lasts for the session.
    pub fn dispose(&self) {
        let mut transitions = Vec::new();
        {
            let mut inner = self.inner.lock();
            inner.output = None;
            inner.pending.clear();
            inner.awaiting_gesture = false;
            if !matches!(
                inner.state,
                ContextState::Uninitialized | ContextState::Disabled
            ) {
                transitions.push(set_state(&mut inner, ContextState::Uninitialized));
            }
        }
        self.publish(transitions);
    }

    /// The output if one exists, in any state
    pub fn output(&self) -> Option<Arc<dyn AudioOutput>> {
        self.inner.lock().output.clone()
    }

    /// The output if new sounds can start right now
    pub fn playable_output(&self) -> Result<Arc<dyn AudioOutput>, AudioError> {
        let inner = self.inner.lock();
        if inner.awaiting_gesture {
            return Err(AudioError::AutoplayBlocked);
        }
        match (&inner.output, inner.state) {
            (Some(output), ContextState::Running) => Ok(output.clone()),
            _ => Err(AudioError::ContextUnavailable),
        }
    }

    fn publish(&self, transitions: Vec<(ContextState, ContextState)>) {
        for (old_state, new_state) in transitions {
            tracing::debug!("Audio context: {} -> {}", old_state, new_state);
            self.bus
                .publish(Event::ContextStateChanged { old_state, new_state });
        }
    }
}

fn set_state(inner: &mut Inner, new_state: ContextState) -> (ContextState, ContextState) {
    let old_state = inner.state;
    inner.state = new_state;
    (old_state, new_state)
}

fn run_callbacks(callbacks: Vec<ReadyCallback>) {
    for callback in callbacks {
        callback();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeOutput;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn manager(require_gesture: bool, fail: bool) -> (ContextManager, Arc<FakeOutput>) {
        let output = Arc::new(FakeOutput::new());
        let shared = output.clone();
        let factory: OutputFactory = Box::new(move || {
            if fail {
                Err(AudioError::PlaybackFailed("no device".into()))
            } else {
                Ok(shared.clone() as Arc<dyn AudioOutput>)
            }
        });
        (ContextManager::new(factory, require_gesture, EventBus::new()), output)
    }

    #[test]
    fn test_initialize_runs_without_gesture() {
        let (ctx, _) = manager(false, false);
        assert_eq!(ctx.state(), ContextState::Uninitialized);
        assert_eq!(ctx.initialize(), ContextState::Running);
        assert!(ctx.playable_output().is_ok());
        assert_eq!(ctx.initialize(), ContextState::Running);
    }

    #[test]
    fn test_gesture_required_defers_resume() {
        let (ctx, output) = manager(true, false);
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = ran.clone();
        ctx.on_ready(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(ctx.initialize(), ContextState::Suspended);
        assert!(output.is_suspended());
        assert!(matches!(ctx.playable_output(), Err(AudioError::AutoplayBlocked)));
        assert_eq!(ran.load(Ordering::SeqCst), 0);

        // Background resume does not count as a gesture
        ctx.resume();
        assert_eq!(ctx.state(), ContextState::Suspended);

        ctx.notify_user_interaction();
        assert_eq!(ctx.state(), ContextState::Running);
        assert!(!output.is_suspended());
        assert_eq!(ran.load(Ordering::SeqCst), 1);

        // Handled once
        ctx.notify_user_interaction();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_on_ready_runs_immediately_when_running() {
        let (ctx, _) = manager(false, false);
        ctx.initialize();
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = ran.clone();
        ctx.on_ready(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_construction_failure_disables() {
        let (ctx, _) = manager(false, true);
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = ran.clone();
        ctx.on_ready(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(ctx.initialize(), ContextState::Disabled);
        assert!(ctx.output().is_none());
        assert!(matches!(ctx.playable_output(), Err(AudioError::ContextUnavailable)));

        ctx.on_ready(|| panic!("must not run when disabled"));
        ctx.notify_user_interaction();
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_disabled_survives_dispose() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let factory: OutputFactory = Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(AudioError::PlaybackFailed("no device".into()))
        });
        let ctx = ContextManager::new(factory, false, EventBus::new());

        assert_eq!(ctx.initialize(), ContextState::Disabled);
        ctx.dispose();
        assert_eq!(ctx.state(), ContextState::Disabled);
        assert_eq!(ctx.initialize(), ContextState::Disabled);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_suspend_resume_cycle() {
        let (ctx, output) = manager(false, false);
        ctx.initialize();
        ctx.suspend();
        assert_eq!(ctx.state(), ContextState::Suspended);
        assert!(output.is_suspended());
        assert!(ctx.playable_output().is_err());

        ctx.resume();
        assert_eq!(ctx.state(), ContextState::Running);
        assert!(!output.is_suspended());
    }

    #[test]
    fn test_state_changes_are_published() {
        let bus = EventBus::new();
        let (rx, _) = bus.subscribe();
        let output = Arc::new(FakeOutput::new());
        let factory: OutputFactory = Box::new(move || Ok(output.clone() as Arc<dyn AudioOutput>));
        let ctx = ContextManager::new(factory, false, bus);
        ctx.initialize();
        ctx.dispose();

        let states: Vec<ContextState> = rx
            .try_iter()
            .filter_map(|e| match e {
                Event::ContextStateChanged { new_state, .. } => Some(new_state),
                _ => None,
            })
            .collect();
        assert_eq!(
            states,
            vec![
                ContextState::Initializing,
                ContextState::Running,
                ContextState::Uninitialized
            ]
        );
    }
}
