// src/actions.rs
//
// =============================================================================
// SLAWIZARD: USER ACTION BROKER (v 0.4 )
// =============================================================================
//
// The single channel between a running wizard and the outside world.
//
// Responsibilities:
// 1. Once-triggerable user actions (checkpoint confirmations, user reports).
// 2. Nested state display: overlays pushed by checks, popped on every exit path.
// 3. Cooperative cancellation (cancel / abort / force) seen at every suspension point.
// 4. Run-wide coordination: warn LED level, resource locks, active configuration.
// 5. Change notifications on a broadcast channel.

use crate::errors::{BrokerError, CheckError};
use crate::hardware::{Hardware, PowerLedMode};
use crate::setup::{Configuration, ResourceLocks};
use crate::states::{WizardCheckState, WizardCheckType, WizardState};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{broadcast, mpsc, watch};

// ============================================================================
// 1. VOCABULARY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserAction {
    // Checkpoints
    PrepareWizardPart1Done,
    PrepareWizardPart2Done,
    PrepareWizardPart3Done,
    PrepareDisplayTestDone,
    PrepareNewExpoPanelDone,
    PrepareCalibrationPlatformTankDone,
    PrepareCalibrationTiltAlignDone,
    PrepareCalibrationPlatformAlignDone,
    PrepareCalibrationFinishDone,
    ConfigurationConfirmed,
    ShowResultsDone,

    // Unboxing / packing
    SafetyStickerRemoved,
    SideFoamRemoved,
    TankFoamRemoved,
    DisplayFoilRemoved,
    FoamInserted,

    // UV calibration
    UvCalibrationPrepared,
    UvMeterPlaced,
    UvApplyResult,
    UvDiscardResults,

    // Tank surface cleaner
    TankSurfaceCleanerInitDone,
    InsertCleaningAdaptorDone,
    RemoveCleaningAdaptorDone,

    // User reports
    ReportDisplay,
    ReportAudio,
    TiltMove,
    TiltAligned,
}

impl UserAction {
    /// Payload an unattended operator would send, `None` for actions that
    /// must never be answered automatically.
    pub fn auto_response(self) -> Option<ActionPayload> {
        match self {
            UserAction::TiltMove | UserAction::UvDiscardResults => None,
            UserAction::ReportDisplay | UserAction::ReportAudio => Some(ActionPayload::Bool(true)),
            _ => Some(ActionPayload::None),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionPayload {
    None,
    Bool(bool),
    Direction(i8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    Cancel,
    Abort,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum WizardEvent {
    StateChanged(WizardState),
    CheckStateChanged {
        check: WizardCheckType,
        state: WizardCheckState,
    },
    CheckProgress {
        check: WizardCheckType,
        progress: f64,
    },
    ActionsChanged(Vec<UserAction>),
}

// ============================================================================
// 2. INTERNAL STATE
// ============================================================================

struct StateStack {
    base: WizardState,
    overlays: Vec<(u64, WizardState)>,
}

impl StateStack {
    fn effective(&self) -> WizardState {
        if self.base.is_terminal() {
            return self.base;
        }
        self.overlays
            .last()
            .map(|(_, state)| *state)
            .unwrap_or(self.base)
    }
}

type ActionSender = mpsc::UnboundedSender<(UserAction, ActionPayload)>;

struct Inner {
    hw: Arc<dyn Hardware>,
    registry: Mutex<BTreeMap<UserAction, ActionSender>>,
    states: Mutex<StateStack>,
    next_overlay: AtomicU64,
    events: broadcast::Sender<WizardEvent>,
    stop: watch::Sender<Option<StopReason>>,
    forced: watch::Sender<bool>,
    warn_level: Mutex<usize>,
    locks: ResourceLocks,
    active_configuration: Mutex<Option<Configuration>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Inner {
    fn emit(&self, event: WizardEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn update_states(&self, edit: impl FnOnce(&mut StateStack)) {
        let mut stack = lock(&self.states);
        let before = stack.effective();
        edit(&mut stack);
        let after = stack.effective();
        drop(stack);
        if before != after {
            log::debug!("Wizard state {} -> {}", before, after);
            self.emit(WizardEvent::StateChanged(after));
        }
    }

    fn registered(&self) -> Vec<UserAction> {
        lock(&self.registry).keys().copied().collect()
    }
}

// ============================================================================
// 3. THE BROKER
// ============================================================================

#[derive(Clone)]
pub struct UserActionBroker {
    inner: Arc<Inner>,
}

impl UserActionBroker {
    pub fn new(hw: Arc<dyn Hardware>) -> Self {
        let (events, _) = broadcast::channel(256);
        let (stop, _) = watch::channel(None);
        Self {
            inner: Arc::new(Inner {
                hw,
                registry: Mutex::new(BTreeMap::new()),
                states: Mutex::new(StateStack {
                    base: WizardState::Init,
                    overlays: Vec::new(),
                }),
                next_overlay: AtomicU64::new(1),
                events,
                stop,
                forced: watch::channel(false).0,
                warn_level: Mutex::new(0),
                locks: ResourceLocks::new(),
                active_configuration: Mutex::new(None),
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WizardEvent> {
        self.inner.events.subscribe()
    }

    pub(crate) fn emit(&self, event: WizardEvent) {
        self.inner.emit(event);
    }

    // ------------------------------------------------------------------------
    // User actions
    // ------------------------------------------------------------------------

    /// Registers every action in `actions` on one slot. All or nothing.
    pub fn register(&self, actions: &[UserAction]) -> Result<ActionSlot, BrokerError> {
        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut registry = lock(&self.inner.registry);
            if let Some(taken) = actions.iter().find(|a| registry.contains_key(a)) {
                return Err(BrokerError::AlreadyRegistered(*taken));
            }
            for action in actions {
                registry.insert(*action, tx.clone());
            }
        }
        log::debug!("Registered user actions {:?}", actions);
        self.inner
            .emit(WizardEvent::ActionsChanged(self.inner.registered()));
        Ok(ActionSlot {
            inner: Arc::clone(&self.inner),
            actions: actions.to_vec(),
            rx,
        })
    }

    /// Fires a registered action. Unregistered actions are rejected with no effect.
    pub fn trigger(&self, action: UserAction, payload: ActionPayload) -> Result<(), BrokerError> {
        let sender = lock(&self.inner.registry).get(&action).cloned();
        let sender = sender.ok_or(BrokerError::NotRegistered(action))?;
        log::info!("User action {:?} ({:?})", action, payload);
        sender
            .send((action, payload))
            .map_err(|_| BrokerError::NotRegistered(action))
    }

    pub fn registered_actions(&self) -> Vec<UserAction> {
        self.inner.registered()
    }

    /// Shows `state` and suspends until `action` fires.
    pub async fn wait_for_user(
        &self,
        action: UserAction,
        state: WizardState,
    ) -> Result<ActionPayload, CheckError> {
        let mut slot = self.register(&[action])?;
        let _shown = self.push_state(state);
        log::info!("Waiting for user: {:?}", action);
        tokio::select! {
            _ = self.cancelled() => Err(CheckError::Canceled),
            received = slot.recv() => match received {
                Some((_, payload)) => Ok(payload),
                None => Err(CheckError::Canceled),
            },
        }
    }

    // ------------------------------------------------------------------------
    // State display
    // ------------------------------------------------------------------------

    /// Overlays `state` until the returned guard drops.
    pub fn push_state(&self, state: WizardState) -> StateGuard {
        let id = self.inner.next_overlay.fetch_add(1, Ordering::Relaxed);
        self.inner
            .update_states(|stack| stack.overlays.push((id, state)));
        log::debug!("Wizard state pushed: {}", state);
        StateGuard {
            inner: Arc::clone(&self.inner),
            id,
        }
    }

    pub(crate) fn set_base_state(&self, state: WizardState) {
        self.inner.update_states(|stack| stack.base = state);
    }

    pub fn state(&self) -> WizardState {
        lock(&self.inner.states).effective()
    }

    // ------------------------------------------------------------------------
    // Cancellation
    // ------------------------------------------------------------------------

    fn request_stop(&self, reason: StopReason) {
        let changed = self.inner.stop.send_if_modified(|current| match (*current, reason) {
            (None, _) | (Some(StopReason::Cancel), StopReason::Abort) => {
                *current = Some(reason);
                true
            }
            _ => false,
        });
        if changed {
            log::info!("Stop requested: {:?}", reason);
        }
    }

    pub fn cancel(&self) {
        self.request_stop(StopReason::Cancel);
    }

    pub fn abort(&self) {
        self.request_stop(StopReason::Abort);
    }

    /// Cancels without waiting for blocking checks to reach their next poll.
    /// Their worker threads are left to finish on their own.
    pub fn force_cancel(&self) {
        self.inner.forced.send_replace(true);
        self.request_stop(StopReason::Cancel);
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        *self.inner.stop.borrow()
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop_reason().is_some()
    }

    pub fn is_forced(&self) -> bool {
        *self.inner.forced.borrow()
    }

    /// Resolves once the stop has been forced.
    pub async fn forced(&self) {
        let mut rx = self.inner.forced.subscribe();
        if rx.wait_for(|forced| *forced).await.is_err() {
            std::future::pending::<()>().await;
        }
    }

    /// Resolves once any stop has been requested.
    pub async fn cancelled(&self) {
        let mut rx = self.inner.stop.subscribe();
        if rx.wait_for(|reason| reason.is_some()).await.is_err() {
            std::future::pending::<()>().await;
        }
    }

    // ------------------------------------------------------------------------
    // Run-wide coordination
    // ------------------------------------------------------------------------

    /// Keeps the power LED in warn mode while any guard is alive.
    pub fn warn_led(&self) -> WarnLedGuard {
        let mut level = lock(&self.inner.warn_level);
        if *level == 0 {
            self.inner.hw.set_power_led(PowerLedMode::Warn);
        }
        *level += 1;
        WarnLedGuard {
            inner: Arc::clone(&self.inner),
        }
    }

    pub fn warn_level(&self) -> usize {
        *lock(&self.inner.warn_level)
    }

    pub fn resource_locks(&self) -> &ResourceLocks {
        &self.inner.locks
    }

    pub fn active_configuration(&self) -> Option<Configuration> {
        *lock(&self.inner.active_configuration)
    }

    pub(crate) fn set_active_configuration(&self, configuration: Configuration) {
        *lock(&self.inner.active_configuration) = Some(configuration);
    }
}

// ============================================================================
// 4. SCOPED HANDLES
// ============================================================================

/// Receiving end of registered actions. Dropping it unregisters them.
pub struct ActionSlot {
    inner: Arc<Inner>,
    actions: Vec<UserAction>,
    rx: mpsc::UnboundedReceiver<(UserAction, ActionPayload)>,
}

impl ActionSlot {
    pub async fn recv(&mut self) -> Option<(UserAction, ActionPayload)> {
        self.rx.recv().await
    }

    /// Blocking variant for sync checks running on a worker thread.
    pub fn blocking_recv(&mut self) -> Option<(UserAction, ActionPayload)> {
        self.rx.blocking_recv()
    }

    pub fn try_recv(&mut self) -> Option<(UserAction, ActionPayload)> {
        self.rx.try_recv().ok()
    }
}

impl Drop for ActionSlot {
    fn drop(&mut self) {
        {
            let mut registry = lock(&self.inner.registry);
            for action in &self.actions {
                registry.remove(action);
            }
        }
        log::debug!("Unregistered user actions {:?}", self.actions);
        self.inner
            .emit(WizardEvent::ActionsChanged(self.inner.registered()));
    }
}

pub struct StateGuard {
    inner: Arc<Inner>,
    id: u64,
}

impl Drop for StateGuard {
    fn drop(&mut self) {
        let id = self.id;
        self.inner
            .update_states(|stack| stack.overlays.retain(|(other, _)| *other != id));
    }
}

pub struct WarnLedGuard {
    inner: Arc<Inner>,
}

impl Drop for WarnLedGuard {
    fn drop(&mut self) {
        let mut level = lock(&self.inner.warn_level);
        *level = level.saturating_sub(1);
        if *level == 0 {
            self.inner.hw.set_power_led(PowerLedMode::Normal);
        }
    }
}
