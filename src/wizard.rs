// src/wizard.rs
//
// =============================================================================
// SLAWIZARD: WIZARD ENGINE (v 0.4 )
// =============================================================================
//
// The Orchestrator.
//
// Responsibilities:
// 1. Run check groups strictly in order on a dedicated thread + runtime.
// 2. Convert the outcome into exactly one terminal state.
// 3. On success: results screen, hooks, config commit, persist once.
// 4. Expose state, per-check state, warnings, exception and data to callers.

use crate::actions::{ActionPayload, StopReason, UserAction, UserActionBroker, WizardEvent};
use crate::check::{CheckSnapshot, CheckStatus, ResultData};
use crate::config::{ConfigWriter, HwConfigStore, RuntimeConfig};
use crate::errors::{BrokerError, CheckError, PrinterError, PrinterWarning};
use crate::group::CheckGroup;
use crate::hardware::{ExposureImage, Hardware, UvMeter};
use crate::persistence::{ResultDocument, ResultStore, RunIdentity};
use crate::states::{WizardCheckState, WizardCheckType, WizardId, WizardState};

use anyhow::Context;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use tokio::sync::broadcast;
use uuid::Uuid;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// 1. SHARED COLLABORATORS
// ============================================================================

/// Collaborator handles shared by every check of one run.
pub struct WizardDataPackage {
    pub hw: Arc<dyn Hardware>,
    pub config_writer: ConfigWriter,
    pub runtime: RuntimeConfig,
    exposure_image: Option<Arc<dyn ExposureImage>>,
    uv_meter: Option<Arc<dyn UvMeter>>,
}

impl WizardDataPackage {
    pub fn new(hw: Arc<dyn Hardware>, config_writer: ConfigWriter, runtime: RuntimeConfig) -> Self {
        Self {
            hw,
            config_writer,
            runtime,
            exposure_image: None,
            uv_meter: None,
        }
    }

    pub fn with_exposure_image(mut self, image: Arc<dyn ExposureImage>) -> Self {
        self.exposure_image = Some(image);
        self
    }

    pub fn with_uv_meter(mut self, meter: Arc<dyn UvMeter>) -> Self {
        self.uv_meter = Some(meter);
        self
    }

    pub fn config_store(&self) -> &Arc<HwConfigStore> {
        self.config_writer.store()
    }

    pub fn exposure_image(&self) -> Result<&dyn ExposureImage, PrinterError> {
        self.exposure_image
            .as_deref()
            .ok_or_else(|| PrinterError::MissingCollaborator {
                what: "exposure image".into(),
            })
    }

    pub fn uv_meter(&self) -> Result<&dyn UvMeter, PrinterError> {
        self.uv_meter
            .as_deref()
            .ok_or_else(|| PrinterError::MissingCollaborator {
                what: "UV meter".into(),
            })
    }

    pub fn has_uv_meter(&self) -> bool {
        self.uv_meter.is_some()
    }
}

// ============================================================================
// 2. HOOKS
// ============================================================================

/// Per-wizard side effects around the terminal transition.
pub trait WizardHooks: Send + Sync {
    /// Before results are merged and the config committed. An error fails the run.
    fn wizard_finished(&self, _package: &WizardDataPackage) -> Result<(), PrinterError> {
        Ok(())
    }

    /// After a failure; pending config edits are already discarded.
    fn wizard_failed(&self, _package: &WizardDataPackage) -> Result<(), PrinterError> {
        Ok(())
    }

    /// After every run, whatever the outcome.
    fn after_run(&self, _package: &WizardDataPackage, _state: WizardState) {}
}

pub struct NoHooks;

impl WizardHooks for NoHooks {}

// ============================================================================
// 3. THE WIZARD
// ============================================================================

pub struct Wizard {
    id: WizardId,
    cancelable: bool,
    show_results: bool,
    run_id: Uuid,
    broker: UserActionBroker,
    package: Arc<WizardDataPackage>,
    hooks: Box<dyn WizardHooks>,
    groups: Mutex<Option<Vec<CheckGroup>>>,
    statuses: Vec<Arc<CheckStatus>>,
    exception: Mutex<Option<PrinterError>>,
    data: Mutex<ResultData>,
    persisted: AtomicBool,
    thread: Mutex<Option<JoinHandle<WizardState>>>,
}

impl Wizard {
    pub fn new(id: WizardId, groups: Vec<CheckGroup>, package: WizardDataPackage) -> Self {
        let statuses = groups
            .iter()
            .flat_map(|g| g.statuses().iter().cloned())
            .collect();
        let broker = UserActionBroker::new(Arc::clone(&package.hw));
        Self {
            id,
            cancelable: true,
            show_results: true,
            run_id: Uuid::new_v4(),
            broker,
            package: Arc::new(package),
            hooks: Box::new(NoHooks),
            groups: Mutex::new(Some(groups)),
            statuses,
            exception: Mutex::new(None),
            data: Mutex::new(ResultData::new()),
            persisted: AtomicBool::new(false),
            thread: Mutex::new(None),
        }
    }

    /// `cancel()` is rejected; only `abort()` stops the run.
    pub fn non_cancelable(mut self) -> Self {
        self.cancelable = false;
        self
    }

    /// Skips the SHOW_RESULTS pause before DONE.
    pub fn without_results_screen(mut self) -> Self {
        self.show_results = false;
        self
    }

    pub fn with_hooks(mut self, hooks: impl WizardHooks + 'static) -> Self {
        self.hooks = Box::new(hooks);
        self
    }

    // ------------------------------------------------------------------------
    // Threading
    // ------------------------------------------------------------------------

    /// Runs the wizard on its own thread with a current-thread runtime.
    pub fn start(self: &Arc<Self>) -> anyhow::Result<()> {
        let wizard = Arc::clone(self);
        let handle = std::thread::Builder::new()
            .name(format!("wizard-{}", self.id))
            .spawn(move || {
                match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime.block_on(wizard.run()),
                    Err(e) => wizard.fail(PrinterError::Internal(format!(
                        "failed to build wizard runtime: {}",
                        e
                    ))),
                }
            })
            .with_context(|| format!("Failed to spawn {} wizard thread", self.id))?;
        *lock(&self.thread) = Some(handle);
        Ok(())
    }

    /// Waits for a started run. Returns the current state if none was started.
    pub fn join(&self) -> WizardState {
        let handle = lock(&self.thread).take();
        match handle {
            Some(handle) => handle.join().unwrap_or_else(|_| {
                log::error!("Wizard {} thread panicked", self.id);
                self.fail(PrinterError::Internal("wizard thread panicked".into()))
            }),
            None => self.state(),
        }
    }

    // ------------------------------------------------------------------------
    // Run
    // ------------------------------------------------------------------------

    pub async fn run(&self) -> WizardState {
        let Some(mut groups) = lock(&self.groups).take() else {
            log::warn!("Wizard {} already ran", self.id);
            return self.state();
        };

        log::info!("Wizard {} started (run {})", self.id, self.run_id);
        self.broker.set_base_state(WizardState::Running);

        let state = match self.run_groups(&mut groups).await {
            Ok(()) => self.finish(&groups).await,
            Err(CheckError::Canceled) => self.stopped(),
            Err(CheckError::Printer(e)) => self.fail(e),
        };

        self.hooks.after_run(&self.package, state);
        self.package.hw.release_motors();
        log::info!("Wizard {} finished: {}", self.id, state);
        state
    }

    async fn run_groups(&self, groups: &mut [CheckGroup]) -> Result<(), CheckError> {
        let total = groups.len();
        for (index, group) in groups.iter_mut().enumerate() {
            if self.broker.is_stop_requested() {
                return Err(CheckError::Canceled);
            }
            log::info!("Wizard {}: group {}/{}", self.id, index + 1, total);
            group.run(&self.broker, &self.package).await?;
        }
        Ok(())
    }

    async fn finish(&self, groups: &[CheckGroup]) -> WizardState {
        if self.show_results {
            match self
                .broker
                .wait_for_user(UserAction::ShowResultsDone, WizardState::ShowResults)
                .await
            {
                Ok(_) => {}
                Err(CheckError::Canceled) => return self.stopped(),
                Err(CheckError::Printer(e)) => return self.fail(e),
            }
        }

        match self.finalize(groups) {
            Ok(()) => {
                self.broker.set_base_state(WizardState::Done);
                WizardState::Done
            }
            Err(e) => self.fail(e),
        }
    }

    fn finalize(&self, groups: &[CheckGroup]) -> Result<(), PrinterError> {
        self.hooks.wizard_finished(&self.package)?;

        let mut data = ResultData::new();
        for group in groups {
            for (key, value) in group.result() {
                if data.contains_key(key) {
                    return Err(PrinterError::ResultKeyCollision { key: key.clone() });
                }
                data.insert(key.clone(), value.clone());
            }
        }

        // The document goes first so a failed write leaves the config untouched.
        // A failed commit takes the fresh document back out.
        let written = self.persist(&data)?;
        if let Err(e) = self.package.config_writer.commit() {
            if written {
                if let Err(removal) = ResultStore::new(&self.package.runtime.data_dir).remove(self.id) {
                    log::error!("Wizard {} data rollback: {:#}", self.id, removal);
                }
                self.persisted.store(false, Ordering::SeqCst);
            }
            return Err(PrinterError::FailedToSaveConfig {
                reason: format!("{:#}", e),
            });
        }
        *lock(&self.data) = data;
        Ok(())
    }

    /// Returns whether this call wrote the document.
    fn persist(&self, data: &ResultData) -> Result<bool, PrinterError> {
        if self.persisted.swap(true, Ordering::SeqCst) {
            log::warn!("Wizard {} data already stored", self.id);
            return Ok(false);
        }
        let identity = RunIdentity::capture(self.id, self.package.hw.as_ref(), self.run_id);
        let document = ResultDocument::new(&identity, data).map_err(|e| {
            self.persisted.store(false, Ordering::SeqCst);
            e
        })?;
        if let Err(e) = ResultStore::new(&self.package.runtime.data_dir).save(self.id, &document) {
            self.persisted.store(false, Ordering::SeqCst);
            return Err(PrinterError::FailedToSaveWizardData {
                reason: format!("{:#}", e),
            });
        }
        Ok(true)
    }

    fn fail(&self, error: PrinterError) -> WizardState {
        log::error!("Wizard {} failed: {}", self.id, error);
        *lock(&self.exception) = Some(error);
        self.package.config_writer.reset();
        if let Err(e) = self.hooks.wizard_failed(&self.package) {
            log::error!("Wizard {} failure hook: {}", self.id, e);
        }
        self.broker.set_base_state(WizardState::Failed);
        WizardState::Failed
    }

    fn stopped(&self) -> WizardState {
        self.package.config_writer.reset();
        let state = match self.broker.stop_reason() {
            Some(StopReason::Abort) => WizardState::Stopped,
            _ => WizardState::Canceled,
        };
        log::info!("Wizard {} stopped: {}", self.id, state);
        self.broker.set_base_state(state);
        state
    }

    // ------------------------------------------------------------------------
    // Control
    // ------------------------------------------------------------------------

    pub fn cancel(&self) -> Result<(), BrokerError> {
        if !self.cancelable {
            log::warn!("Wizard {} cannot be canceled", self.id);
            return Err(BrokerError::NotCancelable);
        }
        self.broker.cancel();
        Ok(())
    }

    /// Hard stop, honoured by every wizard.
    pub fn abort(&self) {
        self.broker.abort();
    }

    /// Cancels and asks blocking checks to bail out at their next poll.
    pub fn force_cancel(&self) {
        self.broker.force_cancel();
    }

    pub fn trigger(&self, action: UserAction, payload: ActionPayload) -> Result<(), BrokerError> {
        self.broker.trigger(action, payload)
    }

    // ------------------------------------------------------------------------
    // Observation
    // ------------------------------------------------------------------------

    pub fn id(&self) -> WizardId {
        self.id
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn is_cancelable(&self) -> bool {
        self.cancelable
    }

    pub fn broker(&self) -> &UserActionBroker {
        &self.broker
    }

    pub fn package(&self) -> &WizardDataPackage {
        &self.package
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WizardEvent> {
        self.broker.subscribe()
    }

    pub fn state(&self) -> WizardState {
        self.broker.state()
    }

    pub fn check_types(&self) -> Vec<WizardCheckType> {
        self.statuses.iter().map(|s| s.check_type()).collect()
    }

    /// A check type used twice reports its latest started instance.
    pub fn check_data(&self) -> BTreeMap<WizardCheckType, CheckSnapshot> {
        let mut map = BTreeMap::new();
        for status in &self.statuses {
            let snapshot = status.snapshot();
            let replace = match map.get(&status.check_type()) {
                None => true,
                Some(_) => snapshot.state != WizardCheckState::Pending,
            };
            if replace {
                map.insert(status.check_type(), snapshot);
            }
        }
        map
    }

    pub fn check_state(&self) -> BTreeMap<WizardCheckType, WizardCheckState> {
        self.check_data()
            .into_iter()
            .map(|(check, snapshot)| (check, snapshot.state))
            .collect()
    }

    pub fn warnings(&self) -> Vec<PrinterWarning> {
        self.statuses
            .iter()
            .flat_map(|s| s.snapshot().warnings)
            .collect()
    }

    pub fn exception(&self) -> Option<PrinterError> {
        lock(&self.exception).clone()
    }

    pub fn data(&self) -> ResultData {
        lock(&self.data).clone()
    }
}
