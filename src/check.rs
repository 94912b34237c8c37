// src/check.rs
//
// =============================================================================
// SLAWIZARD: CHECK CONTRACT (v 0.4 )
// =============================================================================
//
// One atomic diagnostic or calibration unit.
//
// Responsibilities:
// 1. The `Check` trait and its result map (`ResultValue`).
// 2. `CheckContext`: what a running check may touch (broker, package, own status).
// 3. `DangerousCheck`: cover closed + axes verified before any motion.
// 4. `SyncCheck`: blocking body on a worker thread, with the hard_errors downgrade.
// 5. `run_check`: lock resources -> run -> record the outcome -> release.
//    A blocking body keeps its locks until it returns, even after the group
//    gave up on it.

use crate::actions::{UserActionBroker, WizardEvent};
use crate::config::RuntimeConfig;
use crate::errors::{CheckError, PrinterError, PrinterWarning};
use crate::hardware::{Axis, Hardware};
use crate::setup::{Configuration, Resource};
use crate::states::{WizardCheckState, WizardCheckType, WizardState};
use crate::wizard::WizardDataPackage;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

// ============================================================================
// 1. RESULT VALUES
// ============================================================================

/// Flat result document leaf: a scalar or a list of scalars.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResultValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    List(Vec<Scalar>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

pub type ResultData = BTreeMap<String, ResultValue>;

impl From<bool> for ResultValue {
    fn from(v: bool) -> Self {
        ResultValue::Bool(v)
    }
}

impl From<i64> for ResultValue {
    fn from(v: i64) -> Self {
        ResultValue::Int(v)
    }
}

impl From<u32> for ResultValue {
    fn from(v: u32) -> Self {
        ResultValue::Int(v as i64)
    }
}

impl From<u8> for ResultValue {
    fn from(v: u8) -> Self {
        ResultValue::Int(v as i64)
    }
}

impl From<f64> for ResultValue {
    fn from(v: f64) -> Self {
        ResultValue::Float(v)
    }
}

impl From<&str> for ResultValue {
    fn from(v: &str) -> Self {
        ResultValue::Text(v.to_string())
    }
}

impl From<String> for ResultValue {
    fn from(v: String) -> Self {
        ResultValue::Text(v)
    }
}

impl From<Vec<i64>> for ResultValue {
    fn from(v: Vec<i64>) -> Self {
        ResultValue::List(v.into_iter().map(Scalar::Int).collect())
    }
}

impl From<Vec<f64>> for ResultValue {
    fn from(v: Vec<f64>) -> Self {
        ResultValue::List(v.into_iter().map(Scalar::Float).collect())
    }
}

// ============================================================================
// 2. THE CHECK TRAIT (The Contract)
// ============================================================================

#[async_trait]
pub trait Check: Send {
    fn check_type(&self) -> WizardCheckType;

    fn configuration(&self) -> Configuration {
        Configuration::ANY
    }

    fn resources(&self) -> Vec<Resource> {
        Vec::new()
    }

    /// The body runs on a worker thread and cannot be dropped mid-way.
    fn runs_blocking(&self) -> bool {
        false
    }

    /// Returns normally on success (possibly with warnings recorded on `ctx`).
    async fn async_task_run(&mut self, ctx: &CheckContext) -> Result<(), CheckError>;

    fn result_data(&self) -> ResultData {
        ResultData::new()
    }
}

// ============================================================================
// 3. LIVE STATUS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckSnapshot {
    pub state: WizardCheckState,
    pub progress: f64,
    pub warnings: Vec<PrinterWarning>,
}

/// Externally observable status of one check, shared with the wizard.
pub struct CheckStatus {
    check_type: WizardCheckType,
    snapshot: Mutex<CheckSnapshot>,
}

impl CheckStatus {
    pub fn new(check_type: WizardCheckType) -> Arc<Self> {
        Arc::new(Self {
            check_type,
            snapshot: Mutex::new(CheckSnapshot {
                state: WizardCheckState::Pending,
                progress: 0.0,
                warnings: Vec::new(),
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, CheckSnapshot> {
        self.snapshot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn check_type(&self) -> WizardCheckType {
        self.check_type
    }

    pub fn snapshot(&self) -> CheckSnapshot {
        self.lock().clone()
    }

    pub fn state(&self) -> WizardCheckState {
        self.lock().state
    }

    pub(crate) fn set_state(&self, state: WizardCheckState, broker: &UserActionBroker) {
        let changed = {
            let mut snap = self.lock();
            let changed = snap.state != state;
            snap.state = state;
            changed
        };
        if changed {
            broker.emit(WizardEvent::CheckStateChanged {
                check: self.check_type,
                state,
            });
        }
    }

    /// Progress never decreases and is clamped to [0, 1].
    pub(crate) fn advance(&self, progress: f64, broker: &UserActionBroker) {
        let updated = {
            let mut snap = self.lock();
            let next = progress.clamp(0.0, 1.0);
            if next > snap.progress {
                snap.progress = next;
                Some(next)
            } else {
                None
            }
        };
        if let Some(progress) = updated {
            broker.emit(WizardEvent::CheckProgress {
                check: self.check_type,
                progress,
            });
        }
    }

    pub(crate) fn add_warning(&self, warning: PrinterWarning) {
        self.lock().warnings.push(warning);
    }
}

// ============================================================================
// 4. CHECK CONTEXT
// ============================================================================

#[derive(Clone)]
pub struct CheckContext {
    broker: UserActionBroker,
    package: Arc<WizardDataPackage>,
    status: Arc<CheckStatus>,
    abandoned: Arc<AtomicBool>,
}

impl CheckContext {
    pub(crate) fn new(
        broker: UserActionBroker,
        package: Arc<WizardDataPackage>,
        status: Arc<CheckStatus>,
        abandoned: Arc<AtomicBool>,
    ) -> Self {
        Self {
            broker,
            package,
            status,
            abandoned,
        }
    }

    /// Set once the group has given up on its checks (a sibling failed or a
    /// stop was requested).
    pub fn is_abandoned(&self) -> bool {
        self.abandoned.load(Ordering::SeqCst)
    }

    pub fn actions(&self) -> &UserActionBroker {
        &self.broker
    }

    pub fn package(&self) -> &WizardDataPackage {
        &self.package
    }

    pub fn hw(&self) -> &dyn Hardware {
        self.package.hw.as_ref()
    }

    pub fn runtime(&self) -> &RuntimeConfig {
        &self.package.runtime
    }

    pub fn check_type(&self) -> WizardCheckType {
        self.status.check_type()
    }

    pub fn progress(&self) -> f64 {
        self.status.snapshot().progress
    }

    pub fn set_progress(&self, progress: f64) {
        self.status.advance(progress, &self.broker);
    }

    pub fn add_warning(&self, warning: PrinterWarning) {
        log::warn!("{}: {}", self.check_type(), warning);
        self.status.add_warning(warning);
    }

    /// Sleeps unless a stop is requested first.
    pub async fn sleep(&self, duration: Duration) -> Result<(), CheckError> {
        tokio::select! {
            _ = self.broker.cancelled() => Err(CheckError::Canceled),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }

    pub async fn poll(&self) -> Result<(), CheckError> {
        self.sleep(self.runtime().poll_interval()).await
    }

    /// Moves and waits for the axis to stop. Returns the final position.
    pub async fn move_wait(&self, axis: Axis, target: i64) -> Result<i64, CheckError> {
        let poll = self.runtime().poll_interval();
        tokio::select! {
            _ = self.broker.cancelled() => Err(CheckError::Canceled),
            moved = self.hw().move_wait(axis, target, poll) => Ok(moved?),
        }
    }

    /// Polls the cover sensor, showing CLOSE_COVER while it is open.
    pub async fn wait_cover_closed(&self) -> Result<(), CheckError> {
        if self.hw().is_cover_closed() {
            return Ok(());
        }
        let _shown = self.broker.push_state(WizardState::CloseCover);
        let runtime = self.runtime();
        let deadline = Instant::now() + runtime.cover_timeout();
        log::info!("{}: waiting for the cover to close", self.check_type());
        while !self.hw().is_cover_closed() {
            if Instant::now() >= deadline {
                return Err(PrinterError::CoverNotClosed {
                    timeout_s: runtime.cover_timeout_s,
                }
                .into());
            }
            self.sleep(runtime.cover_poll_interval()).await?;
        }
        Ok(())
    }
}

// ============================================================================
// 5. DANGEROUS CHECKS
// ============================================================================

/// A check that commands motion or exposure.
pub trait DangerousCheck: Check {
    /// Axes homed (if unsynced) or parked before the body runs.
    fn verify_axes(&self) -> Vec<Axis> {
        Vec::new()
    }
}

pub struct Dangerous<T>(pub T);

#[async_trait]
impl<T: DangerousCheck> Check for Dangerous<T> {
    fn check_type(&self) -> WizardCheckType {
        self.0.check_type()
    }

    fn configuration(&self) -> Configuration {
        self.0.configuration()
    }

    /// Own resources plus every axis it verifies.
    fn resources(&self) -> Vec<Resource> {
        let mut resources = self.0.resources();
        for axis in self.0.verify_axes() {
            resources.extend_from_slice(axis.resources());
        }
        resources.sort();
        resources.dedup();
        resources
    }

    fn runs_blocking(&self) -> bool {
        self.0.runs_blocking()
    }

    async fn async_task_run(&mut self, ctx: &CheckContext) -> Result<(), CheckError> {
        ctx.wait_cover_closed().await?;
        for axis in self.0.verify_axes() {
            ctx.hw()
                .verify_axis(axis, ctx.runtime().poll_interval())
                .await?;
        }
        self.0.async_task_run(ctx).await
    }

    fn result_data(&self) -> ResultData {
        self.0.result_data()
    }
}

pub fn dangerous<T: DangerousCheck + 'static>(check: T) -> Box<dyn Check> {
    Box::new(Dangerous(check))
}

// ============================================================================
// 6. SYNC CHECKS
// ============================================================================

pub trait SyncCheck: Send + 'static {
    fn check_type(&self) -> WizardCheckType;

    fn configuration(&self) -> Configuration {
        Configuration::ANY
    }

    fn resources(&self) -> Vec<Resource> {
        Vec::new()
    }

    /// `false` downgrades a failure to a warning so the wizard carries on.
    fn hard_errors(&self) -> bool {
        true
    }

    fn task_run(&mut self, ctx: &SyncContext) -> Result<(), CheckError>;

    fn result_data(&self) -> ResultData {
        ResultData::new()
    }
}

/// `CheckContext` as seen from a worker thread.
pub struct SyncContext {
    ctx: CheckContext,
    handle: tokio::runtime::Handle,
}

impl SyncContext {
    pub fn check(&self) -> &CheckContext {
        &self.ctx
    }

    pub fn hw(&self) -> &dyn Hardware {
        self.ctx.hw()
    }

    pub fn runtime(&self) -> &RuntimeConfig {
        self.ctx.runtime()
    }

    pub fn set_progress(&self, progress: f64) {
        self.ctx.set_progress(progress);
    }

    pub fn add_warning(&self, warning: PrinterWarning) {
        self.ctx.add_warning(warning);
    }

    /// Runs a future to completion on the wizard's runtime.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.handle.block_on(future)
    }

    pub fn should_stop(&self) -> bool {
        self.ctx.actions().is_stop_requested() || self.ctx.is_abandoned()
    }

    pub fn sleep(&self, duration: Duration) -> Result<(), CheckError> {
        if self.should_stop() {
            return Err(CheckError::Canceled);
        }
        std::thread::sleep(duration);
        Ok(())
    }
}

/// Adapts a `SyncCheck` to the async contract via `spawn_blocking`.
pub struct Blocking<T> {
    check_type: WizardCheckType,
    configuration: Configuration,
    resources: Vec<Resource>,
    hard_errors: bool,
    inner: Option<T>,
}

impl<T: SyncCheck> Blocking<T> {
    pub fn new(check: T) -> Self {
        Self {
            check_type: check.check_type(),
            configuration: check.configuration(),
            resources: check.resources(),
            hard_errors: check.hard_errors(),
            inner: Some(check),
        }
    }
}

#[async_trait]
impl<T: SyncCheck> Check for Blocking<T> {
    fn check_type(&self) -> WizardCheckType {
        self.check_type
    }

    fn configuration(&self) -> Configuration {
        self.configuration
    }

    fn resources(&self) -> Vec<Resource> {
        self.resources.clone()
    }

    fn runs_blocking(&self) -> bool {
        true
    }

    async fn async_task_run(&mut self, ctx: &CheckContext) -> Result<(), CheckError> {
        let mut inner = self
            .inner
            .take()
            .ok_or_else(|| PrinterError::Internal(format!("{} already consumed", self.check_type)))?;
        let sync_ctx = SyncContext {
            ctx: ctx.clone(),
            handle: tokio::runtime::Handle::current(),
        };

        let (inner, result) = tokio::task::spawn_blocking(move || {
            let result = inner.task_run(&sync_ctx);
            (inner, result)
        })
        .await
        .map_err(|e| PrinterError::Internal(format!("{} worker died: {}", self.check_type, e)))?;
        self.inner = Some(inner);

        match result {
            Err(CheckError::Printer(e)) if !self.hard_errors => {
                log::error!("Failed to run {}: {}", self.check_type, e);
                ctx.add_warning(PrinterWarning::FactoryResetCheckFailure {
                    message: format!("{}: {}", self.check_type, e),
                });
                Ok(())
            }
            other => other,
        }
    }

    fn result_data(&self) -> ResultData {
        self.inner
            .as_ref()
            .map(|c| c.result_data())
            .unwrap_or_default()
    }
}

pub fn blocking<T: SyncCheck>(check: T) -> Box<dyn Check> {
    Box::new(Blocking::new(check))
}

// ============================================================================
// 7. EXECUTION LIFECYCLE
// ============================================================================

/// Runs one check under its resource locks and records the outcome.
/// The check is handed back so the group can read its result map.
pub(crate) async fn run_check(
    mut check: Box<dyn Check>,
    ctx: CheckContext,
) -> (Box<dyn Check>, Result<(), CheckError>) {
    let check_type = check.check_type();
    let resources = check.resources();

    log::info!("{}: locking {:?}", check_type, resources);
    let guard = ctx.actions().resource_locks().acquire(&resources).await;
    if ctx.is_abandoned() {
        ctx.status.set_state(WizardCheckState::Canceled, ctx.actions());
        return (check, Err(CheckError::Canceled));
    }

    log::info!("{}: running", check_type);
    ctx.status.set_state(WizardCheckState::Running, ctx.actions());
    let result = check.async_task_run(&ctx).await;

    let state = match &result {
        Ok(()) => {
            ctx.set_progress(1.0);
            if ctx.status.snapshot().warnings.is_empty() {
                WizardCheckState::Success
            } else {
                WizardCheckState::Warning
            }
        }
        Err(CheckError::Canceled) => {
            log::info!("{}: canceled", check_type);
            WizardCheckState::Canceled
        }
        Err(CheckError::Printer(e)) => {
            log::error!("{}: failed: {}", check_type, e);
            WizardCheckState::Failure
        }
    };
    ctx.status.set_state(state, ctx.actions());
    drop(guard);
    log::info!("{}: done ({:?})", check_type, state);

    (check, result)
}
