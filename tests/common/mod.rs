// Shared rig for the integration tests: simulated printer, temp data dir,
// a scripted responder and a few scripted checks.
#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use slawizard::check::{Check, CheckContext, ResultData};
use slawizard::hardware::sim::{SimExposureImage, SimUvMeter, SimulatedHardware};
use slawizard::{
    ActionPayload, CheckError, HwConfig, HwConfigStore, PrinterError, PrinterModel, Resource,
    RuntimeConfig, UserAction, Wizard, WizardCheckType, WizardDataPackage, WizardEvent,
    WizardState,
};

pub const RUN_LIMIT: Duration = Duration::from_secs(30);

pub struct Rig {
    pub dir: TempDir,
    pub hw: Arc<SimulatedHardware>,
    pub store: Arc<HwConfigStore>,
    pub image: Arc<SimExposureImage>,
    pub meter: Arc<SimUvMeter>,
}

impl Rig {
    pub fn new() -> Self {
        Self::with_model(PrinterModel::sl1())
    }

    pub fn with_model(model: PrinterModel) -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let hw = Arc::new(SimulatedHardware::new(model));
        let meter = Arc::new(SimUvMeter::new(Arc::clone(&hw)));
        Self {
            dir,
            hw,
            store: Arc::new(HwConfigStore::in_memory(HwConfig::default())),
            image: Arc::new(SimExposureImage::default()),
            meter,
        }
    }

    pub fn runtime(&self) -> RuntimeConfig {
        RuntimeConfig::testing(self.dir.path())
    }

    pub fn package(&self) -> WizardDataPackage {
        WizardDataPackage::new(self.hw.clone(), self.store.writer(), self.runtime())
            .with_exposure_image(self.image.clone())
            .with_uv_meter(self.meter.clone())
    }

    pub fn config(&self) -> HwConfig {
        self.store.get()
    }
}

/// Runs the wizard to its end on the current runtime.
pub async fn run(wizard: &Wizard) -> WizardState {
    tokio::time::timeout(RUN_LIMIT, wizard.run())
        .await
        .expect("wizard did not finish in time")
}

/// Answers every registered action with whatever `policy` returns.
pub fn respond_with<F>(wizard: &Arc<Wizard>, policy: F) -> JoinHandle<()>
where
    F: Fn(UserAction) -> Option<ActionPayload> + Send + 'static,
{
    let wizard = Arc::clone(wizard);
    let mut events = wizard.subscribe();
    tokio::spawn(async move {
        loop {
            let actions = match events.recv().await {
                Ok(WizardEvent::ActionsChanged(actions)) => actions,
                Ok(_) => continue,
                Err(RecvError::Lagged(_)) => wizard.broker().registered_actions(),
                Err(RecvError::Closed) => return,
            };
            for action in actions {
                if let Some(payload) = policy(action) {
                    let _ = wizard.trigger(action, payload);
                }
            }
        }
    })
}

pub fn auto_confirm(wizard: &Arc<Wizard>) -> JoinHandle<()> {
    respond_with(wizard, UserAction::auto_response)
}

/// Polls until the wizard shows `state`.
pub async fn wait_for_state(wizard: &Wizard, state: WizardState) {
    tokio::time::timeout(RUN_LIMIT, async {
        while wizard.state() != state {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("wizard never reached {}", state));
}

/// Polls until `action` is registered.
pub async fn wait_for_action(wizard: &Wizard, action: UserAction) {
    tokio::time::timeout(RUN_LIMIT, async {
        while !wizard.broker().registered_actions().contains(&action) {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("{:?} was never registered", action));
}

// ============================================================================
// SCRIPTED CHECKS
// ============================================================================

/// Shared record of what scripted checks did.
#[derive(Default)]
pub struct CheckLog {
    pub started: Mutex<Vec<WizardCheckType>>,
    active: AtomicUsize,
    pub max_active: AtomicUsize,
}

impl CheckLog {
    pub fn started(&self) -> Vec<WizardCheckType> {
        self.started.lock().expect("check log poisoned").clone()
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

/// Sleeps while holding its resources and can fail or emit a result.
pub struct ScriptedCheck {
    pub check_type: WizardCheckType,
    pub resources: Vec<Resource>,
    pub hold: Duration,
    pub fail_with: Option<PrinterError>,
    pub result: ResultData,
    pub log: Arc<CheckLog>,
}

impl ScriptedCheck {
    pub fn new(check_type: WizardCheckType, log: &Arc<CheckLog>) -> Self {
        Self {
            check_type,
            resources: Vec::new(),
            hold: Duration::from_millis(1),
            fail_with: None,
            result: ResultData::new(),
            log: Arc::clone(log),
        }
    }

    pub fn holding(mut self, resources: &[Resource], hold: Duration) -> Self {
        self.resources = resources.to_vec();
        self.hold = hold;
        self
    }

    pub fn failing(mut self, error: PrinterError) -> Self {
        self.fail_with = Some(error);
        self
    }

    pub fn emitting(mut self, key: &str, value: i64) -> Self {
        self.result.insert(key.to_string(), value.into());
        self
    }

    pub fn boxed(self) -> Box<dyn Check> {
        Box::new(self)
    }
}

#[async_trait]
impl Check for ScriptedCheck {
    fn check_type(&self) -> WizardCheckType {
        self.check_type
    }

    fn resources(&self) -> Vec<Resource> {
        self.resources.clone()
    }

    async fn async_task_run(&mut self, ctx: &CheckContext) -> Result<(), CheckError> {
        self.log
            .started
            .lock()
            .expect("check log poisoned")
            .push(self.check_type);
        let now = self.log.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.log.max_active.fetch_max(now, Ordering::SeqCst);

        let slept = ctx.sleep(self.hold).await;
        self.log.active.fetch_sub(1, Ordering::SeqCst);
        slept?;

        ctx.set_progress(0.5);
        match &self.fail_with {
            Some(e) => Err(e.clone().into()),
            None => Ok(()),
        }
    }

    fn result_data(&self) -> ResultData {
        self.result.clone()
    }
}

/// Holds its resources until a report arrives (or the run stops).
pub struct WaitingCheck {
    pub check_type: WizardCheckType,
    pub resources: Vec<Resource>,
}

#[async_trait]
impl Check for WaitingCheck {
    fn check_type(&self) -> WizardCheckType {
        self.check_type
    }

    fn resources(&self) -> Vec<Resource> {
        self.resources.clone()
    }

    async fn async_task_run(&mut self, ctx: &CheckContext) -> Result<(), CheckError> {
        ctx.actions()
            .wait_for_user(UserAction::ReportDisplay, WizardState::TestDisplay)
            .await?;
        Ok(())
    }
}
