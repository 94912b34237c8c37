// src/group.rs
//
// =============================================================================
// SLAWIZARD: CHECK GROUP (v 0.4 )
// =============================================================================
//
// A batch of checks sharing one physical setup.
//
// Responsibilities:
// 1. Setup: precondition, then the checkpoint (explicit, or implied by a
//    configuration change).
// 2. Run every check concurrently, each under its own resource locks.
// 3. Fail fast: the first fatal error (or a stop request) aborts the siblings,
//    and every task is drained before the group returns. Blocking bodies are
//    waited for until they notice the stop, unless the stop is forced.
// 4. Merge the result maps. Duplicate keys are an error.

use crate::actions::{UserAction, UserActionBroker};
use crate::check::{run_check, Check, CheckContext, CheckStatus, ResultData};
use crate::errors::{CheckError, PrinterError};
use crate::setup::Configuration;
use crate::states::{WizardCheckState, WizardCheckType, WizardState};
use crate::wizard::WizardDataPackage;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinSet;

pub type Precondition = Box<dyn Fn(&WizardDataPackage) -> Result<(), PrinterError> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupSetup {
    /// Only the implicit configuration checkpoint applies.
    None,
    /// Show `state` until `action` is triggered.
    WaitForUser {
        action: UserAction,
        state: WizardState,
    },
}

pub struct CheckGroup {
    configuration: Configuration,
    setup: GroupSetup,
    precondition: Option<Precondition>,
    checks: Vec<Box<dyn Check>>,
    statuses: Vec<Arc<CheckStatus>>,
    result: ResultData,
}

impl CheckGroup {
    pub fn new(configuration: Configuration, checks: Vec<Box<dyn Check>>) -> Self {
        let statuses = checks
            .iter()
            .map(|c| CheckStatus::new(c.check_type()))
            .collect();
        Self {
            configuration,
            setup: GroupSetup::None,
            precondition: None,
            checks,
            statuses,
            result: ResultData::new(),
        }
    }

    pub fn single(configuration: Configuration, check: Box<dyn Check>) -> Self {
        Self::new(configuration, vec![check])
    }

    pub fn with_checkpoint(mut self, action: UserAction, state: WizardState) -> Self {
        self.setup = GroupSetup::WaitForUser { action, state };
        self
    }

    /// Runs before the checkpoint; an error fails the wizard.
    pub fn with_precondition(
        mut self,
        precondition: impl Fn(&WizardDataPackage) -> Result<(), PrinterError> + Send + Sync + 'static,
    ) -> Self {
        self.precondition = Some(Box::new(precondition));
        self
    }

    pub fn configuration(&self) -> Configuration {
        self.configuration
    }

    pub fn setup(&self) -> GroupSetup {
        self.setup
    }

    pub fn statuses(&self) -> &[Arc<CheckStatus>] {
        &self.statuses
    }

    pub fn check_types(&self) -> Vec<WizardCheckType> {
        self.statuses.iter().map(|s| s.check_type()).collect()
    }

    pub fn result(&self) -> &ResultData {
        &self.result
    }

    // ------------------------------------------------------------------------
    // Setup
    // ------------------------------------------------------------------------

    async fn prepare(
        &self,
        broker: &UserActionBroker,
        package: &WizardDataPackage,
    ) -> Result<(), CheckError> {
        if let Some(precondition) = &self.precondition {
            precondition(package)?;
        }

        match self.setup {
            GroupSetup::WaitForUser { action, state } => {
                broker.wait_for_user(action, state).await?;
            }
            GroupSetup::None => {
                let confirmed = broker
                    .active_configuration()
                    .map(|active| active.is_compatible(&self.configuration))
                    .unwrap_or(false);
                if !self.configuration.is_any() && !confirmed {
                    log::info!("Confirming configuration {}", self.configuration);
                    broker
                        .wait_for_user(UserAction::ConfigurationConfirmed, WizardState::ConfirmConfiguration)
                        .await?;
                }
            }
        }

        if !self.configuration.is_any() {
            let active = broker.active_configuration().unwrap_or(Configuration::ANY);
            broker.set_active_configuration(Configuration::new(
                self.configuration.tank.or(active.tank),
                self.configuration.platform.or(active.platform),
            ));
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Run
    // ------------------------------------------------------------------------

    pub(crate) async fn run(
        &mut self,
        broker: &UserActionBroker,
        package: &Arc<WizardDataPackage>,
    ) -> Result<(), CheckError> {
        log::info!("Group {:?} setup", self.check_types());
        self.prepare(broker, package).await?;

        for check in &self.checks {
            if !check.configuration().is_compatible(&self.configuration) {
                log::warn!(
                    "{} expects {} but its group runs in {}",
                    check.check_type(),
                    check.configuration(),
                    self.configuration
                );
            }
        }

        let count = self.checks.len();
        let abandoned = Arc::new(AtomicBool::new(false));
        let mut tasks = JoinSet::new();
        let mut handles = Vec::with_capacity(count);
        for (index, (check, status)) in self.checks.drain(..).zip(&self.statuses).enumerate() {
            let blocking = check.runs_blocking();
            let ctx = CheckContext::new(
                broker.clone(),
                Arc::clone(package),
                Arc::clone(status),
                Arc::clone(&abandoned),
            );
            let handle = tasks.spawn(async move { (index, run_check(check, ctx).await) });
            handles.push((handle, blocking));
        }

        let mut finished: Vec<Option<Box<dyn Check>>> = (0..count).map(|_| None).collect();
        let mut failure: Option<CheckError> = None;

        while failure.is_none() {
            let joined = tokio::select! {
                joined = tasks.join_next() => joined,
                _ = broker.cancelled() => {
                    failure = Some(CheckError::Canceled);
                    break;
                }
            };
            match joined {
                None => break,
                Some(Ok((index, (check, result)))) => {
                    finished[index] = Some(check);
                    if let Err(e) = result {
                        failure = Some(e);
                    }
                }
                Some(Err(e)) => {
                    failure = Some(PrinterError::Internal(format!("check task died: {}", e)).into());
                }
            }
        }

        // Async checks are dropped at their current await point. A blocking
        // body cannot be interrupted, so it keeps its locks until it returns
        // at its next stop poll, unless the stop is forced.
        if failure.is_some() {
            abandoned.store(true, Ordering::SeqCst);
            for (handle, blocking) in &handles {
                if !blocking {
                    handle.abort();
                }
            }
        }
        let mut forced = false;
        loop {
            let joined = if failure.is_some() && !forced {
                tokio::select! {
                    joined = tasks.join_next() => joined,
                    _ = broker.forced() => {
                        log::warn!("Forced stop, leaving blocking checks behind");
                        tasks.abort_all();
                        forced = true;
                        continue;
                    }
                }
            } else {
                tasks.join_next().await
            };
            match joined {
                None => break,
                Some(Ok((index, (check, _)))) => finished[index] = Some(check),
                Some(Err(_)) => {}
            }
        }
        self.checks = finished.into_iter().flatten().collect();

        if let Some(error) = failure {
            for status in &self.statuses {
                if !status.state().is_finished() {
                    status.set_state(WizardCheckState::Canceled, broker);
                }
            }
            return Err(error);
        }

        let mut result = ResultData::new();
        for check in &self.checks {
            for (key, value) in check.result_data() {
                if result.contains_key(&key) {
                    return Err(PrinterError::ResultKeyCollision { key }.into());
                }
                result.insert(key, value);
            }
        }
        self.result = result;
        Ok(())
    }
}
