mod common;

use async_trait::async_trait;
use common::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use slawizard::check::{blocking, dangerous, ResultValue, SyncContext};
use slawizard::checks::tower::TowerHomeTest;
use slawizard::hardware::PowerLedMode;
use slawizard::homing::{ATTEMPTS_PER_LEVEL, SENSITIVITY_LEVELS};
use slawizard::{
    ActionPayload, Axis, BrokerError, Check, CheckContext, CheckError, CheckGroup, Configuration,
    DangerousCheck, PlatformSetup,
    PrinterError, PrinterWarning, Resource, ResultStore, SyncCheck, TankSetup, UserAction, Wizard,
    WizardCheckState, WizardCheckType, WizardEvent, WizardId, WizardState,
};

fn no_result_file(rig: &Rig, id: WizardId) -> bool {
    ResultStore::new(rig.dir.path())
        .paths(id)
        .iter()
        .all(|p| !p.exists())
}

// ============================================================================
// Failure / cancel / success paths
// ============================================================================

#[tokio::test]
async fn test_failing_first_group_never_starts_second() {
    let rig = Rig::new();
    rig.hw
        .script_homing(Axis::Tower, vec![PrinterError::TowerHomeFailed; SENSITIVITY_LEVELS as usize]);
    let log = Arc::new(CheckLog::default());
    let groups = vec![
        CheckGroup::single(Configuration::ANY, dangerous(TowerHomeTest::default())),
        CheckGroup::single(
            Configuration::ANY,
            ScriptedCheck::new(WizardCheckType::TowerRange, &log).boxed(),
        ),
    ];
    let wizard = Wizard::new(WizardId::SelfTest, groups, rig.package());

    assert_eq!(wizard.state(), WizardState::Init);
    let state = run(&wizard).await;

    assert_eq!(state, WizardState::Failed);
    assert_eq!(wizard.state(), WizardState::Failed);
    assert_eq!(wizard.exception(), Some(PrinterError::TowerHomeFailed));
    assert!(log.started().is_empty(), "second group must not start");
    let checks = wizard.check_state();
    assert_eq!(checks[&WizardCheckType::TowerHome], WizardCheckState::Failure);
    assert_eq!(checks[&WizardCheckType::TowerRange], WizardCheckState::Pending);
    assert!(no_result_file(&rig, WizardId::SelfTest));
}

#[tokio::test]
async fn test_cancel_before_second_checkpoint() {
    let rig = Rig::new();
    let log = Arc::new(CheckLog::default());
    let groups = vec![
        CheckGroup::single(
            Configuration::ANY,
            ScriptedCheck::new(WizardCheckType::TowerHome, &log)
                .holding(&[Resource::Tower], Duration::from_millis(5))
                .boxed(),
        )
        .with_checkpoint(UserAction::PrepareWizardPart1Done, WizardState::PrepareWizardPart1),
        CheckGroup::single(
            Configuration::ANY,
            ScriptedCheck::new(WizardCheckType::TowerRange, &log).boxed(),
        )
        .with_checkpoint(UserAction::PrepareWizardPart2Done, WizardState::PrepareWizardPart2),
    ];
    let wizard = Wizard::new(WizardId::SelfTest, groups, rig.package());

    let (state, _) = tokio::join!(run(&wizard), async {
        wait_for_state(&wizard, WizardState::PrepareWizardPart1).await;
        wizard
            .trigger(UserAction::PrepareWizardPart1Done, ActionPayload::None)
            .expect("part 1 confirmation");
        wait_for_state(&wizard, WizardState::PrepareWizardPart2).await;
        wizard.cancel().expect("self-test is cancelable");
    });

    assert_eq!(state, WizardState::Canceled);
    assert_eq!(log.started(), vec![WizardCheckType::TowerHome]);
    let checks = wizard.check_state();
    assert_eq!(checks[&WizardCheckType::TowerHome], WizardCheckState::Success);
    assert_eq!(checks[&WizardCheckType::TowerRange], WizardCheckState::Pending);
    assert!(wizard.exception().is_none());
    assert!(!wizard.broker().resource_locks().any_locked());
    assert!(wizard.broker().registered_actions().is_empty());
    assert!(no_result_file(&rig, WizardId::SelfTest));
}

#[tokio::test]
async fn test_adaptive_homing_reports_final_sensitivity() {
    let rig = Rig::new();
    rig.hw.script_homing(
        Axis::Tower,
        [PrinterError::TowerHomeFailed, PrinterError::TowerEndstopNotReached],
    );
    let groups = vec![CheckGroup::single(
        Configuration::ANY,
        dangerous(TowerHomeTest::default()),
    )];
    let wizard = Wizard::new(WizardId::SelfTest, groups, rig.package()).without_results_screen();

    let state = run(&wizard).await;

    assert_eq!(state, WizardState::Done);
    assert_eq!(rig.hw.home_calls(Axis::Tower), 3);
    assert_eq!(rig.hw.sensitivity_history(Axis::Tower), vec![0, 1, 2]);
    assert_eq!(
        wizard.data().get("towerSensitivity"),
        Some(&ResultValue::Int(2))
    );
    assert_eq!(rig.config().tower_sensitivity, 2);
}

#[tokio::test]
async fn test_homing_budget_is_bounded() {
    let rig = Rig::new();
    let timeout = PrinterError::MotionControllerTimeout {
        reason: "no reply".into(),
    };
    rig.hw.script_homing(Axis::Tower, vec![timeout.clone(); 40]);
    let groups = vec![CheckGroup::single(
        Configuration::ANY,
        dangerous(TowerHomeTest::default()),
    )];
    let wizard = Wizard::new(WizardId::SelfTest, groups, rig.package());

    let state = run(&wizard).await;

    assert_eq!(state, WizardState::Failed);
    assert_eq!(wizard.exception(), Some(timeout));
    assert_eq!(
        rig.hw.home_calls(Axis::Tower),
        SENSITIVITY_LEVELS as u32 * ATTEMPTS_PER_LEVEL
    );
    assert_eq!(rig.hw.sensitivity_history(Axis::Tower), vec![0, 1, 2, 3]);
    // Nothing committed on failure.
    assert_eq!(rig.config().tower_sensitivity, 0);
}

#[tokio::test]
async fn test_checkpoint_confirmation_is_idempotent() {
    let rig = Rig::new();
    let log = Arc::new(CheckLog::default());
    let groups = vec![
        CheckGroup::single(
            Configuration::ANY,
            ScriptedCheck::new(WizardCheckType::TowerHome, &log).boxed(),
        )
        .with_checkpoint(UserAction::PrepareWizardPart1Done, WizardState::PrepareWizardPart1),
        CheckGroup::single(
            Configuration::ANY,
            ScriptedCheck::new(WizardCheckType::TowerRange, &log).boxed(),
        )
        .with_checkpoint(UserAction::PrepareWizardPart2Done, WizardState::PrepareWizardPart2),
    ];
    let wizard = Wizard::new(WizardId::SelfTest, groups, rig.package());

    let (state, late) = tokio::join!(run(&wizard), async {
        wait_for_state(&wizard, WizardState::PrepareWizardPart1).await;
        wizard
            .trigger(UserAction::PrepareWizardPart1Done, ActionPayload::None)
            .expect("first confirmation");
        wait_for_state(&wizard, WizardState::PrepareWizardPart2).await;
        let late = wizard.trigger(UserAction::PrepareWizardPart1Done, ActionPayload::None);
        wizard
            .trigger(UserAction::PrepareWizardPart2Done, ActionPayload::None)
            .expect("second confirmation");
        wait_for_state(&wizard, WizardState::ShowResults).await;
        wizard
            .trigger(UserAction::ShowResultsDone, ActionPayload::None)
            .expect("results dismissed");
        late
    });

    assert_eq!(state, WizardState::Done);
    assert_eq!(
        late,
        Err(BrokerError::NotRegistered(UserAction::PrepareWizardPart1Done))
    );
    assert_eq!(
        wizard.trigger(UserAction::ShowResultsDone, ActionPayload::None),
        Err(BrokerError::NotRegistered(UserAction::ShowResultsDone))
    );
    assert_eq!(
        log.started(),
        vec![WizardCheckType::TowerHome, WizardCheckType::TowerRange]
    );
}

#[tokio::test]
async fn test_unregistered_trigger_has_no_effect() {
    let rig = Rig::new();
    let groups = vec![CheckGroup::new(Configuration::ANY, Vec::new())
        .with_checkpoint(UserAction::PrepareWizardPart1Done, WizardState::PrepareWizardPart1)];
    let wizard = Wizard::new(WizardId::SelfTest, groups, rig.package()).without_results_screen();

    let (state, _) = tokio::join!(run(&wizard), async {
        wait_for_state(&wizard, WizardState::PrepareWizardPart1).await;
        assert_eq!(
            wizard.trigger(UserAction::PrepareWizardPart2Done, ActionPayload::None),
            Err(BrokerError::NotRegistered(UserAction::PrepareWizardPart2Done))
        );
        assert_eq!(wizard.state(), WizardState::PrepareWizardPart1);
        wizard
            .trigger(UserAction::PrepareWizardPart1Done, ActionPayload::None)
            .expect("confirmation");
    });

    assert_eq!(state, WizardState::Done);
}

// ============================================================================
// Resources
// ============================================================================

#[tokio::test]
async fn test_checks_sharing_a_resource_never_overlap() {
    let rig = Rig::new();
    let tower = Arc::new(CheckLog::default());
    let mixed = Arc::new(CheckLog::default());
    let hold = Duration::from_millis(20);
    let checks = vec![
        ScriptedCheck::new(WizardCheckType::TowerHome, &tower)
            .holding(&[Resource::Tower], hold)
            .boxed(),
        ScriptedCheck::new(WizardCheckType::TowerRange, &tower)
            .holding(&[Resource::TowerDown, Resource::Tower], hold)
            .boxed(),
        ScriptedCheck::new(WizardCheckType::TowerCalibration, &tower)
            .holding(&[Resource::Tower, Resource::Fans], hold)
            .boxed(),
        ScriptedCheck::new(WizardCheckType::UvLeds, &mixed)
            .holding(&[Resource::Uv], Duration::from_millis(60))
            .boxed(),
        ScriptedCheck::new(WizardCheckType::TiltHome, &mixed)
            .holding(&[Resource::Tilt], Duration::from_millis(60))
            .boxed(),
    ];
    let wizard = Wizard::new(
        WizardId::SelfTest,
        vec![CheckGroup::new(Configuration::ANY, checks)],
        rig.package(),
    )
    .without_results_screen();

    let state = run(&wizard).await;

    assert_eq!(state, WizardState::Done);
    assert_eq!(tower.started().len(), 3);
    assert_eq!(tower.max_active(), 1);
    // Disjoint resources run side by side.
    assert_eq!(mixed.max_active(), 2);
    assert!(!wizard.broker().resource_locks().any_locked());
}

/// Moves nothing itself, but parks both axes first.
struct ParkingCheck;

#[async_trait]
impl Check for ParkingCheck {
    fn check_type(&self) -> WizardCheckType {
        WizardCheckType::TowerRange
    }

    fn resources(&self) -> Vec<Resource> {
        vec![Resource::Tower, Resource::TowerDown]
    }

    async fn async_task_run(&mut self, _ctx: &CheckContext) -> Result<(), CheckError> {
        Ok(())
    }
}

impl DangerousCheck for ParkingCheck {
    fn verify_axes(&self) -> Vec<Axis> {
        vec![Axis::Tower, Axis::Tilt]
    }
}

#[test]
fn test_dangerous_check_locks_verified_axes() {
    assert_eq!(
        dangerous(ParkingCheck).resources(),
        vec![Resource::Tilt, Resource::Tower, Resource::TowerDown]
    );
}

#[tokio::test]
async fn test_axis_is_not_verified_while_another_check_holds_it() {
    let rig = Rig::new();
    let log = Arc::new(CheckLog::default());
    let checks = vec![
        ScriptedCheck::new(WizardCheckType::TiltHome, &log)
            .holding(&[Resource::Tilt], Duration::from_millis(200))
            .boxed(),
        dangerous(ParkingCheck),
    ];
    let wizard = Wizard::new(
        WizardId::SelfTest,
        vec![CheckGroup::new(Configuration::ANY, checks)],
        rig.package(),
    )
    .without_results_screen();

    let (state, _) = tokio::join!(run(&wizard), async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(wizard.broker().resource_locks().is_locked(Resource::Tilt));
        assert_eq!(rig.hw.home_calls(Axis::Tilt), 0, "tilt homed under a foreign lock");
        assert_eq!(rig.hw.home_calls(Axis::Tower), 0);
    });

    assert_eq!(state, WizardState::Done);
    assert_eq!(rig.hw.home_calls(Axis::Tilt), 1);
    assert_eq!(rig.hw.home_calls(Axis::Tower), 1);
}

#[tokio::test]
async fn test_cancel_releases_held_resources() {
    let rig = Rig::new();
    let log = Arc::new(CheckLog::default());
    let checks: Vec<Box<dyn slawizard::Check>> = vec![
        Box::new(WaitingCheck {
            check_type: WizardCheckType::Display,
            resources: vec![Resource::Uv, Resource::Tower],
        }),
        // Queued behind the waiting check on the same lock.
        ScriptedCheck::new(WizardCheckType::UvLeds, &log)
            .holding(&[Resource::Uv], Duration::from_millis(1))
            .boxed(),
    ];
    let wizard = Wizard::new(
        WizardId::Display,
        vec![CheckGroup::new(Configuration::ANY, checks)],
        rig.package(),
    );

    let (state, _) = tokio::join!(run(&wizard), async {
        wait_for_action(&wizard, UserAction::ReportDisplay).await;
        assert!(wizard.broker().resource_locks().is_locked(Resource::Uv));
        assert!(wizard.broker().resource_locks().is_locked(Resource::Tower));
        wizard.cancel().expect("display test is cancelable");
    });

    assert_eq!(state, WizardState::Canceled);
    assert!(log.started().is_empty());
    assert!(!wizard.broker().resource_locks().any_locked());
    let checks = wizard.check_state();
    assert_eq!(checks[&WizardCheckType::Display], WizardCheckState::Canceled);
    assert_eq!(checks[&WizardCheckType::UvLeds], WizardCheckState::Canceled);
    assert!(no_result_file(&rig, WizardId::Display));
}

// ============================================================================
// Cancelability
// ============================================================================

#[tokio::test]
async fn test_non_cancelable_wizard_only_stops_on_abort() {
    let rig = Rig::new();
    let groups = vec![CheckGroup::new(Configuration::ANY, Vec::new())
        .with_checkpoint(UserAction::SafetyStickerRemoved, WizardState::RemoveSafetySticker)];
    let wizard = Wizard::new(WizardId::CompleteUnboxing, groups, rig.package()).non_cancelable();
    assert!(!wizard.is_cancelable());

    let (state, _) = tokio::join!(run(&wizard), async {
        wait_for_state(&wizard, WizardState::RemoveSafetySticker).await;
        assert_eq!(wizard.cancel(), Err(BrokerError::NotCancelable));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(wizard.state(), WizardState::RemoveSafetySticker);
        wizard.abort();
    });

    assert_eq!(state, WizardState::Stopped);
    assert!(no_result_file(&rig, WizardId::CompleteUnboxing));
}

struct SpinningCheck;

impl SyncCheck for SpinningCheck {
    fn check_type(&self) -> WizardCheckType {
        WizardCheckType::EraseProjects
    }

    fn task_run(&mut self, ctx: &SyncContext) -> Result<(), CheckError> {
        loop {
            ctx.sleep(Duration::from_millis(2))?;
        }
    }
}

/// Blocks without polling, then records that it got past the blocking call.
struct StubbornCheck {
    hold: Duration,
    done: Arc<AtomicBool>,
}

impl SyncCheck for StubbornCheck {
    fn check_type(&self) -> WizardCheckType {
        WizardCheckType::EraseProjects
    }

    fn resources(&self) -> Vec<Resource> {
        vec![Resource::Tower]
    }

    fn task_run(&mut self, ctx: &SyncContext) -> Result<(), CheckError> {
        std::thread::sleep(self.hold);
        self.done.store(true, Ordering::SeqCst);
        ctx.sleep(Duration::from_millis(1))
    }
}

#[tokio::test]
async fn test_cancel_waits_for_blocking_body() {
    let rig = Rig::new();
    let done = Arc::new(AtomicBool::new(false));
    let check = StubbornCheck {
        hold: Duration::from_millis(300),
        done: Arc::clone(&done),
    };
    let groups = vec![CheckGroup::single(Configuration::ANY, blocking(check))];
    let wizard = Wizard::new(WizardId::FactoryReset, groups, rig.package());

    let (state, _) = tokio::join!(run(&wizard), async {
        tokio::time::sleep(Duration::from_millis(30)).await;
        wizard.cancel().expect("factory reset is cancelable");
    });

    assert_eq!(state, WizardState::Canceled);
    assert!(done.load(Ordering::SeqCst), "body must finish before the run ends");
    assert!(!wizard.broker().resource_locks().is_locked(Resource::Tower));
    assert!(!wizard.broker().is_forced());
    assert_eq!(
        wizard.check_state()[&WizardCheckType::EraseProjects],
        WizardCheckState::Canceled
    );
}

#[tokio::test]
async fn test_force_cancel_stops_waiting_for_blocking_body() {
    let rig = Rig::new();
    let done = Arc::new(AtomicBool::new(false));
    let check = StubbornCheck {
        hold: Duration::from_millis(300),
        done: Arc::clone(&done),
    };
    let groups = vec![CheckGroup::single(Configuration::ANY, blocking(check))];
    let wizard = Wizard::new(WizardId::FactoryReset, groups, rig.package());

    let (state, _) = tokio::join!(run(&wizard), async {
        tokio::time::sleep(Duration::from_millis(30)).await;
        wizard.force_cancel();
    });

    assert_eq!(state, WizardState::Canceled);
    assert!(wizard.broker().is_forced());
    assert!(!done.load(Ordering::SeqCst), "forced stop must not wait for the body");

    // The abandoned worker still runs to its end.
    tokio::time::timeout(RUN_LIMIT, async {
        while !done.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("worker never finished");
}

#[tokio::test]
async fn test_failed_sibling_stops_polling_blocking_check() {
    let rig = Rig::new();
    let log = Arc::new(CheckLog::default());
    let checks = vec![
        blocking(SpinningCheck),
        ScriptedCheck::new(WizardCheckType::TowerHome, &log)
            .holding(&[Resource::Tower], Duration::from_millis(20))
            .failing(PrinterError::TowerHomeFailed)
            .boxed(),
    ];
    let wizard = Wizard::new(
        WizardId::SelfTest,
        vec![CheckGroup::new(Configuration::ANY, checks)],
        rig.package(),
    );

    let state = run(&wizard).await;

    assert_eq!(state, WizardState::Failed);
    assert_eq!(wizard.exception(), Some(PrinterError::TowerHomeFailed));
    let checks = wizard.check_state();
    assert_eq!(checks[&WizardCheckType::TowerHome], WizardCheckState::Failure);
    assert_eq!(checks[&WizardCheckType::EraseProjects], WizardCheckState::Canceled);
    assert!(!wizard.broker().resource_locks().any_locked());
}

// ============================================================================
// Setup, warnings, results
// ============================================================================

#[tokio::test]
async fn test_first_group_setup_failure_is_terminal() {
    let rig = Rig::new();
    let log = Arc::new(CheckLog::default());
    let groups = vec![CheckGroup::single(
        Configuration::ANY,
        ScriptedCheck::new(WizardCheckType::UvLeds, &log)
            .holding(&[Resource::Uv], Duration::from_millis(1))
            .boxed(),
    )
    .with_precondition(|_| {
        Err(PrinterError::UnsupportedPrinterModel {
            model: "Mystery".into(),
        })
    })
    .with_checkpoint(UserAction::UvCalibrationPrepared, WizardState::UvCalibrationPrepare)];
    let wizard = Wizard::new(WizardId::UvCalibration, groups, rig.package());

    let state = run(&wizard).await;

    assert_eq!(state, WizardState::Failed);
    assert_eq!(
        wizard.exception(),
        Some(PrinterError::UnsupportedPrinterModel {
            model: "Mystery".into()
        })
    );
    assert!(log.started().is_empty());
    assert!(!wizard.broker().resource_locks().any_locked());
    assert!(wizard.broker().registered_actions().is_empty());
}

struct FlakyStep {
    hard: bool,
}

impl SyncCheck for FlakyStep {
    fn check_type(&self) -> WizardCheckType {
        WizardCheckType::ResetHostname
    }

    fn hard_errors(&self) -> bool {
        self.hard
    }

    fn task_run(&mut self, _ctx: &SyncContext) -> Result<(), CheckError> {
        Err(PrinterError::ResetFailed {
            step: "ResetHostname".into(),
            reason: "read-only filesystem".into(),
        }
        .into())
    }
}

#[tokio::test]
async fn test_soft_failure_becomes_warning() {
    let rig = Rig::new();
    let log = Arc::new(CheckLog::default());
    let checks = vec![
        blocking(FlakyStep { hard: false }),
        ScriptedCheck::new(WizardCheckType::ResetLocale, &log).boxed(),
    ];
    let wizard = Wizard::new(
        WizardId::FactoryReset,
        vec![CheckGroup::new(Configuration::ANY, checks)],
        rig.package(),
    )
    .without_results_screen();

    let state = run(&wizard).await;

    assert_eq!(state, WizardState::Done);
    assert_eq!(log.started(), vec![WizardCheckType::ResetLocale]);
    let checks = wizard.check_state();
    assert_eq!(checks[&WizardCheckType::ResetHostname], WizardCheckState::Warning);
    assert!(matches!(
        wizard.warnings().as_slice(),
        [PrinterWarning::FactoryResetCheckFailure { .. }]
    ));
}

#[tokio::test]
async fn test_hard_failure_fails_wizard() {
    let rig = Rig::new();
    let wizard = Wizard::new(
        WizardId::Packing,
        vec![CheckGroup::single(Configuration::ANY, blocking(FlakyStep { hard: true }))],
        rig.package(),
    );

    let state = run(&wizard).await;

    assert_eq!(state, WizardState::Failed);
    assert!(matches!(
        wizard.exception(),
        Some(PrinterError::ResetFailed { .. })
    ));
}

#[tokio::test]
async fn test_duplicate_result_key_fails_the_run() {
    let rig = Rig::new();
    let log = Arc::new(CheckLog::default());
    let groups = vec![
        CheckGroup::single(
            Configuration::ANY,
            ScriptedCheck::new(WizardCheckType::TowerHome, &log)
                .emitting("towerHeight", 1)
                .boxed(),
        ),
        CheckGroup::single(
            Configuration::ANY,
            ScriptedCheck::new(WizardCheckType::TowerCalibration, &log)
                .emitting("towerHeight", 2)
                .boxed(),
        ),
    ];
    let wizard = Wizard::new(WizardId::Calibration, groups, rig.package()).without_results_screen();

    let state = run(&wizard).await;

    assert_eq!(state, WizardState::Failed);
    assert_eq!(
        wizard.exception(),
        Some(PrinterError::ResultKeyCollision {
            key: "towerHeight".into()
        })
    );
    assert!(no_result_file(&rig, WizardId::Calibration));
}

#[tokio::test]
async fn test_incompatible_setup_asks_for_confirmation() {
    let rig = Rig::new();
    let log = Arc::new(CheckLog::default());
    let groups = vec![
        CheckGroup::single(
            Configuration::new(Some(TankSetup::Removed), Some(PlatformSetup::Print)),
            ScriptedCheck::new(WizardCheckType::UvLeds, &log).boxed(),
        )
        .with_checkpoint(UserAction::PrepareWizardPart1Done, WizardState::PrepareWizardPart1),
        // Same tank, platform don't care: no question asked.
        CheckGroup::single(
            Configuration::new(Some(TankSetup::Removed), None),
            ScriptedCheck::new(WizardCheckType::Display, &log).boxed(),
        ),
        CheckGroup::single(
            Configuration::new(Some(TankSetup::Print), Some(PlatformSetup::Print)),
            ScriptedCheck::new(WizardCheckType::TowerRange, &log).boxed(),
        ),
    ];
    let wizard = Wizard::new(WizardId::SelfTest, groups, rig.package()).without_results_screen();

    let (state, _) = tokio::join!(run(&wizard), async {
        wait_for_state(&wizard, WizardState::PrepareWizardPart1).await;
        wizard
            .trigger(UserAction::PrepareWizardPart1Done, ActionPayload::None)
            .expect("part 1 confirmation");
        wait_for_state(&wizard, WizardState::ConfirmConfiguration).await;
        assert_eq!(
            log.started(),
            vec![WizardCheckType::UvLeds, WizardCheckType::Display]
        );
        wizard
            .trigger(UserAction::ConfigurationConfirmed, ActionPayload::None)
            .expect("configuration confirmation");
    });

    assert_eq!(state, WizardState::Done);
    assert_eq!(log.started().len(), 3);
    assert_eq!(
        wizard.broker().active_configuration(),
        Some(Configuration::new(
            Some(TankSetup::Print),
            Some(PlatformSetup::Print)
        ))
    );
}

#[tokio::test]
async fn test_warn_led_follows_motion() {
    let rig = Rig::new();
    let groups = vec![CheckGroup::single(
        Configuration::ANY,
        dangerous(TowerHomeTest::default()),
    )];
    let wizard = Wizard::new(WizardId::SelfTest, groups, rig.package()).without_results_screen();

    assert_eq!(run(&wizard).await, WizardState::Done);
    assert_eq!(
        rig.hw.power_led_history(),
        vec![PowerLedMode::Warn, PowerLedMode::Normal]
    );
    assert_eq!(wizard.broker().warn_level(), 0);
}

#[tokio::test]
async fn test_progress_is_monotone_and_completes() {
    let rig = Rig::new();
    let log = Arc::new(CheckLog::default());
    let groups = vec![CheckGroup::single(
        Configuration::ANY,
        ScriptedCheck::new(WizardCheckType::SerialNumber, &log).boxed(),
    )];
    let wizard = Wizard::new(WizardId::SelfTest, groups, rig.package()).without_results_screen();
    let mut events = wizard.subscribe();

    assert_eq!(run(&wizard).await, WizardState::Done);

    let mut progress = Vec::new();
    let mut states = Vec::new();
    while let Ok(event) = events.try_recv() {
        match event {
            WizardEvent::CheckProgress { check, progress: p } => {
                assert_eq!(check, WizardCheckType::SerialNumber);
                progress.push(p);
            }
            WizardEvent::CheckStateChanged { state, .. } => states.push(state),
            _ => {}
        }
    }
    assert!(progress.windows(2).all(|w| w[0] <= w[1]), "{:?}", progress);
    assert_eq!(progress.last(), Some(&1.0));
    assert_eq!(
        states,
        vec![WizardCheckState::Running, WizardCheckState::Success]
    );
    assert_eq!(
        wizard.check_data()[&WizardCheckType::SerialNumber].progress,
        1.0
    );
}

#[tokio::test]
async fn test_started_wizard_runs_on_its_own_thread() {
    let rig = Rig::new();
    let log = Arc::new(CheckLog::default());
    let groups = vec![CheckGroup::single(
        Configuration::ANY,
        ScriptedCheck::new(WizardCheckType::TowerHome, &log).boxed(),
    )
    .with_checkpoint(UserAction::PrepareWizardPart1Done, WizardState::PrepareWizardPart1)];
    let wizard = Arc::new(Wizard::new(WizardId::SelfTest, groups, rig.package()));
    let responder = auto_confirm(&wizard);

    wizard.start().expect("wizard thread");
    let joined = Arc::clone(&wizard);
    let state = tokio::time::timeout(
        RUN_LIMIT,
        tokio::task::spawn_blocking(move || joined.join()),
    )
    .await
    .expect("wizard did not finish in time")
    .expect("join task");
    responder.abort();

    assert_eq!(state, WizardState::Done);
    assert_eq!(log.started(), vec![WizardCheckType::TowerHome]);
    assert!(ResultStore::new(rig.dir.path())
        .path(WizardId::SelfTest)
        .exists());
}
