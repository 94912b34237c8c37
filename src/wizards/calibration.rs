// src/wizards/calibration.rs
//
// Mechanical calibration: tilt leveling, platform height, tilt timing.

use crate::actions::UserAction;
use crate::check::{dangerous, Check};
use crate::checks::tilt::{TiltAlignTest, TiltCalibrationStartTest, TiltHomeTest, TiltTimingTest};
use crate::checks::tower::{TowerAlignTest, TowerHomeTest};
use crate::errors::PrinterError;
use crate::group::CheckGroup;
use crate::setup::{Configuration, PlatformSetup, TankSetup};
use crate::states::{WizardId, WizardState};
use crate::wizard::{Wizard, WizardDataPackage, WizardHooks};

struct CalibrationHooks;

impl WizardHooks for CalibrationHooks {
    fn wizard_finished(&self, package: &WizardDataPackage) -> Result<(), PrinterError> {
        package.config_writer.update(|cfg| cfg.calibrated = true);
        Ok(())
    }

    fn wizard_failed(&self, package: &WizardDataPackage) -> Result<(), PrinterError> {
        package.config_writer.update(|cfg| cfg.calibrated = false);
        package
            .config_writer
            .commit()
            .map_err(|e| PrinterError::FailedToSaveConfig {
                reason: format!("{:#}", e),
            })
    }
}

pub fn wizard(package: WizardDataPackage) -> Wizard {
    let insert: Vec<Box<dyn Check>> = vec![
        dangerous(TiltHomeTest),
        dangerous(TowerHomeTest::default()),
        dangerous(TiltCalibrationStartTest),
    ];
    let print_setup = Configuration::new(Some(TankSetup::Print), Some(PlatformSetup::Print));
    let groups = vec![
        CheckGroup::new(Configuration::ANY, insert).with_checkpoint(
            UserAction::PrepareCalibrationPlatformTankDone,
            WizardState::PrepareCalibrationInsertPlatformTank,
        ),
        CheckGroup::single(
            Configuration::new(Some(TankSetup::Removed), None),
            Box::new(TiltAlignTest::default()),
        )
        .with_checkpoint(
            UserAction::PrepareCalibrationTiltAlignDone,
            WizardState::PrepareCalibrationTiltAlign,
        ),
        CheckGroup::single(print_setup, dangerous(TowerAlignTest::default())).with_checkpoint(
            UserAction::PrepareCalibrationPlatformAlignDone,
            WizardState::PrepareCalibrationPlatformAlign,
        ),
        CheckGroup::single(print_setup, dangerous(TiltTimingTest::default())).with_checkpoint(
            UserAction::PrepareCalibrationFinishDone,
            WizardState::PrepareCalibrationFinish,
        ),
    ];
    Wizard::new(WizardId::Calibration, groups, package).with_hooks(CalibrationHooks)
}
