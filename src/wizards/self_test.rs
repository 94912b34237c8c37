// src/wizards/self_test.rs
//
// Three-part hardware self-test.

use super::exposure_off;
use crate::actions::UserAction;
use crate::check::{blocking, dangerous, Check};
use crate::checks::display::{DisplayTest, ResinSensorTest};
use crate::checks::sysinfo::{SerialNumberTest, SpeakerTest, SystemInfoTest, TemperatureTest};
use crate::checks::tilt::{TiltHomeTest, TiltRangeTest};
use crate::checks::tower::{TowerHomeTest, TowerRangeTest};
use crate::checks::uv::{UvFansTest, UvLedsTest};
use crate::errors::PrinterError;
use crate::group::CheckGroup;
use crate::setup::{Configuration, PlatformSetup, TankSetup};
use crate::states::{WizardId, WizardState};
use crate::wizard::{Wizard, WizardDataPackage, WizardHooks};

struct SelfTestHooks;

impl WizardHooks for SelfTestHooks {
    fn wizard_finished(&self, package: &WizardDataPackage) -> Result<(), PrinterError> {
        package.config_writer.update(|cfg| cfg.show_wizard = false);
        Ok(())
    }

    /// The self-test stays mandatory until it passes.
    fn wizard_failed(&self, package: &WizardDataPackage) -> Result<(), PrinterError> {
        package.config_writer.update(|cfg| cfg.show_wizard = true);
        package
            .config_writer
            .commit()
            .map_err(|e| PrinterError::FailedToSaveConfig {
                reason: format!("{:#}", e),
            })
    }

    fn after_run(&self, package: &WizardDataPackage, state: WizardState) {
        if state != WizardState::Done {
            exposure_off(package.hw.as_ref());
        }
    }
}

pub fn wizard(package: WizardDataPackage) -> Wizard {
    let part1: Vec<Box<dyn Check>> = vec![
        Box::new(SerialNumberTest),
        Box::new(SystemInfoTest::default()),
        blocking(TemperatureTest::default()),
        blocking(SpeakerTest),
        dangerous(TiltHomeTest),
        dangerous(TiltRangeTest),
        dangerous(TowerHomeTest::default()),
        dangerous(UvLedsTest::default()),
        dangerous(UvFansTest::default()),
        dangerous(DisplayTest::default()),
    ];
    let groups = vec![
        CheckGroup::new(
            Configuration::new(Some(TankSetup::Removed), Some(PlatformSetup::Print)),
            part1,
        )
        .with_checkpoint(UserAction::PrepareWizardPart1Done, WizardState::PrepareWizardPart1),
        CheckGroup::single(
            Configuration::new(Some(TankSetup::Print), Some(PlatformSetup::ResinTest)),
            dangerous(ResinSensorTest::default()),
        )
        .with_checkpoint(UserAction::PrepareWizardPart2Done, WizardState::PrepareWizardPart2),
        CheckGroup::single(
            Configuration::new(Some(TankSetup::Print), Some(PlatformSetup::Print)),
            dangerous(TowerRangeTest),
        )
        .with_checkpoint(UserAction::PrepareWizardPart3Done, WizardState::PrepareWizardPart3),
    ];
    Wizard::new(WizardId::SelfTest, groups, package).with_hooks(SelfTestHooks)
}
