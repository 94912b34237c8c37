// src/wizards/display.rs
//
// Standalone display test and the exposure-panel replacement procedure.

use crate::actions::UserAction;
use crate::check::{dangerous, Check};
use crate::checks::display::DisplayTest;
use crate::checks::uv::UvLedsTest;
use crate::errors::PrinterError;
use crate::group::CheckGroup;
use crate::setup::{Configuration, TankSetup};
use crate::states::{WizardId, WizardState};
use crate::wizard::{Wizard, WizardDataPackage, WizardHooks};

pub fn display_test(package: WizardDataPackage) -> Wizard {
    let checks: Vec<Box<dyn Check>> = vec![
        dangerous(UvLedsTest::default()),
        dangerous(DisplayTest::default()),
    ];
    let group = CheckGroup::new(Configuration::new(Some(TankSetup::Removed), None), checks)
        .with_checkpoint(UserAction::PrepareDisplayTestDone, WizardState::PrepareDisplayTest);
    Wizard::new(WizardId::Display, vec![group], package)
}

struct NewExpoPanelHooks;

impl WizardHooks for NewExpoPanelHooks {
    /// A new panel invalidates the self-test and the calibration.
    fn wizard_finished(&self, package: &WizardDataPackage) -> Result<(), PrinterError> {
        log::info!("New exposure panel installed, clearing display counter");
        package.hw.clear_display_statistics();
        package.config_writer.update(|cfg| {
            cfg.show_wizard = true;
            cfg.calibrated = false;
        });
        Ok(())
    }
}

pub fn new_expo_panel(package: WizardDataPackage) -> Wizard {
    let group = CheckGroup::new(Configuration::ANY, Vec::new())
        .with_checkpoint(UserAction::PrepareNewExpoPanelDone, WizardState::PrepareNewExpoPanel);
    Wizard::new(WizardId::NewExpoPanel, vec![group], package)
        .without_results_screen()
        .with_hooks(NewExpoPanelHooks)
}
