// src/wizards/tank_surface_cleaner.rs
//
// Cures debris in the tank onto the cleaning adaptor and lifts it out.
// One check per group: the motions must not overlap.

use super::exposure_off;
use crate::actions::UserAction;
use crate::check::{dangerous, Check};
use crate::checks::tank_surface_cleaner::{
    ExposeDebris, GentlyUp, HomeTower, TiltHome, TiltUp, TouchDown, TowerSafeDistance,
};
use crate::group::CheckGroup;
use crate::setup::Configuration;
use crate::states::{WizardId, WizardState};
use crate::wizard::{Wizard, WizardDataPackage, WizardHooks};

struct TankSurfaceCleanerHooks;

impl WizardHooks for TankSurfaceCleanerHooks {
    fn after_run(&self, package: &WizardDataPackage, _state: WizardState) {
        exposure_off(package.hw.as_ref());
        if let Ok(image) = package.exposure_image() {
            image.blank_screen();
        }
    }
}

pub fn wizard(package: WizardDataPackage) -> Wizard {
    let single = |check: Box<dyn Check>| CheckGroup::single(Configuration::ANY, check);
    let groups = vec![
        single(dangerous(HomeTower)).with_checkpoint(
            UserAction::TankSurfaceCleanerInitDone,
            WizardState::TankSurfaceCleanerInit,
        ),
        single(dangerous(TiltHome)),
        single(dangerous(TiltUp)),
        single(dangerous(TowerSafeDistance)).with_checkpoint(
            UserAction::InsertCleaningAdaptorDone,
            WizardState::TankSurfaceCleanerInsertCleaningAdaptor,
        ),
        single(dangerous(TouchDown)),
        single(dangerous(ExposeDebris)),
        single(Box::new(GentlyUp)),
        single(dangerous(HomeTower)),
        CheckGroup::new(Configuration::ANY, Vec::new()).with_checkpoint(
            UserAction::RemoveCleaningAdaptorDone,
            WizardState::TankSurfaceCleanerRemoveCleaningAdaptor,
        ),
    ];
    Wizard::new(WizardId::TankSurfaceCleaner, groups, package)
        .without_results_screen()
        .with_hooks(TankSurfaceCleanerHooks)
}
