// src/wizards/unboxing.rs
//
// Unboxing: the user strips the transport locks, the printer moves out of the way.

use crate::actions::UserAction;
use crate::checks::unboxing::{MoveToFoam, MoveToTank};
use crate::errors::PrinterError;
use crate::group::CheckGroup;
use crate::setup::Configuration;
use crate::states::{WizardId, WizardState};
use crate::wizard::{Wizard, WizardDataPackage, WizardHooks};

struct UnboxingHooks;

impl WizardHooks for UnboxingHooks {
    fn wizard_finished(&self, package: &WizardDataPackage) -> Result<(), PrinterError> {
        package.config_writer.update(|cfg| cfg.show_unboxing = false);
        Ok(())
    }
}

fn remove_display_foil() -> CheckGroup {
    CheckGroup::new(Configuration::ANY, Vec::new())
        .with_checkpoint(UserAction::DisplayFoilRemoved, WizardState::RemoveDisplayFoil)
}

pub fn complete(package: WizardDataPackage) -> Wizard {
    let groups = vec![
        CheckGroup::single(Configuration::ANY, Box::new(MoveToFoam))
            .with_checkpoint(UserAction::SafetyStickerRemoved, WizardState::RemoveSafetySticker),
        CheckGroup::single(Configuration::ANY, Box::new(MoveToTank))
            .with_checkpoint(UserAction::SideFoamRemoved, WizardState::RemoveSideFoam),
        CheckGroup::new(Configuration::ANY, Vec::new())
            .with_checkpoint(UserAction::TankFoamRemoved, WizardState::RemoveTankFoam),
        remove_display_foil(),
    ];
    Wizard::new(WizardId::CompleteUnboxing, groups, package)
        .non_cancelable()
        .with_hooks(UnboxingHooks)
}

/// Kits ship without the mechanical transport locks.
pub fn kit(package: WizardDataPackage) -> Wizard {
    Wizard::new(WizardId::KitUnboxing, vec![remove_display_foil()], package)
        .non_cancelable()
        .with_hooks(UnboxingHooks)
}
