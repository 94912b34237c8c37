// src/wizards/factory_reset.rs
//
// Factory reset (soft, user initiated) and packing (hard, end of line).

use crate::actions::UserAction;
use crate::check::{blocking, dangerous, Check};
use crate::checks::factory_reset::{
    DisableFactory, FinishPackingMoves, InitiatePackingMoves, ResetCheck, ResetStep,
};
use crate::group::CheckGroup;
use crate::setup::Configuration;
use crate::states::{WizardId, WizardState};
use crate::wizard::{Wizard, WizardDataPackage};

fn reset_settings(erase_projects: bool, disable_unboxing: bool, hard_errors: bool) -> CheckGroup {
    let mut steps = Vec::new();
    if erase_projects {
        steps.push(ResetStep::EraseProjects);
    }
    steps.extend([
        ResetStep::ResetHostname,
        ResetStep::ResetApiKey,
        ResetStep::ResetRemoteConfig,
        ResetStep::ResetTimezone,
        ResetStep::ResetLocale,
        ResetStep::ResetUvCalibrationData,
        ResetStep::RemoveSlicerProfiles,
        ResetStep::ResetHwConfig { disable_unboxing },
        ResetStep::EraseMcEeprom,
    ]);
    let checks = steps
        .into_iter()
        .map(|step| {
            if hard_errors {
                blocking(ResetCheck::hard(step))
            } else {
                blocking(ResetCheck::new(step))
            }
        })
        .collect();
    CheckGroup::new(Configuration::ANY, checks)
}

pub fn factory_reset(package: WizardDataPackage, erase_projects: bool) -> Wizard {
    Wizard::new(
        WizardId::FactoryReset,
        vec![reset_settings(erase_projects, true, false)],
        package,
    )
    .without_results_screen()
}

pub fn packing(package: WizardDataPackage) -> Wizard {
    let kit = package.hw.is_kit();
    let mut groups = vec![reset_settings(false, false, true)];

    let mut stage1: Vec<Box<dyn Check>> = vec![blocking(DisableFactory)];
    if !kit {
        stage1.push(dangerous(InitiatePackingMoves));
    }
    groups.push(CheckGroup::new(Configuration::ANY, stage1));
    if !kit {
        groups.push(
            CheckGroup::single(Configuration::ANY, Box::new(FinishPackingMoves))
                .with_checkpoint(UserAction::FoamInserted, WizardState::InsertFoam),
        );
    }

    Wizard::new(WizardId::Packing, groups, package)
        .non_cancelable()
        .without_results_screen()
}
