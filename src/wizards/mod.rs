// src/wizards/mod.rs
//
// =============================================================================
// SLAWIZARD: WIZARD RECIPES (v 0.4 )
// =============================================================================
//
// Every procedure is an ordered list of check groups plus a few hooks.
// Nothing here runs hardware directly.

use crate::hardware::Hardware;
use crate::states::WizardId;
use crate::wizard::{Wizard, WizardDataPackage};

pub mod calibration;
pub mod display;
pub mod factory_reset;
pub mod self_test;
pub mod tank_surface_cleaner;
pub mod unboxing;
pub mod uv_calibration;

/// Knobs a caller may set when starting a wizard.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WizardOptions {
    pub erase_projects: bool,
    pub display_replaced: bool,
    pub led_module_replaced: bool,
}

/// Builds the recipe for `id`.
pub fn build(id: WizardId, package: WizardDataPackage, options: WizardOptions) -> Wizard {
    match id {
        WizardId::SelfTest => self_test::wizard(package),
        WizardId::Calibration => calibration::wizard(package),
        WizardId::Display => display::display_test(package),
        WizardId::NewExpoPanel => display::new_expo_panel(package),
        WizardId::CompleteUnboxing => unboxing::complete(package),
        WizardId::KitUnboxing => unboxing::kit(package),
        WizardId::FactoryReset => factory_reset::factory_reset(package, options.erase_projects),
        WizardId::Packing => factory_reset::packing(package),
        WizardId::UvCalibration => uv_calibration::wizard(
            package,
            options.display_replaced,
            options.led_module_replaced,
        ),
        WizardId::TankSurfaceCleaner => tank_surface_cleaner::wizard(package),
    }
}

/// UV off and fans stopped, whatever state the run left them in.
pub(crate) fn exposure_off(hw: &dyn Hardware) {
    hw.set_uv_led(false);
    hw.stop_fans();
}
