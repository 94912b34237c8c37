// src/wizards/uv_calibration.rs
//
// UV intensity calibration with an external meter. The center, edge and
// apply checks share one `SharedUvResult`.

use super::exposure_off;
use crate::actions::UserAction;
use crate::check::{dangerous, Check};
use crate::checks::display::DisplayTest;
use crate::checks::sysinfo::SystemInfoTest;
use crate::checks::uv::UvLedsTest;
use crate::checks::uv_calibration::{
    SharedUvResult, UvCalibrateApply, UvCalibrateCenter, UvCalibrateEdge, UvMeterPlacementTest,
    UvMeterPresentTest, UvMeterRemovedTest, UvWarmupTest,
};
use crate::errors::PrinterError;
use crate::group::CheckGroup;
use crate::setup::{Configuration, PlatformSetup, TankSetup};
use crate::states::{WizardId, WizardState};
use crate::wizard::{Wizard, WizardDataPackage, WizardHooks};

struct UvCalibrationHooks;

impl WizardHooks for UvCalibrationHooks {
    fn after_run(&self, package: &WizardDataPackage, _state: WizardState) {
        exposure_off(package.hw.as_ref());
        if let Ok(meter) = package.uv_meter() {
            meter.close();
        }
    }
}

fn model_supported(package: &WizardDataPackage) -> Result<(), PrinterError> {
    let model = package.hw.model();
    if model.has_uv_calibration {
        Ok(())
    } else {
        Err(PrinterError::UnsupportedPrinterModel { model: model.name })
    }
}

pub fn wizard(package: WizardDataPackage, display_replaced: bool, led_module_replaced: bool) -> Wizard {
    let result = SharedUvResult::default();
    let removed_tank = Configuration::new(Some(TankSetup::Removed), Some(PlatformSetup::Print));
    let print_setup = Configuration::new(Some(TankSetup::Print), Some(PlatformSetup::Print));

    let prepare: Vec<Box<dyn Check>> = vec![
        dangerous(UvLedsTest::default()),
        dangerous(DisplayTest::default()),
        Box::new(SystemInfoTest::default()),
    ];
    let place: Vec<Box<dyn Check>> = vec![
        dangerous(UvMeterPresentTest),
        dangerous(UvWarmupTest),
        dangerous(UvMeterPlacementTest),
    ];
    let calibrate: Vec<Box<dyn Check>> = vec![
        dangerous(UvCalibrateCenter::new(
            result.clone(),
            display_replaced || led_module_replaced,
        )),
        dangerous(UvCalibrateEdge::new(result.clone())),
    ];
    let finish: Vec<Box<dyn Check>> = vec![
        Box::new(UvMeterRemovedTest),
        Box::new(UvCalibrateApply::new(result, display_replaced, led_module_replaced)),
    ];

    let groups = vec![
        CheckGroup::new(removed_tank, prepare)
            .with_precondition(model_supported)
            .with_checkpoint(UserAction::UvCalibrationPrepared, WizardState::UvCalibrationPrepare),
        CheckGroup::new(print_setup, place)
            .with_checkpoint(UserAction::UvMeterPlaced, WizardState::UvCalibrationPlaceUvMeter),
        CheckGroup::new(print_setup, calibrate),
        CheckGroup::new(print_setup, finish),
    ];
    Wizard::new(WizardId::UvCalibration, groups, package)
        .without_results_screen()
        .with_hooks(UvCalibrationHooks)
}
