// src/checks/tower.rs
//
// Tower homing, travel range and platform alignment.

use super::{mm, print_level};
use crate::check::{Check, CheckContext, DangerousCheck, ResultData};
use crate::errors::{CheckError, PrinterError};
use crate::hardware::{Axis, AxisProfile};
use crate::homing::home_adaptive;
use crate::setup::{Configuration, PlatformSetup, Resource, TankSetup};
use crate::states::WizardCheckType;

use async_trait::async_trait;

/// The controller overshoots the top endstop by up to this much after homing.
pub const TOWER_END_TOLERANCE_NM: i64 = 2_877_500;
/// Fast approach stops this far above the expected print level.
pub const TOWER_ABOVE_SURFACE_NM: i64 = mm(5);
pub const TOWER_CALIB_POS_NM: i64 = mm(1);

// ============================================================================
// HOME
// ============================================================================

/// Homes the tower, raising sensitivity until it succeeds.
#[derive(Default)]
pub struct TowerHomeTest {
    sensitivity: Option<u8>,
}

#[async_trait]
impl Check for TowerHomeTest {
    fn check_type(&self) -> WizardCheckType {
        WizardCheckType::TowerHome
    }

    fn resources(&self) -> Vec<Resource> {
        vec![Resource::Tower, Resource::TowerDown]
    }

    async fn async_task_run(&mut self, ctx: &CheckContext) -> Result<(), CheckError> {
        let _led = ctx.actions().warn_led();
        let outcome = home_adaptive(ctx, Axis::Tower).await?;
        log::info!(
            "Tower homed at sensitivity {} after {} attempt(s)",
            outcome.level,
            outcome.calls
        );
        ctx.package()
            .config_writer
            .update(|cfg| cfg.tower_sensitivity = outcome.level);
        self.sensitivity = Some(outcome.level);
        Ok(())
    }

    fn result_data(&self) -> ResultData {
        self.sensitivity
            .map(|level| ResultData::from([("towerSensitivity".to_string(), level.into())]))
            .unwrap_or_default()
    }
}

impl DangerousCheck for TowerHomeTest {}

// ============================================================================
// RANGE
// ============================================================================

/// Full travel down and back up to the top endstop.
#[derive(Default)]
pub struct TowerRangeTest;

#[async_trait]
impl Check for TowerRangeTest {
    fn check_type(&self) -> WizardCheckType {
        WizardCheckType::TowerRange
    }

    fn resources(&self) -> Vec<Resource> {
        vec![Resource::Tower, Resource::TowerDown]
    }

    async fn async_task_run(&mut self, ctx: &CheckContext) -> Result<(), CheckError> {
        let _led = ctx.actions().warn_led();
        let hw = ctx.hw();
        let limits = hw.limits(Axis::Tower);

        hw.set_position(Axis::Tower, limits.max);
        hw.set_profile(Axis::Tower, AxisProfile::HomingFast);
        let bottom = ctx.move_wait(Axis::Tower, limits.min).await?;
        ctx.set_progress(0.5);

        if bottom == limits.min {
            // Stop short of the endstop, then finish on the sensitive profile.
            ctx.move_wait(Axis::Tower, limits.max - mm(10)).await?;
            hw.set_profile(Axis::Tower, AxisProfile::HomingSlow);
            ctx.move_wait(Axis::Tower, limits.max).await?;
        }

        let position = hw.position(Axis::Tower);
        if position < limits.max || position > limits.max + TOWER_END_TOLERANCE_NM {
            return Err(PrinterError::TowerAxisCheckFailed {
                position_nm: position,
            }
            .into());
        }
        Ok(())
    }
}

impl DangerousCheck for TowerRangeTest {
    fn verify_axes(&self) -> Vec<Axis> {
        vec![Axis::Tower, Axis::Tilt]
    }
}

// ============================================================================
// ALIGN
// ============================================================================

/// Finds the print level by lowering the platform onto the tank.
#[derive(Default)]
pub struct TowerAlignTest {
    tower_height_nm: Option<i64>,
}

impl TowerAlignTest {
    async fn below_surface(ctx: &CheckContext, position: i64) -> CheckError {
        log::error!("Platform calibration failed at {} nm", position);
        ctx.hw().beep_alarm(3);
        if let Err(e) = ctx.hw().home(Axis::Tower).await {
            log::error!("Tower re-home after failed calibration: {}", e);
        }
        PrinterError::TowerBelowSurface {
            position_nm: position,
        }
        .into()
    }
}

#[async_trait]
impl Check for TowerAlignTest {
    fn check_type(&self) -> WizardCheckType {
        WizardCheckType::TowerCalibration
    }

    fn configuration(&self) -> Configuration {
        Configuration::new(Some(TankSetup::Print), Some(PlatformSetup::Print))
    }

    fn resources(&self) -> Vec<Resource> {
        vec![Resource::Tower, Resource::TowerDown]
    }

    async fn async_task_run(&mut self, ctx: &CheckContext) -> Result<(), CheckError> {
        let _led = ctx.actions().warn_led();
        let hw = ctx.hw();
        let limits = hw.limits(Axis::Tower);
        log::info!("Starting platform calibration");

        hw.set_profile(Axis::Tilt, AxisProfile::LayerMoveSlow);
        hw.set_profile(Axis::Tower, AxisProfile::HomingFast);

        let above = print_level(hw, &ctx.package().config_writer.get()) + TOWER_ABOVE_SURFACE_NM;
        log::info!("Moving platform to above position");
        let position = ctx.move_wait(Axis::Tower, above).await?;
        if position != above {
            return Err(Self::below_surface(ctx, position).await);
        }
        ctx.set_progress(0.25);

        log::info!("Moving platform to min position");
        hw.set_profile(Axis::Tower, AxisProfile::HomingSlow);
        let surface = ctx.move_wait(Axis::Tower, limits.min).await?;
        if surface <= limits.min {
            return Err(Self::below_surface(ctx, surface).await);
        }
        ctx.set_progress(0.5);

        log::debug!("Moving tower to calib position x3");
        ctx.move_wait(Axis::Tower, surface + TOWER_CALIB_POS_NM * 3).await?;
        log::debug!("Moving tower to min");
        let surface = ctx.move_wait(Axis::Tower, limits.min).await?;
        ctx.set_progress(0.75);
        log::debug!("Moving tower to calib position");
        let level = ctx.move_wait(Axis::Tower, surface + TOWER_CALIB_POS_NM).await?;

        let height = limits.max - level;
        log::info!("Tower height: {} nm", height);
        ctx.package()
            .config_writer
            .update(|cfg| cfg.tower_height_nm = height);
        self.tower_height_nm = Some(height);
        hw.set_profile(Axis::Tower, AxisProfile::HomingFast);
        Ok(())
    }

    fn result_data(&self) -> ResultData {
        self.tower_height_nm
            .map(|h| ResultData::from([("towerHeight".to_string(), h.into())]))
            .unwrap_or_default()
    }
}

impl DangerousCheck for TowerAlignTest {
    fn verify_axes(&self) -> Vec<Axis> {
        vec![Axis::Tower]
    }
}
