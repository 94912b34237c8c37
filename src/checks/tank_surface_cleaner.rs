// src/checks/tank_surface_cleaner.rs
//
// Platform + cleaning adaptor motions and the debris exposure.
// Targets are relative to the calibrated print level.

use super::{mm, print_level};
use crate::check::{Check, CheckContext, DangerousCheck};
use crate::errors::{CheckError, PrinterError};
use crate::hardware::{Axis, AxisProfile, ExposureShutdown};
use crate::setup::Resource;
use crate::states::WizardCheckType;

use async_trait::async_trait;

pub const SAFE_DISTANCE_NM: i64 = mm(36);
pub const TOUCHDOWN_NM: i64 = 1_800_000;
pub const GENTLY_UP_NM: i64 = mm(50);
pub const HOME_RETRIES: u32 = 2;

/// Maps the configured gently-up speed to a tower profile.
pub fn gently_up_profile(speed: u8) -> AxisProfile {
    match speed {
        1 => AxisProfile::SuperSlow,
        2 => AxisProfile::HomingSlow,
        3 => AxisProfile::ResinSensor,
        _ => AxisProfile::MoveSlow,
    }
}

/// Homes `axis`, retrying `retries` more times on failure.
async fn sync_axis(ctx: &CheckContext, axis: Axis, retries: u32) -> Result<(), CheckError> {
    let hw = ctx.hw();
    hw.set_profile(axis, AxisProfile::HomingFast);
    let mut attempt = 0;
    loop {
        let homed = tokio::select! {
            _ = ctx.actions().cancelled() => return Err(CheckError::Canceled),
            homed = hw.home(axis) => homed,
        };
        match homed {
            Ok(()) => return Ok(()),
            Err(e) if attempt < retries => {
                log::warn!("{:?} sync failed ({}), retrying", axis, e);
                attempt += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }
}

#[derive(Default)]
pub struct HomeTower;

#[async_trait]
impl Check for HomeTower {
    fn check_type(&self) -> WizardCheckType {
        WizardCheckType::TowerHome
    }

    fn resources(&self) -> Vec<Resource> {
        vec![Resource::Tower]
    }

    async fn async_task_run(&mut self, ctx: &CheckContext) -> Result<(), CheckError> {
        sync_axis(ctx, Axis::Tower, HOME_RETRIES).await
    }
}

impl DangerousCheck for HomeTower {}

#[derive(Default)]
pub struct TiltHome;

#[async_trait]
impl Check for TiltHome {
    fn check_type(&self) -> WizardCheckType {
        WizardCheckType::TiltHome
    }

    fn resources(&self) -> Vec<Resource> {
        vec![Resource::Tilt, Resource::TowerDown]
    }

    async fn async_task_run(&mut self, ctx: &CheckContext) -> Result<(), CheckError> {
        sync_axis(ctx, Axis::Tilt, HOME_RETRIES).await
    }
}

impl DangerousCheck for TiltHome {}

#[derive(Default)]
pub struct TiltUp;

#[async_trait]
impl Check for TiltUp {
    fn check_type(&self) -> WizardCheckType {
        WizardCheckType::TiltLevel
    }

    fn resources(&self) -> Vec<Resource> {
        vec![Resource::Tilt, Resource::TowerDown]
    }

    async fn async_task_run(&mut self, ctx: &CheckContext) -> Result<(), CheckError> {
        let height = ctx.package().config_writer.get().tilt_height;
        ctx.hw().set_profile(Axis::Tilt, AxisProfile::MoveFast);
        ctx.move_wait(Axis::Tilt, height).await?;
        Ok(())
    }
}

impl DangerousCheck for TiltUp {}

/// Parks the platform a safe distance above the tank.
#[derive(Default)]
pub struct TowerSafeDistance;

#[async_trait]
impl Check for TowerSafeDistance {
    fn check_type(&self) -> WizardCheckType {
        WizardCheckType::TowerSafeDistance
    }

    fn resources(&self) -> Vec<Resource> {
        vec![Resource::Tower]
    }

    async fn async_task_run(&mut self, ctx: &CheckContext) -> Result<(), CheckError> {
        let target = print_level(ctx.hw(), &ctx.package().config_writer.get()) + SAFE_DISTANCE_NM;
        ctx.hw().set_profile(Axis::Tower, AxisProfile::HomingFast);
        ctx.move_wait(Axis::Tower, target).await?;
        Ok(())
    }
}

impl DangerousCheck for TowerSafeDistance {}

/// Lowers the platform slowly; the adaptor must stop it before the display.
#[derive(Default)]
pub struct TouchDown;

#[async_trait]
impl Check for TouchDown {
    fn check_type(&self) -> WizardCheckType {
        WizardCheckType::TowerTouchdown
    }

    fn resources(&self) -> Vec<Resource> {
        vec![Resource::Tower]
    }

    async fn async_task_run(&mut self, ctx: &CheckContext) -> Result<(), CheckError> {
        let hw = ctx.hw();
        let target = print_level(hw, &ctx.package().config_writer.get()) + TOUCHDOWN_NM;
        hw.set_profile(Axis::Tower, AxisProfile::HomingSlow);
        let position = ctx.move_wait(Axis::Tower, target).await?;
        if position == target {
            hw.set_profile(Axis::Tower, AxisProfile::HomingFast);
            ctx.move_wait(Axis::Tower, hw.limits(Axis::Tower).max).await?;
            hw.release_motors();
            return Err(PrinterError::CleaningAdaptorMissing.into());
        }
        log::info!("TouchDown detected an obstacle at {} nm", position);
        Ok(())
    }
}

impl DangerousCheck for TouchDown {}

/// Exposes the whole panel so debris in the tank cures onto the adaptor.
#[derive(Default)]
pub struct ExposeDebris;

#[async_trait]
impl Check for ExposeDebris {
    fn check_type(&self) -> WizardCheckType {
        WizardCheckType::ExposingDebris
    }

    fn resources(&self) -> Vec<Resource> {
        vec![Resource::Uv, Resource::Fans, Resource::TowerDown, Resource::Tilt]
    }

    async fn async_task_run(&mut self, ctx: &CheckContext) -> Result<(), CheckError> {
        let hw = ctx.hw();
        let image = ctx.package().exposure_image()?;
        let seconds = ctx.package().config_writer.get().tank_cleaning_exposure_time_s;

        image.open_screen();
        hw.start_fans();
        hw.set_uv_led(true);
        let exposed = {
            let _off = ExposureShutdown::uv_and_fans(hw);
            let mut exposed = Ok(());
            for second in 0..seconds {
                ctx.set_progress(second as f64 / seconds as f64);
                exposed = ctx.sleep(ctx.runtime().tick()).await;
                if exposed.is_err() {
                    break;
                }
            }
            exposed
        };
        image.blank_screen();
        exposed
    }
}

impl DangerousCheck for ExposeDebris {}

/// Lifts the platform off the cured film at the configured speed.
#[derive(Default)]
pub struct GentlyUp;

#[async_trait]
impl Check for GentlyUp {
    fn check_type(&self) -> WizardCheckType {
        WizardCheckType::TowerGentlyUp
    }

    fn resources(&self) -> Vec<Resource> {
        vec![Resource::Tilt, Resource::Tower]
    }

    async fn async_task_run(&mut self, ctx: &CheckContext) -> Result<(), CheckError> {
        let config = ctx.package().config_writer.get();
        let profile = gently_up_profile(config.tank_cleaning_gently_up_profile);
        log::info!(
            "GentlyUp with speed {} -> {:?}",
            config.tank_cleaning_gently_up_profile,
            profile
        );
        sync_axis(ctx, Axis::Tilt, HOME_RETRIES).await?;
        ctx.hw().set_profile(Axis::Tower, profile);
        let target = print_level(ctx.hw(), &config) + GENTLY_UP_NM;
        ctx.move_wait(Axis::Tower, target).await?;
        Ok(())
    }
}
