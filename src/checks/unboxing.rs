// src/checks/unboxing.rs
//
// Tower moves that free the transport foam.

use super::mm;
use crate::check::{Check, CheckContext};
use crate::errors::{CheckError, PrinterError};
use crate::hardware::{Axis, AxisProfile};
use crate::setup::Resource;
use crate::states::WizardCheckType;

use async_trait::async_trait;

pub const FOAM_TARGET_POSITION_NM: i64 = mm(30);
pub const MOVE_TO_TANK_HOME_ATTEMPTS: u32 = 3;

/// The platform sits on the foam; pretend it is at zero and lift it off.
#[derive(Default)]
pub struct MoveToFoam;

#[async_trait]
impl Check for MoveToFoam {
    fn check_type(&self) -> WizardCheckType {
        WizardCheckType::MoveToFoam
    }

    fn resources(&self) -> Vec<Resource> {
        vec![Resource::TowerDown, Resource::Tower]
    }

    async fn async_task_run(&mut self, ctx: &CheckContext) -> Result<(), CheckError> {
        let hw = ctx.hw();
        hw.set_position(Axis::Tower, 0);
        hw.set_profile(Axis::Tower, AxisProfile::HomingFast);
        hw.start_move(Axis::Tower, FOAM_TARGET_POSITION_NM)?;
        while hw.is_moving(Axis::Tower) {
            ctx.set_progress(hw.position(Axis::Tower) as f64 / FOAM_TARGET_POSITION_NM as f64);
            ctx.poll().await?;
        }
        hw.release_motors();
        Ok(())
    }
}

/// Homes the tower down onto the tank position, failing fast.
#[derive(Default)]
pub struct MoveToTank;

#[async_trait]
impl Check for MoveToTank {
    fn check_type(&self) -> WizardCheckType {
        WizardCheckType::MoveToTank
    }

    fn resources(&self) -> Vec<Resource> {
        vec![Resource::TowerDown, Resource::Tower]
    }

    async fn async_task_run(&mut self, ctx: &CheckContext) -> Result<(), CheckError> {
        let hw = ctx.hw();
        hw.set_profile(Axis::Tower, AxisProfile::HomingFast);
        let mut last = PrinterError::TowerHomeFailed;
        for attempt in 1..=MOVE_TO_TANK_HOME_ATTEMPTS {
            let homed = tokio::select! {
                _ = ctx.actions().cancelled() => return Err(CheckError::Canceled),
                homed = hw.home(Axis::Tower) => homed,
            };
            match homed {
                Ok(()) => {
                    hw.release_motors();
                    return Ok(());
                }
                Err(e) => {
                    log::warn!("Tower sync attempt {} failed: {}", attempt, e);
                    last = e;
                }
            }
        }
        Err(last.into())
    }
}
