// src/checks/display.rs
//
// Exposure display (user-judged) and resin sensor checks.

use super::mm;
use crate::actions::{ActionPayload, UserAction};
use crate::check::{Check, CheckContext, DangerousCheck, ResultData};
use crate::errors::{CheckError, PrinterError};
use crate::hardware::{Axis, ExposureShutdown};
use crate::setup::{Configuration, PlatformSetup, Resource, TankSetup};
use crate::states::{WizardCheckType, WizardState};

use async_trait::async_trait;

pub const RESIN_MIN_MM: f64 = 4.0;
pub const RESIN_MAX_MM: f64 = 22.0;

// ============================================================================
// DISPLAY
// ============================================================================

/// Shows the logo with UV on and lets the user judge the picture.
#[derive(Default)]
pub struct DisplayTest {
    result: Option<bool>,
}

#[async_trait]
impl Check for DisplayTest {
    fn check_type(&self) -> WizardCheckType {
        WizardCheckType::Display
    }

    fn configuration(&self) -> Configuration {
        Configuration::new(Some(TankSetup::Removed), None)
    }

    fn resources(&self) -> Vec<Resource> {
        vec![Resource::Uv, Resource::Tilt, Resource::TowerDown, Resource::Tower]
    }

    async fn async_task_run(&mut self, ctx: &CheckContext) -> Result<(), CheckError> {
        self.result = None;
        let hw = ctx.hw();
        let image = ctx.package().exposure_image()?;
        let broker = ctx.actions();
        let safe_pwm = hw.model().calibration.safe_default_pwm;

        hw.start_fans();
        let _off = ExposureShutdown::uv_and_fans(hw);
        image.show_system_image("logo.png");
        let mut slot = broker.register(&[UserAction::ReportDisplay])?;
        let _shown = broker.push_state(WizardState::TestDisplay);

        let mut lit = false;
        let reported = loop {
            // UV follows the cover so an open lid never exposes the user.
            let closed = hw.is_cover_closed();
            if closed != lit {
                lit = closed;
                if closed {
                    hw.set_uv_pwm(safe_pwm);
                }
                hw.set_uv_led(closed);
            }
            if let Some((_, payload)) = slot.try_recv() {
                break payload;
            }
            ctx.poll().await?;
        };
        image.blank_screen();

        let passed = reported == ActionPayload::Bool(true);
        log::info!("User reported display status: {}", passed);
        self.result = Some(passed);
        if !passed {
            log::error!("Display test failed");
            return Err(PrinterError::DisplayTestFailed.into());
        }
        Ok(())
    }
}

impl DangerousCheck for DisplayTest {
    fn verify_axes(&self) -> Vec<Axis> {
        vec![Axis::Tower, Axis::Tilt]
    }
}

// ============================================================================
// RESIN SENSOR
// ============================================================================

#[derive(Default)]
pub struct ResinSensorTest {
    position_mm: Option<f64>,
}

#[async_trait]
impl Check for ResinSensorTest {
    fn check_type(&self) -> WizardCheckType {
        WizardCheckType::ResinSensor
    }

    fn configuration(&self) -> Configuration {
        Configuration::new(Some(TankSetup::Print), Some(PlatformSetup::ResinTest))
    }

    fn resources(&self) -> Vec<Resource> {
        vec![Resource::Tower, Resource::TowerDown]
    }

    async fn async_task_run(&mut self, ctx: &CheckContext) -> Result<(), CheckError> {
        let _led = ctx.actions().warn_led();
        let hw = ctx.hw();
        let poll = ctx.runtime().poll_interval();

        hw.set_position(Axis::Tower, mm(120));
        let position_mm = tokio::select! {
            _ = ctx.actions().cancelled() => return Err(CheckError::Canceled),
            measured = hw.measure_resin_mm() => measured?,
        };
        log::debug!("Resin triggered at {} mm", position_mm);

        // Back up before judging so a failure leaves the platform raised.
        hw.verify_axis(Axis::Tower, poll).await?;

        if !(RESIN_MIN_MM..=RESIN_MAX_MM).contains(&position_mm) {
            return Err(PrinterError::ResinSensorFailed { position_mm }.into());
        }
        self.position_mm = Some(position_mm);
        Ok(())
    }

    fn result_data(&self) -> ResultData {
        self.position_mm
            .map(|p| ResultData::from([("wizardResinTriggeredMM".to_string(), p.into())]))
            .unwrap_or_default()
    }
}

impl DangerousCheck for ResinSensorTest {
    fn verify_axes(&self) -> Vec<Axis> {
        vec![Axis::Tower, Axis::Tilt]
    }
}
