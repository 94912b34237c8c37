// src/checks/sysinfo.rs
//
// Identity, temperature and speaker checks. None of them move anything.

use crate::actions::{ActionPayload, UserAction};
use crate::check::{Check, CheckContext, ResultData, SyncCheck, SyncContext};
use crate::errors::{CheckError, PrinterError, PrinterWarning};
use crate::states::{WizardCheckType, WizardState};

use async_trait::async_trait;
use regex::Regex;

const A64_SERIAL_PATTERN: &str = r"^CZPX\d{4}X009X[CK]\d{5}";
const MC_SERIAL_PATTERN: &str = r"^CZPX\d{4}X012X[CK01]\d{5}";

pub const MAX_A64_TEMP: f64 = 80.0;
pub const MIN_AMBIENT_TEMP: f64 = 16.0;
pub const MAX_AMBIENT_TEMP: f64 = 34.0;
pub const MAX_UV_TEMP: f64 = 55.0;

fn pattern(raw: &str) -> Result<Regex, PrinterError> {
    Regex::new(raw).map_err(|e| PrinterError::Internal(format!("bad serial pattern: {}", e)))
}

// ============================================================================
// SERIAL NUMBERS
// ============================================================================

/// Malformed serials are warnings, never failures.
#[derive(Default)]
pub struct SerialNumberTest;

#[async_trait]
impl Check for SerialNumberTest {
    fn check_type(&self) -> WizardCheckType {
        WizardCheckType::SerialNumber
    }

    async fn async_task_run(&mut self, ctx: &CheckContext) -> Result<(), CheckError> {
        log::debug!("Checking serial numbers");
        let a64 = ctx.hw().a64_serial();
        if !pattern(A64_SERIAL_PATTERN)?.is_match(&a64) {
            ctx.add_warning(PrinterWarning::WrongA64SerialFormat { serial: a64 });
        }
        ctx.set_progress(0.5);

        let mc = ctx.hw().mc_serial();
        if !pattern(MC_SERIAL_PATTERN)?.is_match(&mc) {
            ctx.add_warning(PrinterWarning::WrongMcSerialFormat { serial: mc });
        }
        Ok(())
    }
}

// ============================================================================
// SYSTEM INFO
// ============================================================================

#[derive(Default)]
pub struct SystemInfoTest {
    data: ResultData,
}

#[async_trait]
impl Check for SystemInfoTest {
    fn check_type(&self) -> WizardCheckType {
        WizardCheckType::SysInfo
    }

    async fn async_task_run(&mut self, ctx: &CheckContext) -> Result<(), CheckError> {
        let hw = ctx.hw();
        self.data = ResultData::from([
            ("osVersion".to_string(), hw.os_version().into()),
            ("a64SerialNo".to_string(), hw.a64_serial().into()),
            ("mcSerialNo".to_string(), hw.mc_serial().into()),
            ("mcFwVersion".to_string(), hw.mc_fw_version().into()),
            ("mcBoardRev".to_string(), hw.mc_board_revision().into()),
        ]);
        Ok(())
    }

    fn result_data(&self) -> ResultData {
        self.data.clone()
    }
}

// ============================================================================
// TEMPERATURES
// ============================================================================

#[derive(Default)]
pub struct TemperatureTest {
    readings: Option<(f64, f64, f64)>,
}

impl SyncCheck for TemperatureTest {
    fn check_type(&self) -> WizardCheckType {
        WizardCheckType::Temperature
    }

    fn task_run(&mut self, ctx: &SyncContext) -> Result<(), CheckError> {
        let hw = ctx.hw();
        let temps = hw.temperatures();

        log::info!("Checking A64 for overheating");
        if temps.a64 > MAX_A64_TEMP {
            hw.beep_alarm(3);
            return Err(PrinterError::A64Overheat {
                temperature: temps.a64,
            }
            .into());
        }

        log::info!("Checking MC temperatures");
        let uv = temps.uv_led.ok_or_else(|| PrinterError::TempSensorFailed {
            sensor: "UV LED".into(),
        })?;
        let ambient = temps.ambient.ok_or_else(|| PrinterError::TempSensorFailed {
            sensor: "ambient".into(),
        })?;
        for (sensor, value, max) in [("UV LED", uv, MAX_UV_TEMP), ("ambient", ambient, MAX_AMBIENT_TEMP)] {
            if !(MIN_AMBIENT_TEMP < value && value < max) {
                return Err(PrinterError::TemperatureOutOfRange {
                    sensor: sensor.into(),
                    temperature: value,
                }
                .into());
            }
        }

        self.readings = Some((temps.a64, uv, ambient));
        Ok(())
    }

    fn result_data(&self) -> ResultData {
        match self.readings {
            Some((a64, uv, ambient)) => ResultData::from([
                ("wizardTempA64".to_string(), a64.into()),
                ("wizardTempUvInit".to_string(), uv.into()),
                ("wizardTempAmbient".to_string(), ambient.into()),
            ]),
            None => ResultData::new(),
        }
    }
}

// ============================================================================
// SPEAKER
// ============================================================================

/// Plays nothing itself; the UI plays a tune and the user reports it.
#[derive(Default)]
pub struct SpeakerTest;

impl SyncCheck for SpeakerTest {
    fn check_type(&self) -> WizardCheckType {
        WizardCheckType::Music
    }

    fn task_run(&mut self, ctx: &SyncContext) -> Result<(), CheckError> {
        let broker = ctx.check().actions();
        let mut slot = broker.register(&[UserAction::ReportAudio])?;
        let _shown = broker.push_state(WizardState::TestAudio);

        let payload = loop {
            if let Some((_, payload)) = slot.try_recv() {
                break payload;
            }
            ctx.sleep(ctx.runtime().poll_interval())?;
        };

        if payload != ActionPayload::Bool(true) {
            log::error!("Sound test failed");
            return Err(PrinterError::SoundTestFailed.into());
        }
        Ok(())
    }
}
