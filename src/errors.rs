// src/errors.rs
//
// =============================================================================
// SLAWIZARD: ERROR TAXONOMY (v 0.4 )
// =============================================================================
//
// Responsibilities:
// 1. PrinterError:   typed, fatal check failure. Ends the group and the wizard.
// 2. PrinterWarning: non-fatal deviation recorded against a check.
// 3. CheckError:     what a check body returns (failure OR cancellation).
// 4. BrokerError:    misuse of the user action channel.

use crate::actions::UserAction;
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// 1. FATAL FAILURES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PrinterError {
    // --- Motion ---
    #[error("Tower home failed")]
    TowerHomeFailed,
    #[error("Tower endstop not reached")]
    TowerEndstopNotReached,
    #[error("Tilt home failed")]
    TiltHomeFailed,
    #[error("Tilt endstop not reached")]
    TiltEndstopNotReached,
    #[error("Motion controller did not respond: {reason}")]
    MotionControllerTimeout { reason: String },
    #[error("Tower axis check failed, position {position_nm} nm")]
    TowerAxisCheckFailed { position_nm: i64 },
    #[error("Tilt axis check failed, position {position}")]
    TiltAxisCheckFailed { position: i64 },
    #[error("Tower below surface, position {position_nm} nm")]
    TowerBelowSurface { position_nm: i64 },
    #[error("Invalid tilt align position {position}")]
    InvalidTiltAlignPosition { position: i64 },
    #[error("Cover was not closed within {timeout_s} s")]
    CoverNotClosed { timeout_s: u64 },
    #[error("Cleaning adaptor missing, platform reached the display")]
    CleaningAdaptorMissing,

    // --- Sensors ---
    #[error("Resin sensor triggered at {position_mm} mm, outside the allowed range")]
    ResinSensorFailed { position_mm: f64 },
    #[error("{sensor} temperature cannot be read")]
    TempSensorFailed { sensor: String },
    #[error("{sensor} temperature {temperature:.1} °C is out of range")]
    TemperatureOutOfRange { sensor: String, temperature: f64 },
    #[error("A64 temperature {temperature:.1} °C is too high")]
    A64Overheat { temperature: f64 },

    // --- Exposure unit ---
    #[error("UV LED voltages differ too much: {detail}")]
    UvLedsVoltagesDifferTooMuch { detail: String },
    #[error("UV LED heatsink overheated: {temperature:.1} °C")]
    UvLedHeatsinkFailed { temperature: f64 },
    #[error("Fan {fan} RPM {avg_rpm} out of test range {lower_rpm}-{upper_rpm}")]
    FanRpmOutOfTestRange {
        fan: String,
        avg_rpm: i64,
        lower_rpm: i64,
        upper_rpm: i64,
    },
    #[error("Display test failed")]
    DisplayTestFailed,
    #[error("Sound test failed")]
    SoundTestFailed,

    // --- UV calibration ---
    #[error("UV meter not detected")]
    FailedToDetectUvMeter,
    #[error("UV meter failed to respond")]
    UvMeterFailedToRespond,
    #[error("UV meter communication failed")]
    UvMeterCommunicationFailed,
    #[error("Exposure screen is translucent")]
    ScreenTranslucent,
    #[error("Unexpected UV intensity")]
    UnexpectedUvIntensity,
    #[error("UV intensity too low: {value:.1} < {threshold:.1}")]
    UvTooDimm { value: f64, threshold: f64 },
    #[error("UV intensity too high: {value:.1} > {threshold:.1}")]
    UvTooBright { value: f64, threshold: f64 },
    #[error("UV intensity deviation too high: {deviation:.1} > {threshold:.1}")]
    UvDeviationTooHigh { deviation: f64, threshold: f64 },
    #[error("Printer model {model} does not support this procedure")]
    UnsupportedPrinterModel { model: String },

    // --- Storage ---
    #[error("Failed to save factory configuration: {reason}")]
    FailedToSaveFactoryConfig { reason: String },
    #[error("Failed to save configuration: {reason}")]
    FailedToSaveConfig { reason: String },
    #[error("Failed to save wizard data: {reason}")]
    FailedToSaveWizardData { reason: String },
    #[error("Result key '{key}' emitted twice")]
    ResultKeyCollision { key: String },
    #[error("Factory reset step {step} failed: {reason}")]
    ResetFailed { step: String, reason: String },

    // --- Plumbing ---
    #[error("Missing collaborator: {what}")]
    MissingCollaborator { what: String },
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PrinterError {
    /// Homing failures the adaptive sensitivity search reacts to.
    pub fn is_homing_failure(&self) -> bool {
        matches!(
            self,
            PrinterError::TowerHomeFailed
                | PrinterError::TowerEndstopNotReached
                | PrinterError::TiltHomeFailed
                | PrinterError::TiltEndstopNotReached
        )
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, PrinterError::MotionControllerTimeout { .. })
    }
}

// ============================================================================
// 2. WARNINGS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PrinterWarning {
    #[error("Wrong A64 serial number format: {serial}")]
    WrongA64SerialFormat { serial: String },
    #[error("Wrong motion controller serial number format: {serial}")]
    WrongMcSerialFormat { serial: String },
    #[error("Factory reset step failed: {message}")]
    FactoryResetCheckFailure { message: String },
    #[error("Fan {fan} reported an error")]
    FanWarning { fan: String },
}

// ============================================================================
// 3. CHECK OUTCOME
// ============================================================================

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CheckError {
    #[error("Canceled")]
    Canceled,
    #[error(transparent)]
    Printer(#[from] PrinterError),
}

impl CheckError {
    pub fn printer(&self) -> Option<&PrinterError> {
        match self {
            CheckError::Printer(e) => Some(e),
            CheckError::Canceled => None,
        }
    }
}

// ============================================================================
// 4. BROKER MISUSE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    #[error("User action {0:?} is not registered")]
    NotRegistered(UserAction),
    #[error("User action {0:?} is already registered")]
    AlreadyRegistered(UserAction),
    #[error("Wizard is not cancelable")]
    NotCancelable,
}

impl From<BrokerError> for CheckError {
    fn from(e: BrokerError) -> Self {
        CheckError::Printer(PrinterError::Internal(e.to_string()))
    }
}
