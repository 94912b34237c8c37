// src/states.rs
//
// =============================================================================
// SLAWIZARD: STATE VOCABULARY (v 0.4 )
// =============================================================================
//
// The closed enums every layer talks in.
//
// - WizardState:      what the outside world sees (checkpoints, overlays, terminals).
// - WizardId:         which recipe is running, plus its result file names.
// - WizardCheckState: lifecycle of a single Check.
// - WizardCheckType:  key of the check_state / result maps.

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// 1. WIZARD STATE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WizardState {
    Init,
    Running,
    ShowResults,
    Done,
    Failed,
    Canceled,
    Stopped,

    // Group enter states - user printer reconfiguration
    PrepareWizardPart1,
    PrepareWizardPart2,
    PrepareWizardPart3,
    PrepareDisplayTest,
    PrepareCalibrationTiltAlign,
    PrepareCalibrationPlatformAlign,
    PrepareCalibrationFinish,
    PrepareCalibrationInsertPlatformTank,
    PrepareNewExpoPanel,
    ConfirmConfiguration,

    // User action required states
    CloseCover,
    TestDisplay,
    TestAudio,
    LevelTilt,

    RemoveSafetySticker,
    RemoveSideFoam,
    RemoveTankFoam,
    RemoveDisplayFoil,
    InsertFoam,

    UvCalibrationPrepare,
    UvCalibrationPlaceUvMeter,
    UvCalibrationRemoveUvMeter,
    UvCalibrationApplyResults,

    TankSurfaceCleanerInit,
    TankSurfaceCleanerInsertCleaningAdaptor,
    TankSurfaceCleanerRemoveCleaningAdaptor,
}

impl WizardState {
    /// Numeric code published to the transport layer.
    pub fn code(self) -> u32 {
        use WizardState::*;
        match self {
            Init => 0,
            Running => 1,
            Done => 2,
            Failed => 3,
            Canceled => 4,
            Stopped => 5,
            ShowResults => 6,

            PrepareWizardPart1 => 1000,
            PrepareWizardPart2 => 1001,
            PrepareWizardPart3 => 1002,
            PrepareDisplayTest => 1011,
            PrepareCalibrationTiltAlign => 1013,
            PrepareCalibrationPlatformAlign => 1014,
            PrepareCalibrationFinish => 1015,
            PrepareCalibrationInsertPlatformTank => 1016,
            PrepareNewExpoPanel => 1017,
            ConfirmConfiguration => 1099,

            CloseCover => 2000,
            TestDisplay => 2001,
            TestAudio => 2002,
            LevelTilt => 2003,

            RemoveSafetySticker => 2101,
            RemoveSideFoam => 2102,
            RemoveTankFoam => 2103,
            RemoveDisplayFoil => 2104,
            InsertFoam => 2105,

            UvCalibrationPrepare => 2200,
            UvCalibrationPlaceUvMeter => 2201,
            UvCalibrationRemoveUvMeter => 2202,
            UvCalibrationApplyResults => 2203,

            TankSurfaceCleanerInit => 2300,
            TankSurfaceCleanerInsertCleaningAdaptor => 2301,
            TankSurfaceCleanerRemoveCleaningAdaptor => 2302,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            WizardState::Done | WizardState::Failed | WizardState::Canceled | WizardState::Stopped
        )
    }
}

impl fmt::Display for WizardState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ============================================================================
// 2. WIZARD IDENTIFIER
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WizardId {
    SelfTest,
    Calibration,
    Display,
    CompleteUnboxing,
    KitUnboxing,
    FactoryReset,
    Packing,
    UvCalibration,
    TankSurfaceCleaner,
    NewExpoPanel,
}

impl WizardId {
    pub const ALL: [WizardId; 10] = [
        WizardId::SelfTest,
        WizardId::Calibration,
        WizardId::Display,
        WizardId::CompleteUnboxing,
        WizardId::KitUnboxing,
        WizardId::FactoryReset,
        WizardId::Packing,
        WizardId::UvCalibration,
        WizardId::TankSurfaceCleaner,
        WizardId::NewExpoPanel,
    ];

    /// Short name used for the canonical result file and the CLI.
    pub fn name(self) -> &'static str {
        match self {
            WizardId::SelfTest => "self_test",
            WizardId::Calibration => "calibration",
            WizardId::Display => "display_test",
            WizardId::CompleteUnboxing => "complete_unboxing",
            WizardId::KitUnboxing => "kit_unboxing",
            WizardId::FactoryReset => "factory_reset",
            WizardId::Packing => "packing",
            WizardId::UvCalibration => "uv_calibration",
            WizardId::TankSurfaceCleaner => "tank_surface_cleaner",
            WizardId::NewExpoPanel => "new_expo_panel",
        }
    }

    pub fn from_name(name: &str) -> Option<WizardId> {
        WizardId::ALL.into_iter().find(|id| id.name() == name)
    }

    /// Canonical result file name.
    pub fn data_file_name(self) -> String {
        format!("{}_data.json", self.name())
    }

    /// Older file names the same document has been stored under.
    /// Every one of them is rewritten when a run finishes.
    pub fn legacy_file_names(self) -> &'static [&'static str] {
        match self {
            WizardId::SelfTest => &["wizard_data.json", "thewizard_data.json"],
            WizardId::UvCalibration => &["uvcalib_data.json"],
            _ => &[],
        }
    }
}

impl fmt::Display for WizardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// 3. CHECK STATE & TYPE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WizardCheckState {
    Pending,
    Running,
    Success,
    Warning,
    Failure,
    Canceled,
}

impl WizardCheckState {
    pub fn is_finished(self) -> bool {
        matches!(
            self,
            WizardCheckState::Success
                | WizardCheckState::Warning
                | WizardCheckState::Failure
                | WizardCheckState::Canceled
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WizardCheckType {
    TowerRange,
    TowerHome,
    TiltRange,
    TiltHome,
    Display,
    Music,
    UvLeds,
    UvFans,
    MoveToFoam,
    MoveToTank,
    ResinSensor,
    SerialNumber,
    Temperature,
    TiltCalibrationStart,
    TiltCalibration,
    TowerCalibration,
    TiltTiming,
    SysInfo,
    TiltLevel,

    UvMeterPresent,
    UvWarmup,
    UvMeterPlacement,
    UvCalibrateCenter,
    UvCalibrateEdge,
    UvCalibrationApplyResults,
    UvMeterRemoved,

    TowerSafeDistance,
    TowerTouchdown,
    ExposingDebris,
    TowerGentlyUp,

    EraseProjects,
    ResetHostname,
    ResetApiKey,
    ResetRemoteConfig,
    ResetTimezone,
    ResetLocale,
    ResetUvCalibrationData,
    RemoveSlicerProfiles,
    ResetHwConfig,
    EraseMcEeprom,
    DisableFactory,
    InitiatePackingMoves,
    FinishPackingMoves,
}

impl fmt::Display for WizardCheckType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}
