// src/checks/factory_reset.rs
//
// =============================================================================
// SLAWIZARD: FACTORY RESET STEPS (v 0.4 )
// =============================================================================
//
// Responsibilities:
// 1. One blocking check per reset step, rooted at `RuntimeConfig::system_root`.
// 2. Soft steps (`hard_errors == false`) turn their failure into a warning.
// 3. Packing moves that park the platform on the transport foam.

use super::{mm, DEFAULT_TILT_HEIGHT};
use crate::check::{Check, CheckContext, DangerousCheck, SyncCheck, SyncContext};
use crate::errors::{CheckError, PrinterError};
use crate::hardware::{Axis, AxisProfile};
use crate::persistence::{write_atomic, ResultStore};
use crate::setup::Resource;
use crate::states::{WizardCheckType, WizardId};

use anyhow::Context;
use async_trait::async_trait;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

pub const PROJECTS_DIR: &str = "var/sl1fw/projects";
pub const HOSTNAME_FILE: &str = "etc/hostname";
pub const DEFAULT_HOSTNAME: &str = "prusa-sl1";
pub const API_KEY_FILE: &str = "etc/sl1fw/api.key";
pub const REMOTE_CONFIG_FILE: &str = "etc/sl1fw/remoteConfig.toml";
pub const LOCALTIME_FILE: &str = "etc/localtime";
pub const FACTORY_LOCALTIME_FILE: &str = "usr/share/factory/etc/localtime";
pub const LOCALE_FILE: &str = "etc/locale.conf";
pub const SLICER_PROFILES_FILE: &str = "etc/sl1fw/slicer/profiles.ini";
pub const FACTORY_ENABLE_FILE: &str = "factory/factory_mode_enabled";

/// Packing positions, measured down from the top endstop.
pub const PACKING_INITIAL_DROP_NM: i64 = mm(74);
pub const PACKING_FINAL_DROP_NM: i64 = mm(93);

fn remove_file_if_exists(path: &Path) -> anyhow::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != ErrorKind::NotFound => {
            Err(e).with_context(|| format!("Failed to remove {:?}", path))
        }
        _ => Ok(()),
    }
}

// ============================================================================
// 1. RESET STEPS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetStep {
    EraseProjects,
    ResetHostname,
    ResetApiKey,
    ResetRemoteConfig,
    ResetTimezone,
    ResetLocale,
    ResetUvCalibrationData,
    RemoveSlicerProfiles,
    ResetHwConfig { disable_unboxing: bool },
    EraseMcEeprom,
}

impl ResetStep {
    pub fn check_type(self) -> WizardCheckType {
        match self {
            ResetStep::EraseProjects => WizardCheckType::EraseProjects,
            ResetStep::ResetHostname => WizardCheckType::ResetHostname,
            ResetStep::ResetApiKey => WizardCheckType::ResetApiKey,
            ResetStep::ResetRemoteConfig => WizardCheckType::ResetRemoteConfig,
            ResetStep::ResetTimezone => WizardCheckType::ResetTimezone,
            ResetStep::ResetLocale => WizardCheckType::ResetLocale,
            ResetStep::ResetUvCalibrationData => WizardCheckType::ResetUvCalibrationData,
            ResetStep::RemoveSlicerProfiles => WizardCheckType::RemoveSlicerProfiles,
            ResetStep::ResetHwConfig { .. } => WizardCheckType::ResetHwConfig,
            ResetStep::EraseMcEeprom => WizardCheckType::EraseMcEeprom,
        }
    }

    fn run(self, ctx: &SyncContext) -> anyhow::Result<()> {
        let root = &ctx.runtime().system_root;
        match self {
            ResetStep::EraseProjects => {
                let dir = root.join(PROJECTS_DIR);
                if dir.exists() {
                    fs::remove_dir_all(&dir).with_context(|| format!("Failed to erase {:?}", dir))?;
                }
                fs::create_dir_all(&dir).with_context(|| format!("Failed to recreate {:?}", dir))?;
            }
            ResetStep::ResetHostname => {
                write_atomic(&root.join(HOSTNAME_FILE), format!("{}\n", DEFAULT_HOSTNAME).as_bytes())?;
            }
            // Regenerated on next boot.
            ResetStep::ResetApiKey => remove_file_if_exists(&root.join(API_KEY_FILE))?,
            ResetStep::ResetRemoteConfig => remove_file_if_exists(&root.join(REMOTE_CONFIG_FILE))?,
            ResetStep::ResetTimezone => {
                let target = root.join(LOCALTIME_FILE);
                remove_file_if_exists(&target)?;
                let factory = root.join(FACTORY_LOCALTIME_FILE);
                if factory.exists() {
                    let raw = fs::read(&factory).with_context(|| format!("Failed to read {:?}", factory))?;
                    write_atomic(&target, &raw)?;
                }
            }
            ResetStep::ResetLocale => write_atomic(&root.join(LOCALE_FILE), b"LANG=C\n")?,
            ResetStep::ResetUvCalibrationData => {
                let store = ResultStore::new(&ctx.runtime().data_dir);
                for path in store.paths(WizardId::UvCalibration) {
                    remove_file_if_exists(&path)?;
                }
            }
            ResetStep::RemoveSlicerProfiles => remove_file_if_exists(&root.join(SLICER_PROFILES_FILE))?,
            ResetStep::ResetHwConfig { disable_unboxing } => {
                let writer = &ctx.check().package().config_writer;
                writer.factory_reset();
                if disable_unboxing {
                    writer.update(|cfg| cfg.show_unboxing = false);
                }
                writer.commit()?;
            }
            ResetStep::EraseMcEeprom => ctx.hw().erase_eeprom()?,
        }
        Ok(())
    }
}

/// One reset step. Soft by default: a failure is recorded and the wizard moves on.
pub struct ResetCheck {
    step: ResetStep,
    hard_errors: bool,
}

impl ResetCheck {
    pub fn new(step: ResetStep) -> Self {
        Self {
            step,
            hard_errors: false,
        }
    }

    pub fn hard(step: ResetStep) -> Self {
        Self {
            step,
            hard_errors: true,
        }
    }
}

impl SyncCheck for ResetCheck {
    fn check_type(&self) -> WizardCheckType {
        self.step.check_type()
    }

    fn hard_errors(&self) -> bool {
        self.hard_errors
    }

    fn task_run(&mut self, ctx: &SyncContext) -> Result<(), CheckError> {
        if ctx.should_stop() {
            return Err(CheckError::Canceled);
        }
        log::info!("Factory reset step {:?}", self.step);
        self.step.run(ctx).map_err(|e| {
            PrinterError::ResetFailed {
                step: self.check_type().to_string(),
                reason: format!("{:#}", e),
            }
            .into()
        })
    }
}

/// Leaves factory mode. Always fatal on failure.
#[derive(Default)]
pub struct DisableFactory;

impl DisableFactory {
    fn enable_file(ctx: &SyncContext) -> PathBuf {
        ctx.runtime().system_root.join(FACTORY_ENABLE_FILE)
    }
}

impl SyncCheck for DisableFactory {
    fn check_type(&self) -> WizardCheckType {
        WizardCheckType::DisableFactory
    }

    fn task_run(&mut self, ctx: &SyncContext) -> Result<(), CheckError> {
        log::info!("Factory reset - disabling factory mode");
        remove_file_if_exists(&Self::enable_file(ctx)).map_err(|e| {
            PrinterError::ResetFailed {
                step: self.check_type().to_string(),
                reason: format!("{:#}", e),
            }
            .into()
        })
    }
}

// ============================================================================
// 2. PACKING MOVES
// ============================================================================

#[derive(Default)]
pub struct InitiatePackingMoves;

#[async_trait]
impl Check for InitiatePackingMoves {
    fn check_type(&self) -> WizardCheckType {
        WizardCheckType::InitiatePackingMoves
    }

    fn resources(&self) -> Vec<Resource> {
        vec![Resource::Tilt, Resource::Tower, Resource::TowerDown]
    }

    async fn async_task_run(&mut self, ctx: &CheckContext) -> Result<(), CheckError> {
        let hw = ctx.hw();
        hw.set_profile(Axis::Tilt, AxisProfile::HomingFast);
        ctx.move_wait(Axis::Tilt, DEFAULT_TILT_HEIGHT).await?;
        ctx.set_progress(0.5);

        hw.set_profile(Axis::Tower, AxisProfile::HomingFast);
        let target = hw.limits(Axis::Tower).max - PACKING_INITIAL_DROP_NM;
        ctx.move_wait(Axis::Tower, target).await?;
        Ok(())
    }
}

impl DangerousCheck for InitiatePackingMoves {
    fn verify_axes(&self) -> Vec<Axis> {
        vec![Axis::Tower, Axis::Tilt]
    }
}

/// Presses the foam slightly against the printer base.
#[derive(Default)]
pub struct FinishPackingMoves;

#[async_trait]
impl Check for FinishPackingMoves {
    fn check_type(&self) -> WizardCheckType {
        WizardCheckType::FinishPackingMoves
    }

    fn resources(&self) -> Vec<Resource> {
        vec![Resource::Tower, Resource::TowerDown]
    }

    async fn async_task_run(&mut self, ctx: &CheckContext) -> Result<(), CheckError> {
        let target = ctx.hw().limits(Axis::Tower).max - PACKING_FINAL_DROP_NM;
        ctx.move_wait(Axis::Tower, target).await?;
        Ok(())
    }
}
