// src/lib.rs
//
// =============================================================================
// SLAWIZARD: LIBRARY ROOT
// =============================================================================
//
// This file declares the module tree and exports public types.

// 1. Declare Modules
pub mod actions;
pub mod check;
pub mod config;
pub mod errors;
pub mod group;
pub mod hardware;
pub mod homing;
pub mod persistence;
pub mod setup;
pub mod states;
pub mod wizard;

pub mod checks;
pub mod wizards;

// 2. Re-exports (The Public API)

pub use actions::{ActionPayload, UserAction, UserActionBroker, WizardEvent};
pub use check::{Check, CheckContext, DangerousCheck, SyncCheck};
pub use config::{ConfigWriter, HwConfig, HwConfigStore, RuntimeConfig};
pub use errors::{BrokerError, CheckError, PrinterError, PrinterWarning};
pub use group::CheckGroup;
pub use hardware::{Axis, Hardware, PrinterModel};
pub use persistence::{ResultDocument, ResultStore};
pub use setup::{Configuration, PlatformSetup, Resource, TankSetup};
pub use states::{WizardCheckState, WizardCheckType, WizardId, WizardState};
pub use wizard::{Wizard, WizardDataPackage, WizardHooks};
pub use wizards::WizardOptions;
