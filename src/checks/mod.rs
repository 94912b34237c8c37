// src/checks/mod.rs
//
// =============================================================================
// SLAWIZARD: CONCRETE CHECKS (v 0.4 )
// =============================================================================
//
// Thin users of the check contract, grouped by subsystem.
//
// Tower positions are nanometres above the bottom endstop; the top endstop
// is `limits.max`. The print level sits `towerHeight` below the top.

use crate::config::HwConfig;
use crate::hardware::{Axis, Hardware};

pub mod display;
pub mod factory_reset;
pub mod sysinfo;
pub mod tank_surface_cleaner;
pub mod tilt;
pub mod tower;
pub mod unboxing;
pub mod uv;
pub mod uv_calibration;

/// Leveled tilt position [microsteps].
pub const DEFAULT_TILT_HEIGHT: i64 = 4_928;

/// Millimetres to tower nanometres.
pub const fn mm(value: i64) -> i64 {
    value * 1_000_000
}

pub fn print_level(hw: &dyn Hardware, config: &HwConfig) -> i64 {
    hw.limits(Axis::Tower).max - config.tower_height_nm
}
