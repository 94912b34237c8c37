// src/homing.rs
//
// =============================================================================
// SLAWIZARD: ADAPTIVE HOMING (v 0.4 )
// =============================================================================
//
// Responsibilities:
// 1. Home an axis, raising stepper sensitivity when homing fails.
// 2. Never issue more than SENSITIVITY_LEVELS x ATTEMPTS_PER_LEVEL home calls.

use crate::check::CheckContext;
use crate::errors::CheckError;
use crate::hardware::{Axis, AxisProfile};

pub const SENSITIVITY_LEVELS: u8 = 4;
pub const ATTEMPTS_PER_LEVEL: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HomingOutcome {
    /// Sensitivity level homing succeeded at.
    pub level: u8,
    /// Home calls issued, including the successful one.
    pub calls: u32,
}

/// Homes `axis` starting at sensitivity level 0.
///
/// A homing failure (`*HomeFailed`, `*EndstopNotReached`) moves to the next
/// level straight away. A transient controller error is retried on the same
/// level up to `ATTEMPTS_PER_LEVEL` times. Anything else is returned as is.
/// When every level is exhausted the last error is returned.
pub async fn home_adaptive(ctx: &CheckContext, axis: Axis) -> Result<HomingOutcome, CheckError> {
    let hw = ctx.hw();
    let budget = (SENSITIVITY_LEVELS as u32 * ATTEMPTS_PER_LEVEL) as f64;
    let mut calls = 0u32;
    let mut last_error = axis.home_failed();

    for level in 0..SENSITIVITY_LEVELS {
        hw.set_sensitivity(axis, level)?;
        hw.set_profile(axis, AxisProfile::HomingFast);
        log::info!("{:?} homing with sensitivity {}", axis, level);

        for attempt in 1..=ATTEMPTS_PER_LEVEL {
            calls += 1;
            let result = tokio::select! {
                _ = ctx.actions().cancelled() => return Err(CheckError::Canceled),
                result = hw.home(axis) => result,
            };
            ctx.set_progress(calls as f64 / budget);

            match result {
                Ok(()) => return Ok(HomingOutcome { level, calls }),
                Err(e) if e.is_homing_failure() => {
                    log::warn!("{:?} homing failed at sensitivity {}: {}", axis, level, e);
                    last_error = e;
                    break;
                }
                Err(e) if e.is_transient() => {
                    log::warn!(
                        "{:?} homing attempt {}/{} at sensitivity {}: {}",
                        axis,
                        attempt,
                        ATTEMPTS_PER_LEVEL,
                        level,
                        e
                    );
                    last_error = e;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    log::error!("{:?} homing exhausted all sensitivity levels", axis);
    Err(last_error.into())
}
