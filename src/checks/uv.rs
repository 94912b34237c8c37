// src/checks/uv.rs
//
// UV LED row voltages and the fan/heatsink warm-up run.

use super::sysinfo::MAX_UV_TEMP;
use crate::check::{Check, CheckContext, DangerousCheck, ResultData};
use crate::errors::{CheckError, PrinterError, PrinterWarning};
use crate::hardware::{ExposureShutdown, Hardware};
use crate::setup::Resource;
use crate::states::WizardCheckType;

use async_trait::async_trait;
use std::time::Duration;

/// Row voltages may not spread further than this [V].
pub const UV_VOLTAGE_DIFF: f64 = 0.55;
pub const UV_CHECK_STEPS: usize = 3;
pub const FAN_RPM_DIFF: i64 = 200;
pub const FAN_STABILIZE_TIME_S: u32 = 30;
pub const FAN_START_STOP_TIME_S: u32 = 10;

/// PWM steps for the voltage check, last one is the maximum.
pub fn uv_check_pwms(hw: &dyn Hardware) -> [u32; 4] {
    if hw.mc_board_revision().starts_with('6') {
        [40, 122, 243, 250]
    } else {
        [31, 94, 188, 219]
    }
}

// ============================================================================
// UV LEDS
// ============================================================================

#[derive(Default)]
pub struct UvLedsTest {
    rows: Option<[Vec<i64>; 3]>,
    uv_pwm: u32,
}

#[async_trait]
impl Check for UvLedsTest {
    fn check_type(&self) -> WizardCheckType {
        WizardCheckType::UvLeds
    }

    fn resources(&self) -> Vec<Resource> {
        vec![Resource::Uv]
    }

    async fn async_task_run(&mut self, ctx: &CheckContext) -> Result<(), CheckError> {
        let hw = ctx.hw();
        let testing = ctx.runtime().testing;
        let pwms = uv_check_pwms(hw);

        hw.set_uv_pwm(0);
        hw.set_uv_led(true);
        let _off = ExposureShutdown::uv(hw);

        let mut rows: [Vec<i64>; 3] = Default::default();
        for (step, pwm) in pwms.iter().take(UV_CHECK_STEPS).enumerate() {
            ctx.set_progress(step as f64 / UV_CHECK_STEPS as f64);
            hw.set_uv_pwm(*pwm);
            if !testing {
                // Board rev 0.6+ refreshes the readings slowly.
                ctx.sleep(Duration::from_secs(5)).await?;
            }
            let mut volts = hw.uv_voltages();
            volts.pop(); // power supply
            log::info!("UV voltages at PWM {}: {:?}", pwm, volts);

            let max = volts.iter().copied().fold(f64::MIN, f64::max);
            let min = volts.iter().copied().fold(f64::MAX, f64::min);
            if max - min > UV_VOLTAGE_DIFF && !testing {
                return Err(PrinterError::UvLedsVoltagesDifferTooMuch {
                    detail: format!("{:.3} (max - min) > {}", max - min, UV_VOLTAGE_DIFF),
                }
                .into());
            }
            for (row, volt) in rows.iter_mut().zip(volts) {
                row.push((volt * 1000.0) as i64);
            }
        }

        self.rows = Some(rows);
        self.uv_pwm = ctx.package().config_writer.get().uv_pwm;
        Ok(())
    }

    fn result_data(&self) -> ResultData {
        let Some([row1, row2, row3]) = &self.rows else {
            return ResultData::new();
        };
        ResultData::from([
            ("wizardUvVoltageRow1".to_string(), row1.clone().into()),
            ("wizardUvVoltageRow2".to_string(), row2.clone().into()),
            ("wizardUvVoltageRow3".to_string(), row3.clone().into()),
            ("uvPwm".to_string(), self.uv_pwm.into()),
        ])
    }
}

impl DangerousCheck for UvLedsTest {}

// ============================================================================
// UV FANS
// ============================================================================

/// Runs UV at max PWM for the warm-up time and samples fan RPM.
#[derive(Default)]
pub struct UvFansTest {
    avg_rpm: Vec<f64>,
    uv_temp: Option<f64>,
}

#[async_trait]
impl Check for UvFansTest {
    fn check_type(&self) -> WizardCheckType {
        WizardCheckType::UvFans
    }

    fn resources(&self) -> Vec<Resource> {
        vec![Resource::Fans, Resource::Uv]
    }

    async fn async_task_run(&mut self, ctx: &CheckContext) -> Result<(), CheckError> {
        let hw = ctx.hw();
        let runtime = ctx.runtime();
        let warm_up = ctx.package().config_writer.get().uv_warm_up_time_s.max(1);
        let settle = if runtime.testing {
            0
        } else {
            FAN_STABILIZE_TIME_S + FAN_START_STOP_TIME_S
        };

        hw.start_fans();
        hw.set_uv_pwm(uv_check_pwms(hw)[3]);
        hw.set_uv_led(true);

        let fan_count = hw.fans().len();
        let mut samples: Vec<Vec<i64>> = vec![Vec::new(); fan_count];
        let mut uv_temp = hw.temperatures().uv_led.unwrap_or_default();
        {
            let _off = ExposureShutdown::uv_and_fans(hw);
            for elapsed in 0..warm_up {
                ctx.set_progress(elapsed as f64 / warm_up as f64);
                let fans = hw.fans();
                if elapsed >= settle {
                    for (bucket, fan) in samples.iter_mut().zip(&fans) {
                        bucket.push(fan.rpm);
                    }
                }

                uv_temp = hw.temperatures().uv_led.unwrap_or_default();
                if uv_temp > MAX_UV_TEMP {
                    return Err(PrinterError::UvLedHeatsinkFailed {
                        temperature: uv_temp,
                    }
                    .into());
                }
                if let Some(fan) = fans.iter().find(|f| f.error) {
                    log::error!("Skipping UV fan check due to fan failure");
                    ctx.add_warning(PrinterWarning::FanWarning {
                        fan: fan.name.clone(),
                    });
                    break;
                }
                ctx.sleep(runtime.tick()).await?;
            }
        }

        let mut averages = Vec::with_capacity(fan_count);
        for (fan, rpms) in hw.fans().iter().zip(&samples) {
            let avg = if rpms.is_empty() {
                0.0
            } else {
                rpms.iter().sum::<i64>() as f64 / rpms.len() as f64
            };
            let lower = fan.target_rpm - FAN_RPM_DIFF;
            let upper = fan.target_rpm + FAN_RPM_DIFF;
            if !(lower as f64 <= avg && avg <= upper as f64) || fan.error {
                log::error!(
                    "Fan {}: raw RPM {:?}, error: {}, samples: {}",
                    fan.name,
                    rpms,
                    fan.error,
                    rpms.len()
                );
                return Err(PrinterError::FanRpmOutOfTestRange {
                    fan: fan.name.clone(),
                    avg_rpm: avg.round() as i64,
                    lower_rpm: lower,
                    upper_rpm: upper,
                }
                .into());
            }
            averages.push(avg);
        }

        self.avg_rpm = averages;
        self.uv_temp = Some(uv_temp);
        Ok(())
    }

    fn result_data(&self) -> ResultData {
        match self.uv_temp {
            Some(temp) => ResultData::from([
                ("wizardFanRpm".to_string(), self.avg_rpm.clone().into()),
                ("wizardTempUvWarm".to_string(), temp.into()),
            ]),
            None => ResultData::new(),
        }
    }
}

impl DangerousCheck for UvFansTest {}
