//! First-order-plus-dead-time fit
//!
//! Fits a tangent line through the rising part of a step response and
//! derives classic Ziegler-Nichols open-loop gains from it.

use kiln_protocol::TuningResult;

use super::TuningError;

/// Fewest samples a fit is attempted with
pub const MIN_SAMPLES: usize = 10;

/// One recorded point: seconds since the session started, temperature
pub type Sample = (f32, f32);

/// Fit the step response in `samples` and compute PID gains
///
/// The tangent runs through the first samples at or above
/// `mid - range/divisor` and `mid + range/divisor`, where `mid` is halfway
/// between the lowest and highest recorded temperature. Its crossing of
/// the lowest temperature gives the dead time `L` (measured from the
/// first sample), and the time from there to its crossing of the highest
/// temperature gives the time constant `T`.
pub fn calculate_pid_parameters(
    samples: &[Sample],
    divisor: f32,
) -> Result<TuningResult, TuningError> {
    if samples.len() < MIN_SAMPLES {
        return Err(TuningError::InsufficientData);
    }

    let (min_temp, max_temp) = samples
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &(_, temp)| {
            (lo.min(temp), hi.max(temp))
        });

    let mid = (min_temp + max_temp) / 2.0;
    let half_window = (max_temp - min_temp) / divisor;

    let first_at = |level: f32| samples.iter().position(|&(_, temp)| temp >= level);
    let lower = first_at(mid - half_window).ok_or(TuningError::DegenerateFit)?;
    let upper = first_at(mid + half_window).ok_or(TuningError::DegenerateFit)?;

    let (t1, y1) = samples[lower];
    let (t2, y2) = samples[upper];
    if lower == upper || t2 <= t1 || y2 <= y1 {
        return Err(TuningError::DegenerateFit);
    }

    let slope = (y2 - y1) / (t2 - t1);
    let intercept = y1 - slope * t1;

    let t_at_min = (min_temp - intercept) / slope;
    let t_at_max = (max_temp - intercept) / slope;

    let dead_time = t_at_min - samples[0].0;
    let time_constant = t_at_max - t_at_min;
    if !(dead_time > 0.0 && time_constant > 0.0) {
        return Err(TuningError::DegenerateFit);
    }

    let kp = 1.2 * time_constant / dead_time;
    let ti = 2.0 * dead_time;
    let td = 0.5 * dead_time;

    Ok(TuningResult {
        dead_time_s: dead_time,
        time_constant_s: time_constant,
        kp,
        ki: kp / ti,
        kd: kp * td,
    })
}
