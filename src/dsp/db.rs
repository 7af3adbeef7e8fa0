//! Decibel conversions with floor clamping.

/// `20·log10(amplitude / reference)`, or `floor_db` when either operand is
/// non-positive or non-finite.
pub fn amplitude_to_db(amplitude: f64, reference: f64, floor_db: f64) -> f64 {
    if !amplitude.is_finite() || !reference.is_finite() || amplitude <= 0.0 || reference <= 0.0 {
        return floor_db;
    }
    20.0 * (amplitude / reference).log10()
}

pub fn db_to_amplitude(decibels: f64, reference: f64) -> f64 {
    if !reference.is_finite() || reference <= 0.0 || decibels == f64::NEG_INFINITY {
        return 0.0;
    }
    reference * 10f64.powf(decibels / 20.0)
}

/// `10·log10(power / reference)`, or `floor_db` when either operand is
/// non-positive or non-finite.
pub fn power_to_db(power: f64, reference: f64, floor_db: f64) -> f64 {
    if !power.is_finite() || !reference.is_finite() || power <= 0.0 || reference <= 0.0 {
        return floor_db;
    }
    10.0 * (power / reference).log10()
}

pub fn db_to_power(decibels: f64, reference: f64) -> f64 {
    if !reference.is_finite() || reference <= 0.0 || decibels == f64::NEG_INFINITY {
        return 0.0;
    }
    reference * 10f64.powf(decibels / 10.0)
}

/// Full-scale amplitude in dB, silence maps to `-inf`.
pub fn amp_to_db(amplitude: f64) -> f64 {
    amplitude_to_db(amplitude, 1.0, f64::NEG_INFINITY)
}
