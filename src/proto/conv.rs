use chrono::{DateTime, Local, Utc};

/// Ångström per micrometre.
pub const ANGSTROM_PER_UM: f64 = 10_000.0;
/// Ångström per nanometre.
pub const ANGSTROM_PER_NM: f64 = 10.0;

/// Steps per Å kept after unit conversion.
const STEPS_PER_ANGSTROM: f64 = 1e6;

fn quantize(angstrom: f64) -> f64 {
    (angstrom * STEPS_PER_ANGSTROM).round() / STEPS_PER_ANGSTROM
}

pub fn um_to_angstrom(um: f64) -> f64 {
    quantize(um * ANGSTROM_PER_UM)
}

pub fn nm_to_angstrom(nm: f64) -> f64 {
    quantize(nm * ANGSTROM_PER_NM)
}

pub fn pretty_ts(&ts: &DateTime<Utc>) -> String {
    let local: DateTime<Local> = ts.into();
    local.format("%Y-%m-%d %H:%M:%S").to_string()
}
