use serde::{Deserialize, Serialize};
use std::{f64::consts::PI, fmt};
use tokio::time::Instant;

/// Frequency constant of AT-cut quartz in Hz·Å.
pub const QUARTZ_FREQUENCY_CONSTANT: f64 = 1.668e13;
/// Density of quartz in g/cm³.
pub const QUARTZ_DENSITY: f64 = 2.648;

/// Constants of the deposited material. Always set as a pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Material {
    /// g/cm³
    pub density: f64,
    /// Acoustic impedance of quartz relative to the film.
    pub z_ratio: f64,
}

impl fmt::Display for Material {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "density {} g/cm³, Z-ratio {}", self.density, self.z_ratio)
    }
}

/// One gated reading. Never changed after it was taken.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    /// Averaged frequency in Hz.
    pub frequency: f64,
    pub counter: u32,
    pub at: Instant,
}

/// Conversion of a frequency shift into film thickness.
pub trait ThicknessModel: Send + Sync + fmt::Debug {
    /// Thickness in Å deposited while the crystal went from `reference` to
    /// `frequency` Hz, before scaling.
    fn thickness(&self, reference: f64, frequency: f64, material: &Material) -> f64;
}

/// Lu-Lewis Z-match equation.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZMatch;

impl ThicknessModel for ZMatch {
    fn thickness(&self, reference: f64, frequency: f64, material: &Material) -> f64 {
        let z = material.z_ratio;
        let phase = PI * (reference - frequency) / reference;
        QUARTZ_FREQUENCY_CONSTANT * QUARTZ_DENSITY / (PI * material.density * z * frequency)
            * (z * phase.tan()).atan()
    }
}

/// Linear small-shift approximation, ignores the Z-ratio.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sauerbrey;

impl ThicknessModel for Sauerbrey {
    fn thickness(&self, reference: f64, frequency: f64, material: &Material) -> f64 {
        QUARTZ_FREQUENCY_CONSTANT * QUARTZ_DENSITY * (reference - frequency)
            / (material.density * reference * reference)
    }
}

/// Thickness model selectable from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModelKind {
    #[default]
    ZMatch,
    Sauerbrey,
}

impl ModelKind {
    pub fn build(&self) -> Box<dyn ThicknessModel> {
        match self {
            ModelKind::ZMatch => Box::new(ZMatch),
            ModelKind::Sauerbrey => Box::new(Sauerbrey),
        }
    }
}

/// Thickness and rate relative to a baseline sample.
///
/// Thickness is only recomputed when a sample is recorded, so repeated
/// reads return the same value. Changing the material or the scale affects
/// the next computation only.
#[derive(Debug)]
pub struct ThicknessTracker {
    model: Box<dyn ThicknessModel>,
    material: Option<Material>,
    scale: f64,
    baseline: Option<Sample>,
    last: Option<Sample>,
    /// Thickness of the samples taken after the baseline, newest last.
    history: Vec<(Instant, f64)>,
    thickness: f64,
    rate: Option<f64>,
}

impl ThicknessTracker {
    pub fn new(model: Box<dyn ThicknessModel>) -> Self {
        Self {
            model,
            material: None,
            scale: 1.0,
            baseline: None,
            last: None,
            history: Vec::with_capacity(2),
            thickness: 0.0,
            rate: None,
        }
    }

    pub fn set_model(&mut self, model: Box<dyn ThicknessModel>) {
        self.model = model;
    }

    pub fn material(&self) -> Option<Material> {
        self.material
    }

    pub fn set_material(&mut self, material: Material) {
        self.material = Some(material);
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn set_scale(&mut self, scale: f64) {
        self.scale = scale;
    }

    /// Take a new sample into account and return the resulting thickness.
    ///
    /// The first sample, and every sample taken while the material is not
    /// known, becomes the baseline.
    pub fn record(&mut self, sample: Sample) -> f64 {
        self.last = Some(sample);
        let (Some(baseline), Some(material)) = (self.baseline, self.material) else {
            self.rebase();
            return self.thickness;
        };

        let thickness = self.scale
            * self
                .model
                .thickness(baseline.frequency, sample.frequency, &material);
        if self.history.len() == 2 {
            self.history.remove(0);
        }
        self.history.push((sample.at, thickness));
        self.thickness = thickness;
        self.rate = match self.history.as_slice() {
            [(t0, d0), (t1, d1)] => {
                let dt = t1.duration_since(*t0).as_secs_f64();
                (dt > 0.0).then(|| (d1 - d0) / dt)
            }
            _ => None,
        };
        thickness
    }

    /// Make the latest sample the new baseline.
    pub fn rebase(&mut self) {
        self.baseline = self.last;
        self.history.clear();
        self.thickness = 0.0;
        self.rate = None;
    }

    /// Forget baseline and samples. The next recorded sample is the baseline.
    pub fn clear(&mut self) {
        self.last = None;
        self.rebase();
    }

    /// Thickness in Å since the baseline.
    pub fn thickness(&self) -> f64 {
        self.thickness
    }

    /// Deposition rate in Å/s, known once two samples followed the baseline.
    pub fn rate(&self) -> Option<f64> {
        self.rate
    }

    pub fn baseline(&self) -> Option<&Sample> {
        self.baseline.as_ref()
    }

    pub fn last(&self) -> Option<&Sample> {
        self.last.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const ALUMINIUM: Material = Material {
        density: 2.7,
        z_ratio: 1.08,
    };

    fn sample(frequency: f64, at: Instant) -> Sample {
        Sample {
            frequency,
            counter: frequency as u32,
            at,
        }
    }

    fn tracker() -> ThicknessTracker {
        let mut t = ThicknessTracker::new(ModelKind::ZMatch.build());
        t.set_material(ALUMINIUM);
        t
    }

    #[test]
    fn models_agree_for_small_shifts() {
        let z = ZMatch.thickness(5e6, 5e6 - 10.0, &ALUMINIUM);
        let s = Sauerbrey.thickness(5e6, 5e6 - 10.0, &ALUMINIUM);
        assert!((z - s).abs() / s < 1e-4, "z-match {} sauerbrey {}", z, s);
        // About 6.5 Å of aluminium per 10 Hz on a 5 MHz crystal.
        assert!((s - 6.54).abs() < 0.01, "{}", s);
    }

    #[test]
    fn zmatch_is_monotonic() {
        let mut previous = 0.0;
        for step in 1..50 {
            let t = ZMatch.thickness(6e6, 6e6 - f64::from(step) * 1000.0, &ALUMINIUM);
            assert!(t > previous);
            previous = t;
        }
        assert_eq!(ZMatch.thickness(6e6, 6e6, &ALUMINIUM), 0.0);
    }

    #[test]
    fn first_sample_is_baseline() {
        let mut t = tracker();
        let now = Instant::now();
        assert_eq!(t.record(sample(5e6, now)), 0.0);
        assert_eq!(t.baseline().map(|s| s.frequency), Some(5e6));
        assert_eq!(t.rate(), None);
    }

    #[test]
    fn rate_needs_two_samples_after_baseline() {
        let mut t = tracker();
        let now = Instant::now();
        t.record(sample(5e6, now));
        t.record(sample(5e6 - 10.0, now + Duration::from_secs(1)));
        assert_eq!(t.rate(), None);
        t.record(sample(5e6 - 20.0, now + Duration::from_secs(2)));
        let rate = t.rate().expect("rate");
        assert!((rate - 6.54).abs() < 0.01, "{}", rate);
    }

    #[test]
    fn thickness_read_is_idempotent() {
        let mut t = tracker();
        let now = Instant::now();
        t.record(sample(5e6, now));
        t.record(sample(5e6 - 100.0, now + Duration::from_secs(1)));
        let first = t.thickness();
        assert!(first > 0.0);
        assert_eq!(t.thickness(), first);
        assert_eq!(t.thickness(), first);
    }

    #[test]
    fn rebase_zeroes_thickness() {
        let mut t = tracker();
        let now = Instant::now();
        t.record(sample(5e6, now));
        t.record(sample(5e6 - 100.0, now + Duration::from_secs(1)));
        t.record(sample(5e6 - 200.0, now + Duration::from_secs(2)));
        assert!(t.rate().is_some());

        t.rebase();
        assert_eq!(t.thickness(), 0.0);
        assert_eq!(t.rate(), None);
        assert_eq!(t.baseline().map(|s| s.frequency), Some(5e6 - 200.0));

        let after = t.record(sample(5e6 - 300.0, now + Duration::from_secs(3)));
        let expected = ZMatch.thickness(5e6 - 200.0, 5e6 - 300.0, &ALUMINIUM);
        assert_eq!(after, expected);
    }

    #[test]
    fn scale_and_material_apply_to_next_sample_only() {
        let mut t = tracker();
        let now = Instant::now();
        t.record(sample(5e6, now));
        let before = t.record(sample(5e6 - 100.0, now + Duration::from_secs(1)));

        t.set_scale(2.0);
        t.set_material(Material {
            density: 7.2,
            z_ratio: 0.31,
        });
        assert_eq!(t.thickness(), before);

        let after = t.record(sample(5e6 - 100.0, now + Duration::from_secs(2)));
        let expected = 2.0
            * ZMatch.thickness(
                5e6,
                5e6 - 100.0,
                &Material {
                    density: 7.2,
                    z_ratio: 0.31,
                },
            );
        assert_eq!(after, expected);
    }

    #[test]
    fn unknown_material_keeps_moving_baseline() {
        let mut t = ThicknessTracker::new(Box::new(Sauerbrey));
        let now = Instant::now();
        t.record(sample(5e6, now));
        t.record(sample(5e6 - 100.0, now + Duration::from_secs(1)));
        assert_eq!(t.thickness(), 0.0);
        assert_eq!(t.baseline().map(|s| s.frequency), Some(5e6 - 100.0));
    }
}
