//! Dynamic loss scaling
//!
//! The loss is multiplied by `scale` before back-propagation so small gradients stay
//! representable in reduced precision. A non-finite scaled loss means the step must
//! be skipped and the scale backed off. The same holds when any gradient comes back
//! non-finite. After enough clean steps the scale grows again.

const DEFAULT_INITIAL_SCALE: f32 = 65536.0;
const DEFAULT_GROWTH_INTERVAL: usize = 2000;

#[derive(Debug, Clone)]
pub struct GradScaler {
    scale: f32,
    growth_factor: f32,
    backoff_factor: f32,
    growth_interval: usize,
    steps_since_growth: usize,
    enabled: bool,
    overflow_count: usize,
    successful_steps: usize,
}

impl GradScaler {
    pub fn new(initial_scale: f32) -> Self {
        Self {
            scale: initial_scale,
            growth_factor: 2.0,
            backoff_factor: 0.5,
            growth_interval: DEFAULT_GROWTH_INTERVAL,
            steps_since_growth: 0,
            enabled: true,
            overflow_count: 0,
            successful_steps: 0,
        }
    }

    /// A pass-through scaler: scale stays at 1.0 and never adapts
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::new(1.0)
        }
    }

    pub fn from_flag(mixed_precision: bool) -> Self {
        if mixed_precision {
            Self::default()
        } else {
            Self::disabled()
        }
    }

    pub fn with_growth_interval(mut self, interval: usize) -> Self {
        self.growth_interval = interval.max(1);
        self
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Whether `loss` survives scaling without overflowing
    pub fn check(&self, loss: f32) -> bool {
        (loss * self.scale).is_finite()
    }

    /// Record the outcome of a step. `finite == false` backs the scale off (floor 1.0).
    pub fn update(&mut self, finite: bool) {
        if finite {
            self.successful_steps += 1;
        } else {
            self.overflow_count += 1;
        }
        if !self.enabled {
            return;
        }

        if finite {
            self.steps_since_growth += 1;
            if self.steps_since_growth >= self.growth_interval {
                self.scale *= self.growth_factor;
                self.steps_since_growth = 0;
            }
        } else {
            self.scale = (self.scale * self.backoff_factor).max(1.0);
            self.steps_since_growth = 0;
        }
    }

    pub fn overflow_count(&self) -> usize {
        self.overflow_count
    }

    pub fn successful_steps(&self) -> usize {
        self.successful_steps
    }
}

impl Default for GradScaler {
    fn default() -> Self {
        Self::new(DEFAULT_INITIAL_SCALE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_growth_after_interval() {
        let mut scaler = GradScaler::new(8.0).with_growth_interval(3);
        scaler.update(true);
        scaler.update(true);
        assert_eq!(scaler.scale(), 8.0);
        scaler.update(true);
        assert_eq!(scaler.scale(), 16.0);
    }

    #[test]
    fn test_backoff_resets_growth_and_has_floor() {
        let mut scaler = GradScaler::new(4.0).with_growth_interval(2);
        scaler.update(true);
        scaler.update(false);
        assert_eq!(scaler.scale(), 2.0);
        scaler.update(true);
        assert_eq!(scaler.scale(), 2.0);

        for _ in 0..5 {
            scaler.update(false);
        }
        assert_eq!(scaler.scale(), 1.0);
        assert_eq!(scaler.overflow_count(), 6);
    }

    #[test]
    fn test_overflow_detection() {
        let scaler = GradScaler::default();
        assert!(scaler.check(1.5));
        assert!(!scaler.check(f32::MAX));
        assert!(!scaler.check(f32::NAN));
    }

    #[test]
    fn test_disabled_scaler_is_fixed() {
        let mut scaler = GradScaler::disabled();
        assert_eq!(scaler.scale(), 1.0);
        scaler.update(false);
        for _ in 0..5000 {
            scaler.update(true);
        }
        assert_eq!(scaler.scale(), 1.0);
        assert!(!GradScaler::from_flag(false).is_enabled());
        assert_eq!(GradScaler::from_flag(true).scale(), 65536.0);
    }
}
