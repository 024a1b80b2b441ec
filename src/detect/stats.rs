use crate::detect::TrainingError;

/// A series of samples for baseline statistics.
pub struct TimeSeries {
    values: Vec<f64>,
}

impl TimeSeries {
    pub fn new(values: Vec<f64>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn mean(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        self.values.iter().sum::<f64>() / self.values.len() as f64
    }

    /// Population variance.
    pub fn variance(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        let mean = self.mean();
        let sum_sq_diff: f64 = self
            .values
            .iter()
            .map(|&x| (x - mean).powi(2))
            .sum();
        sum_sq_diff / self.values.len() as f64
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    /// Value at quantile `q` in [0, 1], linearly interpolated between the
    /// two nearest order statistics.
    pub fn quantile(&self, q: f64) -> Result<f64, TrainingError> {
        if self.values.is_empty() {
            return Err(TrainingError::EmptyBaseline);
        }
        if !(0.0..=1.0).contains(&q) {
            return Err(TrainingError::Parameter(format!(
                "quantile must be within [0, 1], got {}",
                q
            )));
        }
        let mut sorted = self.values.clone();
        sorted.sort_by(|a, b| a.total_cmp(b));

        let pos = q * (sorted.len() - 1) as f64;
        let lo = pos.floor() as usize;
        let hi = pos.ceil() as usize;
        let frac = pos - lo as f64;
        Ok(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
    }
}
