/// Squared error accumulated by one replica.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TestingResult {
    cumulative_mse_list: Vec<f32>,
    entry_count: usize,
}

impl TestingResult {
    pub fn new(output_neuron_count: usize) -> Self {
        Self { cumulative_mse_list: vec![0.0; output_neuron_count], entry_count: 0 }
    }

    /// Computes `0.5 * (actual - predicted)^2` per output neuron over a set of
    /// entries.
    pub fn from_predictions(actual: &[Vec<f32>], predicted: &[Vec<f32>]) -> Self {
        let mut res = Self::new(actual.first().map_or(0, Vec::len));
        res.entry_count = actual.len();

        for (actual, predicted) in actual.iter().zip(predicted) {
            for ((mse, a), p) in res.cumulative_mse_list.iter_mut().zip(actual).zip(predicted) {
                let diff = a - p;
                *mse += diff * diff * 0.5;
            }
        }

        res
    }

    /// Half the summed squared error of each output neuron.
    pub fn cumulative_mse_list(&self) -> &[f32] {
        &self.cumulative_mse_list
    }

    pub fn entry_count(&self) -> usize {
        self.entry_count
    }

    /// Mean over entries of the per-entry error summed across output neurons.
    pub fn mse(&self) -> f32 {
        if self.entry_count == 0 {
            return 0.0;
        }

        self.cumulative_mse_list.iter().sum::<f32>() / self.entry_count as f32
    }

    pub fn is_finite(&self) -> bool {
        self.cumulative_mse_list.iter().all(|x| x.is_finite())
    }

    /// Moves raw squared errors from `squared_errors` into the result, leaving zeros behind.
    pub(crate) fn flush(&mut self, squared_errors: &mut [f32], entries: usize) {
        for (mse, sq) in self.cumulative_mse_list.iter_mut().zip(squared_errors.iter_mut()) {
            *mse += *sq * 0.5;
            *sq = 0.0;
        }

        self.entry_count += entries;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flush_halves_and_resets() {
        let mut result = TestingResult::new(2);
        let mut squared = [4.0, 2.0];

        result.flush(&mut squared, 3);
        assert_eq!(result.cumulative_mse_list(), &[2.0, 1.0]);
        assert_eq!(squared, [0.0, 0.0]);
        assert_eq!(result.entry_count(), 3);
        assert_eq!(result.mse(), 1.0);

        result.flush(&mut squared, 1);
        assert_eq!(result.entry_count(), 4);
        assert_eq!(result.cumulative_mse_list(), &[2.0, 1.0]);
    }

    #[test]
    fn from_predictions_matches_flush() {
        let actual = vec![vec![1.0, 0.0], vec![0.5, 2.0]];
        let predicted = vec![vec![0.0, 0.0], vec![0.5, 0.0]];

        let result = TestingResult::from_predictions(&actual, &predicted);
        assert_eq!(result.entry_count(), 2);
        assert_eq!(result.cumulative_mse_list(), &[0.5, 2.0]);
        assert_eq!(TestingResult::default().mse(), 0.0);
    }
}
