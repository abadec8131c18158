use std::collections::BTreeMap;

use crate::error::{ConfigurationError, UpdaterError, UpdaterResult};

/// Which layers drop neurons, and the random table the masks are drawn from.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DropoutSettings {
    layer_to_rate: BTreeMap<usize, f32>,
    random_uniform_list: Vec<f32>,
}

impl DropoutSettings {
    /// `random_uniform_list` must have a power of two length once any rate is set.
    pub fn new(random_uniform_list: Vec<f32>) -> Self {
        Self { layer_to_rate: BTreeMap::new(), random_uniform_list }
    }

    pub fn with_rate(mut self, layer: usize, rate: f32) -> Self {
        self.layer_to_rate.insert(layer, rate);
        self
    }

    pub fn rate(&self, layer: usize) -> Option<f32> {
        self.layer_to_rate.get(&layer).copied()
    }

    pub fn layer_to_rate(&self) -> &BTreeMap<usize, f32> {
        &self.layer_to_rate
    }

    pub fn random_uniform_list(&self) -> &[f32] {
        &self.random_uniform_list
    }

    pub fn mask(&self) -> usize {
        self.random_uniform_list.len().saturating_sub(1)
    }

    pub fn is_empty(&self) -> bool {
        self.layer_to_rate.is_empty()
    }

    /// Dropout is applied to a layer's input, so it is only allowed on updater
    /// layers past the first, where every replica has its own activations.
    pub fn validate(&self, layer_count: usize, testing_layer_count: usize) -> Result<(), ConfigurationError> {
        if self.is_empty() {
            return Ok(());
        }

        let len = self.random_uniform_list.len();
        if !len.is_power_of_two() {
            return Err(ConfigurationError::RandomTableNotPowerOfTwo(len));
        }

        let min_layer = testing_layer_count + 1;

        for (&layer, &rate) in &self.layer_to_rate {
            if layer < min_layer {
                return Err(ConfigurationError::DropoutOnSharedLayer { layer, min_layer });
            }

            if layer >= layer_count {
                return Err(ConfigurationError::DropoutLayerOutOfRange { layer, layer_count });
            }

            if !(0.0..=1.0).contains(&rate) {
                return Err(ConfigurationError::InvalidDropoutRate { layer, rate });
            }
        }

        Ok(())
    }
}

/// Offsets drawn during one entry's forward pass, consumed in reverse by the
/// backward pass.
#[derive(Debug, Default)]
pub struct DropoutReplay {
    stack: Vec<(usize, usize)>,
}

impl DropoutReplay {
    pub fn push(&mut self, layer: usize, offset: usize) {
        self.stack.push((layer, offset));
    }

    /// The offset recorded for `layer`, which must be the most recent one.
    pub fn pop(&mut self, layer: usize) -> UpdaterResult<usize> {
        match self.stack.last() {
            Some(&(top, offset)) if top == layer => {
                self.stack.pop();
                Ok(offset)
            }
            top => Err(UpdaterError::DropoutReplay { expected: top.map(|&(top, _)| top), actual: layer }),
        }
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Ends an entry, failing if any offset was left unused.
    pub fn finish(&mut self) -> UpdaterResult<()> {
        let depth = self.stack.len();
        self.stack.clear();

        if depth > 0 {
            return Err(UpdaterError::DropoutReplayNotDrained(depth));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rules() {
        let table = vec![0.5; 8];

        assert!(DropoutSettings::default().validate(3, 1).is_ok());
        assert!(DropoutSettings::new(table.clone()).with_rate(2, 0.5).validate(3, 1).is_ok());

        assert!(matches!(
            DropoutSettings::new(table.clone()).with_rate(1, 0.5).validate(3, 1),
            Err(ConfigurationError::DropoutOnSharedLayer { layer: 1, min_layer: 2 })
        ));
        assert!(matches!(
            DropoutSettings::new(table.clone()).with_rate(3, 0.5).validate(3, 1),
            Err(ConfigurationError::DropoutLayerOutOfRange { layer: 3, layer_count: 3 })
        ));
        assert!(matches!(
            DropoutSettings::new(table).with_rate(2, 1.5).validate(3, 1),
            Err(ConfigurationError::InvalidDropoutRate { layer: 2, .. })
        ));
        assert!(matches!(
            DropoutSettings::new(vec![0.5; 6]).with_rate(2, 0.5).validate(3, 1),
            Err(ConfigurationError::RandomTableNotPowerOfTwo(6))
        ));
        assert!(matches!(
            DropoutSettings::new(Vec::new()).with_rate(2, 0.5).validate(3, 1),
            Err(ConfigurationError::RandomTableNotPowerOfTwo(0))
        ));
    }

    #[test]
    fn replay_is_last_in_first_out() {
        let mut replay = DropoutReplay::default();
        replay.push(2, 10);
        replay.push(4, 7);

        assert!(matches!(replay.pop(2), Err(UpdaterError::DropoutReplay { expected: Some(4), actual: 2 })));
        assert_eq!(replay.pop(4).unwrap(), 7);
        assert_eq!(replay.pop(2).unwrap(), 10);
        assert_eq!(replay.depth(), 0);
        replay.finish().unwrap();

        replay.push(3, 1);
        assert!(matches!(replay.finish(), Err(UpdaterError::DropoutReplayNotDrained(1))));
        assert_eq!(replay.depth(), 0);
    }
}
