mod memory;

pub use memory::InMemorySupervisedDataReader;

use std::io;

use crate::{error::ConfigurationError, shape::Shape};

/// A stream of supervised entries: raw byte inputs with float targets.
pub trait SupervisedDataReader {
    fn input_configuration(&self) -> &Shape;

    fn output_configuration(&self) -> &Shape;

    /// Entries in one pass over the stream, or zero when unknown. Only used to
    /// size buffers.
    fn entry_count(&self) -> usize;

    /// Fills one entry. Returns `Ok(false)` once the stream is exhausted,
    /// leaving both buffers untouched.
    fn read(&mut self, input: &mut [u8], output: &mut [f32]) -> io::Result<bool>;

    /// Rewinds to the first entry.
    fn reset(&mut self) -> io::Result<()>;
}

impl<R: SupervisedDataReader + ?Sized> SupervisedDataReader for &mut R {
    fn input_configuration(&self) -> &Shape {
        (**self).input_configuration()
    }

    fn output_configuration(&self) -> &Shape {
        (**self).output_configuration()
    }

    fn entry_count(&self) -> usize {
        (**self).entry_count()
    }

    fn read(&mut self, input: &mut [u8], output: &mut [f32]) -> io::Result<bool> {
        (**self).read(input, output)
    }

    fn reset(&mut self) -> io::Result<()> {
        (**self).reset()
    }
}

/// Per feature map affine transform applied to inputs after mapping bytes
/// to `[0, 1]`: `(byte / 255 + addition) * multiplication`.
#[derive(Clone, Debug, PartialEq)]
pub struct DataScaleParams {
    pub addition_list: Vec<f32>,
    pub multiplication_list: Vec<f32>,
}

impl DataScaleParams {
    pub fn new(addition_list: Vec<f32>, multiplication_list: Vec<f32>) -> Self {
        Self { addition_list, multiplication_list }
    }

    pub fn identity(feature_map_count: usize) -> Self {
        Self::new(vec![0.0; feature_map_count], vec![1.0; feature_map_count])
    }

    pub fn feature_map_count(&self) -> usize {
        self.addition_list.len()
    }

    pub fn check(&self, input: &Shape) -> Result<(), ConfigurationError> {
        let expected = input.feature_map_count();

        for actual in [self.addition_list.len(), self.multiplication_list.len()] {
            if actual != expected {
                return Err(ConfigurationError::ScaleParamsMismatch { expected, actual });
            }
        }

        Ok(())
    }

    /// Converts one entry laid out as `shape`.
    pub fn convert(&self, shape: &Shape, raw: &[u8], converted: &mut [f32]) {
        let per_map = shape.neuron_count_per_feature_map();
        if per_map == 0 {
            return;
        }

        let maps = raw.chunks(per_map).zip(converted.chunks_mut(per_map));

        for ((src, dst), (&add, &mul)) in maps.zip(self.addition_list.iter().zip(&self.multiplication_list)) {
            for (&byte, value) in src.iter().zip(dst.iter_mut()) {
                *value = (f32::from(byte) * (1.0 / 255.0) + add) * mul;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn convert_scales_each_feature_map() {
        let shape = Shape::new(2, &[2]);
        let params = DataScaleParams::new(vec![0.0, -0.5], vec![1.0, 2.0]);
        params.check(&shape).unwrap();

        let mut converted = [0.0; 4];
        params.convert(&shape, &[0, 255, 0, 255], &mut converted);

        assert_eq!(converted, [0.0, 1.0, -1.0, 1.0]);
    }

    #[test]
    fn mismatched_params_are_rejected() {
        let params = DataScaleParams::identity(3);
        assert!(matches!(
            params.check(&Shape::flat(2)),
            Err(ConfigurationError::ScaleParamsMismatch { expected: 2, actual: 3 })
        ));
    }
}
