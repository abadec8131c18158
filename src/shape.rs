use std::fmt;

/// Configuration of the neurons flowing between two layers: a number of
/// feature maps, each spanning the same spatial dimensions.
///
/// Buffers hold one entry after another; inside an entry feature maps are
/// contiguous.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Shape {
    feature_map_count: usize,
    dimension_sizes: Vec<usize>,
}

impl Shape {
    pub fn new(feature_map_count: usize, dimension_sizes: &[usize]) -> Self {
        Self { feature_map_count, dimension_sizes: dimension_sizes.to_vec() }
    }

    /// A flat vector of neurons: one feature map per neuron.
    pub fn flat(neuron_count: usize) -> Self {
        Self::new(neuron_count, &[])
    }

    pub fn feature_map_count(&self) -> usize {
        self.feature_map_count
    }

    pub fn dimension_sizes(&self) -> &[usize] {
        &self.dimension_sizes
    }

    pub fn neuron_count_per_feature_map(&self) -> usize {
        self.dimension_sizes.iter().product()
    }

    pub fn neuron_count(&self) -> usize {
        self.feature_map_count * self.neuron_count_per_feature_map()
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.feature_map_count)?;

        for size in &self.dimension_sizes {
            write!(f, "x{size}")?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn neuron_counts() {
        let shape = Shape::new(3, &[4, 5]);
        assert_eq!(shape.neuron_count_per_feature_map(), 20);
        assert_eq!(shape.neuron_count(), 60);
        assert_eq!(format!("{shape}"), "3x4x5");

        let flat = Shape::flat(7);
        assert_eq!(flat.neuron_count_per_feature_map(), 1);
        assert_eq!(flat.neuron_count(), 7);
    }
}
