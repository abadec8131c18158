use std::ops::{Index, IndexMut};

/// Weight tensors of a single layer, one per trainable parameter group.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LayerData {
    tensors: Vec<Vec<f32>>,
}

impl LayerData {
    pub fn new(tensors: Vec<Vec<f32>>) -> Self {
        Self { tensors }
    }

    pub fn zeroed(sizes: &[usize]) -> Self {
        Self::new(sizes.iter().map(|&size| vec![0.0; size]).collect())
    }

    pub fn tensors(&self) -> &[Vec<f32>] {
        &self.tensors
    }

    pub fn tensors_mut(&mut self) -> &mut [Vec<f32>] {
        &mut self.tensors
    }

    pub fn tensor_sizes(&self) -> Vec<usize> {
        self.tensors.iter().map(Vec::len).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.iter().all(Vec::is_empty)
    }

    pub fn filled_like(&self, value: f32) -> Self {
        Self::new(self.tensors.iter().map(|t| vec![value; t.len()]).collect())
    }
}

impl Index<usize> for LayerData {
    type Output = Vec<f32>;

    fn index(&self, index: usize) -> &Self::Output {
        &self.tensors[index]
    }
}

impl IndexMut<usize> for LayerData {
    fn index_mut(&mut self, index: usize) -> &mut Self::Output {
        &mut self.tensors[index]
    }
}

/// Full weight set of one network replica, aligned with the schema. Training
/// speed vectors share this layout.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NetworkData {
    layers: Vec<LayerData>,
}

impl NetworkData {
    pub fn new(layers: Vec<LayerData>) -> Self {
        Self { layers }
    }

    pub fn layers(&self) -> &[LayerData] {
        &self.layers
    }

    pub fn layers_mut(&mut self) -> &mut [LayerData] {
        &mut self.layers
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Same structure as `self`, every element set to `value`. Handy for
    /// building a uniform training speed vector.
    pub fn filled_like(&self, value: f32) -> Self {
        Self::new(self.layers.iter().map(|layer| layer.filled_like(value)).collect())
    }
}

impl Index<usize> for NetworkData {
    type Output = LayerData;

    fn index(&self, index: usize) -> &Self::Output {
        &self.layers[index]
    }
}

impl IndexMut<usize> for NetworkData {
    fn index_mut(&mut self, index: usize) -> &mut Self::Output {
        &mut self.layers[index]
    }
}
