mod data;

pub use data::{LayerData, NetworkData};

use std::{any::Any, fmt, sync::Arc};

use rand::RngCore;

use crate::{
    error::{ConfigurationError, UpdaterError, UpdaterResult},
    shape::Shape,
};

/// Identity of a layer kind, used to look up its computation units.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LayerType(pub &'static str);

impl fmt::Display for LayerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Immutable description of one network stage.
pub trait Layer: Any + fmt::Debug + Send + Sync {
    fn layer_type(&self) -> LayerType;

    /// Shape produced by this layer for the given input, or the reason the
    /// input is not acceptable.
    fn output_configuration(&self, input: &Shape) -> Result<Shape, String>;

    /// Element counts of the weight tensors this layer owns.
    fn tensor_sizes(&self) -> Vec<usize> {
        Vec::new()
    }

    fn is_empty_data(&self) -> bool {
        self.tensor_sizes().iter().all(|&size| size == 0)
    }

    fn create_layer_data(&self) -> LayerData {
        LayerData::zeroed(&self.tensor_sizes())
    }

    fn randomize_data(&self, _data: &mut LayerData, _rng: &mut dyn RngCore) {}

    fn forward_flops(&self, _input: &Shape) -> f32 {
        0.0
    }

    fn backward_flops(&self, _input: &Shape) -> f32 {
        0.0
    }

    fn weights_update_flops(&self, _input: &Shape) -> f32 {
        0.0
    }

    fn as_any(&self) -> &dyn Any;
}

/// Borrow the concrete hyper-parameters of a layer.
pub fn downcast<T: Layer>(layer: &dyn Layer) -> UpdaterResult<&T> {
    layer.as_any().downcast_ref::<T>().ok_or_else(|| UpdaterError::LayerShape {
        layer_type: layer.layer_type(),
        reason: format!("expected {} hyper-parameters", std::any::type_name::<T>()),
    })
}

/// Ordered, shared list of layers.
#[derive(Clone, Debug, Default)]
pub struct NetworkSchema {
    layers: Vec<Arc<dyn Layer>>,
}

impl NetworkSchema {
    pub fn add_layer(mut self, layer: impl Layer) -> Self {
        self.push(Arc::new(layer));
        self
    }

    pub fn push(&mut self, layer: Arc<dyn Layer>) {
        self.layers.push(layer);
    }

    pub fn layers(&self) -> &[Arc<dyn Layer>] {
        &self.layers
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Shapes flowing through the network: the input followed by the output
    /// of every layer.
    pub fn layer_configuration_list(&self, input: &Shape) -> Result<Vec<Shape>, ConfigurationError> {
        let mut res = Vec::with_capacity(self.layers.len() + 1);
        res.push(input.clone());

        for (id, layer) in self.layers.iter().enumerate() {
            let output = layer.output_configuration(&res[id]).map_err(|reason| {
                ConfigurationError::IncompatibleLayerInput { layer: id, layer_type: layer.layer_type(), reason }
            })?;

            res.push(output);
        }

        Ok(res)
    }

    pub fn create_network_data(&self) -> NetworkData {
        NetworkData::new(self.layers.iter().map(|layer| layer.create_layer_data()).collect())
    }

    pub fn randomize_data(&self, data: &mut NetworkData, rng: &mut dyn RngCore) {
        for (layer, layer_data) in self.layers.iter().zip(data.layers_mut()) {
            layer.randomize_data(layer_data, rng);
        }
    }

    /// Checks that `data` has one correctly sized entry per layer.
    pub fn check_network_data(&self, replica: usize, data: &NetworkData) -> Result<(), ConfigurationError> {
        if data.len() != self.layers.len() {
            return Err(ConfigurationError::LayerCountMismatch {
                replica,
                expected: self.layers.len(),
                actual: data.len(),
            });
        }

        for (id, (layer, layer_data)) in self.layers.iter().zip(data.layers()).enumerate() {
            let expected = layer.tensor_sizes();
            let actual = layer_data.tensor_sizes();

            if expected != actual {
                return Err(ConfigurationError::LayerDataMismatch { replica, layer: id, expected, actual });
            }
        }

        Ok(())
    }
}

impl fmt::Display for NetworkSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (id, layer) in self.layers.iter().enumerate() {
            if id > 0 {
                write!(f, " -> ")?;
            }

            write!(f, "{}", layer.layer_type())?;
        }

        Ok(())
    }
}
