use std::{collections::HashMap, sync::Arc};

use crate::{error::ConfigurationError, network::LayerType};

use super::{absolute, fully_connected, hyperbolic_tangent, rectified_linear, softmax, LayerTester, LayerUpdater};

pub type TesterFactory = Arc<dyn Fn() -> Box<dyn LayerTester> + Send + Sync>;
pub type UpdaterFactory = Arc<dyn Fn() -> Box<dyn LayerUpdater> + Send + Sync>;

/// Constructors for the computation units of one layer type. Layers owning
/// weights never sit in the shared prefix, so they need no tester.
#[derive(Clone)]
pub struct LayerFactory {
    pub tester: Option<TesterFactory>,
    pub updater: UpdaterFactory,
}

impl LayerFactory {
    pub fn new<T, U>(tester: T, updater: U) -> Self
    where
        T: Fn() -> Box<dyn LayerTester> + Send + Sync + 'static,
        U: Fn() -> Box<dyn LayerUpdater> + Send + Sync + 'static,
    {
        Self { tester: Some(Arc::new(tester)), updater: Arc::new(updater) }
    }

    pub fn updater_only<U>(updater: U) -> Self
    where
        U: Fn() -> Box<dyn LayerUpdater> + Send + Sync + 'static,
    {
        Self { tester: None, updater: Arc::new(updater) }
    }
}

/// Maps layer types to the units implementing them. New layer types are added
/// with [`LayerRegistry::register`].
#[derive(Clone)]
pub struct LayerRegistry {
    factories: HashMap<LayerType, LayerFactory>,
}

impl Default for LayerRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        absolute::register(&mut registry);
        fully_connected::register(&mut registry);
        hyperbolic_tangent::register(&mut registry);
        rectified_linear::register(&mut registry);
        softmax::register(&mut registry);
        registry
    }
}

impl LayerRegistry {
    pub fn empty() -> Self {
        Self { factories: HashMap::new() }
    }

    /// Returns the factory previously registered for `layer_type`, if any.
    pub fn register(&mut self, layer_type: LayerType, factory: LayerFactory) -> Option<LayerFactory> {
        self.factories.insert(layer_type, factory)
    }

    pub fn layer_types(&self) -> Vec<LayerType> {
        let mut types = self.factories.keys().copied().collect::<Vec<_>>();
        types.sort();
        types
    }

    pub fn tester(&self, layer_type: LayerType) -> Result<Box<dyn LayerTester>, ConfigurationError> {
        let factory = self.factories.get(&layer_type).ok_or(ConfigurationError::UnknownLayerType(layer_type))?;
        let tester = factory.tester.as_ref().ok_or(ConfigurationError::MissingTester(layer_type))?;
        Ok(tester())
    }

    pub fn updater(&self, layer_type: LayerType) -> Result<Box<dyn LayerUpdater>, ConfigurationError> {
        let factory = self.factories.get(&layer_type).ok_or(ConfigurationError::UnknownLayerType(layer_type))?;
        Ok((factory.updater)())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::{FullyConnectedLayer, SoftmaxLayer};

    #[test]
    fn builtins_are_registered() {
        let registry = LayerRegistry::default();

        assert_eq!(registry.layer_types().len(), 5);
        assert!(registry.tester(SoftmaxLayer::TYPE).is_ok());
        assert!(registry.updater(FullyConnectedLayer::TYPE).is_ok());
        assert!(matches!(
            registry.tester(FullyConnectedLayer::TYPE),
            Err(ConfigurationError::MissingTester(FullyConnectedLayer::TYPE))
        ));
        assert!(matches!(
            registry.updater(LayerType("convolution")),
            Err(ConfigurationError::UnknownLayerType(LayerType("convolution")))
        ));
    }
}
