use crate::{
    error::ConfigurationError,
    layers::{LayerRegistry, LayerTester, LayerUpdater},
    network::NetworkSchema,
};

/// Computation units of a schema, split at the first layer that owns weights.
///
/// The weight-free prefix is evaluated once per macro-batch and shared by all
/// replicas; everything from the first trainable layer on runs per entry for
/// every replica.
pub struct LayerChain {
    testers: Vec<Box<dyn LayerTester>>,
    updaters: Vec<Box<dyn LayerUpdater>>,
}

impl LayerChain {
    pub fn build(schema: &NetworkSchema, registry: &LayerRegistry) -> Result<Self, ConfigurationError> {
        let layers = schema.layers();
        let testing_layer_count =
            layers.iter().position(|layer| !layer.is_empty_data()).ok_or(ConfigurationError::NoTrainableLayers)?;

        let testers = layers[..testing_layer_count]
            .iter()
            .map(|layer| registry.tester(layer.layer_type()))
            .collect::<Result<Vec<_>, _>>()?;

        let mut updaters = Vec::with_capacity(layers.len() - testing_layer_count);

        for (id, layer) in layers.iter().enumerate().skip(testing_layer_count) {
            let updater = registry.updater(layer.layer_type())?;

            if !layer.is_empty_data() && updater.is_in_place_backprop() {
                return Err(ConfigurationError::InPlaceTrainableLayer { layer: id, layer_type: layer.layer_type() });
            }

            updaters.push(updater);
        }

        Ok(Self { testers, updaters })
    }

    pub fn testers(&self) -> &[Box<dyn LayerTester>] {
        &self.testers
    }

    pub fn updaters(&self) -> &[Box<dyn LayerUpdater>] {
        &self.updaters
    }

    pub fn testing_layer_count(&self) -> usize {
        self.testers.len()
    }

    pub fn updater_layer_count(&self) -> usize {
        self.updaters.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::{FullyConnectedLayer, HyperbolicTangentLayer, RectifiedLinearLayer, SoftmaxLayer};

    #[test]
    fn splits_at_first_trainable_layer() {
        let schema = NetworkSchema::default()
            .add_layer(RectifiedLinearLayer)
            .add_layer(HyperbolicTangentLayer::default())
            .add_layer(FullyConnectedLayer::new(4, 3))
            .add_layer(RectifiedLinearLayer)
            .add_layer(FullyConnectedLayer::new(3, 2))
            .add_layer(SoftmaxLayer);

        let chain = LayerChain::build(&schema, &LayerRegistry::default()).unwrap();

        assert_eq!(chain.testing_layer_count(), 2);
        assert_eq!(chain.updater_layer_count(), 4);
    }

    #[test]
    fn weight_free_network_is_rejected() {
        let schema = NetworkSchema::default().add_layer(RectifiedLinearLayer).add_layer(SoftmaxLayer);

        assert!(matches!(
            LayerChain::build(&schema, &LayerRegistry::default()),
            Err(ConfigurationError::NoTrainableLayers)
        ));
    }

    #[test]
    fn missing_units_are_reported() {
        let schema = NetworkSchema::default().add_layer(SoftmaxLayer).add_layer(FullyConnectedLayer::new(1, 1));

        assert!(matches!(
            LayerChain::build(&schema, &LayerRegistry::empty()),
            Err(ConfigurationError::UnknownLayerType(SoftmaxLayer::TYPE))
        ));
    }
}
