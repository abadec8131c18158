use std::any::Any;

use crate::{
    error::UpdaterResult,
    network::{downcast, Layer, LayerData, LayerType},
    shape::Shape,
};

use super::{elementwise, ErrorBuffers, LayerContext, LayerFactory, LayerRegistry, LayerTester, LayerUpdater};

/// `y = scale * tanh(steepness * x)`
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HyperbolicTangentLayer {
    pub scale: f32,
    pub steepness: f32,
}

impl Default for HyperbolicTangentLayer {
    fn default() -> Self {
        Self { scale: 1.7159, steepness: 0.666_666_7 }
    }
}

impl HyperbolicTangentLayer {
    pub const TYPE: LayerType = LayerType("hyperbolic_tangent");

    pub fn new(scale: f32, steepness: f32) -> Self {
        Self { scale, steepness }
    }

    fn activate(&self, x: f32) -> f32 {
        self.scale * (self.steepness * x).tanh()
    }

    /// Derivative expressed through the output.
    fn prime(&self, y: f32) -> f32 {
        self.steepness * (self.scale - y * y / self.scale)
    }
}

impl Layer for HyperbolicTangentLayer {
    fn layer_type(&self) -> LayerType {
        Self::TYPE
    }

    fn output_configuration(&self, input: &Shape) -> Result<Shape, String> {
        if self.scale == 0.0 {
            return Err("scale must be non-zero".to_string());
        }

        Ok(input.clone())
    }

    fn forward_flops(&self, input: &Shape) -> f32 {
        input.neuron_count() as f32 * 3.0
    }

    fn backward_flops(&self, input: &Shape) -> f32 {
        input.neuron_count() as f32 * 4.0
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub(super) fn register(registry: &mut LayerRegistry) {
    registry.register(
        HyperbolicTangentLayer::TYPE,
        LayerFactory::new(|| Box::new(HyperbolicTangentTester), || Box::new(HyperbolicTangentUpdater)),
    );
}

struct HyperbolicTangentTester;

impl LayerTester for HyperbolicTangentTester {
    fn test(
        &self,
        input: &[f32],
        output: &mut [f32],
        _: &mut [Vec<f32>],
        ctx: &LayerContext,
        entry_count: usize,
    ) -> UpdaterResult<()> {
        let layer = downcast::<HyperbolicTangentLayer>(ctx.layer)?;
        ctx.check_input(input, entry_count, None)?;
        let neurons = ctx.input_configuration.neuron_count();
        elementwise::forward(ctx.config, input, output, neurons, entry_count, None, |_, _, x| layer.activate(x));
        Ok(())
    }
}

struct HyperbolicTangentUpdater;

impl LayerUpdater for HyperbolicTangentUpdater {
    fn is_in_place_backprop(&self) -> bool {
        true
    }

    fn test(
        &self,
        input: &[f32],
        output: &mut [f32],
        _: &mut [Vec<f32>],
        ctx: &LayerContext,
        _: &[LayerData],
        entry_count: usize,
        single_entry: Option<usize>,
    ) -> UpdaterResult<()> {
        let layer = downcast::<HyperbolicTangentLayer>(ctx.layer)?;
        ctx.check_input(input, entry_count, single_entry)?;
        let neurons = ctx.input_configuration.neuron_count();
        elementwise::forward(ctx.config, input, output, neurons, entry_count, single_entry, |_, _, x| {
            layer.activate(x)
        });
        Ok(())
    }

    fn backprop(
        &self,
        errors: ErrorBuffers<'_>,
        output_neurons: &[f32],
        _: &mut [Vec<f32>],
        ctx: &LayerContext,
        _: &[LayerData],
        entry_count: usize,
    ) -> UpdaterResult<()> {
        let layer = downcast::<HyperbolicTangentLayer>(ctx.layer)?;
        let neurons = ctx.output_configuration.neuron_count();
        let errors = errors.into_in_place(ctx)?;
        ctx.check_buffer("error", errors, neurons, entry_count)?;
        ctx.check_buffer("output", output_neurons, neurons, entry_count)?;
        elementwise::backprop_in_place(ctx.config, errors, output_neurons, neurons, entry_count, |_, y| layer.prime(y));
        Ok(())
    }
}
