use std::any::Any;

use crate::{
    error::UpdaterResult,
    network::{Layer, LayerData, LayerType},
    shape::Shape,
};

use super::{elementwise, ErrorBuffers, LayerContext, LayerFactory, LayerRegistry, LayerTester, LayerUpdater};

#[derive(Clone, Copy, Debug, Default)]
pub struct RectifiedLinearLayer;

impl RectifiedLinearLayer {
    pub const TYPE: LayerType = LayerType("rectified_linear");
}

impl Layer for RectifiedLinearLayer {
    fn layer_type(&self) -> LayerType {
        Self::TYPE
    }

    fn output_configuration(&self, input: &Shape) -> Result<Shape, String> {
        Ok(input.clone())
    }

    fn forward_flops(&self, input: &Shape) -> f32 {
        input.neuron_count() as f32
    }

    fn backward_flops(&self, input: &Shape) -> f32 {
        input.neuron_count() as f32
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub(super) fn register(registry: &mut LayerRegistry) {
    registry.register(
        RectifiedLinearLayer::TYPE,
        LayerFactory::new(|| Box::new(RectifiedLinearTester), || Box::new(RectifiedLinearUpdater)),
    );
}

fn activate(x: f32) -> f32 {
    x.max(0.0)
}

fn prime(y: f32) -> f32 {
    if y > 0.0 {
        1.0
    } else {
        0.0
    }
}

struct RectifiedLinearTester;

impl LayerTester for RectifiedLinearTester {
    fn test(
        &self,
        input: &[f32],
        output: &mut [f32],
        _: &mut [Vec<f32>],
        ctx: &LayerContext,
        entry_count: usize,
    ) -> UpdaterResult<()> {
        ctx.check_input(input, entry_count, None)?;
        let neurons = ctx.input_configuration.neuron_count();
        elementwise::forward(ctx.config, input, output, neurons, entry_count, None, |_, _, x| activate(x));
        Ok(())
    }
}

struct RectifiedLinearUpdater;

impl LayerUpdater for RectifiedLinearUpdater {
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
        ctx.check_input(input, entry_count, single_entry)?;
        let neurons = ctx.input_configuration.neuron_count();
        elementwise::forward(ctx.config, input, output, neurons, entry_count, single_entry, |_, _, x| activate(x));
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
        let neurons = ctx.output_configuration.neuron_count();
        let errors = errors.into_in_place(ctx)?;
        ctx.check_buffer("error", errors, neurons, entry_count)?;
        ctx.check_buffer("output", output_neurons, neurons, entry_count)?;
        elementwise::backprop_in_place(ctx.config, errors, output_neurons, neurons, entry_count, |_, y| prime(y));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RunningConfiguration;

    #[test]
    fn forward_and_backward() {
        let config = RunningConfiguration::default();
        let shape = Shape::flat(3);
        let layer = RectifiedLinearLayer;
        let ctx = LayerContext {
            layer: &layer,
            input_configuration: &shape,
            output_configuration: &shape,
            config: &config,
        };

        let input = [1.0, -1.0, 0.5, -0.5, 2.0, 0.0];
        let mut output = [0.0; 6];
        RectifiedLinearUpdater.test(&input, &mut output, &mut [], &ctx, &[], 2, None).unwrap();
        assert_eq!(output, [1.0, 0.0, 0.5, 0.0, 2.0, 0.0]);

        let mut errors = [0.3; 6];
        RectifiedLinearUpdater.backprop(ErrorBuffers::InPlace(&mut errors), &output, &mut [], &ctx, &[], 2).unwrap();
        assert_eq!(errors, [0.3, 0.0, 0.3, 0.0, 0.3, 0.0]);
    }
}
