use std::any::Any;

use crate::{
    buffer::BufferRequest,
    error::UpdaterResult,
    network::{Layer, LayerData, LayerType},
    shape::Shape,
};

use super::{elementwise, ErrorBuffers, LayerContext, LayerFactory, LayerRegistry, LayerTester, LayerUpdater};

#[derive(Clone, Copy, Debug, Default)]
pub struct AbsoluteLayer;

impl AbsoluteLayer {
    pub const TYPE: LayerType = LayerType("absolute");
}

impl Layer for AbsoluteLayer {
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
    registry
        .register(AbsoluteLayer::TYPE, LayerFactory::new(|| Box::new(AbsoluteTester), || Box::new(AbsoluteUpdater)));
}

fn sign(x: f32) -> f32 {
    if x < 0.0 {
        -1.0
    } else {
        1.0
    }
}

struct AbsoluteTester;

impl LayerTester for AbsoluteTester {
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
        elementwise::forward(ctx.config, input, output, neurons, entry_count, None, |_, _, x| x.abs());
        Ok(())
    }
}

/// The output no longer tells which inputs were negative, so the forward pass
/// records their signs in a per-entry scratch buffer for backprop.
struct AbsoluteUpdater;

impl LayerUpdater for AbsoluteUpdater {
    fn is_in_place_backprop(&self) -> bool {
        true
    }

    fn additional_buffers(&self, ctx: &LayerContext, backprop_required: bool) -> Vec<BufferRequest> {
        if backprop_required {
            vec![BufferRequest::per_entry(ctx.input_configuration.neuron_count())]
        } else {
            Vec::new()
        }
    }

    fn test(
        &self,
        input: &[f32],
        output: &mut [f32],
        scratch: &mut [Vec<f32>],
        ctx: &LayerContext,
        _: &[LayerData],
        entry_count: usize,
        single_entry: Option<usize>,
    ) -> UpdaterResult<()> {
        ctx.check_input(input, entry_count, single_entry)?;
        let neurons = ctx.input_configuration.neuron_count();

        let Some(signs) = scratch.first_mut() else {
            elementwise::forward(ctx.config, input, output, neurons, entry_count, single_entry, |_, _, x| x.abs());
            return Ok(());
        };

        ctx.check_buffer("sign", signs, neurons, entry_count)?;

        if neurons == 0 {
            return Ok(());
        }

        let mut entries =
            output.chunks_mut(neurons).zip(signs.chunks_mut(neurons)).take(entry_count).collect::<Vec<_>>();

        ctx.config.split_workload_mut(&mut entries, |entry, (out, signs)| {
            let src = single_entry.unwrap_or(entry) * neurons;

            for ((y, s), &x) in out.iter_mut().zip(signs.iter_mut()).zip(&input[src..src + neurons]) {
                *y = x.abs();
                *s = sign(x);
            }
        });

        Ok(())
    }

    fn backprop(
        &self,
        errors: ErrorBuffers<'_>,
        output_neurons: &[f32],
        scratch: &mut [Vec<f32>],
        ctx: &LayerContext,
        _: &[LayerData],
        entry_count: usize,
    ) -> UpdaterResult<()> {
        let neurons = ctx.output_configuration.neuron_count();
        let signs = scratch.first().ok_or_else(|| ctx.shape_error("sign buffer was not allocated".to_string()))?;
        let errors = errors.into_in_place(ctx)?;

        ctx.check_buffer("error", errors, neurons, entry_count)?;
        ctx.check_buffer("sign", signs, neurons, entry_count)?;

        elementwise::backprop_in_place(ctx.config, errors, output_neurons, neurons, entry_count, |idx, _| signs[idx]);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RunningConfiguration;

    #[test]
    fn backprop_uses_recorded_signs() {
        let config = RunningConfiguration::default().with_threads(3);
        let shape = Shape::flat(2);
        let layer = AbsoluteLayer;
        let ctx = LayerContext {
            layer: &layer,
            input_configuration: &shape,
            output_configuration: &shape,
            config: &config,
        };

        let requests = AbsoluteUpdater.additional_buffers(&ctx, true);
        let mut scratch = requests.iter().map(|r| r.allocate(3)).collect::<Vec<_>>();
        assert_eq!(scratch[0].len(), 6);

        let input = [-1.0, 2.0, 3.0, -4.0, 0.0, -0.5];
        let mut output = [0.0; 6];
        AbsoluteUpdater.test(&input, &mut output, &mut scratch, &ctx, &[], 3, None).unwrap();
        assert_eq!(output, [1.0, 2.0, 3.0, 4.0, 0.0, 0.5]);

        let mut errors = [1.0; 6];
        AbsoluteUpdater.backprop(ErrorBuffers::InPlace(&mut errors), &output, &mut scratch, &ctx, &[], 3).unwrap();
        assert_eq!(errors, [-1.0, 1.0, 1.0, -1.0, 1.0, -1.0]);
    }

    #[test]
    fn backprop_without_scratch_fails() {
        let config = RunningConfiguration::default();
        let shape = Shape::flat(1);
        let layer = AbsoluteLayer;
        let ctx = LayerContext {
            layer: &layer,
            input_configuration: &shape,
            output_configuration: &shape,
            config: &config,
        };

        let mut errors = [1.0];
        let res = AbsoluteUpdater.backprop(ErrorBuffers::InPlace(&mut errors), &[1.0], &mut [], &ctx, &[], 1);
        assert!(res.is_err());
    }
}
