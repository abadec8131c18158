use std::any::Any;

use crate::{
    buffer::BufferRequest,
    error::UpdaterResult,
    network::{Layer, LayerData, LayerType},
    shape::Shape,
};

use super::{ErrorBuffers, LayerContext, LayerFactory, LayerRegistry, LayerTester, LayerUpdater};

/// Normalises across feature maps, independently at every spatial position.
#[derive(Clone, Copy, Debug, Default)]
pub struct SoftmaxLayer;

impl SoftmaxLayer {
    pub const TYPE: LayerType = LayerType("softmax");
}

impl Layer for SoftmaxLayer {
    fn layer_type(&self) -> LayerType {
        Self::TYPE
    }

    fn output_configuration(&self, input: &Shape) -> Result<Shape, String> {
        if input.feature_map_count() == 0 {
            return Err("softmax needs at least one feature map".to_string());
        }

        Ok(input.clone())
    }

    fn forward_flops(&self, input: &Shape) -> f32 {
        input.neuron_count() as f32 * 15.0
    }

    fn backward_flops(&self, input: &Shape) -> f32 {
        input.neuron_count() as f32 * 4.0
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub(super) fn register(registry: &mut LayerRegistry) {
    registry.register(SoftmaxLayer::TYPE, LayerFactory::new(|| Box::new(SoftmaxTester), || Box::new(SoftmaxUpdater)));
}

/// One gather buffer of a feature-map column per worker thread.
fn gather_buffers(ctx: &LayerContext) -> Vec<BufferRequest> {
    vec![BufferRequest::constant(ctx.input_configuration.feature_map_count()); ctx.config.threads]
}

fn forward(
    ctx: &LayerContext,
    input: &[f32],
    output: &mut [f32],
    scratch: &mut [Vec<f32>],
    entry_count: usize,
    single_entry: Option<usize>,
) -> UpdaterResult<()> {
    let shape = ctx.input_configuration;
    let (feature_maps, positions) = (shape.feature_map_count(), shape.neuron_count_per_feature_map());
    let neurons = shape.neuron_count();

    ctx.check_input(input, entry_count, single_entry)?;
    ctx.check_buffer("output", output, neurons, entry_count)?;

    if neurons == 0 {
        return Ok(());
    }

    let mut fallback = Vec::new();
    let locals = if scratch.is_empty() {
        fallback.push(vec![0.0; feature_maps]);
        &mut fallback[..]
    } else {
        scratch
    };

    if locals.iter().any(|local| local.len() < feature_maps) {
        return Err(ctx.shape_error(format!("gather buffers must hold {feature_maps} values")));
    }

    let mut entries = output.chunks_mut(neurons).take(entry_count).collect::<Vec<_>>();

    ctx.config.split_workload_with_locals(&mut entries, locals, |entry, out, column| {
        let src = single_entry.unwrap_or(entry) * neurons;
        let x = &input[src..src + neurons];

        for pos in 0..positions {
            let column = &mut column[..feature_maps];

            let mut max = f32::NEG_INFINITY;
            for (fm, c) in column.iter_mut().enumerate() {
                *c = x[fm * positions + pos];
                max = max.max(*c);
            }

            let mut total = 0.0;
            for c in column.iter_mut() {
                *c = (*c - max).exp();
                total += *c;
            }

            for (fm, &c) in column.iter().enumerate() {
                out[fm * positions + pos] = c / total;
            }
        }
    });

    Ok(())
}

struct SoftmaxTester;

impl LayerTester for SoftmaxTester {
    fn additional_buffers(&self, ctx: &LayerContext) -> Vec<BufferRequest> {
        gather_buffers(ctx)
    }

    fn test(
        &self,
        input: &[f32],
        output: &mut [f32],
        scratch: &mut [Vec<f32>],
        ctx: &LayerContext,
        entry_count: usize,
    ) -> UpdaterResult<()> {
        forward(ctx, input, output, scratch, entry_count, None)
    }
}

struct SoftmaxUpdater;

impl LayerUpdater for SoftmaxUpdater {
    fn is_in_place_backprop(&self) -> bool {
        true
    }

    fn additional_buffers(&self, ctx: &LayerContext, _: bool) -> Vec<BufferRequest> {
        gather_buffers(ctx)
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
        forward(ctx, input, output, scratch, entry_count, single_entry)
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
        let shape = ctx.output_configuration;
        let (feature_maps, positions) = (shape.feature_map_count(), shape.neuron_count_per_feature_map());
        let neurons = shape.neuron_count();
        let errors = errors.into_in_place(ctx)?;

        ctx.check_buffer("error", errors, neurons, entry_count)?;
        ctx.check_buffer("output", output_neurons, neurons, entry_count)?;

        if neurons == 0 {
            return Ok(());
        }

        let mut entries = errors.chunks_mut(neurons).take(entry_count).collect::<Vec<_>>();

        ctx.config.split_workload_mut(&mut entries, |entry, e| {
            let y = &output_neurons[entry * neurons..(entry + 1) * neurons];

            for pos in 0..positions {
                let dot = (0..feature_maps).map(|fm| y[fm * positions + pos] * e[fm * positions + pos]).sum::<f32>();

                for fm in 0..feature_maps {
                    let idx = fm * positions + pos;
                    e[idx] = y[idx] * (e[idx] - dot);
                }
            }
        });

        Ok(())
    }
}
