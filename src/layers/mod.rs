mod absolute;
mod elementwise;
mod fully_connected;
mod hyperbolic_tangent;
mod rectified_linear;
mod registry;
mod softmax;

pub use absolute::AbsoluteLayer;
pub use fully_connected::FullyConnectedLayer;
pub use hyperbolic_tangent::HyperbolicTangentLayer;
pub use rectified_linear::RectifiedLinearLayer;
pub use registry::{LayerFactory, LayerRegistry};
pub use softmax::SoftmaxLayer;

use crate::{
    buffer::{BufferRequest, BufferSizeConfiguration},
    config::RunningConfiguration,
    error::{UpdaterError, UpdaterResult},
    network::{Layer, LayerData, LayerType},
    shape::Shape,
};

const FLOAT_SIZE: usize = std::mem::size_of::<f32>();

/// Everything about a layer's position in the chain that stays fixed for a run.
#[derive(Clone, Copy)]
pub struct LayerContext<'a> {
    pub layer: &'a dyn Layer,
    pub input_configuration: &'a Shape,
    pub output_configuration: &'a Shape,
    pub config: &'a RunningConfiguration,
}

impl LayerContext<'_> {
    pub fn layer_type(&self) -> LayerType {
        self.layer.layer_type()
    }

    pub fn shape_error(&self, reason: String) -> UpdaterError {
        UpdaterError::LayerShape { layer_type: self.layer_type(), reason }
    }

    /// Fails unless `buf` holds at least `entry_count` entries of `neurons`.
    pub fn check_buffer(&self, name: &str, buf: &[f32], neurons: usize, entry_count: usize) -> UpdaterResult<()> {
        if buf.len() < neurons * entry_count {
            return Err(self.shape_error(format!(
                "{name} buffer holds {} values, {entry_count} entries of {neurons} needed",
                buf.len()
            )));
        }

        Ok(())
    }

    /// Checks the input buffer for a forward call, which reads either one
    /// entry per output entry or the single entry at `single_entry`.
    pub fn check_input(&self, input: &[f32], entry_count: usize, single_entry: Option<usize>) -> UpdaterResult<()> {
        let needed = single_entry.map_or(entry_count, |idx| idx + 1);
        self.check_buffer("input", input, self.input_configuration.neuron_count(), needed)
    }
}

/// Error buffers handed to a backward call. Layers that backprop in place get
/// a single buffer holding the output errors on entry and the input errors on
/// return.
pub enum ErrorBuffers<'a> {
    InPlace(&'a mut [f32]),
    Separate { input_errors: &'a mut [f32], output_errors: &'a [f32] },
}

impl<'a> ErrorBuffers<'a> {
    pub fn into_in_place(self, ctx: &LayerContext) -> UpdaterResult<&'a mut [f32]> {
        match self {
            Self::InPlace(errors) => Ok(errors),
            Self::Separate { input_errors, output_errors } => {
                if input_errors.len() != output_errors.len() {
                    return Err(ctx.shape_error(format!(
                        "cannot backprop in place from {} output errors into {} input errors",
                        output_errors.len(),
                        input_errors.len()
                    )));
                }

                input_errors.copy_from_slice(output_errors);
                Ok(input_errors)
            }
        }
    }

    pub fn into_separate(self, ctx: &LayerContext) -> UpdaterResult<(&'a mut [f32], &'a [f32])> {
        match self {
            Self::InPlace(_) => Err(ctx.shape_error("input and output errors must not alias".to_string())),
            Self::Separate { input_errors, output_errors } => Ok((input_errors, output_errors)),
        }
    }
}

/// Forward-only unit for weight-free layers of the shared testing prefix.
pub trait LayerTester: Send + Sync {
    fn additional_buffers(&self, _ctx: &LayerContext) -> Vec<BufferRequest> {
        Vec::new()
    }

    fn update_buffer_configuration(&self, buffers: &mut BufferSizeConfiguration, ctx: &LayerContext) {
        buffers.add_per_entry_buffer(ctx.output_configuration.neuron_count() * FLOAT_SIZE);

        for request in self.additional_buffers(ctx) {
            buffers.add_request(request, 1);
        }
    }

    /// Writes `entry_count` entries of `output` from `input`.
    fn test(
        &self,
        input: &[f32],
        output: &mut [f32],
        scratch: &mut [Vec<f32>],
        ctx: &LayerContext,
        entry_count: usize,
    ) -> UpdaterResult<()>;
}

/// Trainable-suffix unit: evaluated once per data entry for every replica.
///
/// `entry_count` in these calls is the number of replicas, and `data` holds
/// one [`LayerData`] per replica.
#[allow(clippy::too_many_arguments)]
pub trait LayerUpdater: Send + Sync {
    /// Input and output error buffers may alias.
    fn is_in_place_backprop(&self) -> bool;

    fn additional_buffers(&self, _ctx: &LayerContext, _backprop_required: bool) -> Vec<BufferRequest> {
        Vec::new()
    }

    /// Declares this unit's footprint. With `replica_count` the buffers are
    /// sized for that many replicas and independent of the macro-batch,
    /// otherwise they are declared per replica.
    fn update_buffer_configuration(
        &self,
        buffers: &mut BufferSizeConfiguration,
        ctx: &LayerContext,
        backprop_required: bool,
        replica_count: Option<usize>,
    ) {
        let add_scaled = |buffers: &mut BufferSizeConfiguration, bytes: usize| match replica_count {
            Some(count) => buffers.add_constant_buffer(bytes * count),
            None => buffers.add_per_entry_buffer(bytes),
        };

        add_scaled(buffers, ctx.output_configuration.neuron_count() * FLOAT_SIZE);

        if backprop_required && !self.is_in_place_backprop() {
            add_scaled(buffers, ctx.input_configuration.neuron_count() * FLOAT_SIZE);
        }

        for request in self.additional_buffers(ctx, backprop_required) {
            if request.per_entry {
                add_scaled(buffers, request.elem_count * FLOAT_SIZE);
            } else {
                buffers.add_constant_buffer(request.elem_count * FLOAT_SIZE);
            }
        }
    }

    /// Forward pass. With `single_entry` every replica reads that one input
    /// entry, otherwise replica `i` reads input entry `i`.
    fn test(
        &self,
        input: &[f32],
        output: &mut [f32],
        scratch: &mut [Vec<f32>],
        ctx: &LayerContext,
        data: &[LayerData],
        entry_count: usize,
        single_entry: Option<usize>,
    ) -> UpdaterResult<()>;

    fn backprop(
        &self,
        errors: ErrorBuffers<'_>,
        output_neurons: &[f32],
        scratch: &mut [Vec<f32>],
        ctx: &LayerContext,
        data: &[LayerData],
        entry_count: usize,
    ) -> UpdaterResult<()>;

    /// One gradient descent step on `data`, given errors as `actual - predicted`.
    fn update_weights(
        &self,
        _input: &[f32],
        _output_errors: &[f32],
        _scratch: &mut [Vec<f32>],
        _data: &mut [LayerData],
        _training_speed: &[&LayerData],
        _ctx: &LayerContext,
        _entry_count: usize,
        _single_entry: Option<usize>,
    ) -> UpdaterResult<()> {
        Ok(())
    }

    fn forward_dropout(
        &self,
        random_uniform_list: &[f32],
        neurons: &mut [f32],
        shape: &Shape,
        config: &RunningConfiguration,
        dropout_rate: f32,
        mask: usize,
        entry_count: usize,
        offset: usize,
    ) {
        apply_dropout(random_uniform_list, neurons, shape, config, dropout_rate, mask, entry_count, offset);
    }

    fn backward_dropout(
        &self,
        random_uniform_list: &[f32],
        errors: &mut [f32],
        shape: &Shape,
        config: &RunningConfiguration,
        dropout_rate: f32,
        mask: usize,
        entry_count: usize,
        offset: usize,
    ) {
        apply_dropout(random_uniform_list, errors, shape, config, dropout_rate, mask, entry_count, offset);
    }
}

/// Zeroes every value whose table sample, starting at `offset`, is below
/// `dropout_rate`. The same offset always selects the same positions.
#[allow(clippy::too_many_arguments)]
pub fn apply_dropout(
    random_uniform_list: &[f32],
    buf: &mut [f32],
    shape: &Shape,
    config: &RunningConfiguration,
    dropout_rate: f32,
    mask: usize,
    entry_count: usize,
    offset: usize,
) {
    let neuron_count = shape.neuron_count();
    if neuron_count == 0 || random_uniform_list.is_empty() {
        return;
    }

    let mut entries = buf.chunks_mut(neuron_count).take(entry_count).collect::<Vec<_>>();

    config.split_workload_mut(&mut entries, |entry, neurons| {
        let start = offset + entry * neuron_count;
        for (i, value) in neurons.iter_mut().enumerate() {
            if random_uniform_list[(start + i) & mask] < dropout_rate {
                *value = 0.0;
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dropout_is_reproducible_from_offset() {
        let config = RunningConfiguration::default().with_threads(2);
        let table = crate::rng::random_uniform_list(&mut crate::rng::seeded(11), 64);
        let shape = Shape::flat(5);

        let mut forward = vec![1.0; 15];
        let mut backward = vec![2.0; 15];
        apply_dropout(&table, &mut forward, &shape, &config, 0.5, 63, 3, 17);
        apply_dropout(&table, &mut backward, &shape, &config, 0.5, 63, 3, 17);

        let dropped = |buf: &[f32]| buf.iter().map(|&x| x == 0.0).collect::<Vec<_>>();
        assert_eq!(dropped(&forward), dropped(&backward));
        assert!(forward.iter().any(|&x| x == 0.0));
    }

    #[test]
    fn dropout_extremes() {
        let config = RunningConfiguration::default();
        let table = crate::rng::random_uniform_list(&mut crate::rng::seeded(5), 16);
        let shape = Shape::flat(4);

        let mut untouched = vec![0.25; 8];
        apply_dropout(&table, &mut untouched, &shape, &config, 0.0, 15, 2, 3);
        assert!(untouched.iter().all(|&x| x == 0.25));

        let mut zeroed = vec![0.25; 8];
        apply_dropout(&table, &mut zeroed, &shape, &config, 1.0, 15, 2, 3);
        assert!(zeroed.iter().all(|&x| x == 0.0));
    }
}
