use std::any::Any;

use rand::RngCore;

use crate::{
    error::UpdaterResult,
    network::{downcast, Layer, LayerData, LayerType},
    rng::Dist,
    shape::Shape,
};

use super::{ErrorBuffers, LayerContext, LayerFactory, LayerRegistry, LayerUpdater};

const WEIGHTS: usize = 0;
const BIASES: usize = 1;

/// Dense affine map `y = W x + b`, with `W` stored row-major as
/// `output_neuron_count` rows of `input_neuron_count` values.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FullyConnectedLayer {
    pub input_neuron_count: usize,
    pub output_neuron_count: usize,
}

impl FullyConnectedLayer {
    pub const TYPE: LayerType = LayerType("fully_connected");

    pub fn new(input_neuron_count: usize, output_neuron_count: usize) -> Self {
        Self { input_neuron_count, output_neuron_count }
    }

    fn weight_count(&self) -> usize {
        self.input_neuron_count * self.output_neuron_count
    }

    fn check_data(&self, ctx: &LayerContext, data: &LayerData) -> UpdaterResult<()> {
        if data.tensor_sizes() != self.tensor_sizes() {
            return Err(ctx.shape_error(format!(
                "expected tensor sizes {:?}, got {:?}",
                self.tensor_sizes(),
                data.tensor_sizes()
            )));
        }

        Ok(())
    }

    fn check_replicas<D: std::borrow::Borrow<LayerData>>(
        &self,
        ctx: &LayerContext,
        data: &[D],
        entry_count: usize,
    ) -> UpdaterResult<()> {
        if data.len() < entry_count {
            return Err(ctx.shape_error(format!("{entry_count} replicas, {} weight sets", data.len())));
        }

        data.iter().take(entry_count).try_for_each(|d| self.check_data(ctx, d.borrow()))
    }
}

impl Layer for FullyConnectedLayer {
    fn layer_type(&self) -> LayerType {
        Self::TYPE
    }

    fn output_configuration(&self, input: &Shape) -> Result<Shape, String> {
        if input.neuron_count() != self.input_neuron_count {
            return Err(format!("expected {} input neurons, got {input}", self.input_neuron_count));
        }

        Ok(Shape::flat(self.output_neuron_count))
    }

    fn tensor_sizes(&self) -> Vec<usize> {
        vec![self.weight_count(), self.output_neuron_count]
    }

    fn randomize_data(&self, data: &mut LayerData, rng: &mut dyn RngCore) {
        let stdev = (1.0 / self.input_neuron_count.max(1) as f32).sqrt();
        let dist = Dist::new(0.0, stdev, false);

        for w in data[WEIGHTS].iter_mut() {
            *w = dist.sample(rng);
        }

        data[BIASES].fill(0.0);
    }

    fn forward_flops(&self, _: &Shape) -> f32 {
        (2 * self.weight_count()) as f32
    }

    fn backward_flops(&self, _: &Shape) -> f32 {
        (2 * self.weight_count()) as f32
    }

    fn weights_update_flops(&self, _: &Shape) -> f32 {
        (3 * self.weight_count() + 2 * self.output_neuron_count) as f32
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub(super) fn register(registry: &mut LayerRegistry) {
    registry.register(FullyConnectedLayer::TYPE, LayerFactory::updater_only(|| Box::new(FullyConnectedUpdater)));
}

struct FullyConnectedUpdater;

impl LayerUpdater for FullyConnectedUpdater {
    fn is_in_place_backprop(&self) -> bool {
        false
    }

    fn test(
        &self,
        input: &[f32],
        output: &mut [f32],
        _: &mut [Vec<f32>],
        ctx: &LayerContext,
        data: &[LayerData],
        entry_count: usize,
        single_entry: Option<usize>,
    ) -> UpdaterResult<()> {
        let layer = downcast::<FullyConnectedLayer>(ctx.layer)?;
        let (inputs, outputs) = (layer.input_neuron_count, layer.output_neuron_count);

        ctx.check_input(input, entry_count, single_entry)?;
        ctx.check_buffer("output", output, outputs, entry_count)?;
        layer.check_replicas(ctx, data, entry_count)?;

        if outputs == 0 {
            return Ok(());
        }

        let mut replicas = output.chunks_mut(outputs).zip(data).take(entry_count).collect::<Vec<_>>();

        ctx.config.split_workload_mut(&mut replicas, |replica, (out, weights)| {
            let src = single_entry.unwrap_or(replica) * inputs;
            let x = &input[src..src + inputs];

            for (o, y) in out.iter_mut().enumerate() {
                let row = &weights[WEIGHTS][o * inputs..(o + 1) * inputs];
                *y = weights[BIASES][o] + row.iter().zip(x).map(|(w, x)| w * x).sum::<f32>();
            }
        });

        Ok(())
    }

    fn backprop(
        &self,
        errors: ErrorBuffers<'_>,
        _: &[f32],
        _: &mut [Vec<f32>],
        ctx: &LayerContext,
        data: &[LayerData],
        entry_count: usize,
    ) -> UpdaterResult<()> {
        let layer = downcast::<FullyConnectedLayer>(ctx.layer)?;
        let (inputs, outputs) = (layer.input_neuron_count, layer.output_neuron_count);
        let (input_errors, output_errors) = errors.into_separate(ctx)?;

        ctx.check_buffer("input error", input_errors, inputs, entry_count)?;
        ctx.check_buffer("output error", output_errors, outputs, entry_count)?;
        layer.check_replicas(ctx, data, entry_count)?;

        if inputs == 0 {
            return Ok(());
        }

        let mut replicas = input_errors.chunks_mut(inputs).zip(data).take(entry_count).collect::<Vec<_>>();

        ctx.config.split_workload_mut(&mut replicas, |replica, (dx, weights)| {
            let dy = &output_errors[replica * outputs..(replica + 1) * outputs];
            dx.fill(0.0);

            for (o, &e) in dy.iter().enumerate() {
                let row = &weights[WEIGHTS][o * inputs..(o + 1) * inputs];
                for (d, &w) in dx.iter_mut().zip(row) {
                    *d += w * e;
                }
            }
        });

        Ok(())
    }

    fn update_weights(
        &self,
        input: &[f32],
        output_errors: &[f32],
        _: &mut [Vec<f32>],
        data: &mut [LayerData],
        training_speed: &[&LayerData],
        ctx: &LayerContext,
        entry_count: usize,
        single_entry: Option<usize>,
    ) -> UpdaterResult<()> {
        let layer = downcast::<FullyConnectedLayer>(ctx.layer)?;
        let (inputs, outputs) = (layer.input_neuron_count, layer.output_neuron_count);

        ctx.check_input(input, entry_count, single_entry)?;
        ctx.check_buffer("output error", output_errors, outputs, entry_count)?;
        layer.check_replicas(ctx, &*data, entry_count)?;
        layer.check_replicas(ctx, training_speed, entry_count)?;

        let replicas = &mut data[..entry_count];

        ctx.config.split_workload_mut(replicas, |replica, weights| {
            let src = single_entry.unwrap_or(replica) * inputs;
            let x = &input[src..src + inputs];
            let e = &output_errors[replica * outputs..(replica + 1) * outputs];
            let speed = training_speed[replica];

            for (o, &err) in e.iter().enumerate() {
                let range = o * inputs..(o + 1) * inputs;
                let rates = &speed[WEIGHTS][range.clone()];

                for ((w, &rate), &x) in weights[WEIGHTS][range].iter_mut().zip(rates).zip(x) {
                    *w += rate * err * x;
                }

                weights[BIASES][o] += speed[BIASES][o] * err;
            }
        });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RunningConfiguration;

    fn layer_data() -> LayerData {
        // 2 inputs, 2 outputs
        LayerData::new(vec![vec![1.0, 2.0, -1.0, 0.5], vec![0.5, -0.5]])
    }

    #[test]
    fn rejects_wrong_input_size() {
        let layer = FullyConnectedLayer::new(4, 2);
        assert!(layer.output_configuration(&Shape::new(2, &[2])).is_ok());
        assert!(layer.output_configuration(&Shape::flat(3)).is_err());
    }

    #[test]
    fn forward_backward_update() {
        let config = RunningConfiguration::default().with_threads(2);
        let layer = FullyConnectedLayer::new(2, 2);
        let shape = Shape::flat(2);
        let ctx = LayerContext {
            layer: &layer,
            input_configuration: &shape,
            output_configuration: &shape,
            config: &config,
        };

        let mut data = vec![layer_data(), layer_data()];
        let input = [1.0, 1.0, 2.0, 0.0];

        let mut output = [0.0; 4];
        FullyConnectedUpdater.test(&input, &mut output, &mut [], &ctx, &data, 2, None).unwrap();
        assert_eq!(output, [3.5, -1.0, 2.5, -2.5]);

        let mut broadcast = [0.0; 4];
        FullyConnectedUpdater.test(&input, &mut broadcast, &mut [], &ctx, &data, 2, Some(1)).unwrap();
        assert_eq!(broadcast, [2.5, -2.5, 2.5, -2.5]);

        let output_errors = [1.0, 0.0, 0.0, 2.0];
        let mut input_errors = [9.0; 4];
        let errors = ErrorBuffers::Separate { input_errors: &mut input_errors, output_errors: &output_errors };
        FullyConnectedUpdater.backprop(errors, &output, &mut [], &ctx, &data, 2).unwrap();
        assert_eq!(input_errors, [1.0, 2.0, -2.0, 1.0]);

        let speed = layer_data().filled_like(0.1);
        let speeds = [&speed, &speed];
        FullyConnectedUpdater
            .update_weights(&input, &output_errors, &mut [], &mut data, &speeds, &ctx, 2, None)
            .unwrap();

        let close = |a: &[f32], b: &[f32]| a.iter().zip(b).all(|(x, y)| (x - y).abs() < 1e-6);
        assert!(close(&data[0][WEIGHTS], &[1.1, 2.1, -1.0, 0.5]));
        assert!(close(&data[0][BIASES], &[0.6, -0.5]));
        assert!(close(&data[1][WEIGHTS], &[1.0, 2.0, -0.6, 0.5]));
        assert!(close(&data[1][BIASES], &[0.5, -0.3]));
    }

    #[test]
    fn in_place_errors_are_rejected() {
        let config = RunningConfiguration::default();
        let layer = FullyConnectedLayer::new(2, 2);
        let shape = Shape::flat(2);
        let ctx = LayerContext {
            layer: &layer,
            input_configuration: &shape,
            output_configuration: &shape,
            config: &config,
        };

        let data = [layer_data()];
        let mut errors = [0.0; 2];
        let errors = ErrorBuffers::InPlace(&mut errors);
        let res = FullyConnectedUpdater.backprop(errors, &[0.0; 2], &mut [], &ctx, &data, 1);
        assert!(res.is_err());
    }

    #[test]
    fn randomize_initialises_biases_to_zero() {
        let layer = FullyConnectedLayer::new(16, 4);
        let mut data = layer.create_layer_data();
        data[BIASES].fill(1.0);

        layer.randomize_data(&mut data, &mut crate::rng::seeded(3));

        assert!(data[BIASES].iter().all(|&b| b == 0.0));
        assert!(data[WEIGHTS].iter().all(|w| w.abs() <= 0.25));
        assert!(data[WEIGHTS].iter().any(|&w| w != 0.0));
    }
}
