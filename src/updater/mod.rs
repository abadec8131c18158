mod chain;
mod dropout;
mod result;

pub use chain::LayerChain;
pub use dropout::{DropoutReplay, DropoutSettings};
pub use result::TestingResult;

use std::{mem, time::Instant};

use rand::{rngs::StdRng, Rng};

use crate::{
    buffer::{BufferArena, BufferId, BufferSizeConfiguration},
    config::RunningConfiguration,
    data::{DataScaleParams, SupervisedDataReader},
    error::{ConfigurationError, UpdaterResult},
    layers::{ErrorBuffers, LayerContext, LayerRegistry},
    logger,
    network::{LayerData, NetworkData, NetworkSchema},
    rng,
    shape::Shape,
};

const FLOAT_SIZE: usize = mem::size_of::<f32>();

/// Share of the memory budget `max_batch_size` plans for.
const MAX_BATCH_SIZE_RATIO: f32 = 0.5;

/// Trains several replicas of one network side by side over a supervised
/// data stream.
pub struct NetworkUpdater {
    schema: NetworkSchema,
    chain: LayerChain,
    config: RunningConfiguration,
    scale_params: Option<DataScaleParams>,
    current_scale_params: Option<DataScaleParams>,
    layer_config_list: Vec<Shape>,
    flops: f32,
    profile_mode: bool,
    entry_count_updated_in_profile_mode: usize,
    rng: StdRng,
}

struct PrefixSlot {
    input: BufferId,
    output: BufferId,
    scratch: Vec<Vec<f32>>,
}

struct UpdaterSlot {
    input: BufferId,
    output: BufferId,
    output_errors: BufferId,
    /// `None` when the layer writes its input errors over `output_errors`.
    input_errors: Option<BufferId>,
    scratch: Vec<Vec<f32>>,
}

/// Everything allocated for one `update` call.
struct Buffers {
    arena: BufferArena,
    converted_input: BufferId,
    initial_errors: BufferId,
    final_output: BufferId,
    prefix: Vec<PrefixSlot>,
    slots: Vec<UpdaterSlot>,
    squared_errors: Vec<f32>,
}

struct Dropout<'a> {
    settings: &'a DropoutSettings,
    replay: DropoutReplay,
    rng: StdRng,
}

impl NetworkUpdater {
    /// Without `scale_params`, inputs are only mapped from bytes to `[0, 1]`.
    pub fn new(
        schema: NetworkSchema,
        scale_params: Option<DataScaleParams>,
        config: RunningConfiguration,
        registry: &LayerRegistry,
    ) -> Result<Self, ConfigurationError> {
        let chain = LayerChain::build(&schema, registry)?;

        Ok(Self {
            schema,
            chain,
            config,
            scale_params,
            current_scale_params: None,
            layer_config_list: Vec::new(),
            flops: 0.0,
            profile_mode: false,
            entry_count_updated_in_profile_mode: 0,
            rng: rng::with_time_seed(),
        })
    }

    /// Seeds the generator for dropout offsets.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = rng::seeded(seed);
        self
    }

    pub fn schema(&self) -> &NetworkSchema {
        &self.schema
    }

    pub fn chain(&self) -> &LayerChain {
        &self.chain
    }

    pub fn config(&self) -> &RunningConfiguration {
        &self.config
    }

    /// Input shape followed by the output shape of every layer, empty until
    /// an input configuration is set.
    pub fn layer_config_list(&self) -> &[Shape] {
        &self.layer_config_list
    }

    pub fn set_profile_mode(&mut self, profile_mode: bool) {
        self.profile_mode = profile_mode;
    }

    pub fn profile_mode(&self) -> bool {
        self.profile_mode
    }

    /// Entries processed by the last `update` run in profile mode.
    pub fn entry_count_updated_in_profile_mode(&self) -> usize {
        self.entry_count_updated_in_profile_mode
    }

    /// `update` does this itself with the reader's input shape.
    pub fn set_input_configuration(&mut self, input: &Shape) -> Result<(), ConfigurationError> {
        if self.layer_config_list.first() == Some(input) {
            return Ok(());
        }

        let layer_config_list = self.schema.layer_configuration_list(input)?;

        let scale_params = match &self.scale_params {
            Some(params) => params.clone(),
            None => DataScaleParams::identity(input.feature_map_count()),
        };
        scale_params.check(input)?;

        self.layer_config_list = layer_config_list;
        self.current_scale_params = Some(scale_params);
        self.flops = self.compute_flops();

        Ok(())
    }

    /// Operations needed to train on one entry for a single replica.
    pub fn flops_for_single_entry(&self) -> f32 {
        self.flops
    }

    /// Largest number of replicas the memory budget allows to train at once.
    pub fn max_batch_size(&self) -> Result<usize, ConfigurationError> {
        if self.layer_config_list.is_empty() {
            return Err(ConfigurationError::InputConfigurationNotSet);
        }

        let testing = self.chain.testing_layer_count();
        let mut buffers = BufferSizeConfiguration::default();

        for (idx, updater) in self.chain.updaters().iter().enumerate() {
            updater.update_buffer_configuration(&mut buffers, &self.context(testing + idx), idx != 0, None);
        }

        Ok(self.config.max_entry_count(&buffers, MAX_BATCH_SIZE_RATIO))
    }

    /// Runs one pass over `reader`, training `data[i]` with `training_speeds[i]`.
    ///
    /// Weights are updated in place. Returns the error accumulated by every
    /// replica.
    pub fn update<R: SupervisedDataReader + ?Sized>(
        &mut self,
        reader: &mut R,
        training_speeds: &[NetworkData],
        data: &mut [NetworkData],
        dropout: &DropoutSettings,
    ) -> UpdaterResult<Vec<TestingResult>> {
        self.set_input_configuration(reader.input_configuration())?;
        self.check_update(reader, training_speeds, data, dropout)?;

        let testing = self.chain.testing_layer_count();
        let layer_count = self.schema.len();

        let mut weights = (testing..layer_count)
            .map(|layer| data.iter_mut().map(|replica| mem::take(&mut replica[layer])).collect::<Vec<_>>())
            .collect::<Vec<_>>();

        let speeds = (testing..layer_count)
            .map(|layer| training_speeds.iter().map(|replica| &replica[layer]).collect::<Vec<_>>())
            .collect::<Vec<_>>();

        let mut dropout =
            Dropout { settings: dropout, replay: DropoutReplay::default(), rng: rng::seeded(self.rng.gen()) };
        let res = self.run(reader, &speeds, &mut weights, &mut dropout, data.len());

        for (layer, replicas) in (testing..).zip(weights) {
            for (replica, layer_data) in data.iter_mut().zip(replicas) {
                replica[layer] = layer_data;
            }
        }

        let (results, profiled) = res?;
        if let Some(entries) = profiled {
            self.entry_count_updated_in_profile_mode = entries;
        }

        Ok(results)
    }

    fn check_update<R: SupervisedDataReader + ?Sized>(
        &self,
        reader: &R,
        training_speeds: &[NetworkData],
        data: &[NetworkData],
        dropout: &DropoutSettings,
    ) -> Result<(), ConfigurationError> {
        if data.is_empty() {
            return Err(ConfigurationError::NoReplicas);
        }

        if training_speeds.len() != data.len() {
            return Err(ConfigurationError::ReplicaCountMismatch {
                data: data.len(),
                training_speed: training_speeds.len(),
            });
        }

        for (replica, (weights, speed)) in data.iter().zip(training_speeds).enumerate() {
            self.schema.check_network_data(replica, weights)?;
            self.schema.check_network_data(replica, speed)?;
        }

        let expected = self.output_shape().neuron_count();
        let actual = reader.output_configuration().neuron_count();
        if expected != actual {
            return Err(ConfigurationError::OutputShapeMismatch { expected, actual });
        }

        dropout.validate(self.schema.len(), self.chain.testing_layer_count())
    }

    fn output_shape(&self) -> &Shape {
        &self.layer_config_list[self.schema.len()]
    }

    fn context(&self, layer_id: usize) -> LayerContext<'_> {
        LayerContext {
            layer: self.schema.layers()[layer_id].as_ref(),
            input_configuration: &self.layer_config_list[layer_id],
            output_configuration: &self.layer_config_list[layer_id + 1],
            config: &self.config,
        }
    }

    fn compute_flops(&self) -> f32 {
        let testing = self.chain.testing_layer_count();
        let mut flops = 0.0;

        for (id, layer) in self.schema.layers().iter().enumerate() {
            let input = &self.layer_config_list[id];
            flops += layer.forward_flops(input);

            if id >= testing {
                if id > testing {
                    flops += layer.backward_flops(input);
                }

                flops += layer.weights_update_flops(input);
            }
        }

        flops
    }

    fn update_buffers_configuration(&self, buffers: &mut BufferSizeConfiguration, replicas: usize) {
        let testing = self.chain.testing_layer_count();

        for (id, tester) in self.chain.testers().iter().enumerate() {
            tester.update_buffer_configuration(buffers, &self.context(id));
        }

        for (idx, updater) in self.chain.updaters().iter().enumerate() {
            updater.update_buffer_configuration(buffers, &self.context(testing + idx), idx != 0, Some(replicas));
        }
    }

    fn plan_max_entry_count<R: SupervisedDataReader + ?Sized>(
        &self,
        reader: &R,
        speeds: &[Vec<&LayerData>],
        weights: &[Vec<LayerData>],
        replicas: usize,
    ) -> usize {
        let input_neurons = self.layer_config_list[0].neuron_count();
        let output_neurons = self.output_shape().neuron_count();

        let mut buffers = BufferSizeConfiguration::default();
        self.update_buffers_configuration(&mut buffers, replicas);

        // raw input
        buffers.add_per_entry_buffer(input_neurons);
        buffers.add_per_entry_buffer(input_neurons * FLOAT_SIZE);
        buffers.add_per_entry_buffer(output_neurons * FLOAT_SIZE);
        // squared errors and initial errors
        buffers.add_constant_buffer(output_neurons * FLOAT_SIZE * replicas);
        buffers.add_constant_buffer(output_neurons * FLOAT_SIZE * replicas);

        for layer in weights.iter().flatten().chain(speeds.iter().flatten().copied()) {
            for tensor in layer.tensors() {
                buffers.add_constant_buffer(tensor.len() * FLOAT_SIZE);
            }
        }

        let mut count = self.config.max_entry_count(&buffers, 1.0).min(self.config.max_entry_count_in_single_batch);

        // zero means the reader cannot tell
        let hint = reader.entry_count();
        if hint > 0 {
            count = count.min(hint);
        }

        count.max(1)
    }

    fn allocate(&self, max_entry_count: usize, replicas: usize) -> Buffers {
        let testing = self.chain.testing_layer_count();
        let mut arena = BufferArena::default();

        let converted_input = arena.allocate(self.layer_config_list[0].neuron_count() * max_entry_count);
        let initial_errors = arena.allocate(self.output_shape().neuron_count() * replicas);
        let mut input = converted_input;

        let mut prefix = Vec::with_capacity(testing);
        for (id, tester) in self.chain.testers().iter().enumerate() {
            let ctx = self.context(id);
            let output = arena.allocate(ctx.output_configuration.neuron_count() * max_entry_count);
            let scratch = tester.additional_buffers(&ctx).iter().map(|r| r.allocate(max_entry_count)).collect();

            prefix.push(PrefixSlot { input, output, scratch });
            input = output;
        }

        let mut slots = Vec::with_capacity(self.chain.updater_layer_count());
        for (idx, updater) in self.chain.updaters().iter().enumerate() {
            let ctx = self.context(testing + idx);
            let backprop_required = idx != 0;

            let output = arena.allocate(ctx.output_configuration.neuron_count() * replicas);
            let input_errors = (backprop_required && !updater.is_in_place_backprop())
                .then(|| arena.allocate(ctx.input_configuration.neuron_count() * replicas));
            let scratch =
                updater.additional_buffers(&ctx, backprop_required).iter().map(|r| r.allocate(replicas)).collect();

            slots.push(UpdaterSlot { input, output, output_errors: initial_errors, input_errors, scratch });
            input = output;
        }

        let mut errors = initial_errors;
        for slot in slots.iter_mut().rev() {
            slot.output_errors = errors;
            errors = slot.input_errors.unwrap_or(errors);
        }

        Buffers {
            arena,
            converted_input,
            initial_errors,
            final_output: input,
            prefix,
            slots,
            squared_errors: vec![0.0; self.output_shape().neuron_count() * replicas],
        }
    }

    fn run<R: SupervisedDataReader + ?Sized>(
        &self,
        reader: &mut R,
        speeds: &[Vec<&LayerData>],
        weights: &mut [Vec<LayerData>],
        dropout: &mut Dropout<'_>,
        replicas: usize,
    ) -> UpdaterResult<(Vec<TestingResult>, Option<usize>)> {
        let scale = self.current_scale_params.as_ref().ok_or(ConfigurationError::InputConfigurationNotSet)?;
        let input_neurons = self.layer_config_list[0].neuron_count();
        let output_neurons = self.output_shape().neuron_count();

        let max_entry_count = self.plan_max_entry_count(reader, speeds, weights, replicas);
        let mut buffers = self.allocate(max_entry_count, replicas);

        let mut raw_input = vec![0u8; input_neurons * max_entry_count];
        let mut actual_output = vec![0.0f32; output_neurons * max_entry_count];
        let mut results = vec![TestingResult::new(output_neurons); replicas];

        let timer = Instant::now();
        if self.config.log_progress {
            logger::report_update_started(
                self.chain.testing_layer_count(),
                self.chain.updater_layer_count(),
                replicas,
                max_entry_count,
            );
        }

        let mut exhausted = false;
        let mut total_entries = 0;
        let mut macro_batch = 0;
        let mut profiled = None;

        while !exhausted {
            let mut entries = 0;
            while entries < max_entry_count {
                let input = &mut raw_input[entries * input_neurons..(entries + 1) * input_neurons];
                let output = &mut actual_output[entries * output_neurons..(entries + 1) * output_neurons];

                if !reader.read(input, output)? {
                    exhausted = true;
                    break;
                }

                entries += 1;
            }

            if entries == 0 {
                if self.profile_mode {
                    profiled = Some(0);
                }

                break;
            }

            self.convert_input(scale, &raw_input, buffers.arena.get_mut(buffers.converted_input), entries);
            self.run_testing_layers(&mut buffers, entries)?;

            for entry in 0..entries {
                let actual = &actual_output[entry * output_neurons..(entry + 1) * output_neurons];

                self.forward_updaters(&mut buffers, weights, dropout, entry, replicas)?;
                self.compute_errors(&mut buffers, actual, replicas)?;
                self.backward_updaters(&mut buffers, weights, speeds, dropout, entry, replicas)?;
                dropout.replay.finish()?;
            }

            for (replica, result) in results.iter_mut().enumerate() {
                let range = replica * output_neurons..(replica + 1) * output_neurons;
                result.flush(&mut buffers.squared_errors[range], entries);
            }

            total_entries += entries;
            macro_batch += 1;

            if self.config.log_progress {
                logger::report_macro_batch_finished(macro_batch, entries, total_entries, &timer);
            }

            if self.profile_mode {
                profiled = Some(entries);
                break;
            }
        }

        for (replica, result) in results.iter().enumerate() {
            if !result.is_finite() {
                logger::report_non_finite_error(replica);
            }
        }

        if self.config.log_progress {
            logger::report_update_finished(&results, &timer);
        }

        Ok((results, profiled))
    }

    fn convert_input(&self, scale: &DataScaleParams, raw: &[u8], converted: &mut [f32], entries: usize) {
        let shape = &self.layer_config_list[0];
        let neurons = shape.neuron_count();
        if neurons == 0 {
            return;
        }

        let mut pairs = converted.chunks_mut(neurons).zip(raw.chunks(neurons)).take(entries).collect::<Vec<_>>();
        self.config.split_workload_mut(&mut pairs, |_, (dst, src)| scale.convert(shape, src, dst));
    }

    fn run_testing_layers(&self, buffers: &mut Buffers, entries: usize) -> UpdaterResult<()> {
        for (id, (tester, slot)) in self.chain.testers().iter().zip(buffers.prefix.iter_mut()).enumerate() {
            let ctx = self.context(id);

            buffers.arena.with_write(slot.output, &[slot.input], |output, inputs| {
                tester.test(inputs[0], output, &mut slot.scratch, &ctx, entries)
            })??;
        }

        Ok(())
    }

    fn forward_updaters(
        &self,
        buffers: &mut Buffers,
        weights: &[Vec<LayerData>],
        dropout: &mut Dropout<'_>,
        entry: usize,
        replicas: usize,
    ) -> UpdaterResult<()> {
        let testing = self.chain.testing_layer_count();
        let settings = dropout.settings;
        let table = settings.random_uniform_list();

        for (idx, (updater, slot)) in self.chain.updaters().iter().zip(buffers.slots.iter_mut()).enumerate() {
            let layer_id = testing + idx;
            let ctx = self.context(layer_id);

            if idx > 0 {
                if let Some(rate) = settings.rate(layer_id) {
                    let offset = dropout.rng.gen_range(0..table.len());
                    dropout.replay.push(layer_id, offset);

                    updater.forward_dropout(
                        table,
                        buffers.arena.get_mut(slot.input),
                        ctx.input_configuration,
                        &self.config,
                        rate,
                        settings.mask(),
                        replicas,
                        offset,
                    );
                }
            }

            let single_entry = (idx == 0).then_some(entry);
            let data = &weights[idx];

            buffers.arena.with_write(slot.output, &[slot.input], |output, inputs| {
                updater.test(inputs[0], output, &mut slot.scratch, &ctx, data, replicas, single_entry)
            })??;
        }

        Ok(())
    }

    /// Writes `actual - predicted` for every replica into the initial error
    /// buffer and adds its square to the running sums.
    fn compute_errors(&self, buffers: &mut Buffers, actual: &[f32], replicas: usize) -> UpdaterResult<()> {
        let neurons = actual.len();
        if neurons == 0 {
            return Ok(());
        }

        let squared_errors = &mut buffers.squared_errors;

        buffers.arena.with_write(buffers.initial_errors, &[buffers.final_output], |errors, outputs| {
            let predicted = outputs[0];
            let mut pairs =
                errors.chunks_mut(neurons).zip(squared_errors.chunks_mut(neurons)).take(replicas).collect::<Vec<_>>();

            self.config.split_workload_mut(&mut pairs, |replica, (errors, squared)| {
                let predicted = &predicted[replica * neurons..(replica + 1) * neurons];

                for (((err, sq), &a), &p) in errors.iter_mut().zip(squared.iter_mut()).zip(actual).zip(predicted) {
                    let diff = a - p;
                    *err = diff;
                    *sq += diff * diff;
                }
            });
        })
    }

    fn backward_updaters(
        &self,
        buffers: &mut Buffers,
        weights: &mut [Vec<LayerData>],
        speeds: &[Vec<&LayerData>],
        dropout: &mut Dropout<'_>,
        entry: usize,
        replicas: usize,
    ) -> UpdaterResult<()> {
        let testing = self.chain.testing_layer_count();
        let arena = &mut buffers.arena;

        for (idx, (updater, slot)) in self.chain.updaters().iter().zip(buffers.slots.iter_mut()).enumerate().rev() {
            let layer_id = testing + idx;
            let ctx = self.context(layer_id);

            if idx > 0 {
                let data = &weights[idx];

                match slot.input_errors {
                    Some(input_errors) => {
                        arena.with_write(input_errors, &[slot.output_errors, slot.output], |dst, reads| {
                            let errors = ErrorBuffers::Separate { input_errors: dst, output_errors: reads[0] };
                            updater.backprop(errors, reads[1], &mut slot.scratch, &ctx, data, replicas)
                        })??
                    }
                    None => arena.with_write(slot.output_errors, &[slot.output], |errors, reads| {
                        let errors = ErrorBuffers::InPlace(errors);
                        updater.backprop(errors, reads[0], &mut slot.scratch, &ctx, data, replicas)
                    })??,
                }

                if let Some(rate) = dropout.settings.rate(layer_id) {
                    let offset = dropout.replay.pop(layer_id)?;

                    updater.backward_dropout(
                        dropout.settings.random_uniform_list(),
                        arena.get_mut(slot.input_errors.unwrap_or(slot.output_errors)),
                        ctx.input_configuration,
                        &self.config,
                        rate,
                        dropout.settings.mask(),
                        replicas,
                        offset,
                    );
                }
            }

            updater.update_weights(
                arena.get(slot.input),
                arena.get(slot.output_errors),
                &mut slot.scratch,
                &mut weights[idx],
                &speeds[idx],
                &ctx,
                replicas,
                (idx == 0).then_some(entry),
            )?;
        }

        Ok(())
    }
}
