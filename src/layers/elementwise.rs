use crate::config::RunningConfiguration;

/// `output[e][i] = f(e, i, input[e'][i])` where `e'` is `single_entry` when
/// given and `e` otherwise.
pub(super) fn forward<F>(
    config: &RunningConfiguration,
    input: &[f32],
    output: &mut [f32],
    neuron_count: usize,
    entry_count: usize,
    single_entry: Option<usize>,
    f: F,
) where
    F: Fn(usize, usize, f32) -> f32 + Sync,
{
    if neuron_count == 0 {
        return;
    }

    let mut entries = output.chunks_mut(neuron_count).take(entry_count).collect::<Vec<_>>();

    config.split_workload_mut(&mut entries, |entry, out| {
        let src = single_entry.unwrap_or(entry) * neuron_count;
        let inp = &input[src..src + neuron_count];

        for (i, (y, &x)) in out.iter_mut().zip(inp).enumerate() {
            *y = f(entry, i, x);
        }
    });
}

/// Multiplies errors in place by the derivative `prime(flat_index, output)`.
pub(super) fn backprop_in_place<F>(
    config: &RunningConfiguration,
    errors: &mut [f32],
    output_neurons: &[f32],
    neuron_count: usize,
    entry_count: usize,
    prime: F,
) where
    F: Fn(usize, f32) -> f32 + Sync,
{
    if neuron_count == 0 {
        return;
    }

    let mut entries = errors.chunks_mut(neuron_count).take(entry_count).collect::<Vec<_>>();

    config.split_workload_mut(&mut entries, |entry, errs| {
        let start = entry * neuron_count;
        let outs = &output_neurons[start..start + neuron_count];

        for (i, (e, &y)) in errs.iter_mut().zip(outs).enumerate() {
            *e *= prime(start + i, y);
        }
    });
}
