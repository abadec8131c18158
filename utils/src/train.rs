use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::PathBuf,
    time::Instant,
};

use anyhow::{bail, Context};
use rand::Rng;
use structopt::StructOpt;

use layerchain::{
    layers::{AbsoluteLayer, FullyConnectedLayer, HyperbolicTangentLayer, RectifiedLinearLayer, SoftmaxLayer},
    logger::{ansi, set_cbcs},
    rng, DropoutSettings, InMemorySupervisedDataReader, LayerRegistry, NetworkSchema, NetworkUpdater,
    RunningConfiguration, Shape,
};

const RANDOM_TABLE_SIZE: usize = 1 << 16;

#[derive(StructOpt)]
pub struct TrainOptions {
    /// Layers after the input, e.g. `fc:16,tanh,fc:1`.
    #[structopt(short, long, default_value = "fc:16,tanh,fc:1")]
    pub topology: String,
    #[structopt(short, long, default_value = "8")]
    pub inputs: usize,
    /// One replica is trained per learning rate.
    #[structopt(short, long, default_value = "0.01", use_delimiter = true)]
    pub rates: Vec<f32>,
    #[structopt(short, long, default_value = "4096")]
    pub entries: usize,
    #[structopt(long, default_value = "10")]
    pub epochs: usize,
    /// `layer:rate` pairs.
    #[structopt(long, use_delimiter = true)]
    pub dropout: Vec<String>,
    #[structopt(long, default_value = "1")]
    pub threads: usize,
    #[structopt(long, default_value = "0")]
    pub seed: u64,
    /// Directory receiving one loss log per replica.
    #[structopt(short, long, parse(from_os_str))]
    pub log_dir: Option<PathBuf>,
    #[structopt(long)]
    pub cbcs: bool,
}

impl TrainOptions {
    pub fn run(&self) -> anyhow::Result<()> {
        set_cbcs(self.cbcs);

        let (schema, outputs) = parse_topology(&self.topology, self.inputs)?;
        let dropout = self.dropout_settings()?;
        let mut rng = rng::seeded(self.seed);

        let config = RunningConfiguration::default().with_threads(self.threads).with_log_progress(false);
        config.display();
        println!("Architecture           : {}", ansi(&schema, 31));
        println!("Replicas               : {}", ansi(self.rates.len(), 31));

        let mut reader = synthesise(self.inputs, outputs, self.entries, &mut rng);

        let mut data = (0..self.rates.len())
            .map(|_| {
                let mut data = schema.create_network_data();
                schema.randomize_data(&mut data, &mut rng);
                data
            })
            .collect::<Vec<_>>();
        let speeds = data.iter().zip(&self.rates).map(|(d, &rate)| d.filled_like(rate)).collect::<Vec<_>>();

        let mut updater = NetworkUpdater::new(schema, None, config, &LayerRegistry::default())
            .with_context(|| "Invalid topology.")?
            .with_seed(self.seed);

        let mut logs = self.open_logs()?;
        let timer = Instant::now();

        for epoch in 1..=self.epochs {
            reader.shuffle(&mut rng);
            let results = updater.update(&mut reader, &speeds, &mut data, &dropout)?;

            for (replica, result) in results.iter().enumerate() {
                println!(
                    "epoch {} | replica {} | rate {} | mse {} | time {}s",
                    ansi(epoch, 35),
                    ansi(replica, 35),
                    ansi(self.rates[replica], 35),
                    ansi(format!("{:.6}", result.mse()), 35),
                    ansi(format!("{:.2}", timer.elapsed().as_secs_f32()), 35),
                );

                if let Some(log) = logs.get_mut(replica) {
                    writeln!(log, "epoch {epoch} mse {}", result.mse())?;
                }
            }
        }

        for log in &mut logs {
            log.flush()?;
        }

        Ok(())
    }

    fn dropout_settings(&self) -> anyhow::Result<DropoutSettings> {
        let table = rng::random_uniform_list(&mut rng::seeded(self.seed ^ 0x5eed), RANDOM_TABLE_SIZE);
        let mut settings = DropoutSettings::new(table);

        for pair in &self.dropout {
            let (layer, rate) = pair.split_once(':').with_context(|| format!("Expected layer:rate, got {pair}"))?;
            let layer = layer.parse().with_context(|| format!("Invalid layer index in {pair}"))?;
            let rate = rate.parse().with_context(|| format!("Invalid dropout rate in {pair}"))?;
            settings = settings.with_rate(layer, rate);
        }

        Ok(settings)
    }

    fn open_logs(&self) -> anyhow::Result<Vec<BufWriter<File>>> {
        let Some(dir) = &self.log_dir else {
            return Ok(Vec::new());
        };

        fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;

        (0..self.rates.len())
            .map(|replica| {
                let path = dir.join(format!("replica-{replica}.txt"));
                let file = File::create(&path).with_context(|| format!("Failed to create {}", path.display()))?;
                Ok(BufWriter::new(file))
            })
            .collect()
    }
}

/// Builds a schema from comma separated layers, returning it with its
/// output neuron count.
fn parse_topology(topology: &str, inputs: usize) -> anyhow::Result<(NetworkSchema, usize)> {
    let mut schema = NetworkSchema::default();
    let mut neurons = inputs;

    for token in topology.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        let mut parts = token.split(':');
        let name = parts.next().unwrap_or_default();
        let args = parts.collect::<Vec<_>>();

        schema = match (name, args.as_slice()) {
            ("fc", &[size]) => {
                let size = size
                    .parse::<usize>()
                    .ok()
                    .filter(|&size| size > 0)
                    .with_context(|| format!("Layer size must be a positive integer in {token}"))?;
                let layer = FullyConnectedLayer::new(neurons, size);
                neurons = layer.output_neuron_count;
                schema.add_layer(layer)
            }
            ("tanh", &[]) => schema.add_layer(HyperbolicTangentLayer::default()),
            ("tanh", &[scale, steepness]) => {
                let scale = scale.parse().with_context(|| format!("Invalid scale in {token}"))?;
                let steepness = steepness.parse().with_context(|| format!("Invalid steepness in {token}"))?;
                schema.add_layer(HyperbolicTangentLayer::new(scale, steepness))
            }
            ("relu", &[]) => schema.add_layer(RectifiedLinearLayer),
            ("abs", &[]) => schema.add_layer(AbsoluteLayer),
            ("softmax", &[]) => schema.add_layer(SoftmaxLayer),
            _ => bail!("Unknown layer {token}"),
        };
    }

    Ok((schema, neurons))
}

/// Entries whose targets come from a fixed random linear map of the inputs
/// squashed with `tanh`.
fn synthesise(inputs: usize, outputs: usize, entries: usize, rng: &mut impl Rng) -> InMemorySupervisedDataReader {
    let map = rng::vec_f32(rng, inputs * outputs, 0.0, 1.0, true);
    let mut reader = InMemorySupervisedDataReader::new(Shape::flat(inputs), Shape::flat(outputs));

    for _ in 0..entries {
        let raw = (0..inputs).map(|_| rng.gen::<u8>()).collect::<Vec<_>>();
        let target = map
            .chunks(inputs.max(1))
            .take(outputs)
            .map(|row| row.iter().zip(&raw).map(|(w, &x)| w * (f32::from(x) / 255.0 - 0.5)).sum::<f32>().tanh())
            .collect();

        reader.push(raw, target);
    }

    reader
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topology_parsing() {
        let (schema, outputs) = parse_topology("fc:16, tanh, fc:4,relu,fc:2,softmax", 8).unwrap();
        assert_eq!(schema.len(), 6);
        assert_eq!(outputs, 2);
        assert_eq!(
            schema.to_string(),
            "fully_connected -> hyperbolic_tangent -> fully_connected -> rectified_linear -> fully_connected -> softmax"
        );

        assert!(parse_topology("conv:3", 8).is_err());
        assert!(parse_topology("fc:x", 8).is_err());
    }

    #[test]
    fn layer_sizes_must_be_positive_integers() {
        for topology in ["fc:-3", "fc:1.5", "fc:0", "fc:4,fc:"] {
            assert!(parse_topology(topology, 8).is_err(), "{topology} was accepted");
        }

        let (_, outputs) = parse_topology("fc:3,tanh:1.7159:0.6666", 8).unwrap();
        assert_eq!(outputs, 3);
        assert!(parse_topology("tanh:a:1", 8).is_err());
    }
}
