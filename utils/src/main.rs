mod graph;
mod train;

use structopt::StructOpt;

#[derive(StructOpt)]
pub enum Options {
    Train(train::TrainOptions),
    Graph(graph::GraphOptions),
}

fn main() -> anyhow::Result<()> {
    match Options::from_args() {
        Options::Train(options) => options.run(),
        Options::Graph(options) => options.run(),
    }
}
