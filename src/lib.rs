pub mod buffer;
pub mod config;
pub mod data;
pub mod error;
pub mod layers;
pub mod logger;
pub mod network;
pub mod rng;
pub mod shape;
pub mod updater;

pub use config::RunningConfiguration;
pub use data::{DataScaleParams, InMemorySupervisedDataReader, SupervisedDataReader};
pub use error::{ConfigurationError, UpdaterError, UpdaterResult};
pub use layers::LayerRegistry;
pub use network::{Layer, LayerData, LayerType, NetworkData, NetworkSchema};
pub use shape::Shape;
pub use updater::{DropoutSettings, NetworkUpdater, TestingResult};
