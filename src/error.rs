use std::io;

use crate::network::LayerType;

/// Problems with the way an update was set up. These are always reported before
/// any weight is touched.
#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error("no network replicas were supplied")]
    NoReplicas,
    #[error("{data} weight sets were supplied with {training_speed} training speed sets")]
    ReplicaCountMismatch { data: usize, training_speed: usize },
    #[error("replica {replica} has {actual} layers, schema has {expected}")]
    LayerCountMismatch { replica: usize, expected: usize, actual: usize },
    #[error("replica {replica}, layer {layer}: expected tensor sizes {expected:?}, got {actual:?}")]
    LayerDataMismatch { replica: usize, layer: usize, expected: Vec<usize>, actual: Vec<usize> },
    #[error("unable to apply dropout to layer {layer}, dropout starts at layer {min_layer}")]
    DropoutOnSharedLayer { layer: usize, min_layer: usize },
    #[error("unable to apply dropout to layer {layer}, network has {layer_count} layers")]
    DropoutLayerOutOfRange { layer: usize, layer_count: usize },
    #[error("dropout rate {rate} for layer {layer} is outside [0, 1]")]
    InvalidDropoutRate { layer: usize, rate: f32 },
    #[error("random uniform table length {0} is not a power of two")]
    RandomTableNotPowerOfTwo(usize),
    #[error("reader output has {actual} neurons, network produces {expected}")]
    OutputShapeMismatch { expected: usize, actual: usize },
    #[error("network has no layer with trainable weights")]
    NoTrainableLayers,
    #[error("scale parameters cover {actual} feature maps, input has {expected}")]
    ScaleParamsMismatch { expected: usize, actual: usize },
    #[error("layer {layer} ({layer_type}) owns weights but backprops in place")]
    InPlaceTrainableLayer { layer: usize, layer_type: LayerType },
    #[error("layer {layer} ({layer_type}) rejects input: {reason}")]
    IncompatibleLayerInput { layer: usize, layer_type: LayerType, reason: String },
    #[error("input configuration has not been set")]
    InputConfigurationNotSet,
    #[error("no layer implementation registered for {0}")]
    UnknownLayerType(LayerType),
    #[error("{0} has no tester and cannot be part of the shared prefix")]
    MissingTester(LayerType),
}

#[derive(Debug, thiserror::Error)]
pub enum UpdaterError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error("failed to read training data: {0}")]
    Io(#[from] io::Error),
    #[error("buffer {buffer} is borrowed for reading and writing at once")]
    BufferAliasing { buffer: usize },
    #[error("dropout replay mismatch: expected layer {expected:?}, got layer {actual}")]
    DropoutReplay { expected: Option<usize>, actual: usize },
    #[error("dropout replay stack still holds {0} offsets after backward pass")]
    DropoutReplayNotDrained(usize),
    #[error("{layer_type}: {reason}")]
    LayerShape { layer_type: LayerType, reason: String },
}

pub type UpdaterResult<T> = Result<T, UpdaterError>;
