#![recursion_limit = "256"]

pub mod architect;
pub mod checkpoint;
pub mod clip;
pub mod config;
pub mod experiment;
pub mod loss;
pub mod meter;
pub mod optim;
pub mod param_vector;
pub mod schedule;
pub mod search;
pub mod util;

pub use architect::{Architect, ArchitectConfig, ArchStepStats, TeachingBatches};
pub use config::{SearchConfig, SearchConfigFile};
pub use models::{ArchParams, Genotype, ResNet, ResNetConfig, SearchNetwork, SearchNetworkConfig};
pub use search::{run_search, run_search_on, EpochStats, SearchData, SearchOutcome, Searcher};
pub use util::{run_search_cli, SearchArgs};
/// Backend alias for search/eval (NdArray by default; WGPU if enabled).
#[cfg(feature = "backend-wgpu")]
pub type TrainBackend = burn_wgpu::Wgpu<f32>;
#[cfg(not(feature = "backend-wgpu"))]
pub type TrainBackend = burn_ndarray::NdArray<f32>;
