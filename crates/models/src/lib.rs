//! Burn models for differentiable architecture search with a taught student.
//!
//! - `SearchNetwork`: stacked DARTS search cells whose edges mix every
//!   candidate operation, weighted by the softmax of `ArchParams`.
//! - `ArchParams`: the continuous architecture (alphas), kept as a separate
//!   module so it gets its own optimizer.
//! - `Genotype`: the discrete cell derived from the alphas.
//! - `ResNet`: the student network taught by the search network.

pub mod arch;
pub mod cell;
pub mod genotype;
pub mod network;
pub mod operations;
pub mod resnet;

pub use arch::{num_edges, ArchParams};
pub use cell::{CellShape, SearchCell};
pub use genotype::{Gene, Genotype};
pub use network::{SearchNetwork, SearchNetworkConfig};
pub use operations::{MixedOp, NUM_OPS, PRIMITIVES};
pub use resnet::{BasicBlock, ResNet, ResNetConfig};

pub mod prelude {
    pub use super::{
        ArchParams, Genotype, ResNet, ResNetConfig, SearchNetwork, SearchNetworkConfig,
    };
}
