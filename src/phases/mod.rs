pub mod phase1;
pub mod phase2;
pub mod phase3;

pub use phase1::Phase1Pipeline;
pub use phase2::{merge_layers, MergedLayers, Phase2Pipeline};
pub use phase3::Phase3Pipeline;
