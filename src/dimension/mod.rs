pub mod projection;
mod service;

pub use projection::{l2_norm, l2_normalize, scale_embedding};
pub use service::{AdaptMethod, AdaptResult, DimensionAction, DimensionService};
