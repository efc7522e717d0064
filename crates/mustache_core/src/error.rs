use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OverlayError {
    #[error("feature '{feature}' references vertex {index} but the geometry has {vertex_count} vertices")]
    VertexOutOfRange {
        feature: String,
        index: u32,
        vertex_count: usize,
    },
    #[error("feature '{feature}' has {variant_count} variants, index {index} is out of range")]
    VariantOutOfRange {
        feature: String,
        index: usize,
        variant_count: usize,
    },
    #[error("no feature at position {0}")]
    UnknownFeature(usize),
    #[error("invalid feature '{feature}': {reason}")]
    InvalidFeature {
        feature: String,
        reason: &'static str,
    },
    #[error("failed to parse feature map: {0}")]
    Parse(String),
}
