use thiserror::Error;

#[derive(Debug, Error)]
pub enum PBFError {
    /// Spawning or injecting would push the active count past the fixed capacity.
    #[error("particle capacity exceeded: requested {requested}, only {available} slots free")]
    CapacityExceeded { requested: usize, available: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid time step: {0}")]
    InvalidTimeStep(f32),

    #[error("mesh has no non-degenerate triangles")]
    EmptyMesh,

    #[error("mesh index {index} out of range for {vertex_count} vertices")]
    InvalidMeshIndex { index: u32, vertex_count: usize },

    #[error("malformed configuration document: {0}")]
    Config(#[from] serde_json::Error),
}
