use thiserror::Error;

/// Invalid configuration, detected before any index state is built.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("particle count {len} is not a power of two")]
    NotPowerOfTwo { len: usize },
    #[error("particle count {len} is below the sort block size {block_size}")]
    BelowBlockSize { len: usize, block_size: usize },
    #[error("particle count {len} exceeds the sort network capacity {max} (block size squared)")]
    ExceedsNetworkCapacity { len: usize, max: usize },
    #[error("sort block size {block_size} must be a power of two and at least 2")]
    InvalidBlockSize { block_size: usize },
    #[error("bucket count on axis {axis} must be at least 1")]
    ZeroBuckets { axis: usize },
    #[error("boundary on axis {axis} is degenerate: min {min}, max {max}")]
    DegenerateBoundary { axis: usize, min: f64, max: f64 },
    #[error("radius must be finite and non-negative, got {radius}")]
    InvalidRadius { radius: f64 },
    #[error("tree node capacity must be at least 1")]
    ZeroCapacity,
    #[error("the quadtree backend needs a two-dimensional grid configuration")]
    TreeRequiresPlanar,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum IndexError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("no index has been built yet; call rebuild first")]
    NotBuilt,
    #[error("particle {index} out of range for {len} particles")]
    ParticleOutOfRange { index: usize, len: usize },
    #[error("payload length {found} does not match particle count {expected}")]
    PayloadLength { expected: usize, found: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_converts() {
        let err: IndexError = ConfigError::ZeroCapacity.into();
        assert_eq!(err, IndexError::Config(ConfigError::ZeroCapacity));
        assert_eq!(err.to_string(), "tree node capacity must be at least 1");
    }

    #[test]
    fn test_messages_carry_values() {
        let err = ConfigError::BelowBlockSize {
            len: 300,
            block_size: 512,
        };
        assert!(err.to_string().contains("300"));
        assert!(err.to_string().contains("512"));
    }
}
