use std::num::NonZeroUsize;

/// In-process tunables for the resolver. No environment variables or
/// config files are read at this layer — this is a plain value a caller
/// constructs and passes in.
#[derive(Debug, Clone, Copy)]
pub struct ResolverConfig {
    /// Maximum number of decoded object bodies kept in the LRU cache.
    pub body_cache_capacity: NonZeroUsize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        ResolverConfig {
            body_cache_capacity: NonZeroUsize::new(1000).unwrap(),
        }
    }
}
