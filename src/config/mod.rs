mod settings;

pub use settings::{Config, DEFAULT_POOL_SIZE_PER_CPU};
