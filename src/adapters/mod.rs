// Adapters - MediaRuntime implementations

#[cfg(feature = "libav")]
pub mod libav;
pub mod synthetic;

// Re-export adapters
#[cfg(feature = "libav")]
pub use libav::LibavRuntime;
pub use synthetic::{SyntheticRuntime, SyntheticSource};
