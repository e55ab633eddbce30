pub mod budget;
pub mod debounce;
pub mod generation;
pub mod metrics;

pub use budget::*;
pub use debounce::*;
pub use generation::*;
pub use metrics::*;
