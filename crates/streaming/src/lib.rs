//! Viewport-driven flow synchronization: plans bbox queries from the map
//! viewport, debounces them, discards superseded responses and merges live
//! flow values into a render surface in bounded slices.

pub mod applier;
pub mod category;
pub mod config;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod planner;
pub mod protocol;
pub mod refresh;
pub mod source;
pub mod surface;
pub mod viewport;

pub use applier::*;
pub use category::*;
pub use config::*;
pub use coordinator::*;
pub use engine::*;
pub use error::*;
pub use planner::*;
pub use protocol::*;
pub use refresh::*;
pub use source::*;
pub use surface::*;
pub use viewport::*;
