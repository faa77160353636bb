//! Core graph data structures

mod builder;
mod edge;
mod node;
mod pair;


pub use builder::{CandidateGraph, GraphBuilder, RetrievalError, DEFAULT_TOP_K};
pub use edge::Edge;
pub use node::{Entity, NodeIndex, NO_PARTNER};
pub use pair::{CanonicalPair, ForbiddenSet};
