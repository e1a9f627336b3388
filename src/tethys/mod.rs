//! The Tethys static encrypted multi-map: the bipartite allocation graph,
//! the list-to-bucket allocator built on it, the page wire format, and the
//! builder/reader pair that compose them into a store.

pub mod allocator;
pub mod encode;
pub mod graph;
pub mod store;

pub use allocator::{graph_size, Placement, TethysAllocator};
pub use encode::{EncodeSeparate, EncryptEncoder};
pub use graph::AllocationGraph;
pub use store::{TethysLayout, TethysStore, TethysStoreBuilder};
