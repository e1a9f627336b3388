//! `TethysAllocator`: the list-to-bucket assignment algorithm built on top
//! of `AllocationGraph`. Each list hashes onto a `(start, end)` vertex pair
//! — `h0 mod half` and `half + h1 mod (table_size - half)` — and the
//! allocator decides how much of the list lands at each vertex versus a
//! stash, via max-flow balancing followed by a deterministic overflow pass.

use std::collections::HashMap;

use crate::error::{Result, SseError};
use crate::tethys::graph::AllocationGraph;

/// `2 * ceil((1 + epsilon) * n_buckets)`, `n_buckets = ceil(n_elements / page_size)`.
pub fn graph_size(n_elements: u64, page_size: u64, epsilon: f64) -> u64 {
    let n_buckets = n_elements.div_ceil(page_size.max(1));
    let scaled = (1.0 + epsilon) * n_buckets as f64;
    2 * scaled.ceil() as u64
}

/// One inserted list's placement after `allocate()`: how many of its items
/// live at the start vertex, the end vertex, and (if any) the stash.
#[derive(Clone, Copy, Debug)]
pub struct Placement {
    pub start_vertex: usize,
    pub end_vertex: usize,
    pub at_start: u64,
    pub at_end: u64,
    pub stashed: u64,
}

pub struct TethysAllocator {
    graph: AllocationGraph,
    page_size: u64,
    half: u64,
    remaining: u64,
    allocated: bool,
    edge_of_index: HashMap<usize, usize>,
    stash_clip: HashMap<usize, u64>,
}

impl TethysAllocator {
    pub fn new(table_size: u64, page_size: u64) -> Result<Self> {
        if table_size == 0 {
            return Err(SseError::OutOfRange("allocator table size must be non-zero".into()));
        }
        let half = table_size / 2;
        let remaining = table_size - half;
        Ok(Self {
            graph: AllocationGraph::new(table_size as usize)?,
            page_size,
            half,
            remaining,
            allocated: false,
            edge_of_index: HashMap::new(),
            stash_clip: HashMap::new(),
        })
    }

    /// Insert one `(key, list)` pair, identified by its two hash halves
    /// `(h0, h1)` and its `list_length` (must not exceed `page_size`).
    /// `index` is the caller's opaque handle for retrieving this list's
    /// placement after `allocate()`.
    pub fn insert(&mut self, h0: u64, h1: u64, list_length: u64, index: usize) -> Result<()> {
        if self.allocated {
            return Err(SseError::InvalidState("allocator has already run allocate()".into()));
        }
        if list_length > self.page_size {
            return Err(SseError::OutOfRange(format!(
                "list length {list_length} exceeds page size {}",
                self.page_size
            )));
        }

        let a = (h0 % self.half) as usize;
        let b = (self.half + h1 % self.remaining) as usize;
        let edge_idx = self.graph.add_edge(index, list_length, a, b)?;
        self.edge_of_index.insert(index, edge_idx);
        Ok(())
    }

    /// Run the max-flow allocation and the deterministic overflow pass.
    pub fn allocate(&mut self) -> Result<()> {
        if self.allocated {
            return Err(SseError::InvalidState("allocator has already run allocate()".into()));
        }
        self.graph.compute_residual_maxflow(self.page_size)?;
        let stashed = self.graph.overflow_pass(self.page_size);
        for (edge_idx, clipped) in stashed {
            self.stash_clip.insert(edge_idx, clipped);
        }
        self.allocated = true;
        Ok(())
    }

    pub fn graph(&self) -> &AllocationGraph {
        &self.graph
    }

    /// The placement of the list inserted under `index`, after `allocate()`.
    pub fn placement(&self, index: usize) -> Result<Placement> {
        if !self.allocated {
            return Err(SseError::InvalidState("allocate() has not been run yet".into()));
        }
        let &edge_idx = self
            .edge_of_index
            .get(&index)
            .ok_or_else(|| SseError::OutOfRange(format!("no list was inserted under index {index}")))?;
        let edge = self.graph.edge(edge_idx);
        let (start_vertex, end_vertex) = match (edge.start, edge.end) {
            (crate::tethys::graph::VertexPtr::Node(s), crate::tethys::graph::VertexPtr::Node(e)) => (s, e),
            _ => unreachable!("list edges always connect two graph nodes"),
        };
        Ok(Placement {
            start_vertex,
            end_vertex,
            at_start: edge.flow,
            at_end: edge.rec_flow,
            stashed: *self.stash_clip.get(&edge_idx).unwrap_or(&0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn graph_size_scales_with_epsilon() {
        assert_eq!(graph_size(100, 10, 0.0), 20);
        assert!(graph_size(100, 10, 0.25) >= 20);
    }

    #[test]
    fn single_list_is_never_stashed() {
        let mut a = TethysAllocator::new(8, 10).unwrap();
        a.insert(0, 0, 5, 0).unwrap();
        a.allocate().unwrap();
        let p = a.placement(0).unwrap();
        assert_eq!(p.at_start + p.at_end + p.stashed, 5);
        assert_eq!(p.stashed, 0);
    }

    #[test]
    fn double_allocate_fails() {
        let mut a = TethysAllocator::new(8, 10).unwrap();
        a.insert(0, 0, 5, 0).unwrap();
        a.allocate().unwrap();
        assert!(a.allocate().is_err());
    }

    #[test]
    fn placement_before_allocate_fails() {
        let mut a = TethysAllocator::new(8, 10).unwrap();
        a.insert(0, 0, 5, 0).unwrap();
        assert!(a.placement(0).is_err());
    }

    #[test]
    fn overloaded_shared_bucket_produces_stash() {
        // seven lists of length 450 sharing one bucket pair, page_size 512:
        // far more than two buckets (1024) can hold, guaranteeing overflow.
        let mut a = TethysAllocator::new(8, 512).unwrap();
        for i in 0..7usize {
            // h0 % half and h1 % remaining both 0 force every list onto the
            // same (start, end) vertex pair.
            a.insert(0, 0, 450, i).unwrap();
        }
        a.allocate().unwrap();
        let mut total_stashed = 0u64;
        let mut total_placed = 0u64;
        for i in 0..7usize {
            let p = a.placement(i).unwrap();
            assert_eq!(p.at_start + p.at_end + p.stashed, 450);
            total_stashed += p.stashed;
            total_placed += p.at_start + p.at_end;
        }
        assert!(total_stashed > 0);
        assert_eq!(total_placed + total_stashed, 7 * 450);
        assert!(total_placed <= 2 * 512);
    }
}
