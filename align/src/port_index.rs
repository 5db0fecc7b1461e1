// port_index.rs — Flat per-port numbering of a router
//
// Maps (element, local port) to a global slot in the flat input and output
// alignment arrays. Offsets are prefix sums of the per-element port counts,
// so they are monotonically non-decreasing and the final offset equals the
// total port count. Any topology change invalidates the index; rebuild it.

use std::ops::Range;

use crate::id::ElementId;
use crate::router::{Port, Router};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortIndex {
    icount: Vec<usize>,
    ocount: Vec<usize>,
    /// `ioffset[e]..ioffset[e + 1]` are element e's input slots.
    ioffset: Vec<usize>,
    ooffset: Vec<usize>,
}

impl PortIndex {
    pub fn build(router: &Router) -> Self {
        let (icount, ocount) = router.port_counts();
        let ioffset = prefix_sums(&icount);
        let ooffset = prefix_sums(&ocount);
        PortIndex {
            icount,
            ocount,
            ioffset,
            ooffset,
        }
    }

    pub fn ninputs(&self, e: ElementId) -> usize {
        self.icount[e.index()]
    }

    pub fn noutputs(&self, e: ElementId) -> usize {
        self.ocount[e.index()]
    }

    pub fn total_inputs(&self) -> usize {
        self.ioffset[self.icount.len()]
    }

    pub fn total_outputs(&self) -> usize {
        self.ooffset[self.ocount.len()]
    }

    pub fn input_range(&self, e: ElementId) -> Range<usize> {
        self.ioffset[e.index()]..self.ioffset[e.index() + 1]
    }

    pub fn output_range(&self, e: ElementId) -> Range<usize> {
        self.ooffset[e.index()]..self.ooffset[e.index() + 1]
    }

    pub fn input(&self, port: Port) -> usize {
        self.ioffset[port.element.index()] + port.port
    }

    pub fn output(&self, port: Port) -> usize {
        self.ooffset[port.element.index()] + port.port
    }

    /// Inverse of `input`.
    pub fn input_port(&self, slot: usize) -> Option<Port> {
        locate(&self.ioffset, slot)
    }
}

fn prefix_sums(counts: &[usize]) -> Vec<usize> {
    let mut offsets = Vec::with_capacity(counts.len() + 1);
    let mut total = 0;
    offsets.push(0);
    for c in counts {
        total += c;
        offsets.push(total);
    }
    offsets
}

fn locate(offsets: &[usize], slot: usize) -> Option<Port> {
    let total = *offsets.last()?;
    if slot >= total {
        return None;
    }
    // First element whose range ends past `slot`.
    let e = offsets[1..].partition_point(|&end| end <= slot);
    Some(Port::new(ElementId(e as u32), slot - offsets[e]))
}
