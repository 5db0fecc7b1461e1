// id.rs — Element identifiers and synthetic element names
//
// `ElementId` is an index into the router's element list. It is only valid
// until the next `remove_dead_elements`, which renumbers survivors.

use crate::router::Router;

/// Index of an element within a router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElementId(pub u32);

impl ElementId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Mints element names `<prefix><n>` that are not already taken in a router.
///
/// Suffixes increase monotonically across calls, so names stay unique even
/// when minted names have not been added to the router yet.
#[derive(Debug)]
pub struct NameAllocator {
    prefix: &'static str,
    next: usize,
}

impl NameAllocator {
    pub fn new(prefix: &'static str, first: usize) -> Self {
        Self {
            prefix,
            next: first,
        }
    }

    pub fn mint(&mut self, router: &Router) -> String {
        loop {
            let name = format!("{}{}", self.prefix, self.next);
            self.next += 1;
            if router.eindex(&name).is_none() {
                return name;
            }
        }
    }
}
