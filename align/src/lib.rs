// calign — Alignment enforcer for dataflow routers
//
// Library root. Leaves first: the lattice and flow codes, the router and
// element map collaborators, aligners and their registry, then the analysis
// engine and the rewrite driver built on top of them.

pub mod aligner;
pub mod alignment;
pub mod diag;
pub mod dot;
pub mod elementmap;
pub mod flow;
pub mod flow_code;
pub mod id;
pub mod pass;
pub mod port_index;
pub mod registry;
pub mod rewrite;
pub mod router;
