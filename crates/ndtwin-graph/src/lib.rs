//! The Graph Store: an annotated directed multigraph of switches and
//! hosts, with side-indexed lookup and a single readers-writer lock.

pub mod edge;
pub mod store;
pub mod vertex;

pub use edge::{Edge, EdgeHandle};
pub use store::{GraphReadGuard, GraphSnapshot, GraphStore};
pub use vertex::{EcmpGroup, EcmpMember, Vertex, VertexHandle, VertexKind};
