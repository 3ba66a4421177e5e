pub mod builder;
pub mod operation;

pub use builder::DecodeGraph;
pub use operation::{Activation, Bound, Energy, Footprint, OpKind, OpName, Operation, Stage};
