//! drydock pipeline model
//!
//! The parsed form of a build pipeline as consumed by the job runner:
//! - `Tree`: immutable root handle shared across a build job
//! - `Node`: closed union of list nodes and typed step nodes
//! - `NodeType` / `NodeTypes`: step categories and the selector set used to
//!   restrict which categories execute in a run
//!
//! Parsing pipeline syntax into this model happens elsewhere; trees can be
//! loaded from their JSON representation for workers and tests.

pub mod error;
pub mod node;

pub use error::{PipelineError, Result};
pub use node::{ListNode, Node, NodeType, NodeTypes, StepNode, Tree};
