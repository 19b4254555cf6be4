//! FELS Core - Finite Element Linear System layer
//!
//! Storage, reordering and constraint enforcement for the global system
//! `K·u = f` of an incremental finite element solver:
//! - Four matrix layouts (full, general band, symmetric band, symmetric packed)
//! - Reverse Cuthill–McKee DOF reordering to shrink the band
//! - Penalty enforcement of single-point, prescribed and tie constraints
//! - Direct solves with multiple right-hand sides in parallel using Rayon
//!
//! # Architecture
//!
//! The layer is designed around these core abstractions:
//!
//! - [`MatrixStorage`] trait: Checked element access, products and solves for every layout
//! - [`GlobalMatrix`]: Closed set of layouts chosen per topology
//! - [`DofGraph`] and [`Permutation`]: Adjacency and bandwidth-reducing renumbering
//! - [`PenaltyApplier`]: Constraint enforcement against a [`DofRegistry`]
//! - [`GlobalSystem`]: Matrix and right-hand side for one solution pass

pub mod layout;
pub mod reorder;
pub mod dof;
pub mod penalty;
pub mod assembly;
pub mod solver;
pub mod error;

pub use layout::{Bandwidth, GlobalMatrix, LayoutKind, MatrixStorage, StorageScheme};
pub use reorder::{reorder, reverse_cuthill_mckee, DofGraph, Permutation, Reordering};
pub use dof::{DofRegistry, NodeDofTable};
pub use penalty::{
    Constraint, ConstraintContext, ConstraintReport, ConstraintSets, PenaltyApplier, PenaltyConfig,
    PenaltyPolicy,
};
pub use assembly::{plan_topology, AssemblyOptions, GlobalSystem, TopologyPlan};
pub use solver::SolveStats;
pub use error::{Error, Result};
