//! Property-based tests for storage layouts, reordering and penalties.
//!
//! Run with: cargo test -p fels-core -- proptest

use approx::assert_relative_eq;
use fels_core::layout::{Bandwidth, GlobalMatrix, LayoutKind, MatrixStorage};
use fels_core::penalty::{ConstraintSets, PenaltyApplier, PenaltyConfig};
use fels_core::reorder::{reorder, reverse_cuthill_mckee, DofGraph};
use nalgebra::DMatrix;
use proptest::prelude::*;
use std::collections::HashSet;

// =============================================================================
// Strategies
// =============================================================================

const ALL_LAYOUTS: [LayoutKind; 4] = [
    LayoutKind::Full,
    LayoutKind::Band,
    LayoutKind::SymBand,
    LayoutKind::SymPack,
];

fn arb_layout() -> impl Strategy<Value = LayoutKind> {
    prop::sample::select(ALL_LAYOUTS.to_vec())
}

/// Size with a bandwidth that fits it.
fn arb_shape() -> impl Strategy<Value = (usize, Bandwidth)> {
    (1usize..12).prop_flat_map(|n| {
        (Just(n), 0..n, 0..n).prop_map(|(n, kl, ku)| (n, Bandwidth::new(kl, ku)))
    })
}

/// Random graph given as element incidence over `n` DOFs.
fn arb_incidence() -> impl Strategy<Value = (usize, Vec<Vec<usize>>)> {
    (1usize..30).prop_flat_map(|n| {
        let element = prop::collection::vec(0..n, 1..4);
        (Just(n), prop::collection::vec(element, 0..40))
    })
}

/// Symmetric, strictly diagonally dominant tridiagonal entries.
fn arb_tridiagonal(n: usize) -> impl Strategy<Value = (Vec<f64>, Vec<f64>)> {
    (
        prop::collection::vec(5.0..10.0f64, n),
        prop::collection::vec(-2.0..2.0f64, n - 1),
    )
}

fn in_envelope(kind: LayoutKind, bw: Bandwidth, r: usize, c: usize) -> bool {
    match kind {
        LayoutKind::Full | LayoutKind::SymPack => true,
        LayoutKind::Band => r + bw.upper >= c && r <= c + bw.lower,
        LayoutKind::SymBand => r.abs_diff(c) <= bw.max(),
    }
}

fn tridiagonal(kind: LayoutKind, diag: &[f64], off: &[f64]) -> GlobalMatrix {
    let n = diag.len();
    let mut m = GlobalMatrix::allocate(kind, n, Bandwidth::symmetric(1));
    for i in 0..n {
        m.set(i, i, diag[i]).unwrap();
    }
    for (i, &v) in off.iter().enumerate() {
        m.set(i, i + 1, v).unwrap();
        if !kind.is_symmetric() {
            m.set(i + 1, i, v).unwrap();
        }
    }
    m
}

// =============================================================================
// Layout invariants
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Offsets of distinct canonical cells never collide and stay in the buffer.
    #[test]
    fn proptest_offsets_are_injective(kind in arb_layout(), (n, bw) in arb_shape()) {
        let bw = match kind {
            LayoutKind::Full | LayoutKind::SymPack => Bandwidth::full(n),
            LayoutKind::SymBand => Bandwidth::symmetric(bw.max()),
            LayoutKind::Band => bw,
        };
        let m = GlobalMatrix::allocate(kind, n, bw);
        let mut seen = HashSet::new();
        for c in 0..n {
            for r in 0..n {
                if kind.is_symmetric() && r > c {
                    continue;
                }
                match m.offset(r, c) {
                    Ok(k) => {
                        prop_assert!(in_envelope(kind, bw, r, c));
                        prop_assert!(k < m.elem_count());
                        prop_assert!(seen.insert(k), "offset {} reused at ({}, {})", k, r, c);
                    }
                    Err(_) => prop_assert!(!in_envelope(kind, bw, r, c)),
                }
            }
        }
        if matches!(kind, LayoutKind::Full | LayoutKind::SymPack) {
            prop_assert_eq!(seen.len(), m.elem_count());
        }
    }

    /// Writes through either coordinate of a symmetric layout land in one cell.
    #[test]
    fn proptest_symmetric_cells_are_shared(
        kind in prop::sample::select(vec![LayoutKind::SymBand, LayoutKind::SymPack]),
        n in 2usize..10,
        r in 0usize..10,
        c in 0usize..10,
        v in -100.0..100.0f64,
    ) {
        let (r, c) = (r % n, c % n);
        let mut m = GlobalMatrix::allocate(kind, n, Bandwidth::full(n));
        m.set(r, c, v).unwrap();
        prop_assert_eq!(m.get(c, r).unwrap(), v);
        m.add(c, r, 1.0).unwrap();
        prop_assert_eq!(m.get(r, c).unwrap(), v + 1.0);
    }

    /// Full and banded stores of the same tridiagonal operator give the same solution.
    #[test]
    fn proptest_band_solve_matches_full(
        (diag, off) in (2usize..16).prop_flat_map(arb_tridiagonal),
        rhs_seed in prop::collection::vec(-1.0..1.0f64, 16),
    ) {
        let n = diag.len();
        let rhs = &rhs_seed[..n];
        let reference = tridiagonal(LayoutKind::Full, &diag, &off).solve(rhs).unwrap();
        for kind in [LayoutKind::Band, LayoutKind::SymBand, LayoutKind::SymPack] {
            let x = tridiagonal(kind, &diag, &off).solve(rhs).unwrap();
            for i in 0..n {
                assert_relative_eq!(x[i], reference[i], epsilon = 1e-10, max_relative = 1e-10);
            }
        }
    }

    /// Accumulating element matrices gives the same operator in every layout.
    #[test]
    fn proptest_accumulate_matches_full(
        n in 3usize..10,
        pairs in prop::collection::vec((0usize..10, 0.5..5.0f64), 1..20),
    ) {
        let mut full = GlobalMatrix::allocate(LayoutKind::Full, n, Bandwidth::full(n));
        let mut sym = GlobalMatrix::allocate(LayoutKind::SymBand, n, Bandwidth::symmetric(1));
        let mut band = GlobalMatrix::allocate(LayoutKind::Band, n, Bandwidth::symmetric(1));
        for (start, k) in pairs {
            let i = start % (n - 1);
            let ke = DMatrix::from_row_slice(2, 2, &[k, -k, -k, k]);
            for m in [&mut full, &mut sym, &mut band] {
                m.accumulate(&ke, &[i + 1, i]).unwrap();
            }
        }
        prop_assert_eq!(sym.to_dense(), full.to_dense());
        prop_assert_eq!(band.to_dense(), full.to_dense());
    }
}

// =============================================================================
// Reordering invariants
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// RCM visits every DOF exactly once.
    #[test]
    fn proptest_rcm_is_bijection((n, incidence) in arb_incidence()) {
        let graph = DofGraph::from_incidence(n, &incidence).unwrap();
        let perm = reverse_cuthill_mckee(&graph);
        prop_assert_eq!(perm.len(), n);
        let mut sorted = perm.order().to_vec();
        sorted.sort_unstable();
        prop_assert_eq!(sorted, (0..n).collect::<Vec<_>>());
        for old in 0..n {
            prop_assert_eq!(perm.old_index(perm.new_index(old)), old);
        }
    }

    /// The chosen numbering is never wider than the original one.
    #[test]
    fn proptest_reorder_never_widens((n, incidence) in arb_incidence()) {
        let graph = DofGraph::from_incidence(n, &incidence).unwrap();
        let reordering = reorder(&graph).unwrap();
        prop_assert!(reordering.bandwidth.max() <= reordering.original_bandwidth.max());
        prop_assert!(reordering.bandwidth.max() < n.max(1));
        prop_assert_eq!(graph.bandwidth(&reordering.permutation).unwrap(), reordering.bandwidth);
    }

    /// Any numbering of a path graph is reordered to bandwidth one.
    #[test]
    fn proptest_path_reorders_to_unit_bandwidth(
        order in (2usize..25).prop_flat_map(|n| Just((0..n).collect::<Vec<_>>()).prop_shuffle()),
    ) {
        let incidence: Vec<[usize; 2]> = order.windows(2).map(|w| [w[0], w[1]]).collect();
        let graph = DofGraph::from_incidence(order.len(), &incidence).unwrap();
        let perm = reverse_cuthill_mckee(&graph);
        prop_assert_eq!(graph.bandwidth(&perm).unwrap(), Bandwidth::symmetric(1));
    }
}

// =============================================================================
// Penalty invariants
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// A restrained DOF goes to zero as the penalty scale grows.
    #[test]
    fn proptest_penalty_converges(
        (diag, off) in (3usize..10).prop_flat_map(arb_tridiagonal),
        dof_seed in 0usize..10,
        load in 0.1..10.0f64,
    ) {
        let n = diag.len();
        let dof = dof_seed % n;
        let mut f = vec![0.0; n];
        f[dof] = load;

        let mut last = f64::INFINITY;
        for scale in [1.0e2, 1.0e4, 1.0e6, 1.0e8] {
            let mut m = tridiagonal(LayoutKind::SymBand, &diag, &off);
            let mut sets = ConstraintSets::new();
            let config = PenaltyConfig { scale, ..Default::default() };
            let applier = PenaltyApplier::new(config);
            applier.restrain_dof(&mut m, &mut sets, dof).unwrap();
            let u = m.solve(&f).unwrap()[dof].abs();
            prop_assert!(u < last);
            last = u;
        }
        prop_assert!(last < 1e-6 * load);
    }

    /// Re-applying a restraint multiplies the diagonal by the scale each time.
    #[test]
    fn proptest_stacking_scales_diagonal(kind in arb_layout(), repeats in 1usize..4) {
        let mut m = GlobalMatrix::allocate(kind, 3, Bandwidth::symmetric(1));
        for i in 0..3 {
            m.set(i, i, 2.0).unwrap();
        }
        let mut sets = ConstraintSets::new();
        let applier = PenaltyApplier::default();
        applier.restrain_dof(&mut m, &mut sets, 1).unwrap();
        let base = m.get(1, 1).unwrap();
        for _ in 0..repeats {
            applier.restrain_dof(&mut m, &mut sets, 1).unwrap();
        }
        let expected = base * applier.config().scale.powi(repeats as i32);
        assert_relative_eq!(m.get(1, 1).unwrap(), expected, max_relative = 1e-12);
        prop_assert_eq!(sets.restrained().len(), 1);
    }
}
