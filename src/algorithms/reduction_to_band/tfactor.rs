//! Triangular factor of a block of reflectors.
//!
//! For reflectors `H_i = I - tau_i v_i v_i^H`, `H_0 H_1 ... H_{k-1} = I - V T V^H` with `T`
//! upper triangular. Column `i` of `T` is built from the Gram matrix `G = V^H V`:
//!
//! ```text
//! T[i, i]    = tau_i
//! T[0..i, i] = -tau_i * T[0..i, 0..i] * G[0..i, i]
//! ```

use crate::blas::{self, Op};
use crate::comm::{CommunicatorPipeline, schedule_all_reduce_in_place};
use crate::matrix::{Panel, ReadTile, WorkTile, WriteTile};
use crate::runtime::{Priority, Task, TaskGraph};
use crate::types::Scalar;
use faer::{MatMut, MatRef};

/// Schedules the computation of `t` (`k x k`, zero initialized) from the reflectors stored
/// in the local tiles of `v` and the `k` factors in `taus`.
///
/// When the reflectors are spread over the ranks of `col_chain`, the Gram matrix is summed
/// over it; every rank of the chain must call this.
pub(crate) fn compute_t_factor<T: Scalar>(
    graph: &mut TaskGraph,
    v: &Panel<T>,
    taus: ReadTile<T>,
    t: WriteTile<T>,
    col_chain: Option<&CommunicatorPipeline>,
) {
    let k = t.size().rows;
    let mut gram = WorkTile::<T>::zeros(k, k);

    let tiles: Vec<ReadTile<T>> = v.iter_local().map(|index| v.read(index)).collect();
    let gram_rw = gram.readwrite();
    graph.spawn(
        Task::new("tfactor_gram")
            .priority(Priority::High)
            .reads_all(&tiles)
            .writes(&gram_rw),
        move || {
            let mut g = gram_rw.lock();
            for tile in &tiles {
                let guard = tile.lock();
                let view = guard.view();
                blas::gemm(Op::ConjTrans, Op::NoTrans, T::one(), view, view, g.view_mut());
            }
            Ok(())
        },
    );

    if let Some(chain) = col_chain.filter(|chain| chain.size() > 1) {
        schedule_all_reduce_in_place(graph, chain, gram.readwrite());
    }

    let gram = gram.read();
    graph.spawn(
        Task::new("tfactor")
            .priority(Priority::High)
            .reads(&gram)
            .reads(&taus)
            .writes(&t),
        move || {
            let g = gram.lock();
            let taus = taus.lock();
            let mut t = t.lock();
            larft_from_gram(g.view(), taus.view(), t.view_mut());
            Ok(())
        },
    );
}

fn larft_from_gram<T: Scalar>(g: MatRef<'_, T>, taus: MatRef<'_, T>, mut t: MatMut<'_, T>) {
    let k = t.nrows();
    let mut column = vec![T::zero(); k];
    for i in 0..k {
        let tau = taus[(i, 0)];
        for (r, value) in column.iter_mut().enumerate().take(i) {
            let mut acc = T::zero();
            for c in r..i {
                acc += t[(r, c)] * g[(c, i)];
            }
            *value = -tau * acc;
        }
        for (r, &value) in column.iter().enumerate().take(i) {
            t[(r, i)] = value;
        }
        t[(i, i)] = tau;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use faer::{Mat, c64};

    #[test]
    fn test_t_factor_reproduces_reflector_product() {
        let n = 6;
        let k = 3;
        let v = Mat::from_fn(n, k, |i, j| match i.cmp(&j) {
            std::cmp::Ordering::Less => c64::new(0.0, 0.0),
            std::cmp::Ordering::Equal => c64::new(1.0, 0.0),
            std::cmp::Ordering::Greater => c64::new(0.3 * i as f64, -0.2 * j as f64),
        });
        let taus = Mat::from_fn(k, 1, |i, _| c64::new(1.1 + 0.1 * i as f64, 0.2));

        let mut g = Mat::<c64>::zeros(k, k);
        blas::gemm(Op::ConjTrans, Op::NoTrans, c64::new(1.0, 0.0), v.as_ref(), v.as_ref(), g.as_mut());
        let mut t = Mat::<c64>::zeros(k, k);
        larft_from_gram(g.as_ref(), taus.as_ref(), t.as_mut());

        let one = c64::new(1.0, 0.0);
        let identity = |r: usize, c: usize| if r == c { one } else { c64::new(0.0, 0.0) };
        let mut product = Mat::from_fn(n, n, identity);
        for i in 0..k {
            let h = Mat::from_fn(n, n, |r, c| identity(r, c) - taus[(i, 0)] * v[(r, i)] * v[(c, i)].conj());
            let mut next = Mat::<c64>::zeros(n, n);
            blas::gemm(Op::NoTrans, Op::NoTrans, one, product.as_ref(), h.as_ref(), next.as_mut());
            product = next;
        }
        let mut vt = Mat::<c64>::zeros(n, k);
        blas::gemm(Op::NoTrans, Op::NoTrans, one, v.as_ref(), t.as_ref(), vt.as_mut());
        let mut compact = Mat::from_fn(n, n, identity);
        blas::gemm(Op::NoTrans, Op::ConjTrans, -one, vt.as_ref(), v.as_ref(), compact.as_mut());
        assert!((product - compact).norm_max() < 1e-12);
        assert_eq!(t[(2, 0)], c64::new(0.0, 0.0));
    }
}
