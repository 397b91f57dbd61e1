//! Dense linear algebra helpers
//!
//! Small wrappers around rlst arrays. All arrays are column-major; products and singular value
//! decompositions are delegated to rlst (BLAS/LAPACK). Operands with a zero dimension are handled
//! here and never passed to the backend.
use rlst::{
    empty_array, rlst_dynamic_array1, rlst_dynamic_array2, MultInto, MultIntoResize, RawAccess,
    RawAccessMut, Shape, SvdMode, TransMode,
};

use crate::types::{H2Error, H2Result, RealScalar, RlstArray};

/// Create a zero matrix.
pub fn zeros<T: RealScalar>(shape: [usize; 2]) -> RlstArray<T, 2> {
    rlst_dynamic_array2!(T, shape)
}

/// Create an identity matrix.
pub fn identity<T: RealScalar>(n: usize) -> RlstArray<T, 2> {
    let mut mat = zeros([n, n]);
    mat.set_identity();
    mat
}

/// Create a matrix from column-major data.
pub fn from_column_major<T: RealScalar>(shape: [usize; 2], data: &[T]) -> RlstArray<T, 2> {
    debug_assert_eq!(shape[0] * shape[1], data.len());
    let mut mat = zeros(shape);
    mat.data_mut().copy_from_slice(data);
    mat
}

/// Deep copy of a matrix.
pub fn copy<T: RealScalar>(mat: &RlstArray<T, 2>) -> RlstArray<T, 2> {
    let mut out = zeros(mat.shape());
    out.fill_from(mat.view());
    out
}

/// Entry `(i, j)` of a matrix.
#[inline]
pub fn entry<T: RealScalar>(mat: &RlstArray<T, 2>, i: usize, j: usize) -> T {
    mat.data()[i + j * mat.shape()[0]]
}

/// Transpose of a matrix.
pub fn transpose<T: RealScalar>(mat: &RlstArray<T, 2>) -> RlstArray<T, 2> {
    let [m, n] = mat.shape();
    let mut out = zeros([n, m]);
    out.fill_from(mat.view().transpose());
    out
}

/// Gather the given rows of a matrix.
pub fn select_rows<T: RealScalar>(mat: &RlstArray<T, 2>, rows: &[usize]) -> RlstArray<T, 2> {
    let [m, n] = mat.shape();
    let mut out = zeros([rows.len(), n]);
    let src = mat.data();
    let dst = out.data_mut();
    for j in 0..n {
        for (i, &r) in rows.iter().enumerate() {
            dst[i + j * rows.len()] = src[r + j * m];
        }
    }
    out
}

/// Gather the given columns of a matrix.
pub fn select_cols<T: RealScalar>(mat: &RlstArray<T, 2>, cols: &[usize]) -> RlstArray<T, 2> {
    let m = mat.shape()[0];
    let mut out = zeros([m, cols.len()]);
    let src = mat.data();
    let dst = out.data_mut();
    for (j, &c) in cols.iter().enumerate() {
        dst[j * m..(j + 1) * m].copy_from_slice(&src[c * m..(c + 1) * m]);
    }
    out
}

/// Copy of the rows `start..end` of a matrix.
pub fn row_range<T: RealScalar>(mat: &RlstArray<T, 2>, start: usize, end: usize) -> RlstArray<T, 2> {
    let n = mat.shape()[1];
    let mut out = zeros([end - start, n]);
    out.fill_from(mat.view().into_subview([start, 0], [end - start, n]));
    out
}

/// Stack matrices with `ncols` columns on top of each other.
pub fn vstack<T: RealScalar>(blocks: &[&RlstArray<T, 2>], ncols: usize) -> RlstArray<T, 2> {
    let nrows = blocks.iter().map(|b| b.shape()[0]).sum::<usize>();
    let mut out = zeros([nrows, ncols]);
    let mut offset = 0;
    for block in blocks {
        let m = block.shape()[0];
        out.view_mut()
            .into_subview([offset, 0], [m, ncols])
            .fill_from(block.view());
        offset += m;
    }
    out
}

/// Place matrices with `nrows` rows next to each other.
pub fn hstack<T: RealScalar>(blocks: &[&RlstArray<T, 2>], nrows: usize) -> RlstArray<T, 2> {
    let ncols = blocks.iter().map(|b| b.shape()[1]).sum::<usize>();
    let mut out = zeros([nrows, ncols]);
    let mut offset = 0;
    for block in blocks {
        let n = block.shape()[1];
        out.view_mut()
            .into_subview([0, offset], [nrows, n])
            .fill_from(block.view());
        offset += n;
    }
    out
}

/// Add the rows of `block` to the rows `rows` of `mat`.
pub fn scatter_add_rows<T: RealScalar>(
    mat: &mut RlstArray<T, 2>,
    rows: &[usize],
    block: &RlstArray<T, 2>,
) {
    let [m, n] = mat.shape();
    let k = rows.len();
    assert_eq!(block.shape(), [k, n]);
    let src = block.data();
    let dst = mat.data_mut();
    for j in 0..n {
        for (i, &r) in rows.iter().enumerate() {
            dst[r + j * m] += src[i + j * k];
        }
    }
}

fn op_shape(shape: [usize; 2], trans: TransMode) -> [usize; 2] {
    match trans {
        TransMode::Trans | TransMode::ConjTrans => [shape[1], shape[0]],
        TransMode::NoTrans | TransMode::ConjNoTrans => shape,
    }
}

/// Compute `op(a) * op(b)`.
fn product<T: RealScalar>(
    transa: TransMode,
    transb: TransMode,
    a: &RlstArray<T, 2>,
    b: &RlstArray<T, 2>,
) -> RlstArray<T, 2> {
    let [m, k] = op_shape(a.shape(), transa);
    let [k2, n] = op_shape(b.shape(), transb);
    assert_eq!(k, k2, "Inner dimensions of a matrix product do not agree.");
    if m == 0 || n == 0 || k == 0 {
        return zeros([m, n]);
    }
    empty_array::<T, 2>().mult_into_resize(transa, transb, T::one(), a.view(), b.view(), T::zero())
}

/// Add `op(a) * op(b)` to `mat` in place.
fn product_acc<T: RealScalar>(
    mat: &mut RlstArray<T, 2>,
    transa: TransMode,
    transb: TransMode,
    a: &RlstArray<T, 2>,
    b: &RlstArray<T, 2>,
) {
    let [m, k] = op_shape(a.shape(), transa);
    let [k2, n] = op_shape(b.shape(), transb);
    assert_eq!(k, k2, "Inner dimensions of a matrix product do not agree.");
    assert_eq!(mat.shape(), [m, n]);
    if m == 0 || n == 0 || k == 0 {
        return;
    }
    mat.view_mut()
        .mult_into(transa, transb, T::one(), a.view(), b.view(), T::one());
}

/// Compute `a * b`.
pub fn matmul<T: RealScalar>(a: &RlstArray<T, 2>, b: &RlstArray<T, 2>) -> RlstArray<T, 2> {
    product(TransMode::NoTrans, TransMode::NoTrans, a, b)
}

/// Compute `a^T * b`.
pub fn matmul_tn<T: RealScalar>(a: &RlstArray<T, 2>, b: &RlstArray<T, 2>) -> RlstArray<T, 2> {
    product(TransMode::Trans, TransMode::NoTrans, a, b)
}

/// Compute `a * b^T`.
pub fn matmul_nt<T: RealScalar>(a: &RlstArray<T, 2>, b: &RlstArray<T, 2>) -> RlstArray<T, 2> {
    product(TransMode::NoTrans, TransMode::Trans, a, b)
}

/// Add `other` to `mat` in place.
pub fn add_assign<T: RealScalar>(mat: &mut RlstArray<T, 2>, other: &RlstArray<T, 2>) {
    assert_eq!(mat.shape(), other.shape());
    mat.sum_into(other.view());
}

/// Add `a * b` to `mat` in place.
pub fn gemm_acc<T: RealScalar>(
    mat: &mut RlstArray<T, 2>,
    a: &RlstArray<T, 2>,
    b: &RlstArray<T, 2>,
) {
    product_acc(mat, TransMode::NoTrans, TransMode::NoTrans, a, b);
}

/// Add `a^T * b` to `mat` in place.
pub fn gemm_tn_acc<T: RealScalar>(
    mat: &mut RlstArray<T, 2>,
    a: &RlstArray<T, 2>,
    b: &RlstArray<T, 2>,
) {
    product_acc(mat, TransMode::Trans, TransMode::NoTrans, a, b);
}

/// Compute `mat * diag(scale)`.
pub fn scale_cols<T: RealScalar>(mat: &RlstArray<T, 2>, scale: &[T]) -> RlstArray<T, 2> {
    assert_eq!(mat.shape()[1], scale.len());
    let mut out = copy(mat);
    for (mut column, &s) in out.col_iter_mut().zip(scale) {
        column.scale_inplace(s);
    }
    out
}

/// Reduced singular value decomposition `mat = u * diag(s) * vt`.
///
/// Singular values are returned in non-increasing order.
pub fn svd<T: RealScalar>(
    mat: &RlstArray<T, 2>,
) -> H2Result<(RlstArray<T, 2>, Vec<T>, RlstArray<T, 2>)> {
    let [m, n] = mat.shape();
    let k = m.min(n);
    if k == 0 {
        return Ok((zeros([m, 0]), vec![], zeros([0, n])));
    }
    let mut u = zeros([m, k]);
    let mut vt = zeros([k, n]);
    let mut s = vec![T::zero(); k];
    copy(mat)
        .into_svd_alloc(u.view_mut(), vt.view_mut(), &mut s[..], SvdMode::Reduced)
        .map_err(|e| H2Error::LinearAlgebra(format!("SVD failed: {e:?}")))?;
    Ok((u, s, vt))
}

/// Factorise `mat = q * r` with `q` having orthonormal columns.
///
/// `q` has `min(m, n)` columns. The factors are read off the reduced SVD, so `r` is not
/// triangular. rlst only exposes the factors of its pivoted QR for concrete scalar types.
pub fn orthogonalise<T: RealScalar>(
    mat: &RlstArray<T, 2>,
) -> H2Result<(RlstArray<T, 2>, RlstArray<T, 2>)> {
    let (u, s, vt) = svd(mat)?;
    let r = matmul(&diag(&s), &vt);
    Ok((u, r))
}

/// Square diagonal matrix.
pub fn diag<T: RealScalar>(values: &[T]) -> RlstArray<T, 2> {
    let n = values.len();
    let mut diagonal = rlst_dynamic_array1!(T, [n]);
    diagonal.data_mut().copy_from_slice(values);
    let mut mat = zeros([n, n]);
    mat.set_diag(diagonal);
    mat
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;

    fn sample(m: usize, n: usize) -> RlstArray<f64, 2> {
        let data = (0..m * n)
            .map(|i| 1.0 / (1.0 + i as f64) + (i % 3) as f64)
            .collect::<Vec<_>>();
        from_column_major([m, n], &data)
    }

    #[test]
    fn test_transpose_and_gather() {
        let a = sample(4, 3);
        let at = transpose(&a);
        assert_eq!(at.shape(), [3, 4]);
        for i in 0..4 {
            for j in 0..3 {
                assert_eq!(entry(&a, i, j), entry(&at, j, i));
            }
        }
        let rows = select_rows(&a, &[3, 1]);
        assert_eq!(entry(&rows, 0, 2), entry(&a, 3, 2));
        assert_eq!(entry(&rows, 1, 0), entry(&a, 1, 0));
        let cols = select_cols(&a, &[2]);
        assert_eq!(cols.shape(), [4, 1]);
        assert_eq!(entry(&cols, 3, 0), entry(&a, 3, 2));

        let mut b = zeros::<f64>([5, 3]);
        scatter_add_rows(&mut b, &[4, 0], &rows);
        scatter_add_rows(&mut b, &[4], &select_rows(&a, &[3]));
        assert_eq!(entry(&b, 4, 1), 2.0 * entry(&a, 3, 1));
        assert_eq!(entry(&b, 0, 2), entry(&a, 1, 2));
        assert_eq!(entry(&b, 2, 0), 0.0);
    }

    #[test]
    fn test_stacking() {
        let a = sample(2, 3);
        let b = sample(4, 3);
        let v = vstack(&[&a, &b], 3);
        assert_eq!(v.shape(), [6, 3]);
        assert_eq!(entry(&v, 1, 2), entry(&a, 1, 2));
        assert_eq!(entry(&v, 5, 1), entry(&b, 3, 1));

        let c = sample(3, 2);
        let h = hstack(&[&transpose(&a), &c], 3);
        assert_eq!(h.shape(), [3, 4]);
        assert_eq!(entry(&h, 2, 3), entry(&c, 2, 1));
        assert_eq!(entry(&h, 1, 0), entry(&a, 0, 1));
    }

    #[test]
    fn test_matmul_with_empty_operands() {
        let a = zeros::<f64>([3, 0]);
        let b = zeros::<f64>([0, 2]);
        let c = matmul(&a, &b);
        assert_eq!(c.shape(), [3, 2]);
        assert!(c.data().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_transposed_products() {
        let a = sample(5, 3);
        let b = sample(5, 4);
        let tn = matmul_tn(&a, &b);
        let reference = matmul(&transpose(&a), &b);
        assert_eq!(tn.shape(), [3, 4]);
        for (x, y) in tn.data().iter().zip(reference.data()) {
            assert_relative_eq!(x, y, epsilon = 1e-12);
        }

        let c = sample(2, 3);
        let nt = matmul_nt(&c, &a);
        assert_eq!(nt.shape(), [2, 5]);
        for i in 0..2 {
            for j in 0..5 {
                let expected = (0..3).map(|t| entry(&c, i, t) * entry(&a, j, t)).sum::<f64>();
                assert_relative_eq!(entry(&nt, i, j), expected, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn test_accumulation() {
        let a = sample(4, 3);
        let b = sample(3, 2);
        let mut acc = sample(4, 2);
        let start = copy(&acc);
        gemm_acc(&mut acc, &a, &b);
        let product = matmul(&a, &b);
        for i in 0..4 {
            for j in 0..2 {
                assert_relative_eq!(
                    entry(&acc, i, j),
                    entry(&start, i, j) + entry(&product, i, j),
                    epsilon = 1e-12
                );
            }
        }

        let mut acc = zeros::<f64>([3, 2]);
        gemm_tn_acc(&mut acc, &a, &sample(4, 2));
        gemm_tn_acc(&mut acc, &zeros([0, 3]), &zeros([0, 2]));
        let reference = matmul_tn(&a, &sample(4, 2));
        for (x, y) in acc.data().iter().zip(reference.data()) {
            assert_relative_eq!(x, y, epsilon = 1e-12);
        }

        let mut sum = identity::<f64>(3);
        add_assign(&mut sum, &diag(&[1.0, 2.0, 3.0]));
        assert_eq!(entry(&sum, 2, 2), 4.0);
        assert_eq!(entry(&sum, 0, 1), 0.0);
    }

    #[test]
    fn test_scale_cols_and_row_range() {
        let a = sample(4, 3);
        let scaled = scale_cols(&a, &[2.0, 0.0, -1.0]);
        for i in 0..4 {
            assert_eq!(entry(&scaled, i, 0), 2.0 * entry(&a, i, 0));
            assert_eq!(entry(&scaled, i, 1), 0.0);
            assert_eq!(entry(&scaled, i, 2), -entry(&a, i, 2));
        }
        let middle = row_range(&a, 1, 3);
        assert_eq!(middle.shape(), [2, 3]);
        assert_eq!(entry(&middle, 1, 2), entry(&a, 2, 2));
        assert_eq!(row_range(&a, 4, 4).shape(), [0, 3]);
    }

    #[test]
    fn test_orthogonalise() {
        let a = sample(6, 3);
        let (q, r) = orthogonalise(&a).unwrap();
        assert_eq!(q.shape(), [6, 3]);
        let qtq = matmul_tn(&q, &q);
        for i in 0..3 {
            for j in 0..3 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert_relative_eq!(entry(&qtq, i, j), expected, epsilon = 1e-12);
            }
        }
        let qr = matmul(&q, &r);
        for (x, y) in qr.data().iter().zip(a.data()) {
            assert_relative_eq!(x, y, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_svd_ordering() {
        let a = sample(5, 4);
        let (_, s, _) = svd(&a).unwrap();
        assert_eq!(s.len(), 4);
        for w in s.windows(2) {
            assert!(w[0] >= w[1]);
        }
    }
}
