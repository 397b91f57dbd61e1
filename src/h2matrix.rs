//! H2-matrices
//!
//! An [H2Matrix] stores, for every node of the row and column cluster trees, a transfer matrix
//! expressing the node's basis in terms of its children's bases (or of its own rows or columns
//! at a leaf), optional basis indices, and the interaction (far-field) and close (near-field)
//! blocks of the node's admissible and inadmissible neighbours.
mod blocks;
mod compress;
mod convert;
mod dot;

pub(crate) use blocks::{materialise, transpose_blocks};

use crate::linalg::{copy, identity, matmul, matmul_tn};
use crate::problem::Problem;
use crate::traits::Kernel;
use crate::types::{BlockList, H2Error, H2Result, H2Type, MemType, RealScalar, RlstArray, Side};
use blocks::{BlockProvider, CachedBlockProvider, ComputedBlockProvider};
use rlst::{RawAccess, Shape};
use std::mem::size_of;

/// Transfer matrix of a node.
pub enum Transfer<T: RealScalar> {
    /// The node has no compression: its basis is the stacked basis of its children (or its own
    /// index set at a leaf)
    Identity(usize),
    /// Dense transfer matrix with one row per child basis element and one column per basis
    /// element of the node
    Matrix(RlstArray<T, 2>),
}

impl<T: RealScalar> std::fmt::Debug for Transfer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Transfer::Identity(n) => write!(f, "Identity({n})"),
            Transfer::Matrix(mat) => write!(f, "Matrix({:?})", mat.shape()),
        }
    }
}

impl<T: RealScalar> Clone for Transfer<T> {
    fn clone(&self) -> Self {
        match self {
            Transfer::Identity(n) => Transfer::Identity(*n),
            Transfer::Matrix(mat) => Transfer::Matrix(copy(mat)),
        }
    }
}

impl<T: RealScalar> Transfer<T> {
    /// Shape of the transfer matrix.
    pub fn shape(&self) -> [usize; 2] {
        match self {
            Transfer::Identity(n) => [*n, *n],
            Transfer::Matrix(mat) => mat.shape(),
        }
    }

    /// Number of basis elements of the node.
    pub fn rank(&self) -> usize {
        self.shape()[1]
    }

    /// Check if this is an identity transfer.
    pub fn is_identity(&self) -> bool {
        matches!(self, Transfer::Identity(_))
    }

    /// Number of stored entries.
    pub fn nelements(&self) -> usize {
        match self {
            Transfer::Identity(_) => 0,
            Transfer::Matrix(mat) => mat.data().len(),
        }
    }

    /// Dense copy of the transfer matrix.
    pub fn to_dense(&self) -> RlstArray<T, 2> {
        match self {
            Transfer::Identity(n) => identity(*n),
            Transfer::Matrix(mat) => copy(mat),
        }
    }

    /// Compute `T x`.
    pub(crate) fn apply(&self, x: &RlstArray<T, 2>) -> RlstArray<T, 2> {
        match self {
            Transfer::Identity(_) => copy(x),
            Transfer::Matrix(mat) => matmul(mat, x),
        }
    }

    /// Compute `T^T x`.
    pub(crate) fn apply_t(&self, x: &RlstArray<T, 2>) -> RlstArray<T, 2> {
        match self {
            Transfer::Identity(_) => copy(x),
            Transfer::Matrix(mat) => matmul_tn(mat, x),
        }
    }
}

/// Data attached to the nodes of one cluster tree.
pub(crate) struct SideData<T: RealScalar> {
    pub(crate) transfer: Vec<Transfer<T>>,
    pub(crate) basis: Option<Vec<Vec<usize>>>,
    pub(crate) interaction: Option<BlockList<T>>,
    pub(crate) close: Option<BlockList<T>>,
}

fn copy_blocks<T: RealScalar>(blocks: &BlockList<T>) -> BlockList<T> {
    blocks
        .iter()
        .map(|list| list.iter().map(copy).collect())
        .collect()
}

impl<T: RealScalar> Clone for SideData<T> {
    fn clone(&self) -> Self {
        Self {
            transfer: self.transfer.clone(),
            basis: self.basis.clone(),
            interaction: self.interaction.as_ref().map(copy_blocks),
            close: self.close.as_ref().map(copy_blocks),
        }
    }
}

/// Caller-supplied components of an H2-matrix.
///
/// For symmetric problems only the row-side fields are used; column-side transfer matrices must
/// not be given. For general problems a missing side of the interaction or close blocks is
/// derived by transposition.
pub struct H2MatrixParts<T: RealScalar> {
    /// Transfer matrices of the row tree
    pub row_transfer: Vec<Transfer<T>>,
    /// Transfer matrices of the column tree
    pub col_transfer: Option<Vec<Transfer<T>>>,
    /// Basis indices of the row tree
    pub row_basis: Option<Vec<Vec<usize>>>,
    /// Basis indices of the column tree
    pub col_basis: Option<Vec<Vec<usize>>>,
    /// Interaction blocks of the row tree
    pub row_interaction: Option<BlockList<T>>,
    /// Interaction blocks of the column tree
    pub col_interaction: Option<BlockList<T>>,
    /// Close blocks of the row tree
    pub row_close: Option<BlockList<T>>,
    /// Close blocks of the column tree
    pub col_close: Option<BlockList<T>>,
}

impl<T: RealScalar> Default for H2MatrixParts<T> {
    fn default() -> Self {
        Self {
            row_transfer: vec![],
            col_transfer: None,
            row_basis: None,
            col_basis: None,
            row_interaction: None,
            col_interaction: None,
            row_close: None,
            col_close: None,
        }
    }
}

/// Components included by [H2Matrix::nbytes].
#[derive(Debug, Clone, Copy)]
pub struct MemoryParts {
    /// Transfer matrices
    pub transfer: bool,
    /// Interaction blocks
    pub interaction: bool,
    /// Close blocks
    pub close: bool,
    /// Basis indices
    pub basis: bool,
    /// Headers of containers and of the matrix itself
    pub overhead: bool,
}

impl Default for MemoryParts {
    fn default() -> Self {
        Self {
            transfer: true,
            interaction: true,
            close: true,
            basis: true,
            overhead: true,
        }
    }
}

fn block_list_bytes<T: RealScalar>(blocks: &BlockList<T>, overhead: bool) -> usize {
    let mut total = blocks.iter().flatten().map(|b| b.data().len()).sum::<usize>() * size_of::<T>();
    if overhead {
        total += blocks.len() * size_of::<Vec<RlstArray<T, 2>>>()
            + blocks.iter().map(|b| b.len()).sum::<usize>() * size_of::<RlstArray<T, 2>>();
    }
    total
}

fn check_transfer<T: RealScalar, K: Kernel<T = T>>(
    problem: &Problem<T, K>,
    side: Side,
    transfer: &[Transfer<T>],
) -> H2Result<()> {
    let tree = problem.tree(side);
    if transfer.len() != tree.nnodes() {
        return Err(H2Error::Construction(format!(
            "Expected {} {:?} transfer matrices, got {}",
            tree.nnodes(),
            side,
            transfer.len()
        )));
    }
    for node in 0..tree.nnodes() {
        if problem.notransition(side, node) {
            continue;
        }
        let expected = if tree.is_leaf(node) {
            tree.index(node).len()
        } else {
            tree.children(node).iter().map(|&c| transfer[c].rank()).sum()
        };
        if transfer[node].shape()[0] != expected {
            return Err(H2Error::Construction(format!(
                "{:?} transfer matrix of node {} has {} rows, expected {}",
                side,
                node,
                transfer[node].shape()[0],
                expected
            )));
        }
    }
    Ok(())
}

fn check_block_lists<T: RealScalar, K: Kernel<T = T>>(
    problem: &Problem<T, K>,
    side: Side,
    blocks: &BlockList<T>,
    far: bool,
) -> H2Result<()> {
    let nnodes = problem.tree(side).nnodes();
    let what = if far { "interaction" } else { "close" };
    if blocks.len() != nnodes {
        return Err(H2Error::Construction(format!(
            "Expected {} lists of {:?} {} blocks, got {}",
            nnodes,
            side,
            what,
            blocks.len()
        )));
    }
    for (node, list) in blocks.iter().enumerate() {
        let expected = if far {
            problem.far(side, node).len()
        } else {
            problem.close(side, node).len()
        };
        if list.len() != expected {
            return Err(H2Error::Construction(format!(
                "{:?} node {} has {} {} blocks, expected {}",
                side,
                node,
                list.len(),
                what,
                expected
            )));
        }
    }
    Ok(())
}

/// Combine the given sides of a block list pair, deriving a missing side by transposition.
type BlockPair<T> = Option<(BlockList<T>, Option<BlockList<T>>)>;

fn complete_pair<T: RealScalar, K: Kernel<T = T>>(
    problem: &Problem<T, K>,
    row: Option<BlockList<T>>,
    col: Option<BlockList<T>>,
    far: bool,
) -> H2Result<BlockPair<T>> {
    if problem.is_symmetric() {
        return match row.or(col) {
            Some(row) => {
                check_block_lists(problem, Side::Row, &row, far)?;
                Ok(Some((row, None)))
            }
            None => Ok(None),
        };
    }
    match (row, col) {
        (Some(row), Some(col)) => {
            check_block_lists(problem, Side::Row, &row, far)?;
            check_block_lists(problem, Side::Col, &col, far)?;
            Ok(Some((row, Some(col))))
        }
        (Some(row), None) => {
            check_block_lists(problem, Side::Row, &row, far)?;
            let col = transpose_blocks(problem, Side::Row, &row, far);
            Ok(Some((row, Some(col))))
        }
        (None, Some(col)) => {
            check_block_lists(problem, Side::Col, &col, far)?;
            let row = transpose_blocks(problem, Side::Col, &col, far);
            Ok(Some((row, Some(col))))
        }
        (None, None) => Ok(None),
    }
}

/// An H2-matrix approximation of the operator defined by a [Problem].
///
/// For symmetric problems the column side is not stored: every column-side query returns the
/// row-side data, so modifications of one side are visible through the other.
pub struct H2Matrix<'a, T: RealScalar, K: Kernel<T = T>> {
    pub(crate) problem: &'a Problem<T, K>,
    pub(crate) row: SideData<T>,
    pub(crate) col: Option<SideData<T>>,
    pub(crate) h2_type: H2Type,
    pub(crate) mem_type: MemType,
}

impl<T: RealScalar, K: Kernel<T = T>> std::fmt::Debug for H2Matrix<'_, T, K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("H2Matrix")
            .field("shape", &self.shape())
            .field("h2_type", &self.h2_type)
            .field("mem_type", &self.mem_type)
            .field("symmetric", &self.is_symmetric())
            .field("row_ranks", &self.ranks(Side::Row))
            .field("col_ranks", &self.ranks(Side::Col))
            .finish()
    }
}

impl<T: RealScalar, K: Kernel<T = T>> Clone for H2Matrix<'_, T, K> {
    fn clone(&self) -> Self {
        self.copy()
    }
}

impl<'a, T: RealScalar, K: Kernel<T = T>> H2Matrix<'a, T, K> {
    /// Create an H2-matrix from caller-supplied parts.
    ///
    /// If basis indices are given the representation is [H2Type::Mcbh], otherwise [H2Type::H2].
    /// An MCBH representation without interaction or close blocks uses [MemType::Low]; an H2
    /// representation requires both.
    pub fn from_parts(problem: &'a Problem<T, K>, parts: H2MatrixParts<T>) -> H2Result<Self> {
        let H2MatrixParts {
            row_transfer,
            col_transfer,
            row_basis,
            col_basis,
            row_interaction,
            col_interaction,
            row_close,
            col_close,
        } = parts;
        let symmetric = problem.is_symmetric();

        let col_transfer = match (symmetric, col_transfer) {
            (true, None) => None,
            (false, Some(transfer)) => Some(transfer),
            (true, Some(_)) => {
                return Err(H2Error::Construction(
                    "Symmetric problems take row transfer matrices only".to_string(),
                ))
            }
            (false, None) => {
                return Err(H2Error::Construction(
                    "Column transfer matrices are required for non-symmetric problems".to_string(),
                ))
            }
        };
        check_transfer(problem, Side::Row, &row_transfer)?;
        if let Some(transfer) = &col_transfer {
            check_transfer(problem, Side::Col, transfer)?;
        }

        let (row_basis, col_basis) = match (symmetric, row_basis, col_basis) {
            (true, row, col) => (row.or(col), None),
            (false, Some(row), Some(col)) => (Some(row), Some(col)),
            (false, None, None) => (None, None),
            _ => {
                return Err(H2Error::Construction(
                    "Basis indices must be given for both trees or for neither".to_string(),
                ))
            }
        };
        let h2_type = if row_basis.is_some() {
            H2Type::Mcbh
        } else {
            H2Type::H2
        };

        let interaction = complete_pair(problem, row_interaction, col_interaction, true)?;
        let close = complete_pair(problem, row_close, col_close, false)?;
        let (mem_type, interaction, close) = match (interaction, close, h2_type) {
            (Some(interaction), Some(close), _) => (MemType::Full, Some(interaction), Some(close)),
            (_, _, H2Type::Mcbh) => {
                log::debug!("Interaction or close blocks missing: using on-the-fly evaluation");
                (MemType::Low, None, None)
            }
            (None, _, H2Type::H2) => {
                return Err(H2Error::Construction(
                    "Interaction blocks are required without basis indices".to_string(),
                ))
            }
            (_, None, H2Type::H2) => {
                return Err(H2Error::Construction(
                    "Close blocks are required without basis indices".to_string(),
                ))
            }
        };
        let (row_interaction, col_interaction) = match interaction {
            Some((row, col)) => (Some(row), col),
            None => (None, None),
        };
        let (row_close, col_close) = match close {
            Some((row, col)) => (Some(row), col),
            None => (None, None),
        };

        let row = SideData {
            transfer: row_transfer,
            basis: row_basis,
            interaction: row_interaction,
            close: row_close,
        };
        let col = col_transfer.map(|transfer| SideData {
            transfer,
            basis: col_basis,
            interaction: col_interaction,
            close: col_close,
        });
        let mut matrix = Self {
            problem,
            row,
            col,
            h2_type,
            mem_type,
        };
        matrix.check_basis()?;
        matrix.check_blocks()?;
        matrix.normalise_inactive();
        Ok(matrix)
    }

    fn check_basis(&self) -> H2Result<()> {
        for &side in self.problem.sides() {
            let Some(basis) = self.basis(side) else {
                continue;
            };
            let transfer = self.transfer(side);
            if basis.len() != transfer.len() {
                return Err(H2Error::Construction(format!(
                    "Expected {} {:?} basis index lists, got {}",
                    transfer.len(),
                    side,
                    basis.len()
                )));
            }
            for (node, (b, t)) in basis.iter().zip(transfer).enumerate() {
                if !self.problem.notransition(side, node) && b.len() != t.rank() {
                    return Err(H2Error::Construction(format!(
                        "{:?} node {} has {} basis indices but rank {}",
                        side,
                        node,
                        b.len(),
                        t.rank()
                    )));
                }
            }
        }
        Ok(())
    }

    fn check_blocks(&self) -> H2Result<()> {
        for &side in self.problem.sides() {
            let dual = side.dual();
            let tree = self.problem.tree(side);
            let dual_tree = self.problem.tree(dual);
            let (own, other) = (self.transfer(side), self.transfer(dual));
            if let Some(blocks) = self.interaction(side) {
                for (node, list) in blocks.iter().enumerate() {
                    for (block, &j) in list.iter().zip(self.problem.far(side, node)) {
                        let expected = [own[node].rank(), other[j].rank()];
                        if block.shape() != expected {
                            return Err(H2Error::Construction(format!(
                                "{:?} interaction block ({}, {}) has shape {:?}, expected {:?}",
                                side,
                                node,
                                j,
                                block.shape(),
                                expected
                            )));
                        }
                    }
                }
            }
            if let Some(blocks) = self.close(side) {
                for (node, list) in blocks.iter().enumerate() {
                    for (block, &j) in list.iter().zip(self.problem.close(side, node)) {
                        let expected = [tree.index(node).len(), dual_tree.index(j).len()];
                        if block.shape() != expected {
                            return Err(H2Error::Construction(format!(
                                "{:?} close block ({}, {}) has shape {:?}, expected {:?}",
                                side,
                                node,
                                j,
                                block.shape(),
                                expected
                            )));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Give nodes outside the far field identity transfers (and their children's stacked basis).
    pub(crate) fn normalise_inactive(&mut self) {
        let problem = self.problem;
        for &side in problem.sides() {
            let tree = problem.tree(side);
            let data = self.side_mut(side);
            for node in problem.queue_nodes(side) {
                if !problem.notransition(side, node) {
                    continue;
                }
                let rows = if tree.is_leaf(node) {
                    tree.index(node).len()
                } else {
                    tree.children(node)
                        .iter()
                        .map(|&c| data.transfer[c].rank())
                        .sum()
                };
                data.transfer[node] = Transfer::Identity(rows);
                if let Some(basis) = data.basis.as_mut() {
                    let own = if tree.is_leaf(node) {
                        tree.index(node).to_vec()
                    } else {
                        tree.children(node)
                            .iter()
                            .flat_map(|&c| basis[c].iter().copied())
                            .collect()
                    };
                    basis[node] = own;
                }
            }
        }
    }

    pub(crate) fn side(&self, side: Side) -> &SideData<T> {
        match (side, &self.col) {
            (Side::Col, Some(col)) => col,
            _ => &self.row,
        }
    }

    pub(crate) fn side_mut(&mut self, side: Side) -> &mut SideData<T> {
        match (side, &mut self.col) {
            (Side::Col, Some(col)) => col,
            _ => &mut self.row,
        }
    }

    /// Mutable data of one side together with the data of the dual side, if stored separately.
    pub(crate) fn split_mut(&mut self, side: Side) -> (&mut SideData<T>, Option<&mut SideData<T>>) {
        match (side, self.col.as_mut()) {
            (_, None) => (&mut self.row, None),
            (Side::Row, Some(col)) => (&mut self.row, Some(col)),
            (Side::Col, Some(col)) => (col, Some(&mut self.row)),
        }
    }

    pub(crate) fn block_provider(&self) -> H2Result<Box<dyn BlockProvider<T> + '_>> {
        match self.mem_type {
            MemType::Full => Ok(Box::new(CachedBlockProvider::new(
                self.side(Side::Row),
                self.side(Side::Col),
            )?)),
            MemType::Low => Ok(Box::new(ComputedBlockProvider::new(
                self.problem,
                self.side(Side::Row),
                self.side(Side::Col),
            )?)),
        }
    }

    /// The problem this matrix approximates.
    pub fn problem(&self) -> &'a Problem<T, K> {
        self.problem
    }

    /// Number of rows and columns.
    pub fn shape(&self) -> [usize; 2] {
        self.problem.shape()
    }

    /// Representation type.
    pub fn h2_type(&self) -> H2Type {
        self.h2_type
    }

    /// Memory model.
    pub fn mem_type(&self) -> MemType {
        self.mem_type
    }

    /// Check if row and column data are shared.
    pub fn is_symmetric(&self) -> bool {
        self.col.is_none()
    }

    /// Transfer matrices of one tree.
    pub fn transfer(&self, side: Side) -> &[Transfer<T>] {
        &self.side(side).transfer
    }

    /// Basis indices of one tree, present for [H2Type::Mcbh].
    pub fn basis(&self, side: Side) -> Option<&[Vec<usize>]> {
        self.side(side).basis.as_deref()
    }

    /// Interaction blocks of one tree, present for [MemType::Full].
    ///
    /// Block `[i][k]` couples node `i` with its `k`-th far neighbour.
    pub fn interaction(&self, side: Side) -> Option<&BlockList<T>> {
        self.side(side).interaction.as_ref()
    }

    /// Close blocks of one tree, present for [MemType::Full].
    pub fn close(&self, side: Side) -> Option<&BlockList<T>> {
        self.side(side).close.as_ref()
    }

    /// Number of basis elements of every node of one tree.
    pub fn ranks(&self, side: Side) -> Vec<usize> {
        self.transfer(side).iter().map(|t| t.rank()).collect()
    }

    /// Independent deep copy. Row and column data of a symmetric matrix stay shared in the copy.
    pub fn copy(&self) -> Self {
        Self {
            problem: self.problem,
            row: self.row.clone(),
            col: self.col.clone(),
            h2_type: self.h2_type,
            mem_type: self.mem_type,
        }
    }

    /// Memory footprint in bytes of the selected components.
    ///
    /// Components that are not stored (identity transfers, blocks evaluated on the fly) do not
    /// contribute.
    pub fn nbytes(&self, parts: MemoryParts) -> usize {
        let mut total = if parts.overhead {
            size_of::<Self>()
        } else {
            0
        };
        for &side in self.problem.sides() {
            let data = self.side(side);
            if parts.transfer {
                total += data.transfer.iter().map(|t| t.nelements()).sum::<usize>() * size_of::<T>();
                if parts.overhead {
                    total += data.transfer.len() * size_of::<Transfer<T>>();
                }
            }
            if parts.interaction {
                if let Some(blocks) = &data.interaction {
                    total += block_list_bytes(blocks, parts.overhead);
                }
            }
            if parts.close {
                if let Some(blocks) = &data.close {
                    total += block_list_bytes(blocks, parts.overhead);
                }
            }
            if parts.basis {
                if let Some(basis) = &data.basis {
                    total += basis.iter().map(|b| b.len()).sum::<usize>() * size_of::<usize>();
                    if parts.overhead {
                        total += basis.len() * size_of::<Vec<usize>>();
                    }
                }
            }
        }
        total
    }

    /// Dense matrix represented by this H2-matrix.
    pub fn to_dense(&self) -> H2Result<RlstArray<T, 2>> {
        self.dot_block(&identity(self.shape()[1]))
    }
}
