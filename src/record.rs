//! In-memory representation of one module's merged results.
//!
//! A reader produces a [`ResultRecord`]: a tree of groups, local dimensions
//! and typed fields that the archive writer serializes without knowing which
//! module it came from. The record is always fully allocated against the
//! master topology before any source file is read, so a reader that finds
//! nothing still yields a complete record of sentinels.
//!
//! Ragged per-reach and per-node data (observation series whose length varies
//! by reach) is kept as a [`Ragged`] value and serialized as a contiguous
//! ragged array: one flattened payload variable plus a row-size variable over
//! the companion dimension.

use crate::fill::FillPolicy;

// ============================================================================
// Placement
// ============================================================================

/// Where a record group lands in the archive file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupTarget {
    /// The module's own top-level group, named after the module.
    Module,
    /// A child group nested under the module's group.
    ModuleChild(&'static str),
    /// The root of the archive file.
    Root,
    /// The shared `reaches` group.
    Reaches,
    /// The shared `nodes` group.
    Nodes,
}

/// A dimension reference for a field, resolved by the writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DimRef {
    /// The archive-level `num_reaches` dimension.
    NumReaches,
    /// The archive-level `num_nodes` dimension.
    NumNodes,
    /// The archive-level `time_steps` dimension.
    TimeSteps,
    /// A dimension declared by this record in its own group.
    Local(&'static str),
}

/// A dimension a record declares inside its target group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalDim {
    pub name: &'static str,
    pub len: usize,
    pub unlimited: bool,
}

impl LocalDim {
    pub fn fixed(name: &'static str, len: usize) -> Self {
        Self {
            name,
            len,
            unlimited: false,
        }
    }

    pub fn unlimited(name: &'static str, len: usize) -> Self {
        Self {
            name,
            len,
            unlimited: true,
        }
    }
}

// ============================================================================
// Dense and ragged containers
// ============================================================================

/// Row-major dense 2-D array.
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix<T> {
    values: Vec<T>,
    nrows: usize,
    ncols: usize,
}

impl<T: Copy> Matrix<T> {
    /// Allocate an `nrows x ncols` matrix filled with `fill`.
    pub fn filled(nrows: usize, ncols: usize, fill: T) -> Self {
        Self {
            values: vec![fill; nrows * ncols],
            nrows,
            ncols,
        }
    }

    /// Wrap an existing row-major buffer. The buffer length must equal
    /// `nrows * ncols`.
    pub fn from_vec(values: Vec<T>, nrows: usize, ncols: usize) -> Self {
        assert_eq!(values.len(), nrows * ncols);
        Self {
            values,
            nrows,
            ncols,
        }
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }

    pub fn ncols(&self) -> usize {
        self.ncols
    }

    pub fn get(&self, row: usize, col: usize) -> T {
        self.values[row * self.ncols + col]
    }

    pub fn set(&mut self, row: usize, col: usize, value: T) {
        self.values[row * self.ncols + col] = value;
    }

    /// Overwrite one row. Shorter input leaves the tail filled; longer input
    /// is truncated to the row width.
    pub fn set_row(&mut self, row: usize, values: &[T]) {
        let n = values.len().min(self.ncols);
        let start = row * self.ncols;
        self.values[start..start + n].copy_from_slice(&values[..n]);
    }

    pub fn row(&self, row: usize) -> &[T] {
        let start = row * self.ncols;
        &self.values[start..start + self.ncols]
    }

    /// The flattened row-major backing slice.
    pub fn as_slice(&self) -> &[T] {
        &self.values
    }
}

/// Variable-length rows keyed by position in a companion dimension.
#[derive(Debug, Clone, PartialEq)]
pub struct Ragged<T> {
    rows: Vec<Vec<T>>,
}

impl<T: Copy> Ragged<T> {
    /// One singleton `[sentinel]` row per position.
    pub fn filled(len: usize, sentinel: T) -> Self {
        Self {
            rows: vec![vec![sentinel]; len],
        }
    }

    /// No rows at all; positions are appended with [`push_row`].
    ///
    /// [`push_row`]: Ragged::push_row
    pub fn empty() -> Self {
        Self { rows: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn row(&self, index: usize) -> &[T] {
        &self.rows[index]
    }

    pub fn set_row(&mut self, index: usize, values: Vec<T>) {
        self.rows[index] = values;
    }

    pub fn push_row(&mut self, values: Vec<T>) {
        self.rows.push(values);
    }

    /// Total element count across all rows.
    pub fn total_len(&self) -> usize {
        self.rows.iter().map(Vec::len).sum()
    }

    /// Flatten into the contiguous ragged representation: the concatenated
    /// payload and one row length per position.
    pub fn flatten(&self) -> (Vec<T>, Vec<i32>) {
        let mut payload = Vec::with_capacity(self.total_len());
        let mut row_sizes = Vec::with_capacity(self.rows.len());
        for row in &self.rows {
            payload.extend_from_slice(row);
            row_sizes.push(row.len() as i32);
        }
        (payload, row_sizes)
    }
}

// ============================================================================
// Fields
// ============================================================================

/// The typed payload of one archive variable.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldData {
    F64(Vec<f64>),
    I32(Vec<i32>),
    I64(Vec<i64>),
    F64Matrix(Matrix<f64>),
    I32Matrix(Matrix<i32>),
    RaggedF64(Ragged<f64>),
    RaggedI32(Ragged<i32>),
    RaggedI64(Ragged<i64>),
    Strings(Vec<String>),
    StringMatrix(Matrix2Strings),
}

/// Dense 2-D array of strings, row major.
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix2Strings {
    values: Vec<String>,
    nrows: usize,
    ncols: usize,
}

impl Matrix2Strings {
    pub fn filled(nrows: usize, ncols: usize, fill: &str) -> Self {
        Self {
            values: vec![fill.to_string(); nrows * ncols],
            nrows,
            ncols,
        }
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }

    pub fn ncols(&self) -> usize {
        self.ncols
    }

    pub fn get(&self, row: usize, col: usize) -> &str {
        &self.values[row * self.ncols + col]
    }

    pub fn set(&mut self, row: usize, col: usize, value: String) {
        self.values[row * self.ncols + col] = value;
    }
}

/// A captured NetCDF attribute, ready to re-emit.
pub type AttrPair = (String, netcdf::AttributeValue);

/// One variable of the record: name, shape and typed data, plus the
/// attributes carried over from the source file or metadata overlay.
#[derive(Debug, Clone)]
pub struct Field {
    pub name: &'static str,
    pub dims: Vec<DimRef>,
    pub data: FieldData,
    pub attrs: Vec<AttrPair>,
}

impl Field {
    pub fn new(name: &'static str, dims: &[DimRef], data: FieldData) -> Self {
        Self {
            name,
            dims: dims.to_vec(),
            data,
            attrs: Vec::new(),
        }
    }

    /// A per-reach f64 vector pre-filled with the sentinel.
    pub fn f64_by_reach(name: &'static str, len: usize, fill: &FillPolicy) -> Self {
        Self::new(
            name,
            &[DimRef::NumReaches],
            FieldData::F64(vec![fill.float64(); len]),
        )
    }

    /// A per-reach-by-time f64 matrix pre-filled with the sentinel.
    pub fn f64_reach_by_time(
        name: &'static str,
        nrows: usize,
        ncols: usize,
        fill: &FillPolicy,
    ) -> Self {
        Self::new(
            name,
            &[DimRef::NumReaches, DimRef::TimeSteps],
            FieldData::F64Matrix(Matrix::filled(nrows, ncols, fill.float64())),
        )
    }

    /// A per-reach ragged f64 series, one `[sentinel]` row per reach.
    pub fn ragged_f64_by_reach(name: &'static str, len: usize, fill: &FillPolicy) -> Self {
        Self::new(
            name,
            &[DimRef::NumReaches],
            FieldData::RaggedF64(Ragged::filled(len, fill.float64())),
        )
    }

    /// A per-node ragged f64 series, one `[sentinel]` row per node.
    pub fn ragged_f64_by_node(name: &'static str, len: usize, fill: &FillPolicy) -> Self {
        Self::new(
            name,
            &[DimRef::NumNodes],
            FieldData::RaggedF64(Ragged::filled(len, fill.float64())),
        )
    }

    /// A per-reach ragged i32 series, one `[sentinel]` row per reach.
    pub fn ragged_i32_by_reach(name: &'static str, len: usize, fill: &FillPolicy) -> Self {
        Self::new(
            name,
            &[DimRef::NumReaches],
            FieldData::RaggedI32(Ragged::filled(len, fill.int32())),
        )
    }

    /// A per-node ragged i32 series, one `[sentinel]` row per node.
    pub fn ragged_i32_by_node(name: &'static str, len: usize, fill: &FillPolicy) -> Self {
        Self::new(
            name,
            &[DimRef::NumNodes],
            FieldData::RaggedI32(Ragged::filled(len, fill.int32())),
        )
    }

    pub fn with_attrs(mut self, attrs: Vec<AttrPair>) -> Self {
        self.attrs = attrs;
        self
    }
}

// ============================================================================
// Record tree
// ============================================================================

/// One group's worth of fields, bound for a single location in the archive.
#[derive(Debug, Clone)]
pub struct RecordGroup {
    pub target: GroupTarget,
    pub dims: Vec<LocalDim>,
    pub fields: Vec<Field>,
}

impl RecordGroup {
    pub fn new(target: GroupTarget) -> Self {
        Self {
            target,
            dims: Vec::new(),
            fields: Vec::new(),
        }
    }

    pub fn with_dims(mut self, dims: Vec<LocalDim>) -> Self {
        self.dims = dims;
        self
    }

    pub fn with_fields(mut self, fields: Vec<Field>) -> Self {
        self.fields = fields;
        self
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn field_mut(&mut self, name: &str) -> Option<&mut Field> {
        self.fields.iter_mut().find(|f| f.name == name)
    }
}

/// The complete output of one module reader.
#[derive(Debug, Clone)]
pub struct ResultRecord {
    /// Module name; also names the module's top-level archive group.
    pub module: &'static str,
    pub groups: Vec<RecordGroup>,
}

impl ResultRecord {
    pub fn new(module: &'static str) -> Self {
        Self {
            module,
            groups: Vec::new(),
        }
    }

    pub fn with_groups(mut self, groups: Vec<RecordGroup>) -> Self {
        self.groups = groups;
        self
    }

    pub fn group(&self, target: GroupTarget) -> Option<&RecordGroup> {
        self.groups.iter().find(|g| g.target == target)
    }

    pub fn group_mut(&mut self, target: GroupTarget) -> Option<&mut RecordGroup> {
        self.groups.iter_mut().find(|g| g.target == target)
    }

    /// Total number of fields across all groups.
    pub fn field_count(&self) -> usize {
        self.groups.iter().map(|g| g.fields.len()).sum()
    }
}
