//! Serialization of module records into the archive.
//!
//! The writer owns the record-to-NetCDF mapping: group placement, local
//! dimensions, `_FillValue` handling, attribute layering and the contiguous
//! ragged representation. It knows nothing about individual modules; every
//! record is written by the same rules.
//!
//! Attribute layering is source first, curated metadata second, so the
//! metadata configuration wins on conflicts. `_FillValue` is always the
//! archive sentinel and is only written on freshly created variables,
//! before any data lands in them.

use crate::config::VariableMetadata;
use crate::fill::FillPolicy;
use crate::record::{
    AttrPair, DimRef, Field, FieldData, GroupTarget, LocalDim, Matrix2Strings, Ragged,
    RecordGroup, ResultRecord,
};

use super::ArchiveError;

/// Archive dimension name for a [`DimRef`].
fn dim_name(dim: &DimRef) -> &str {
    match dim {
        DimRef::NumReaches => "num_reaches",
        DimRef::NumNodes => "num_nodes",
        DimRef::TimeSteps => "time_steps",
        DimRef::Local(name) => name,
    }
}

/// Writes [`ResultRecord`]s into an open archive handle.
pub struct ArchiveWriter<'a> {
    fill: &'a FillPolicy,
    metadata: &'a VariableMetadata,
}

impl<'a> ArchiveWriter<'a> {
    pub fn new(fill: &'a FillPolicy, metadata: &'a VariableMetadata) -> Self {
        Self { fill, metadata }
    }

    /// Write every group of `record` into `file`. Groups and variables are
    /// created on first use and overwritten in place when they already
    /// exist, so rewriting the same record is safe.
    pub fn write_record(
        &self,
        file: &mut netcdf::FileMut,
        record: &ResultRecord,
    ) -> Result<(), ArchiveError> {
        for group in &record.groups {
            self.write_group(file, record.module, group)?;
        }
        Ok(())
    }

    fn write_group(
        &self,
        file: &mut netcdf::FileMut,
        module: &str,
        group: &RecordGroup,
    ) -> Result<(), ArchiveError> {
        match group.target {
            GroupTarget::Module => {
                let mut target = ensure_file_group(file, module)?;
                self.write_into(&mut target, group, &[module])
            }
            GroupTarget::ModuleChild(child) => {
                let mut parent = ensure_file_group(file, module)?;
                let mut target = ensure_child_group(&mut parent, child)?;
                self.write_into(&mut target, group, &[module, child])
            }
            GroupTarget::Root => {
                let mut target = file
                    .root_mut()
                    .ok_or_else(|| ArchiveError::MissingGroup("/".to_string()))?;
                self.write_into(&mut target, group, &[module])
            }
            GroupTarget::Reaches => {
                let mut target = ensure_file_group(file, "reaches")?;
                self.write_into(&mut target, group, &[module, "reaches"])
            }
            GroupTarget::Nodes => {
                let mut target = ensure_file_group(file, "nodes")?;
                self.write_into(&mut target, group, &[module, "nodes"])
            }
        }
    }

    fn write_into(
        &self,
        target: &mut netcdf::GroupMut,
        group: &RecordGroup,
        meta_prefix: &[&str],
    ) -> Result<(), ArchiveError> {
        for dim in &group.dims {
            ensure_dimension(target, dim)?;
        }
        for field in &group.fields {
            self.write_field(target, field, meta_prefix)?;
        }
        Ok(())
    }

    fn write_field(
        &self,
        target: &mut netcdf::GroupMut,
        field: &Field,
        meta_prefix: &[&str],
    ) -> Result<(), ArchiveError> {
        let dims: Vec<&str> = field.dims.iter().map(dim_name).collect();
        match &field.data {
            FieldData::F64(values) => self.write_vec(
                target,
                field,
                &dims,
                values,
                netcdf::AttributeValue::Double(self.fill.float64()),
                meta_prefix,
            ),
            FieldData::I32(values) => self.write_vec(
                target,
                field,
                &dims,
                values,
                netcdf::AttributeValue::Int(self.fill.int32()),
                meta_prefix,
            ),
            FieldData::I64(values) => self.write_vec(
                target,
                field,
                &dims,
                values,
                netcdf::AttributeValue::Longlong(self.fill.int64()),
                meta_prefix,
            ),
            FieldData::F64Matrix(m) => self.write_matrix(
                target,
                field,
                &dims,
                m.as_slice(),
                m.nrows(),
                m.ncols(),
                netcdf::AttributeValue::Double(self.fill.float64()),
                meta_prefix,
            ),
            FieldData::I32Matrix(m) => self.write_matrix(
                target,
                field,
                &dims,
                m.as_slice(),
                m.nrows(),
                m.ncols(),
                netcdf::AttributeValue::Int(self.fill.int32()),
                meta_prefix,
            ),
            FieldData::RaggedF64(r) => self.write_ragged(
                target,
                field,
                &dims,
                r,
                netcdf::AttributeValue::Double(self.fill.float64()),
                meta_prefix,
            ),
            FieldData::RaggedI32(r) => self.write_ragged(
                target,
                field,
                &dims,
                r,
                netcdf::AttributeValue::Int(self.fill.int32()),
                meta_prefix,
            ),
            FieldData::RaggedI64(r) => self.write_ragged(
                target,
                field,
                &dims,
                r,
                netcdf::AttributeValue::Longlong(self.fill.int64()),
                meta_prefix,
            ),
            FieldData::Strings(values) => {
                self.write_strings(target, field, &dims, values, meta_prefix)
            }
            FieldData::StringMatrix(m) => {
                self.write_string_matrix(target, field, &dims, m, meta_prefix)
            }
        }
    }

    fn write_vec<T: netcdf::NcPutGet + Copy>(
        &self,
        target: &mut netcdf::GroupMut,
        field: &Field,
        dims: &[&str],
        values: &[T],
        fill_attr: netcdf::AttributeValue,
        meta_prefix: &[&str],
    ) -> Result<(), ArchiveError> {
        let (mut var, fresh) = numeric_var::<T>(target, field.name, dims)?;
        self.apply_attrs(&mut var, fresh, Some(fill_attr), &field.attrs, meta_prefix, field.name)?;
        if !values.is_empty() {
            var.put_values(values, 0..values.len())?;
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn write_matrix<T: netcdf::NcPutGet + Copy>(
        &self,
        target: &mut netcdf::GroupMut,
        field: &Field,
        dims: &[&str],
        values: &[T],
        nrows: usize,
        ncols: usize,
        fill_attr: netcdf::AttributeValue,
        meta_prefix: &[&str],
    ) -> Result<(), ArchiveError> {
        let (mut var, fresh) = numeric_var::<T>(target, field.name, dims)?;
        self.apply_attrs(&mut var, fresh, Some(fill_attr), &field.attrs, meta_prefix, field.name)?;
        if nrows > 0 && ncols > 0 {
            var.put_values(values, (0..nrows, 0..ncols))?;
        }
        Ok(())
    }

    /// A ragged field becomes two variables: the flattened payload over its
    /// own `<name>_obs` dimension and a `<name>_row_size` count over the
    /// companion dimension, linked by the CF `sample_dimension` attribute.
    fn write_ragged<T: netcdf::NcPutGet + Copy>(
        &self,
        target: &mut netcdf::GroupMut,
        field: &Field,
        companion_dims: &[&str],
        ragged: &Ragged<T>,
        fill_attr: netcdf::AttributeValue,
        meta_prefix: &[&str],
    ) -> Result<(), ArchiveError> {
        let (payload, row_sizes) = ragged.flatten();
        let obs_dim = format!("{}_obs", field.name);
        if !target.dimensions().any(|d| d.name() == obs_dim) {
            target.add_dimension(&obs_dim, payload.len())?;
        }
        {
            let (mut var, fresh) = numeric_var::<T>(target, field.name, &[obs_dim.as_str()])?;
            self.apply_attrs(
                &mut var,
                fresh,
                Some(fill_attr),
                &field.attrs,
                meta_prefix,
                field.name,
            )?;
            if !payload.is_empty() {
                var.put_values(&payload, 0..payload.len())?;
            }
        }
        {
            let row_size_name = format!("{}_row_size", field.name);
            let (mut var, fresh) = numeric_var::<i32>(target, &row_size_name, companion_dims)?;
            if fresh {
                var.put_attribute("sample_dimension", obs_dim.as_str())?;
            }
            if !row_sizes.is_empty() {
                var.put_values(&row_sizes, 0..row_sizes.len())?;
            }
        }
        Ok(())
    }

    fn write_strings(
        &self,
        target: &mut netcdf::GroupMut,
        field: &Field,
        dims: &[&str],
        values: &[String],
        meta_prefix: &[&str],
    ) -> Result<(), ArchiveError> {
        let (mut var, fresh) = string_var(target, field.name, dims)?;
        self.apply_attrs(
            &mut var,
            fresh,
            Some(netcdf::AttributeValue::Str(self.fill.string().to_string())),
            &field.attrs,
            meta_prefix,
            field.name,
        )?;
        for (i, s) in values.iter().enumerate() {
            var.put_string(s, [i])?;
        }
        Ok(())
    }

    fn write_string_matrix(
        &self,
        target: &mut netcdf::GroupMut,
        field: &Field,
        dims: &[&str],
        matrix: &Matrix2Strings,
        meta_prefix: &[&str],
    ) -> Result<(), ArchiveError> {
        let (mut var, fresh) = string_var(target, field.name, dims)?;
        self.apply_attrs(
            &mut var,
            fresh,
            Some(netcdf::AttributeValue::Str(self.fill.string().to_string())),
            &field.attrs,
            meta_prefix,
            field.name,
        )?;
        for r in 0..matrix.nrows() {
            for c in 0..matrix.ncols() {
                var.put_string(matrix.get(r, c), [r, c])?;
            }
        }
        Ok(())
    }

    /// Attribute order: archive `_FillValue` (fresh variables only, before
    /// any data), then source attributes, then the curated overlay.
    fn apply_attrs(
        &self,
        var: &mut netcdf::VariableMut,
        fresh: bool,
        fill_attr: Option<netcdf::AttributeValue>,
        source_attrs: &[AttrPair],
        meta_prefix: &[&str],
        name: &str,
    ) -> Result<(), ArchiveError> {
        if fresh {
            if let Some(fill) = fill_attr {
                var.put_attribute("_FillValue", fill)?;
            }
        }
        for (attr_name, value) in source_attrs {
            if attr_name.as_str() != "_FillValue" {
                var.put_attribute(attr_name, value.clone())?;
            }
        }
        let mut path: Vec<&str> = meta_prefix.to_vec();
        path.push(name);
        for (attr_name, value) in self.metadata.attrs_for(&path) {
            if attr_name != "_FillValue" {
                var.put_attribute(&attr_name, value)?;
            }
        }
        Ok(())
    }
}

// ============================================================================
// Group and variable plumbing
// ============================================================================

/// A top-level archive group, created on first use.
fn ensure_file_group<'f>(
    file: &'f mut netcdf::FileMut,
    name: &str,
) -> Result<netcdf::GroupMut<'f>, ArchiveError> {
    let exists = file.group(name)?.is_some();
    if exists {
        file.group_mut(name)?
            .ok_or_else(|| ArchiveError::MissingGroup(name.to_string()))
    } else {
        Ok(file.add_group(name)?)
    }
}

/// A nested child group, created on first use.
fn ensure_child_group<'g>(
    parent: &'g mut netcdf::GroupMut<'_>,
    name: &str,
) -> Result<netcdf::GroupMut<'g>, ArchiveError> {
    let exists = parent.groups().any(|g| g.name() == name);
    if exists {
        parent
            .group_mut(name)
            .ok_or_else(|| ArchiveError::MissingGroup(name.to_string()))
    } else {
        Ok(parent.add_group(name)?)
    }
}

fn ensure_dimension(group: &mut netcdf::GroupMut, dim: &LocalDim) -> Result<(), ArchiveError> {
    if group.dimensions().any(|d| d.name() == dim.name) {
        return Ok(());
    }
    if dim.unlimited {
        group.add_unlimited_dimension(dim.name)?;
    } else {
        group.add_dimension(dim.name, dim.len)?;
    }
    Ok(())
}

/// Create a typed variable, or hand back the existing one for overwriting.
fn numeric_var<'g, T: netcdf::NcPutGet>(
    target: &'g mut netcdf::GroupMut<'_>,
    name: &str,
    dims: &[&str],
) -> Result<(netcdf::VariableMut<'g>, bool), ArchiveError> {
    let fresh = target.variable(name).is_none();
    let var = if fresh {
        target.add_variable::<T>(name, dims)?
    } else {
        target
            .variable_mut(name)
            .ok_or_else(|| ArchiveError::MissingVariable(name.to_string()))?
    };
    Ok((var, fresh))
}

fn string_var<'g>(
    target: &'g mut netcdf::GroupMut<'_>,
    name: &str,
    dims: &[&str],
) -> Result<(netcdf::VariableMut<'g>, bool), ArchiveError> {
    let fresh = target.variable(name).is_none();
    let var = if fresh {
        target.add_string_variable(name, dims)?
    } else {
        target
            .variable_mut(name)
            .ok_or_else(|| ArchiveError::MissingVariable(name.to_string()))?
    };
    Ok((var, fresh))
}
