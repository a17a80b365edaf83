//! Priors model-group carry-over.
//!
//! Constrained runs overwrite GRADES model priors with gauge-derived ones,
//! so the archive keeps a verbatim copy of the current priors file's `model`
//! group under a `priors` group: group attributes, dimensions (unlimited
//! stays unlimited) and every variable with its attributes and data. Unlike
//! the other modules this is not a keyed merge, so it bypasses the reader
//! interface and appends straight into the archive.

use std::path::PathBuf;

use netcdf::types::{BasicType, VariableType};
use tracing::warn;

use crate::config::VariableMetadata;
use crate::topology::priors_file_name;

use super::{require_group, ExtractContext, ModuleError};

pub(crate) fn priors_path(ctx: &ExtractContext) -> PathBuf {
    ctx.paths
        .sos_dir()
        .join(priors_file_name(&ctx.continent.code))
}

/// Copy the priors `model` group into the archive as group `priors`.
pub fn append_model_group(
    archive: &mut netcdf::FileMut,
    ctx: &ExtractContext,
    metadata: &VariableMetadata,
) -> Result<(), ModuleError> {
    let source = netcdf::open(priors_path(ctx))?;
    let model = require_group(&source, "model")?;
    let mut dest = archive.add_group("priors")?;

    for attr in model.attributes() {
        let name = attr.name().to_string();
        if let Ok(value) = attr.value() {
            dest.add_attribute(&name, value)?;
        }
    }

    for dim in model.dimensions() {
        if dim.is_unlimited() {
            dest.add_unlimited_dimension(&dim.name())?;
        } else {
            dest.add_dimension(&dim.name(), dim.len())?;
        }
    }

    for var in model.variables() {
        copy_variable(&mut dest, &var, metadata)?;
    }
    Ok(())
}

fn copy_variable(
    dest: &mut netcdf::GroupMut,
    var: &netcdf::Variable,
    metadata: &VariableMetadata,
) -> Result<(), ModuleError> {
    let name = var.name();
    let dim_names: Vec<String> = var.dimensions().iter().map(|d| d.name()).collect();
    let dims: Vec<&str> = dim_names.iter().map(String::as_str).collect();

    match var.vartype() {
        VariableType::Basic(BasicType::Float | BasicType::Double) => {
            let values = var.get_values::<f64, _>(..)?;
            let mut new = dest.add_variable::<f64>(&name, &dims)?;
            copy_attrs(&mut new, var)?;
            put_sized(&mut new, &values, var)?;
            overlay(&mut new, metadata, &name)?;
        }
        VariableType::Basic(BasicType::Int64 | BasicType::Uint64) => {
            let values = var.get_values::<i64, _>(..)?;
            let mut new = dest.add_variable::<i64>(&name, &dims)?;
            copy_attrs(&mut new, var)?;
            put_sized(&mut new, &values, var)?;
            overlay(&mut new, metadata, &name)?;
        }
        VariableType::Basic(
            BasicType::Byte
            | BasicType::Ubyte
            | BasicType::Short
            | BasicType::Ushort
            | BasicType::Int
            | BasicType::Uint,
        ) => {
            let values = var.get_values::<i32, _>(..)?;
            let mut new = dest.add_variable::<i32>(&name, &dims)?;
            copy_attrs(&mut new, var)?;
            put_sized(&mut new, &values, var)?;
            overlay(&mut new, metadata, &name)?;
        }
        VariableType::String if dims.len() == 1 => {
            let len = var.dimensions().first().map(|d| d.len()).unwrap_or(0);
            let mut new = dest.add_string_variable(&name, &dims)?;
            copy_attrs(&mut new, var)?;
            for i in 0..len {
                let value = var.get_string([i])?;
                new.put_string(&value, [i])?;
            }
            overlay(&mut new, metadata, &name)?;
        }
        other => {
            warn!(variable = %name, vartype = ?other, "priors variable type not carried, skipping");
        }
    }
    Ok(())
}

/// Write with extents taken from the source shape. An unlimited target
/// dimension starts at length zero, so a bare `..` would write nothing.
fn put_sized<T: netcdf::NcPutGet>(
    new: &mut netcdf::VariableMut,
    values: &[T],
    source: &netcdf::Variable,
) -> Result<(), ModuleError> {
    let dims = source.dimensions();
    match dims.len() {
        1 => new.put_values(values, 0..dims[0].len())?,
        2 => new.put_values(values, (0..dims[0].len(), 0..dims[1].len()))?,
        _ => new.put_values(values, ..)?,
    }
    Ok(())
}

/// Attributes come over verbatim, `_FillValue` included; they are written
/// before the data so the fill value still applies.
fn copy_attrs(new: &mut netcdf::VariableMut, var: &netcdf::Variable) -> Result<(), ModuleError> {
    for attr in var.attributes() {
        let name = attr.name().to_string();
        if let Ok(value) = attr.value() {
            new.put_attribute(&name, value)?;
        }
    }
    Ok(())
}

fn overlay(
    new: &mut netcdf::VariableMut,
    metadata: &VariableMetadata,
    name: &str,
) -> Result<(), ModuleError> {
    for (aname, value) in metadata.attrs_for(&["priors", name]) {
        new.put_attribute(&aname, value)?;
    }
    Ok(())
}
