//! Per-block field storage and checkpoint files.
//!
//! A field stores `elements` values per node on every block it was created
//! for. Fields are created either zero-filled or from a checkpoint written by
//! [`Field::write_to_file`]; checkpoints are JSON with round-trip float
//! formatting so a reload is bit-identical.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::block::Block;
use crate::error::{KernelError, KernelResult};
use crate::Real;

/// Name and per-node element count of a field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    /// Field name, also used in checkpoint file names.
    pub name: String,
    /// Values stored per node.
    pub elements: usize,
}

impl FieldDescriptor {
    /// Shorthand constructor.
    pub fn new(name: impl Into<String>, elements: usize) -> Self {
        Self {
            name: name.into(),
            elements,
        }
    }
}

/// Value types a field may hold.
pub trait FieldValue:
    Copy + Default + PartialEq + Send + Sync + Serialize + DeserializeOwned + std::fmt::Debug + 'static
{
}

impl FieldValue for Real {}
impl FieldValue for i32 {}

/// How a simulation obtains its initial field contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartMode {
    /// Allocate zero-filled storage.
    Scratch,
    /// Load every field from checkpoints written at `time_step`.
    Restart {
        /// Prefix the checkpoint files were written with.
        case_name: String,
        /// Step the checkpoint was taken at.
        time_step: u64,
    },
}

/// Storage of one named quantity across blocks.
#[derive(Debug, Clone, PartialEq)]
pub struct Field<T: FieldValue> {
    descriptor: FieldDescriptor,
    data: BTreeMap<usize, Vec<T>>,
}

/// Field of reals.
pub type RealField = Field<Real>;
/// Field of integers.
pub type IntField = Field<i32>;

#[derive(Serialize, Deserialize)]
struct FieldSnapshot<T> {
    name: String,
    elements: usize,
    time_step: u64,
    blocks: Vec<BlockSnapshot<T>>,
}

#[derive(Serialize, Deserialize)]
struct BlockSnapshot<T> {
    block: usize,
    cells: usize,
    values: Vec<T>,
}

/// File a field checkpoint lives in.
pub fn checkpoint_path(case_name: &str, field_name: &str, time_step: u64) -> PathBuf {
    PathBuf::from(format!("{case_name}_{field_name}_T{time_step}.json"))
}

impl<T: FieldValue> Field<T> {
    /// Allocate default-valued storage on every block.
    pub fn create_from_scratch(descriptor: FieldDescriptor, blocks: &[Block]) -> Self {
        Self::filled(descriptor, blocks, T::default())
    }

    /// Allocate storage on every block with every value set to `value`.
    pub fn filled(descriptor: FieldDescriptor, blocks: &[Block], value: T) -> Self {
        let data = blocks
            .iter()
            .map(|b| (b.id, vec![value; b.cell_count() * descriptor.elements]))
            .collect();
        Self { descriptor, data }
    }

    /// Load a field from the checkpoint written at `time_step`.
    ///
    /// The file must hold exactly the blocks given, with matching node and
    /// element counts.
    pub fn create_from_file(
        descriptor: FieldDescriptor,
        case_name: &str,
        blocks: &[Block],
        time_step: u64,
    ) -> KernelResult<Self> {
        let path = checkpoint_path(case_name, &descriptor.name, time_step);
        let text = fs::read_to_string(&path).map_err(|source| KernelError::Io {
            path: path.clone(),
            source,
        })?;
        let snapshot: FieldSnapshot<T> =
            serde_json::from_str(&text).map_err(|source| KernelError::Format {
                path: path.clone(),
                source,
            })?;
        Self::from_snapshot(descriptor, blocks, snapshot, &path)
    }

    /// Create from scratch or from file according to `start`.
    pub fn create(descriptor: FieldDescriptor, blocks: &[Block], start: &StartMode) -> KernelResult<Self> {
        match start {
            StartMode::Scratch => Ok(Self::create_from_scratch(descriptor, blocks)),
            StartMode::Restart {
                case_name,
                time_step,
            } => Self::create_from_file(descriptor, case_name, blocks, *time_step),
        }
    }

    fn from_snapshot(
        descriptor: FieldDescriptor,
        blocks: &[Block],
        snapshot: FieldSnapshot<T>,
        path: &Path,
    ) -> KernelResult<Self> {
        let mismatch = |reason: String| KernelError::CheckpointMismatch {
            path: path.to_path_buf(),
            field: descriptor.name.clone(),
            reason,
        };
        if snapshot.name != descriptor.name {
            return Err(mismatch(format!("file holds field '{}'", snapshot.name)));
        }
        if snapshot.elements != descriptor.elements {
            return Err(mismatch(format!(
                "file has {} elements per node, expected {}",
                snapshot.elements, descriptor.elements
            )));
        }
        let mut stored: BTreeMap<usize, BlockSnapshot<T>> =
            snapshot.blocks.into_iter().map(|b| (b.block, b)).collect();
        let mut data = BTreeMap::new();
        for block in blocks {
            let entry = stored
                .remove(&block.id)
                .ok_or_else(|| mismatch(format!("block {} missing", block.id)))?;
            let expected = block.cell_count() * descriptor.elements;
            if entry.cells != block.cell_count() || entry.values.len() != expected {
                return Err(mismatch(format!(
                    "block {} has {} nodes and {} values, expected {} nodes and {expected} values",
                    block.id,
                    entry.cells,
                    entry.values.len(),
                    block.cell_count()
                )));
            }
            data.insert(block.id, entry.values);
        }
        Ok(Self { descriptor, data })
    }

    /// Write every block to the checkpoint file for `time_step`.
    pub fn write_to_file(&self, case_name: &str, time_step: u64) -> KernelResult<PathBuf> {
        let path = checkpoint_path(case_name, &self.descriptor.name, time_step);
        let snapshot = FieldSnapshot {
            name: self.descriptor.name.clone(),
            elements: self.descriptor.elements,
            time_step,
            blocks: self
                .data
                .iter()
                .map(|(&block, values)| BlockSnapshot {
                    block,
                    cells: values.len() / self.descriptor.elements.max(1),
                    values: values.clone(),
                })
                .collect(),
        };
        let text = serde_json::to_string(&snapshot).map_err(|source| KernelError::Format {
            path: path.clone(),
            source,
        })?;
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(|source| KernelError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
        }
        fs::write(&path, text).map_err(|source| KernelError::Io {
            path: path.clone(),
            source,
        })?;
        tracing::debug!(field = %self.descriptor.name, ?path, "field checkpoint written");
        Ok(path)
    }

    /// Descriptor the field was created with.
    pub fn descriptor(&self) -> &FieldDescriptor {
        &self.descriptor
    }

    /// Field name.
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    /// Values per node.
    pub fn elements(&self) -> usize {
        self.descriptor.elements
    }

    /// Whether storage exists for block `block`.
    pub fn has_block(&self, block: usize) -> bool {
        self.data.contains_key(&block)
    }

    /// Values of one block.
    pub fn block(&self, block: usize) -> KernelResult<&[T]> {
        self.data
            .get(&block)
            .map(Vec::as_slice)
            .ok_or_else(|| self.missing(block))
    }

    /// Mutable values of one block.
    pub fn block_mut(&mut self, block: usize) -> KernelResult<&mut [T]> {
        self.data
            .get_mut(&block)
            .map(Vec::as_mut_slice)
            .ok_or_else(|| KernelError::MissingBlockStorage {
                field: self.descriptor.name.clone(),
                block,
            })
    }

    /// Set every value on every block.
    pub fn fill(&mut self, value: T) {
        for values in self.data.values_mut() {
            values.iter_mut().for_each(|v| *v = value);
        }
    }

    /// Copy all values from a field of identical layout.
    pub fn copy_from(&mut self, other: &Field<T>) -> KernelResult<()> {
        if other.descriptor.elements != self.descriptor.elements {
            return Err(KernelError::LengthMismatch {
                what: format!("copy into field '{}'", self.descriptor.name),
                expected: self.descriptor.elements,
                actual: other.descriptor.elements,
            });
        }
        for (block, values) in self.data.iter_mut() {
            let src = other.block(*block)?;
            values.copy_from_slice(src);
        }
        Ok(())
    }

    /// Check that storage covers `blocks` with `elements` values per node.
    pub fn validate(&self, blocks: &[Block], elements: usize) -> KernelResult<()> {
        if self.descriptor.elements != elements {
            return Err(KernelError::LengthMismatch {
                what: format!("elements of field '{}'", self.descriptor.name),
                expected: elements,
                actual: self.descriptor.elements,
            });
        }
        for b in blocks {
            let values = self.block(b.id)?;
            if values.len() != b.cell_count() * elements {
                return Err(KernelError::LengthMismatch {
                    what: format!("storage of field '{}' on block {}", self.descriptor.name, b.id),
                    expected: b.cell_count() * elements,
                    actual: values.len(),
                });
            }
        }
        Ok(())
    }

    fn missing(&self, block: usize) -> KernelError {
        KernelError::MissingBlockStorage {
            field: self.descriptor.name.clone(),
            block,
        }
    }
}

/// Named real and integer fields sharing one definition.
///
/// Used wherever a model declares its storage as parallel name/size lists.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSet {
    /// Real-valued fields in definition order.
    pub real: Vec<RealField>,
    /// Integer-valued fields in definition order.
    pub int: Vec<IntField>,
}

impl FieldSet {
    /// Allocate or restore every field named in the parallel lists.
    pub fn define(
        real_names: &[String],
        real_sizes: &[usize],
        int_names: &[String],
        int_sizes: &[usize],
        blocks: &[Block],
        start: &StartMode,
    ) -> KernelResult<Self> {
        if real_names.len() != real_sizes.len() {
            return Err(KernelError::LengthMismatch {
                what: "real field sizes".into(),
                expected: real_names.len(),
                actual: real_sizes.len(),
            });
        }
        if int_names.len() != int_sizes.len() {
            return Err(KernelError::LengthMismatch {
                what: "int field sizes".into(),
                expected: int_names.len(),
                actual: int_sizes.len(),
            });
        }
        let real = real_names
            .iter()
            .zip(real_sizes)
            .map(|(n, &s)| RealField::create(FieldDescriptor::new(n.clone(), s), blocks, start))
            .collect::<KernelResult<Vec<_>>>()?;
        let int = int_names
            .iter()
            .zip(int_sizes)
            .map(|(n, &s)| IntField::create(FieldDescriptor::new(n.clone(), s), blocks, start))
            .collect::<KernelResult<Vec<_>>>()?;
        Ok(Self { real, int })
    }

    /// Write every member field.
    pub fn write_to_file(&self, case_name: &str, time_step: u64) -> KernelResult<()> {
        for f in &self.real {
            f.write_to_file(case_name, time_step)?;
        }
        for f in &self.int {
            f.write_to_file(case_name, time_step)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blocks() -> Vec<Block> {
        vec![
            Block::new(0, "a", 2, [3, 2, 1], 0.5, [0.0; 3]).unwrap(),
            Block::new(1, "b", 2, [2, 2, 1], 0.5, [2.0, 0.0, 0.0]).unwrap(),
        ]
    }

    fn temp_case(name: &str) -> String {
        let dir = std::env::temp_dir().join(format!("kernel_field_{}_{name}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir.join("case").to_string_lossy().into_owned()
    }

    #[test]
    fn checkpoint_roundtrip_is_bit_identical() {
        let blocks = blocks();
        let mut f = RealField::create_from_scratch(FieldDescriptor::new("rho", 2), &blocks);
        let mut x = 0.1_f64;
        for b in &blocks {
            for v in f.block_mut(b.id).unwrap() {
                x = (x * 7.123456789).fract() + 1.0 / 3.0;
                *v = x;
            }
        }
        let case = temp_case("roundtrip");
        f.write_to_file(&case, 40).unwrap();
        let g = RealField::create_from_file(FieldDescriptor::new("rho", 2), &case, &blocks, 40).unwrap();
        for b in &blocks {
            let a = f.block(b.id).unwrap();
            let c = g.block(b.id).unwrap();
            assert!(a.iter().zip(c).all(|(p, q)| p.to_bits() == q.to_bits()));
        }
    }

    #[test]
    fn checkpoint_with_wrong_elements_is_rejected() {
        let blocks = blocks();
        let f = IntField::filled(FieldDescriptor::new("id", 3), &blocks, -1);
        let case = temp_case("mismatch");
        f.write_to_file(&case, 1).unwrap();
        let err = IntField::create_from_file(FieldDescriptor::new("id", 2), &case, &blocks, 1).unwrap_err();
        assert!(matches!(err, KernelError::CheckpointMismatch { .. }));
    }

    #[test]
    fn missing_block_storage_is_an_error() {
        let blocks = blocks();
        let f = RealField::create_from_scratch(FieldDescriptor::new("u", 1), &blocks[..1]);
        assert!(f.block(0).is_ok());
        assert!(matches!(f.block(1), Err(KernelError::MissingBlockStorage { block: 1, .. })));
    }

    #[test]
    fn field_set_rejects_mismatched_lists() {
        let blocks = blocks();
        let err = FieldSet::define(
            &["sfp".into(), "vp".into()],
            &[1],
            &[],
            &[],
            &blocks,
            &StartMode::Scratch,
        )
        .unwrap_err();
        assert!(matches!(err, KernelError::LengthMismatch { expected: 2, actual: 1, .. }));
    }
}
