//! Loop executor.
//!
//! Every kernel launch goes through [`Executor`]: it logs the launch, can
//! record it for later inspection, and runs the per-node closure either
//! serially or across rayon worker threads. Nodes are independent within a
//! launch, so both paths produce identical results.

use std::sync::Mutex;

use rayon::prelude::*;

use crate::block::{Block, IterRange};
use crate::Real;

/// Node count below which launches always run serially.
pub const PARALLEL_MIN_CELLS: usize = 4096;

/// How a launch touches an argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Read only.
    Read,
    /// Overwritten.
    Write,
    /// Read and modified.
    ReadWrite,
    /// Accumulated into.
    Increment,
}

/// One argument of a recorded launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopArg {
    /// Field or global name.
    pub name: String,
    /// Values per node, or length of a global.
    pub elements: usize,
    /// Whether the argument is a global rather than a field.
    pub global: bool,
    /// Access mode.
    pub access: Access,
}

impl LoopArg {
    /// Field argument.
    pub fn dat(name: impl Into<String>, elements: usize, access: Access) -> Self {
        Self {
            name: name.into(),
            elements,
            global: false,
            access,
        }
    }

    /// Global argument (constant or reduction target).
    pub fn gbl(name: impl Into<String>, len: usize, access: Access) -> Self {
        Self {
            name: name.into(),
            elements: len,
            global: true,
            access,
        }
    }
}

/// Description of a kernel launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopRecord {
    /// Kernel name.
    pub kernel: &'static str,
    /// Block the launch covers.
    pub block: usize,
    /// Node range.
    pub range: IterRange,
    /// Arguments in declaration order.
    pub args: Vec<LoopArg>,
}

/// Runs kernel launches.
#[derive(Debug, Default)]
pub struct Executor {
    parallel: bool,
    min_parallel_cells: usize,
    log: Option<Mutex<Vec<LoopRecord>>>,
}

impl Executor {
    /// Executor running every launch on the calling thread.
    pub fn serial() -> Self {
        Self {
            parallel: false,
            min_parallel_cells: PARALLEL_MIN_CELLS,
            log: None,
        }
    }

    /// Executor spreading large launches over the rayon pool.
    pub fn parallel() -> Self {
        Self {
            parallel: true,
            min_parallel_cells: PARALLEL_MIN_CELLS,
            log: None,
        }
    }

    /// Keep a copy of every launch description.
    pub fn with_recording(mut self) -> Self {
        self.log = Some(Mutex::new(Vec::new()));
        self
    }

    /// Run launches of at least `cells` nodes on worker threads.
    pub fn with_min_parallel_cells(mut self, cells: usize) -> Self {
        self.min_parallel_cells = cells;
        self
    }

    /// Whether large launches use worker threads.
    pub fn is_parallel(&self) -> bool {
        self.parallel
    }

    /// Announce a launch.
    pub fn launch(&self, record: LoopRecord) {
        tracing::trace!(
            kernel = record.kernel,
            block = record.block,
            cells = record.range.cell_count(),
            "kernel launch"
        );
        if let Some(log) = &self.log {
            log.lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .push(record);
        }
    }

    /// Drain the recorded launches.
    pub fn take_records(&self) -> Vec<LoopRecord> {
        match &self.log {
            Some(log) => std::mem::take(&mut *log.lock().unwrap_or_else(|p| p.into_inner())),
            None => Vec::new(),
        }
    }

    /// Call `f(index, ijk, values)` for every node of `range`, where
    /// `values` is the node's slice of `out`.
    pub fn map_cells<T, F>(&self, block: &Block, range: &IterRange, out: &mut [T], elements: usize, f: F)
    where
        T: Send,
        F: Fn(usize, [usize; 3], &mut [T]) + Sync + Send,
    {
        if elements == 0 || range.is_empty() {
            return;
        }
        if self.parallel && range.cell_count() >= self.min_parallel_cells {
            out.par_chunks_mut(elements)
                .enumerate()
                .for_each(|(idx, values)| {
                    let ijk = block.coords(idx);
                    if range.contains(ijk) {
                        f(idx, ijk, values);
                    }
                });
        } else {
            for ijk in range.iter() {
                let idx = block.index(ijk);
                f(idx, ijk, &mut out[idx * elements..(idx + 1) * elements]);
            }
        }
    }

    /// Serial visit of every node of `range`, for kernels writing several
    /// outputs.
    pub fn for_each_cell<F>(&self, block: &Block, range: &IterRange, mut f: F)
    where
        F: FnMut(usize, [usize; 3]),
    {
        for ijk in range.iter() {
            f(block.index(ijk), ijk);
        }
    }

    /// Sum `f` over every node of `range`.
    ///
    /// Partial sums are taken per z-slab and combined in slab order, so the
    /// result does not depend on thread scheduling.
    pub fn sum_cells<F>(&self, block: &Block, range: &IterRange, f: F) -> Real
    where
        F: Fn(usize, [usize; 3]) -> Real + Sync + Send,
    {
        let slab = |k: usize| -> Real {
            let mut acc = 0.0;
            for j in range.start[1]..range.end[1] {
                for i in range.start[0]..range.end[0] {
                    let ijk = [i, j, k];
                    acc += f(block.index(ijk), ijk);
                }
            }
            acc
        };
        if self.parallel && range.cell_count() >= self.min_parallel_cells {
            let partial: Vec<Real> = (range.start[2]..range.end[2]).into_par_iter().map(slab).collect();
            partial.iter().sum()
        } else {
            (range.start[2]..range.end[2]).map(slab).sum()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serial_and_parallel_map_agree() {
        let block = Block::new(0, "b", 3, [24, 24, 24], 1.0, [0.0; 3]).unwrap();
        let range = block.bulk_range();
        let run = |exec: Executor| {
            let mut out = vec![0.0; block.cell_count() * 2];
            exec.map_cells(&block, &range, &mut out, 2, |idx, ijk, v| {
                v[0] = idx as Real;
                v[1] = (ijk[0] + 2 * ijk[1] + 3 * ijk[2]) as Real;
            });
            out
        };
        assert_eq!(run(Executor::serial()), run(Executor::parallel()));
    }

    #[test]
    fn sums_are_deterministic() {
        let block = Block::new(0, "b", 3, [20, 20, 20], 1.0, [0.0; 3]).unwrap();
        let range = block.whole_range();
        let f = |idx: usize, _: [usize; 3]| 1.0 / (1.0 + idx as Real);
        let a = Executor::serial().sum_cells(&block, &range, f);
        let b = Executor::parallel().sum_cells(&block, &range, f);
        assert_eq!(a.to_bits(), b.to_bits());
    }

    #[test]
    fn recording_keeps_launch_order() {
        let exec = Executor::serial().with_recording();
        let range = IterRange::new([0; 3], [1, 1, 1]);
        exec.launch(LoopRecord {
            kernel: "first",
            block: 0,
            range,
            args: vec![LoopArg::dat("f", 9, Access::Read)],
        });
        exec.launch(LoopRecord {
            kernel: "second",
            block: 0,
            range,
            args: vec![LoopArg::gbl("mass", 1, Access::Increment)],
        });
        let names: Vec<_> = exec.take_records().iter().map(|r| r.kernel).collect();
        assert_eq!(names, ["first", "second"]);
        assert!(exec.take_records().is_empty());
    }
}
