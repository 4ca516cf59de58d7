//! Hydrodynamic force totals on the coupled particles
//!
//! Sums the drag accumulated by the coupling models over every particle of
//! the owned blocks, periodic images included.

use kernel::{Real, SimulationContext};

/// Net force and moment on all particles
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ParticleDrag {
    /// Net force vector [Fx, Fy, Fz]
    pub net_force: [Real; 3],
    /// Net torque vector [Tx, Ty, Tz], each particle about its own centre
    pub net_moment: [Real; 3],
}

impl ParticleDrag {
    fn add(&mut self, force: [Real; 3], torque: [Real; 3]) {
        for a in 0..3 {
            self.net_force[a] += force[a];
            self.net_moment[a] += torque[a];
        }
    }
}

/// Total drag currently accumulated on the particles of the owned blocks
pub fn total_drag(ctx: &SimulationContext) -> ParticleDrag {
    let mut total = ParticleDrag::default();
    for bp in ctx.particles.iter().filter(|bp| bp.owned) {
        for (_, force, torque) in bp.drag_by_particle() {
            total.add(force, torque);
        }
    }
    total
}

/// Aggregate drag records from several processes by summing the net force
/// and net moment at each interval.
///
/// If the inputs have different lengths, the result is as long as the
/// shortest one.
pub fn aggregate_drag_records(records: &[Vec<ParticleDrag>]) -> Vec<ParticleDrag> {
    let min_len = records.iter().map(Vec::len).min().unwrap_or(0);
    (0..min_len)
        .map(|t| {
            let mut total = ParticleDrag::default();
            for r in records {
                total.add(r[t].net_force, r[t].net_moment);
            }
            total
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drag(fx: Real, mz: Real) -> ParticleDrag {
        ParticleDrag {
            net_force: [fx, 0.0, 0.0],
            net_moment: [0.0, 0.0, mz],
        }
    }

    #[test]
    fn test_aggregate_drag_records_empty() {
        assert!(aggregate_drag_records(&[]).is_empty());
    }

    #[test]
    fn test_aggregate_drag_records_two_processes() {
        let records = vec![vec![drag(1.0, 0.1), drag(2.0, 0.2)], vec![drag(0.5, 0.05), drag(1.0, 0.1)]];
        let result = aggregate_drag_records(&records);
        assert_eq!(result.len(), 2);
        assert!((result[0].net_force[0] - 1.5).abs() < 1e-12);
        assert!((result[1].net_moment[2] - 0.3).abs() < 1e-12);
    }

    #[test]
    fn test_aggregate_drag_records_truncates_to_shortest() {
        let records = vec![vec![drag(1.0, 0.0)], vec![drag(1.0, 0.0), drag(3.0, 0.0)]];
        assert_eq!(aggregate_drag_records(&records), vec![drag(2.0, 0.0)]);
    }
}
