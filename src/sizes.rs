//! Resolution of axis sizes for every stage position of a plan.

use serde::{Deserialize, Serialize};

use crate::{
    axis::{self, AxisSizes},
    plan::AcquisitionPlan,
};

/// Axis sizes of a plan whose positions may run structurally different sub-plans.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JaggedSizes {
    /// Sizes shared by every position.
    pub root: AxisSizes,
    /// One map per position, present only when some position has a sub-plan.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub positions: Option<Vec<AxisSizes>>,
}

impl JaggedSizes {
    /// Effective sizes of one position: its own entries over the root's.
    pub fn position(&self, index: usize) -> AxisSizes {
        let mut out = self.root.clone();
        if let Some(own) = self.positions.as_ref().and_then(|p| p.get(index)) {
            for (k, &v) in own.iter() {
                out.insert(k, v);
            }
        }
        out
    }

    pub fn is_jagged(&self) -> bool {
        self.positions.is_some()
    }
}

/// Root sizes without the position axis or unused axes.
fn root_sizes(plan: &AcquisitionPlan) -> AxisSizes {
    let mut sizes = plan.sizes.clone().without_unused();
    sizes.remove(axis::POSITION);
    sizes
}

/// Sizes of a plan in which no position runs its own sub-plan.
pub fn resolve_flat(plan: &AcquisitionPlan) -> crate::Result<AxisSizes> {
    if plan.has_sub_plans() {
        return Err(crate::Error::JaggedSizes);
    }
    Ok(root_sizes(plan))
}

/// Root sizes plus, if any position has a sub-plan, one size map per position.
///
/// Sub-plan entries override the root; an entry of zero falls back to the root's
/// value and root axes the sub-plan does not mention are inherited.
/// With `compressed`, axes which have the same size in the root and in every
/// position are left only in the root.
pub fn resolve_jagged(plan: &AcquisitionPlan, compressed: bool) -> JaggedSizes {
    let root = root_sizes(plan);
    if !plan.has_sub_plans() {
        return JaggedSizes {
            root,
            positions: None,
        };
    }

    let mut positions: Vec<AxisSizes> = plan
        .positions
        .iter()
        .map(|p| match &p.sub_plan {
            Some(sub) => override_sizes(&root, &sub.sizes),
            None => root.clone(),
        })
        .collect();

    if compressed {
        let shared: Vec<String> = root
            .iter()
            .filter(|&(k, v)| positions.iter().all(|p| p.get(k) == Some(v)))
            .map(|(k, _)| k.to_owned())
            .collect();
        for p in positions.iter_mut() {
            for k in shared.iter() {
                p.remove(k);
            }
        }
    }

    JaggedSizes {
        root,
        positions: Some(positions),
    }
}

fn override_sizes(root: &AxisSizes, own: &AxisSizes) -> AxisSizes {
    let mut out: AxisSizes = own
        .iter()
        .filter(|&(k, _)| k != axis::POSITION)
        .map(|(k, &v)| (k, if v != 0 { v } else { root.size(k) }))
        .collect();
    for (k, &v) in root.iter() {
        if !out.contains(k) {
            out.insert(k, v);
        }
    }
    out.without_unused()
}

/// Effective sizes of every position, one entry per position.
///
/// A plan without positions yields a single entry.
pub fn position_sizes(plan: &AcquisitionPlan) -> Vec<AxisSizes> {
    let jagged = resolve_jagged(plan, false);
    match jagged.positions {
        Some(positions) => positions,
        None => vec![jagged.root; plan.num_positions()],
    }
}
