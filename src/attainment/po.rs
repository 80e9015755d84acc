use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use super::{mean, round2, AttainmentSummary, CoData, CoPoMatrix};

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PoData {
    pub po_attainment: BTreeMap<String, f64>,
    pub po_attainment_theory: BTreeMap<String, f64>,
    pub po_attainment_lab: BTreeMap<String, f64>,
    pub summary: AttainmentSummary,
}

/// Every PO named anywhere in the matrix, including all-zero columns.
pub fn program_outcomes(matrix: &CoPoMatrix) -> BTreeSet<String> {
    matrix.values().flat_map(|row| row.keys().cloned()).collect()
}

/// `Σ(w × att) / Σ(w)` over COs with strength > 0 for `po`.
///
/// `None` when no CO correlates with `po`. A CO missing from `co_values`
/// contributes 0 with its weight.
pub fn weighted_attainment(
    co_values: &BTreeMap<String, f64>,
    matrix: &CoPoMatrix,
    po: &str,
) -> Option<f64> {
    let mut numerator = 0.0;
    let mut denominator = 0u32;
    for (co, row) in matrix {
        let w = row.get(po).copied().unwrap_or(0);
        if w == 0 {
            continue;
        }
        numerator += f64::from(w) * co_values.get(co).copied().unwrap_or(0.0);
        denominator += u32::from(w);
    }
    if denominator == 0 {
        None
    } else {
        Some(round2(numerator / f64::from(denominator)))
    }
}

pub fn aggregate(co: &CoData, matrix: &CoPoMatrix) -> PoData {
    let mut data = PoData::default();
    let mut correlated = (Vec::new(), Vec::new(), Vec::new());

    for po in program_outcomes(matrix) {
        let overall = weighted_attainment(&co.co_attainment, matrix, &po);
        let theory = weighted_attainment(&co.co_attainment_theory, matrix, &po);
        let lab = weighted_attainment(&co.co_attainment_lab, matrix, &po);

        // The three figures share one weight column, so they are all Some or all None.
        if let (Some(o), Some(t), Some(l)) = (overall, theory, lab) {
            correlated.0.push(o);
            correlated.1.push(t);
            correlated.2.push(l);
        }

        data.po_attainment.insert(po.clone(), overall.unwrap_or(0.0));
        data.po_attainment_theory
            .insert(po.clone(), theory.unwrap_or(0.0));
        data.po_attainment_lab.insert(po, lab.unwrap_or(0.0));
    }

    data.summary = AttainmentSummary {
        average_attainment: mean(&correlated.0).map(round2).unwrap_or(0.0),
        average_theory: mean(&correlated.1).map(round2).unwrap_or(0.0),
        average_lab: mean(&correlated.2).map(round2).unwrap_or(0.0),
    };
    data
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matrix(rows: &[(&str, &[(&str, u8)])]) -> CoPoMatrix {
        rows.iter()
            .map(|(co, cells)| {
                (
                    co.to_string(),
                    cells.iter().map(|(po, w)| (po.to_string(), *w)).collect(),
                )
            })
            .collect()
    }

    fn co_data(values: &[(&str, f64)]) -> CoData {
        let m: BTreeMap<String, f64> = values.iter().map(|(k, v)| (k.to_string(), *v)).collect();
        CoData {
            co_attainment: m.clone(),
            co_attainment_theory: m,
            co_attainment_lab: BTreeMap::new(),
            summary: AttainmentSummary::default(),
        }
    }

    #[test]
    fn correlation_weighted_average() {
        let co = co_data(&[("CO1", 70.0), ("CO2", 50.0)]);
        let m = matrix(&[("CO1", &[("PO1", 3)]), ("CO2", &[("PO1", 1)])]);
        let po = aggregate(&co, &m);
        assert_eq!(po.po_attainment["PO1"], 65.0);
        assert_eq!(po.po_attainment_theory["PO1"], 65.0);
        assert_eq!(po.po_attainment_lab["PO1"], 0.0);
    }

    #[test]
    fn zero_strength_co_is_left_out() {
        let co = co_data(&[("CO1", 80.0), ("CO2", 10.0)]);
        let m = matrix(&[("CO1", &[("PO1", 2)]), ("CO2", &[("PO1", 0)])]);
        let po = aggregate(&co, &m);
        assert_eq!(po.po_attainment["PO1"], 80.0);
    }

    #[test]
    fn uncorrelated_po_is_zero_and_skipped_in_summary() {
        let co = co_data(&[("CO1", 60.0)]);
        let m = matrix(&[("CO1", &[("PO1", 1), ("PO2", 0)])]);
        let po = aggregate(&co, &m);
        assert_eq!(po.po_attainment["PO2"], 0.0);
        assert_eq!(po.summary.average_attainment, 60.0);
        assert_eq!(weighted_attainment(&co.co_attainment, &m, "PO2"), None);
    }

    #[test]
    fn empty_matrix_has_no_program_outcomes() {
        let po = aggregate(&co_data(&[("CO1", 60.0)]), &CoPoMatrix::new());
        assert!(po.po_attainment.is_empty());
        assert_eq!(po.summary, AttainmentSummary::default());
    }
}
