//! A gene plus its evaluation metadata and, once promoted, a handful of
//! embedded associations (§3 "Formula").

use crate::association::Association;
use crate::gene::Gene;

/// Cap on embedded associations carried by a "knowledge carrier" formula.
pub const EMBEDDED_ASSOCIATION_CAP: usize = 8;

#[derive(Debug, Clone)]
pub struct Formula {
    pub gene: Gene,
    pub fitness: f64,
    pub feedback: f64,
    pub drift_b: f64,
    pub drift_d: f64,
    pub phase: f64,
    pub embedded_associations: Vec<Association>,
}

impl Formula {
    pub fn new(gene: Gene) -> Self {
        Formula {
            gene,
            fitness: 0.0,
            feedback: 0.0,
            drift_b: 0.0,
            drift_d: 0.0,
            phase: 0.0,
            embedded_associations: Vec::new(),
        }
    }

    pub fn set_embedded_associations(&mut self, associations: &[Association]) {
        let take = associations.len().min(EMBEDDED_ASSOCIATION_CAP);
        self.embedded_associations = associations[associations.len() - take..].to_vec();
    }
}

/// Read-only snapshot handed to callers (§3 ownership rule: callers never
/// hold a raw reference into the pool across a `tick`).
#[derive(Debug, Clone)]
pub struct FormulaView {
    pub gene_digits: Vec<u8>,
    pub fitness: f64,
    pub embedded_associations: Vec<Association>,
}

impl From<&Formula> for FormulaView {
    fn from(f: &Formula) -> Self {
        FormulaView {
            gene_digits: f.gene.digits().to_vec(),
            fitness: f.fitness,
            embedded_associations: f.embedded_associations.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::Rng;

    #[test]
    fn fresh_formula_starts_at_zero() {
        let mut rng = Rng::seed(1);
        let f = Formula::new(Gene::random(&mut rng));
        assert_eq!(f.fitness, 0.0);
        assert_eq!(f.feedback, 0.0);
        assert!(f.embedded_associations.is_empty());
    }
}
