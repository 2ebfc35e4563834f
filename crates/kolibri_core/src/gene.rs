//! Fixed-length decimal-digit genome interpreted as a miniature arithmetic
//! program (§3, §4.5 "Numeric prediction").

use crate::rng::Rng;
use std::collections::HashSet;

/// Length of every gene in the pool. Large enough to leave 20 digits of
/// "body" past the 10-digit program header for diversity/phase scoring and
/// mutation pressure (see SPEC_FULL.md §3).
pub const GENE_LEN: usize = 30;

/// One of the four tiny arithmetic programs a gene's header can select.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Linear,
    Inverse,
    Modular,
    Quadratic,
}

impl Operation {
    fn from_digit(d: u8) -> Self {
        match d % 4 {
            0 => Operation::Linear,
            1 => Operation::Inverse,
            2 => Operation::Modular,
            _ => Operation::Quadratic,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Gene(Vec<u8>);

impl Gene {
    /// Build a gene from digits already known to be in `[0, 9]` and of
    /// length `GENE_LEN`.
    pub fn from_digits(digits: Vec<u8>) -> Self {
        debug_assert_eq!(digits.len(), GENE_LEN);
        debug_assert!(digits.iter().all(|&d| d <= 9));
        Gene(digits)
    }

    pub fn random(rng: &mut Rng) -> Self {
        Gene((0..GENE_LEN).map(|_| rng.next_digit()).collect())
    }

    pub fn digits(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Crossover at the midpoint: first half from `a`, second half from `b`.
    pub fn crossover(a: &Gene, b: &Gene) -> Gene {
        let mid = GENE_LEN / 2;
        let mut child = Vec::with_capacity(GENE_LEN);
        child.extend_from_slice(&a.0[..mid]);
        child.extend_from_slice(&b.0[mid..]);
        Gene(child)
    }

    /// Replace `count` random positions with a fresh random digit.
    pub fn mutate(&mut self, count: usize, rng: &mut Rng) {
        let count = count.clamp(1, GENE_LEN);
        for _ in 0..count {
            let pos = rng.next_range(GENE_LEN as u64) as usize;
            self.0[pos] = rng.next_digit();
        }
    }

    fn operation(&self) -> Operation {
        Operation::from_digit(self.0[0])
    }

    fn slope(&self) -> i32 {
        decode_signed(self.0[1], self.0[2], self.0[3])
    }

    fn bias(&self) -> i32 {
        decode_signed(self.0[4], self.0[5], self.0[6])
    }

    fn auxiliary(&self) -> i32 {
        let a = decode_signed(self.0[7], self.0[8], self.0[9]);
        if a == 0 {
            1
        } else {
            a
        }
    }

    /// Interpret the gene as a tiny program and evaluate it at `input`,
    /// saturating to `i32` range.
    pub fn predict(&self, input: i32) -> i32 {
        let slope = self.slope() as i64;
        let bias = self.bias() as i64;
        let input = input as i64;

        let raw = match self.operation() {
            Operation::Linear => slope * input + bias,
            Operation::Inverse => slope * input - bias,
            Operation::Modular => {
                let aux = self.auxiliary() as i64;
                (slope * input) % aux + bias
            }
            Operation::Quadratic => slope * input * input + bias,
        };

        raw.clamp(i32::MIN as i64, i32::MAX as i64) as i32
    }

    /// `sum(0.001 * digit)` over non-zero digits.
    pub fn complexity_penalty(&self) -> f64 {
        self.0.iter().filter(|&&d| d != 0).map(|&d| 0.001 * d as f64).sum()
    }

    /// `unique_digit_count / 10`.
    pub fn diversity(&self) -> f64 {
        let unique: HashSet<u8> = self.0.iter().copied().collect();
        unique.len() as f64 / 10.0
    }

    /// `(FNV-1a(gene) mod 360) * pi/180`, in `[0, 2*pi)`.
    pub fn phase(&self) -> f64 {
        let hash = crate::association::fnv1a_hash(&self.0);
        (hash % 360) as f64 * std::f64::consts::PI / 180.0
    }
}

/// Decode a signed sign-magnitude value from three decimal digits: the
/// first digit's parity is the sign (odd = negative), the remaining two
/// digits are the magnitude (`0..=99`). This is an implementation-chosen
/// encoding — the core spec only requires that three digits decode to a
/// signed value deterministically, not a specific bit layout.
fn decode_signed(sign_digit: u8, d1: u8, d2: u8) -> i32 {
    let magnitude = (d1 as i32) * 10 + d2 as i32;
    if sign_digit % 2 == 1 {
        -magnitude
    } else {
        magnitude
    }
}

/// `(# positions equal) / length`, scalar fallback. See [`simd_similarity`]
/// for the SIMD fast path; both must agree bit-for-bit (tested below).
pub fn scalar_similarity(a: &Gene, b: &Gene) -> f64 {
    let len = a.len().min(b.len());
    if len == 0 {
        return 0.0;
    }
    let equal = a.0.iter().zip(b.0.iter()).filter(|(x, y)| x == y).count();
    equal as f64 / len as f64
}

/// SIMD-accelerated equal-digit count over 16-wide lanes (with a scalar tail
/// for lengths not a multiple of 16), per the core spec's design note that
/// this inner loop is "a natural target for 16-wide SIMD" with "a scalar
/// fallback identical in semantics".
pub fn simd_similarity(a: &Gene, b: &Gene) -> f64 {
    use wide::u8x16;

    let len = a.len().min(b.len());
    if len == 0 {
        return 0.0;
    }
    let a = &a.0[..len];
    let b = &b.0[..len];

    let mut equal: usize = 0;
    let mut chunks = len / 16;
    let mut offset = 0;
    while chunks > 0 {
        let va = u8x16::new(a[offset..offset + 16].try_into().unwrap());
        let vb = u8x16::new(b[offset..offset + 16].try_into().unwrap());
        let mask = va.cmp_eq(vb);
        let bytes: [u8; 16] = mask.to_array();
        equal += bytes.iter().filter(|&&b| b != 0).count();
        offset += 16;
        chunks -= 1;
    }
    for i in offset..len {
        if a[i] == b[i] {
            equal += 1;
        }
    }
    equal as f64 / len as f64
}

/// `topological_similarity` from §4.5 — SIMD path with scalar semantics.
pub fn topological_similarity(a: &Gene, b: &Gene) -> f64 {
    simd_similarity(a, b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_gene_has_correct_length_and_range() {
        let mut rng = Rng::seed(1);
        let gene = Gene::random(&mut rng);
        assert_eq!(gene.len(), GENE_LEN);
        assert!(gene.digits().iter().all(|&d| d <= 9));
    }

    #[test]
    fn crossover_takes_halves_from_each_parent() {
        let a = Gene::from_digits(vec![1; GENE_LEN]);
        let b = Gene::from_digits(vec![2; GENE_LEN]);
        let child = Gene::crossover(&a, &b);
        let mid = GENE_LEN / 2;
        assert!(child.digits()[..mid].iter().all(|&d| d == 1));
        assert!(child.digits()[mid..].iter().all(|&d| d == 2));
    }

    #[test]
    fn mutate_changes_exactly_count_positions_at_most() {
        let mut rng = Rng::seed(5);
        let mut gene = Gene::from_digits(vec![0; GENE_LEN]);
        gene.mutate(3, &mut rng);
        // Can't assert exact diff count (mutation may hit same position
        // twice or roll the same digit), but it must stay in range.
        assert!(gene.digits().iter().all(|&d| d <= 9));
    }

    #[test]
    fn predict_saturates_to_i32_range() {
        let gene = Gene::from_digits(vec![
            3, // quadratic
            1, 9, 9, // slope = -99
            1, 9, 9, // bias = -99
            0, 0, 0, // auxiliary unused
            0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
        ]);
        let result = gene.predict(i32::MAX);
        assert!(result == i32::MIN || result == i32::MAX || result.abs() <= i32::MAX);
    }

    #[test]
    fn simd_and_scalar_similarity_agree() {
        let mut rng = Rng::seed(77);
        for _ in 0..50 {
            let a = Gene::random(&mut rng);
            let b = Gene::random(&mut rng);
            let scalar = scalar_similarity(&a, &b);
            let simd = simd_similarity(&a, &b);
            assert!((scalar - simd).abs() < 1e-12);
        }
    }

    #[test]
    fn diversity_is_bounded() {
        let mut rng = Rng::seed(3);
        let gene = Gene::random(&mut rng);
        assert!(gene.diversity() >= 0.0 && gene.diversity() <= 1.0);
    }

    #[test]
    fn phase_is_in_0_to_2pi() {
        let mut rng = Rng::seed(4);
        for _ in 0..20 {
            let gene = Gene::random(&mut rng);
            assert!(gene.phase() >= 0.0 && gene.phase() < std::f64::consts::TAU);
        }
    }
}
