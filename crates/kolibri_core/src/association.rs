//! Taught question -> answer pairs, as stored by the formula pool and
//! optionally persisted to the genome ledger.

use crate::genome::GenomeContext;
use crate::symbols::SymbolTable;

/// Bound on both `question` and `answer` string length, in bytes.
pub const MAX_STRING_LEN: usize = 256;
/// Bound on the digit encoding of either side (256 codepoints * 3 digits).
pub const MAX_DIGIT_LEN: usize = MAX_STRING_LEN * 3;

/// FNV-1a, masked to 31 bits (`i32::MAX`) so it is always non-negative.
pub fn fnv1a_hash(bytes: &[u8]) -> u32 {
    const OFFSET_BASIS: u32 = 0x811c9dc5;
    const PRIME: u32 = 0x01000193;
    let mut hash = OFFSET_BASIS;
    for &b in bytes {
        hash ^= b as u32;
        hash = hash.wrapping_mul(PRIME);
    }
    hash & 0x7FFF_FFFF
}

#[derive(Debug, Clone)]
pub struct Association {
    pub question: String,
    pub answer: String,
    pub input_hash: u32,
    pub output_hash: u32,
    pub timestamp: u64,
    pub source: String,
    pub question_digits: Vec<u8>,
    pub answer_digits: Vec<u8>,
}

impl Association {
    pub fn new(
        symbols: &mut SymbolTable,
        mut genome: Option<&mut GenomeContext>,
        question: &str,
        answer: &str,
        source: &str,
        timestamp: u64,
    ) -> Self {
        let question = truncate_to_bytes(question, MAX_STRING_LEN);
        let answer = truncate_to_bytes(answer, MAX_STRING_LEN);

        let input_hash = fnv1a_hash(question.as_bytes());
        let output_hash = fnv1a_hash(answer.as_bytes());

        let question_digits = symbols.encode_str(&question, MAX_DIGIT_LEN, genome.as_deref_mut());
        let answer_digits = symbols.encode_str(&answer, MAX_DIGIT_LEN, genome.as_deref_mut());

        Association {
            question,
            answer,
            input_hash,
            output_hash,
            timestamp,
            source: source.to_string(),
            question_digits,
            answer_digits,
        }
    }
}

fn truncate_to_bytes(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let mut end = max_len;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}
