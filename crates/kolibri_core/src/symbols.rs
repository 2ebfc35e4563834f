//! Unicode codepoint <-> 3-digit assignment, persisted via genome events (C3).
//!
//! The table does not store a persistent handle to the genome: the design
//! note in the core spec calls for "a non-owning handle... lifetime is
//! symbol table shorter-than-or-equal-to genome", which in idiomatic Rust is
//! simplest as a borrow taken only for the duration of the call that needs
//! it (`encode`, `load_from_genome`) rather than a field kept alive across
//! calls. The caller (C7 orchestration) owns both and threads the genome
//! reference through when one is attached.

use crate::error::{KolibriError, KolibriResult};
use crate::genome::{GenomeContext, EVENT_SYMBOL_MAP};

/// Symbol table capacity: codepoints beyond this are silently dropped by
/// `encode` (the table is lossy past its cap). Bounded by `tuple_for_index`'s
/// addressable space — three digits each `0..=9` is 1,000 distinct tuples.
pub const SYMBOL_TABLE_CAPACITY: usize = 1_000;

/// A single allocated `(codepoint, digit-tuple)` entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymbolEntry {
    pub codepoint: u32,
    pub digits: (u8, u8, u8),
}

#[derive(Debug, Default)]
pub struct SymbolTable {
    entries: Vec<SymbolEntry>,
    version: u64,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    fn find(&self, codepoint: u32) -> Option<&SymbolEntry> {
        self.entries.iter().find(|e| e.codepoint == codepoint)
    }

    fn tuple_for_index(index: usize) -> (u8, u8, u8) {
        let index = index as u32;
        ((index / 100 % 10) as u8, (index / 10 % 10) as u8, (index % 10) as u8)
    }

    /// Encode `codepoint`, allocating a fresh tuple if it hasn't been seen.
    /// Allocation beyond [`SYMBOL_TABLE_CAPACITY`] is silently ignored —
    /// callers must tolerate `None` meaning "not encodable right now".
    pub fn encode(
        &mut self,
        codepoint: char,
        mut genome: Option<&mut GenomeContext>,
    ) -> Option<(u8, u8, u8)> {
        let cp = codepoint as u32;
        if let Some(entry) = self.find(cp) {
            return Some(entry.digits);
        }
        if self.entries.len() >= SYMBOL_TABLE_CAPACITY {
            return None;
        }
        let digits = Self::tuple_for_index(self.entries.len());
        self.entries.push(SymbolEntry { codepoint: cp, digits });
        self.version += 1;

        if let Some(genome) = genome.as_deref_mut() {
            // Genome payloads must be pure decimal digits, so the codepoint
            // is zero-padded rather than separated with `|` (the legacy
            // form `parse_symbol_payload` also accepts).
            let payload = format!("{cp:07}{}{}{}", digits.0, digits.1, digits.2);
            let _ = genome.append(EVENT_SYMBOL_MAP, payload.as_bytes());
        }
        Some(digits)
    }

    /// Reverse lookup by linear search (the table is small enough that this
    /// is cheap relative to the genome I/O elsewhere in the system).
    pub fn decode(&self, d0: u8, d1: u8, d2: u8) -> KolibriResult<char> {
        self.entries
            .iter()
            .find(|e| e.digits == (d0, d1, d2))
            .and_then(|e| char::from_u32(e.codepoint))
            .ok_or_else(|| {
                KolibriError::NotFound(format!("no codepoint for digits {d0}{d1}{d2}"))
            })
    }

    /// Replay every `SYMBOL_MAP` block from offset 0, seeding entries once
    /// each. Restores the genome's file offset afterwards.
    pub fn load_from_genome(&mut self, genome: &mut GenomeContext) -> KolibriResult<usize> {
        let blocks = genome.scan_event(EVENT_SYMBOL_MAP)?;
        let mut seeded = 0;
        for payload in blocks {
            if let Some((cp, digits)) = parse_symbol_payload(&payload) {
                if self.find(cp).is_none() && self.entries.len() < SYMBOL_TABLE_CAPACITY {
                    self.entries.push(SymbolEntry { codepoint: cp, digits });
                    self.version += 1;
                    seeded += 1;
                }
            }
        }
        Ok(seeded)
    }

    /// Idempotently register ASCII punctuation, digits, and the Cyrillic
    /// alphabet (including Ё/ё) so a fresh table already covers the DSL
    /// alphabet it is expected to serve.
    pub fn seed_defaults(&mut self) {
        let punctuation = " !\"#$%&'()*+,-./:;<=>?@[\\]^_`{|}~";
        let digits = "0123456789";
        // А-Я, а-я plus Ё/ё.
        let cyrillic_upper = ('\u{0410}'..='\u{042F}').collect::<Vec<_>>();
        let cyrillic_lower = ('\u{0430}'..='\u{044F}').collect::<Vec<_>>();

        for ch in punctuation.chars().chain(digits.chars()) {
            self.encode(ch, None);
        }
        for ch in cyrillic_upper.into_iter().chain(cyrillic_lower) {
            self.encode(ch, None);
        }
        self.encode('\u{0401}', None); // Ё
        self.encode('\u{0451}', None); // ё
    }

    /// Encode a bounded string through the table, codepoint by codepoint,
    /// into a flat digit sequence capped at `max_digits`.
    pub fn encode_str(&mut self, s: &str, max_digits: usize, mut genome: Option<&mut GenomeContext>) -> Vec<u8> {
        let mut out = Vec::with_capacity(max_digits.min(s.len() * 3));
        for ch in s.chars() {
            if out.len() + 3 > max_digits {
                break;
            }
            if let Some((d0, d1, d2)) = self.encode(ch, genome.as_deref_mut()) {
                out.push(d0);
                out.push(d1);
                out.push(d2);
            }
        }
        out
    }
}

fn parse_symbol_payload(payload: &[u8]) -> Option<(u32, (u8, u8, u8))> {
    let text = std::str::from_utf8(payload).ok()?;
    if let Some((cp_str, digit_str)) = text.split_once('|') {
        let cp: u32 = cp_str.parse().ok()?;
        let digit_str = digit_str.trim();
        if digit_str.len() != 3 {
            return None;
        }
        let mut chars = digit_str.chars();
        let d0 = chars.next()?.to_digit(10)? as u8;
        let d1 = chars.next()?.to_digit(10)? as u8;
        let d2 = chars.next()?.to_digit(10)? as u8;
        return Some((cp, (d0, d1, d2)));
    }
    // Legacy form: "%03u%1u%1u%1u" -- codepoint zero-padded to at least 3
    // digits immediately followed by three single digits.
    if text.len() >= 6 {
        let split_at = text.len() - 3;
        let cp: u32 = text[..split_at].parse().ok()?;
        let mut chars = text[split_at..].chars();
        let d0 = chars.next()?.to_digit(10)? as u8;
        let d1 = chars.next()?.to_digit(10)? as u8;
        let d2 = chars.next()?.to_digit(10)? as u8;
        return Some((cp, (d0, d1, d2)));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_is_stable_and_sequential() {
        let mut table = SymbolTable::new();
        let a = table.encode('a', None).unwrap();
        let b = table.encode('b', None).unwrap();
        let a_again = table.encode('a', None).unwrap();
        assert_eq!(a, a_again);
        assert_ne!(a, b);
        assert_eq!(a, (0, 0, 0));
        assert_eq!(b, (0, 0, 1));
    }

    #[test]
    fn decode_reverses_encode() {
        let mut table = SymbolTable::new();
        let digits = table.encode('z', None).unwrap();
        assert_eq!(table.decode(digits.0, digits.1, digits.2).unwrap(), 'z');
    }

    #[test]
    fn decode_unknown_fails() {
        let table = SymbolTable::new();
        assert!(table.decode(9, 9, 9).is_err());
    }

    #[test]
    fn seed_defaults_covers_cyrillic_and_yo() {
        let mut table = SymbolTable::new();
        table.seed_defaults();
        assert!(table.decode(
            table.encode('\u{0401}', None).unwrap().0,
            table.encode('\u{0401}', None).unwrap().1,
            table.encode('\u{0401}', None).unwrap().2
        ).is_ok());
        // Idempotent: re-seeding doesn't grow the table.
        let len_before = table.len();
        table.seed_defaults();
        assert_eq!(table.len(), len_before);
    }

    #[test]
    fn parse_payload_accepts_both_forms() {
        assert_eq!(parse_symbol_payload(b"97|000"), Some((97, (0, 0, 0))));
        assert_eq!(parse_symbol_payload(b"097000"), Some((97, (0, 0, 0))));
        assert_eq!(parse_symbol_payload(b"garbage"), None);
    }
}
