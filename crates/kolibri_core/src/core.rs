//! Thin orchestration facade wiring the genome, symbol table, formula pool
//! and swarm transport together (C7, §4.7).

use std::net::{SocketAddr, ToSocketAddrs};
use std::path::Path;

use crate::digits;
use crate::error::KolibriResult;
use crate::formula::FormulaView;
use crate::genome::{GenomeContext, EVENT_TEACH};
use crate::pool::FormulaPool;
use crate::swarm::{Swarm, SwarmEvent};
use crate::symbols::SymbolTable;

/// Owns a genome, a symbol table, a formula pool and (optionally) a swarm
/// instance, and exposes the handful of operations an outer caller (DSL
/// interpreter, HTTP server, CLI) needs.
pub struct KolibriCore {
    genome: Option<GenomeContext>,
    symbols: SymbolTable,
    pool: FormulaPool,
    swarm: Option<Swarm>,
}

impl KolibriCore {
    /// Open (or create) the genome at `genome_path`, rehydrate the symbol
    /// table from it, and start a fresh formula pool seeded by `seed`.
    pub fn open<P: AsRef<Path>>(genome_path: P, key: &[u8], seed: u64) -> KolibriResult<Self> {
        let mut genome = GenomeContext::open(genome_path, key)?;
        let mut symbols = SymbolTable::new();
        symbols.seed_defaults();
        symbols.load_from_genome(&mut genome)?;

        Ok(KolibriCore {
            genome: Some(genome),
            symbols,
            pool: FormulaPool::new(seed),
            swarm: None,
        })
    }

    /// Build a core with no backing genome file (in-memory only).
    pub fn open_ephemeral(seed: u64) -> Self {
        let mut symbols = SymbolTable::new();
        symbols.seed_defaults();
        KolibriCore { genome: None, symbols, pool: FormulaPool::new(seed), swarm: None }
    }

    pub fn attach_swarm<A: ToSocketAddrs>(&mut self, addr: A, self_id: u32, key: &[u8]) -> KolibriResult<()> {
        self.swarm = Some(Swarm::bind(addr, self_id, key)?);
        Ok(())
    }

    pub fn swarm_local_addr(&self) -> KolibriResult<Option<SocketAddr>> {
        self.swarm.as_ref().map(|s| s.local_addr()).transpose()
    }

    pub fn poll_swarm_event(&self) -> Option<SwarmEvent> {
        self.swarm.as_ref().and_then(|s| s.poll_event())
    }

    pub fn swarm_peers(&self) -> Vec<(u32, SocketAddr)> {
        self.swarm.as_ref().map(|s| s.peers()).unwrap_or_default()
    }

    pub fn pool(&self) -> &FormulaPool {
        &self.pool
    }

    /// Teach a `(question, answer)` pair. If a genome is attached, also
    /// appends a `TEACH` event whose payload is the digit encoding of a
    /// `q=...,a=...` record.
    pub fn ingest_association(&mut self, question: &str, answer: &str, source: &str, timestamp: u64) -> KolibriResult<()> {
        self.pool.add_association(&mut self.symbols, self.genome.as_mut(), question, answer, source, timestamp);

        if let Some(genome) = self.genome.as_mut() {
            let record = format!("q={question},a={answer}");
            let payload_digits = digits::encode_bytes(record.as_bytes());
            let payload: String = payload_digits.iter().map(|d| d.to_string()).collect();
            genome.append(EVENT_TEACH, payload.as_bytes())?;
        }
        Ok(())
    }

    pub fn tick(&mut self, generations: u32) {
        self.pool.tick(generations);
    }

    pub fn best_formula(&self) -> FormulaView {
        FormulaView::from(self.pool.best())
    }

    /// Serialise the best formula's gene and fitness and gossip it to the
    /// swarm, if one is attached. A no-op when no swarm is attached.
    pub fn broadcast_best(&self) -> KolibriResult<()> {
        if let Some(swarm) = &self.swarm {
            let best = self.pool.best();
            swarm.broadcast_formula(best.gene.digits(), best.fitness)?;
        }
        Ok(())
    }

    /// Replay `SYMBOL_MAP` events from the attached genome, re-seeding any
    /// entries the in-memory table is missing.
    pub fn record_symbol_event_from_genome_scan(&mut self) -> KolibriResult<usize> {
        match self.genome.as_mut() {
            Some(genome) => self.symbols.load_from_genome(genome),
            None => Ok(0),
        }
    }

    /// Flush and close the attached genome (if any) and stop the swarm (if
    /// any).
    pub fn close(mut self) {
        if let Some(swarm) = self.swarm.take() {
            drop(swarm);
        }
        if let Some(genome) = self.genome.take() {
            genome.close();
        }
    }
}
