//! Distributed symbolic-learning runtime core: an HMAC-chained genome
//! ledger, an evolutionary formula pool, and a UDP gossip transport, glued
//! together by a digit transducer and a Unicode symbol table.

pub mod association;
pub mod core;
pub mod digits;
pub mod error;
pub mod formula;
pub mod gene;
pub mod genome;
pub mod peer;
pub mod pool;
pub mod rng;
pub mod swarm;
pub mod symbols;
pub mod wire;

pub use association::Association;
pub use core::KolibriCore;
pub use error::{KolibriError, KolibriResult};
pub use formula::{Formula, FormulaView};
pub use gene::Gene;
pub use genome::GenomeContext;
pub use pool::{FormulaPool, PoolProfile};
pub use rng::Rng;
pub use swarm::{Swarm, SwarmEvent};
pub use symbols::SymbolTable;
