//! Fixed-capacity population, beam evaluation, evolution tick, association
//! store (C5, §4.5). Infallible once constructed: every input is clamped to
//! its documented range rather than rejected (§7).

use crate::association::Association;
use crate::error::{KolibriError, KolibriResult};
use crate::gene::{self, Gene, GENE_LEN};
use crate::formula::Formula;
use crate::genome::GenomeContext;
use crate::rng::Rng;
use crate::symbols::SymbolTable;

/// Fixed pool capacity `N`.
pub const POOL_CAPACITY: usize = 24;
/// Association buffer capacity `P` (FIFO eviction).
pub const ASSOCIATION_BUFFER_CAP: usize = 64;
/// Training-pair dataset capacity `M`.
pub const EXAMPLE_CAP: usize = 256;
/// Max-lane-width `L` for beam evaluation.
pub const BEAM_MAX_LANES: usize = 8;

#[derive(Debug, Clone, Copy, Default)]
pub struct PoolProfile {
    pub generation_steps: u64,
    pub evaluation_calls: u64,
    pub last_generation_ms: u64,
}

pub struct FormulaPool {
    formulas: Vec<Formula>,
    rng: Rng,
    examples: Vec<(i32, i32)>,
    associations: Vec<Association>,
    lambda_b: f64,
    lambda_d: f64,
    target_b: Option<f64>,
    target_d: Option<f64>,
    coherence_gain: f64,
    temperature: f64,
    top_k: usize,
    profile: PoolProfile,
}

impl FormulaPool {
    pub fn new(seed: u64) -> Self {
        let mut rng = Rng::seed(seed);
        let formulas = (0..POOL_CAPACITY)
            .map(|_| Formula::new(Gene::random(&mut rng)))
            .collect();

        FormulaPool {
            formulas,
            rng,
            examples: Vec::new(),
            associations: Vec::new(),
            lambda_b: 0.0,
            lambda_d: 0.0,
            target_b: None,
            target_d: None,
            coherence_gain: 0.0,
            temperature: 1.0,
            top_k: POOL_CAPACITY,
            profile: PoolProfile::default(),
        }
    }

    pub fn profile(&self) -> PoolProfile {
        self.profile
    }

    pub fn formulas(&self) -> &[Formula] {
        &self.formulas
    }

    pub fn associations(&self) -> &[Association] {
        &self.associations
    }

    // --- Ingestion -----------------------------------------------------

    /// Normalise `(question, answer)` into an [`Association`], upserting it
    /// into the bounded buffer and the integer training set.
    #[allow(clippy::too_many_arguments)]
    pub fn add_association(
        &mut self,
        symbols: &mut SymbolTable,
        mut genome: Option<&mut GenomeContext>,
        question: &str,
        answer: &str,
        source: &str,
        timestamp: u64,
    ) {
        let assoc = Association::new(symbols, genome.as_deref_mut(), question, answer, source, timestamp);

        if let Some(existing) = self
            .associations
            .iter_mut()
            .find(|a| a.input_hash == assoc.input_hash && a.question == assoc.question)
        {
            let input_hash = assoc.input_hash;
            let output_hash = assoc.output_hash;
            *existing = assoc;
            self.add_example(input_hash, output_hash);
            return;
        }

        if self.associations.len() >= ASSOCIATION_BUFFER_CAP {
            self.associations.remove(0);
        }
        let input_hash = assoc.input_hash;
        let output_hash = assoc.output_hash;
        self.associations.push(assoc);
        self.add_example(input_hash, output_hash);
    }

    fn add_example(&mut self, input_hash: u32, output_hash: u32) {
        if self.examples.len() < EXAMPLE_CAP {
            self.examples.push((input_hash as i32, output_hash as i32));
        }
    }

    // --- Prediction ------------------------------------------------------

    /// If a stored association matches `input_hash` exactly, return its
    /// stored `output_hash`; otherwise fall back to the formula's numeric
    /// prediction.
    pub fn apply(&self, formula: &Formula, input_hash: u32) -> u32 {
        if let Some(assoc) = self.associations.iter().find(|a| a.input_hash == input_hash) {
            return assoc.output_hash;
        }
        formula.gene.predict(input_hash as i32) as u32
    }

    /// String version of [`Self::apply`] for text callers: looks the answer
    /// up from the formula's own embedded associations first, then the
    /// pool's association buffer.
    pub fn lookup_answer(&self, formula: &Formula, input_hash: u32) -> Option<String> {
        formula
            .embedded_associations
            .iter()
            .chain(self.associations.iter())
            .find(|a| a.input_hash == input_hash)
            .map(|a| a.answer.clone())
    }

    // --- Evaluation --------------------------------------------------------

    fn dataset_mean_target(&self) -> f64 {
        if self.examples.is_empty() {
            0.0
        } else {
            self.examples.iter().map(|(_, t)| *t as f64).sum::<f64>() / self.examples.len() as f64
        }
    }

    /// Evaluate every formula in disjoint, up-to-`L`-wide lanes. Lanes run
    /// on their own thread and touch no shared mutable state (§4.5, §5).
    fn evaluate_all(&mut self) {
        let target_b = self.target_b.unwrap_or_else(|| self.dataset_mean_target());
        let target_d = self.target_d.unwrap_or(0.5);
        let lambda_b = self.lambda_b;
        let lambda_d = self.lambda_d;
        let coherence_gain = self.coherence_gain;
        let examples = &self.examples;

        std::thread::scope(|scope| {
            for lane in self.formulas.chunks_mut(BEAM_MAX_LANES) {
                scope.spawn(move || {
                    evaluate_lane(lane, examples, target_b, target_d, lambda_b, lambda_d, coherence_gain);
                });
            }
        });
    }

    fn sort_by_fitness_desc(&mut self) {
        self.formulas
            .sort_by(|a, b| b.fitness.partial_cmp(&a.fitness).unwrap_or(std::cmp::Ordering::Equal));
    }

    fn reproduce(&mut self) {
        let elite = (self.formulas.len() / 3).max(1);
        let top_k = self.top_k.min(self.formulas.len()).max(elite);
        let mutation_count = ((self.temperature * 2.0).round() as i64)
            .clamp(1, GENE_LEN as i64) as usize;

        for i in elite..self.formulas.len() {
            let a_idx = self.rng.next_range(top_k as u64) as usize;
            let b_idx = self.rng.next_range(top_k as u64) as usize;
            let parent_a = self.formulas[a_idx].gene.clone();
            let parent_b = self.formulas[b_idx].gene.clone();

            let mut child_gene = Gene::crossover(&parent_a, &parent_b);
            child_gene.mutate(mutation_count, &mut self.rng);

            self.formulas[i] = Formula::new(child_gene);
        }
    }

    fn apply_knowledge_carrier(&mut self) {
        if self.associations.is_empty() {
            return;
        }
        let carriers = self.formulas.len().min(3);
        for formula in self.formulas.iter_mut().take(carriers) {
            formula.set_embedded_associations(&self.associations);
            // Preserved verbatim from the source: the carrier slot is
            // pinned to maximum fitness regardless of its penalised score.
            formula.fitness = 1.0;
        }
        self.sort_by_fitness_desc();
    }

    /// Run `generations` rounds of evaluate -> sort -> reproduce, then a
    /// final evaluate/sort/knowledge-carrier pass.
    pub fn tick(&mut self, generations: u32) {
        let start = std::time::Instant::now();

        for _ in 0..generations {
            self.evaluate_all();
            self.sort_by_fitness_desc();
            self.reproduce();
        }
        self.evaluate_all();
        self.sort_by_fitness_desc();
        self.apply_knowledge_carrier();

        self.profile.generation_steps += generations as u64;
        self.profile.evaluation_calls += self.formulas.len() as u64 * (generations as u64 + 1);
        self.profile.last_generation_ms = start.elapsed().as_millis() as u64;

        log::debug!(
            "tick: {generations} generations, best fitness {:.4}, {}ms",
            self.formulas[0].fitness,
            self.profile.last_generation_ms
        );
    }

    /// `formulas[0]`. Undefined ordering before the first `tick`.
    pub fn best(&self) -> &Formula {
        &self.formulas[0]
    }

    // --- Feedback & controls -----------------------------------------------

    pub fn feedback(&mut self, gene_digits: &[u8], delta: f64) -> KolibriResult<()> {
        let delta = delta.clamp(-1.0, 1.0);
        let idx = self
            .formulas
            .iter()
            .position(|f| f.gene.digits() == gene_digits)
            .ok_or_else(|| KolibriError::NotFound("no formula with the given gene".into()))?;

        self.formulas[idx].feedback = (self.formulas[idx].feedback + delta).clamp(-1.0, 1.0);
        self.formulas[idx].fitness = (self.formulas[idx].fitness + delta).clamp(0.0, 1.0);
        self.sort_by_fitness_desc();
        Ok(())
    }

    pub fn set_penalties(&mut self, lambda_b: f64, lambda_d: f64) {
        self.lambda_b = lambda_b.max(0.0);
        self.lambda_d = lambda_d.max(0.0);
    }

    /// `NaN` on either target means "use the dataset default".
    pub fn set_targets(&mut self, target_b: f64, target_d: f64) {
        self.target_b = if target_b.is_nan() { None } else { Some(target_b) };
        self.target_d = if target_d.is_nan() { None } else { Some(target_d.clamp(0.0, 1.0)) };
    }

    pub fn set_coherence_gain(&mut self, gain: f64) {
        self.coherence_gain = gain.max(0.0);
    }

    pub fn set_sampling(&mut self, temperature: f64, top_k: usize) {
        self.temperature = temperature.clamp(f64::EPSILON, 2.0);
        self.top_k = top_k.clamp(1, self.formulas.len());
    }

    /// Copy the gene digits, then (if room remains and associations exist)
    /// append the digit-codec encoding of a JSON view of the embedded
    /// associations, bounded by `max_len`.
    pub fn formula_digits(&self, formula: &Formula, max_len: usize) -> Vec<u8> {
        let mut out = formula.gene.digits().to_vec();
        out.truncate(max_len);
        if out.len() >= max_len || formula.embedded_associations.is_empty() {
            return out;
        }

        let associations: Vec<_> = formula
            .embedded_associations
            .iter()
            .map(|a| serde_json::json!({"q": a.question, "a": a.answer}))
            .collect();
        let json = serde_json::json!({ "associations": associations }).to_string();
        let json_digits = crate::digits::encode_bytes(json.as_bytes());

        let remaining = max_len - out.len();
        out.extend(json_digits.into_iter().take(remaining));
        out
    }
}

fn evaluate_lane(
    lane: &mut [Formula],
    examples: &[(i32, i32)],
    target_b: f64,
    target_d: f64,
    lambda_b: f64,
    lambda_d: f64,
    coherence_gain: f64,
) {
    // Read-only pass so we can later take `&mut formula` without aliasing
    // the rest of the lane.
    let lane_info: Vec<(f64, Gene)> = lane.iter().map(|f| (f.gene.phase(), f.gene.clone())).collect();

    for (i, formula) in lane.iter_mut().enumerate() {
        let gene = formula.gene.clone();

        let mut sum_abs_err = 0.0;
        let mut sum_pred = 0.0;
        for &(input, target) in examples {
            let pred = gene.predict(input);
            sum_abs_err += (target as f64 - pred as f64).abs();
            sum_pred += pred as f64;
        }
        let mean_pred = if examples.is_empty() { 0.0 } else { sum_pred / examples.len() as f64 };

        let base_score = 1.0 / (1.0 + sum_abs_err + gene.complexity_penalty());
        let drift_b = (mean_pred - target_b).abs();
        let drift_d = (gene.diversity() - target_d).abs();
        let phase = lane_info[i].0;

        let mut score = (base_score - lambda_b * drift_b - lambda_d * drift_d).max(0.0);
        score = (score + formula.feedback).clamp(0.0, 1.0);

        if coherence_gain > 0.0 {
            for (j, (peer_phase, peer_gene)) in lane_info.iter().enumerate() {
                if j == i {
                    continue;
                }
                let sim = gene::topological_similarity(&gene, peer_gene);
                score += coherence_gain * (phase - peer_phase).cos() * sim;
            }
            score = score.clamp(0.0, 1.0);
        }

        formula.fitness = score;
        formula.drift_b = drift_b;
        formula.drift_d = drift_d;
        formula.phase = phase;
    }
}
