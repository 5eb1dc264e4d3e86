//! Variant mutation, crossover and evolutionary search.
//!
//! Search runs on a snapshot of the repository and never modifies it; a
//! winning candidate only enters the live catalog through [`VariantMutator::promote`].

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    ConfigurationDelta, ModelTier, MutatorConfig, OutcomeRecord, StateActionKey, TaskComplexity, TaskType,
    Variant, VariantId, VariantOrigin,
};
use crate::domain::ports::FitnessEvaluator;
use crate::services::policies::make_rng;
use crate::services::reward_calculator::RewardCalculator;
use crate::services::value_store::ValueStore;
use crate::services::variant_repository::VariantRepository;

/// Which part of a configuration delta a mutation perturbs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationAxis {
    /// Gaussian perturbation of one bounded numeric parameter.
    Parameter(String),
    /// Add or drop one instruction fragment.
    Instruction,
    /// Step to a neighbouring model tier.
    ModelTier,
}

/// A scored member of a search population.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub variant: Variant,
    /// Mean reward over the candidate's trials.
    pub fitness: f64,
    pub trials: usize,
}

/// Result of one evolutionary search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchReport {
    pub agent_name: String,
    pub task_type: TaskType,
    pub generations: usize,
    pub evaluated: usize,
    /// Final population, best first.
    pub population: Vec<Candidate>,
    /// Best variant that was already in the catalog.
    pub incumbent: Option<Candidate>,
}

impl SearchReport {
    pub fn best(&self) -> Option<&Candidate> {
        self.population.first()
    }

    /// Best candidate not yet in the catalog that beats the incumbent by `margin`.
    pub fn winner(&self, margin: f64) -> Option<&Candidate> {
        let incumbent_fitness = self.incumbent.as_ref().map_or(f64::NEG_INFINITY, |c| c.fitness);
        let incumbent_id = self.incumbent.as_ref().map(|c| &c.variant.variant_id);
        self.population.iter().find(|c| {
            c.variant.origin != VariantOrigin::Authored
                && Some(&c.variant.variant_id) != incumbent_id
                && c.fitness >= incumbent_fitness + margin
        })
    }
}

const ID_HASH_LEN: usize = 12;

/// Deterministic child id: `<root>-<12 hex chars of sha256(base|descriptor)>`.
///
/// `root` is the base id without the hash suffix of an earlier derivation, so
/// ids do not grow with lineage depth.
pub fn derive_variant_id(base: &VariantId, descriptor: &str) -> VariantId {
    let mut hasher = Sha256::new();
    hasher.update(base.as_str().as_bytes());
    hasher.update(b"|");
    hasher.update(descriptor.as_bytes());
    let digest = hasher.finalize();
    let short: String = digest
        .iter()
        .take(ID_HASH_LEN / 2)
        .map(|b| format!("{b:02x}"))
        .collect();
    VariantId::new(format!("{}-{short}", id_root(base.as_str())))
}

fn id_root(id: &str) -> &str {
    match id.rsplit_once('-') {
        Some((root, tail))
            if !root.is_empty()
                && tail.len() == ID_HASH_LEN
                && tail.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) =>
        {
            root
        }
        _ => id,
    }
}

/// Produces new variants and runs offline evolutionary search.
pub struct VariantMutator {
    config: MutatorConfig,
    repository: Arc<VariantRepository>,
    evaluator: Arc<dyn FitnessEvaluator>,
    reward: RewardCalculator,
    rng: Mutex<StdRng>,
}

impl VariantMutator {
    pub fn new(
        config: MutatorConfig,
        repository: Arc<VariantRepository>,
        evaluator: Arc<dyn FitnessEvaluator>,
        reward: RewardCalculator,
    ) -> Self {
        let rng = Mutex::new(make_rng(config.seed));
        Self {
            config,
            repository,
            evaluator,
            reward,
            rng,
        }
    }

    pub fn config(&self) -> &MutatorConfig {
        &self.config
    }

    /// Axes applicable under the current configuration.
    pub fn axes(&self) -> Vec<MutationAxis> {
        let mut axes: Vec<MutationAxis> = self
            .config
            .parameter_bounds
            .keys()
            .map(|name| MutationAxis::Parameter(name.clone()))
            .collect();
        if !self.config.instruction_pool.is_empty() {
            axes.push(MutationAxis::Instruction);
        }
        axes.push(MutationAxis::ModelTier);
        axes
    }

    fn random_axis(&self) -> MutationAxis {
        let axes = self.axes();
        let mut rng = self.rng.lock();
        axes.choose(&mut *rng)
            .cloned()
            .unwrap_or(MutationAxis::ModelTier)
    }

    /// New variant differing from `base` along one axis.
    pub fn mutate(&self, base: &Variant, axis: &MutationAxis) -> DomainResult<Variant> {
        let mut delta = base.configuration_delta.clone();
        let descriptor = {
            let mut rng = self.rng.lock();
            match axis {
                MutationAxis::Parameter(name) => {
                    let (lo, hi) = *self.config.parameter_bounds.get(name).ok_or_else(|| {
                        DomainError::ValidationFailed(format!("no bounds for parameter '{name}'"))
                    })?;
                    let current = delta
                        .parameters
                        .get(name)
                        .copied()
                        .unwrap_or((lo + hi) / 2.0);
                    let sigma = (self.config.parameter_sigma * (hi - lo)).max(f64::EPSILON);
                    let noise = Normal::new(0.0, sigma)
                        .map_err(|e| DomainError::ValidationFailed(e.to_string()))?
                        .sample(&mut *rng);
                    let value = ((current + noise).clamp(lo, hi) * 1e4).round() / 1e4;
                    delta.parameters.insert(name.clone(), value);
                    format!("param:{name}={value:.4}")
                }
                MutationAxis::Instruction => {
                    let unused: Vec<&String> = self
                        .config
                        .instruction_pool
                        .iter()
                        .filter(|f| !delta.instructions.contains(f))
                        .collect();
                    let add = !unused.is_empty()
                        && (delta.instructions.is_empty() || rng.random_bool(0.7));
                    if add {
                        let fragment = (*unused.choose(&mut *rng).ok_or_else(|| {
                            DomainError::ValidationFailed("instruction pool is empty".to_string())
                        })?)
                        .clone();
                        delta.instructions.push(fragment.clone());
                        format!("instr:+{fragment}")
                    } else if !delta.instructions.is_empty() {
                        let idx = rng.random_range(0..delta.instructions.len());
                        let fragment = delta.instructions.remove(idx);
                        format!("instr:-{fragment}")
                    } else {
                        return Err(DomainError::ValidationFailed(
                            "no instruction fragments to add or drop".to_string(),
                        ));
                    }
                }
                MutationAxis::ModelTier => {
                    let current = delta.model_tier.unwrap_or(ModelTier::Standard);
                    let next = *current
                        .neighbours()
                        .choose(&mut *rng)
                        .unwrap_or(&ModelTier::Standard);
                    delta.model_tier = Some(next);
                    format!("tier:{}", next.as_str())
                }
            }
        };

        let variant_id = derive_variant_id(&base.variant_id, &descriptor);
        debug!(base = %base.variant_id, child = %variant_id, %descriptor, "Mutated variant");
        Ok(Variant::derived(
            base.agent_name.clone(),
            variant_id,
            delta,
            vec![base.variant_id.clone()],
            VariantOrigin::Mutation,
        ))
    }

    /// Child mixing two parents' deltas.
    pub fn crossover(&self, a: &Variant, b: &Variant) -> DomainResult<Variant> {
        if a.agent_name != b.agent_name {
            return Err(DomainError::ValidationFailed(format!(
                "cannot cross variants of '{}' and '{}'",
                a.agent_name, b.agent_name
            )));
        }

        let mut rng = self.rng.lock();
        let mut delta = ConfigurationDelta::default();

        let names: BTreeSet<&String> = a
            .configuration_delta
            .parameters
            .keys()
            .chain(b.configuration_delta.parameters.keys())
            .collect();
        for name in names {
            let pa = a.configuration_delta.parameters.get(name);
            let pb = b.configuration_delta.parameters.get(name);
            let chosen = match (pa, pb) {
                (Some(x), Some(y)) => Some(if rng.random_bool(0.5) { *x } else { *y }),
                (Some(x), None) | (None, Some(x)) => rng.random_bool(0.5).then_some(*x),
                (None, None) => None,
            };
            if let Some(value) = chosen {
                delta.parameters.insert(name.clone(), value);
            }
        }

        for fragment in a
            .configuration_delta
            .instructions
            .iter()
            .chain(&b.configuration_delta.instructions)
        {
            if delta.instructions.contains(fragment) {
                continue;
            }
            let shared = a.configuration_delta.instructions.contains(fragment)
                && b.configuration_delta.instructions.contains(fragment);
            if shared || rng.random_bool(0.5) {
                delta.instructions.push(fragment.clone());
            }
        }

        delta.model_tier = match (a.configuration_delta.model_tier, b.configuration_delta.model_tier) {
            (Some(x), Some(y)) => Some(if rng.random_bool(0.5) { x } else { y }),
            (x, y) => x.or(y),
        };
        drop(rng);

        let (first, second) = if a.variant_id <= b.variant_id {
            (&a.variant_id, &b.variant_id)
        } else {
            (&b.variant_id, &a.variant_id)
        };
        let descriptor = format!(
            "cross:{second}:{}",
            serde_json::to_string(&delta).map_err(DomainError::from)?
        );
        let variant_id = derive_variant_id(first, &descriptor);
        Ok(Variant::derived(
            a.agent_name.clone(),
            variant_id,
            delta,
            vec![a.variant_id.clone(), b.variant_id.clone()],
            VariantOrigin::Crossover,
        ))
    }

    async fn score(&self, variant: &Variant, task_type: &TaskType) -> DomainResult<Candidate> {
        let outcomes = self
            .evaluator
            .evaluate(variant, task_type, self.config.trials_per_candidate)
            .await?;
        let fitness = if outcomes.is_empty() {
            -1.0
        } else {
            outcomes.iter().map(|o| self.reward.calculate(o)).sum::<f64>() / outcomes.len() as f64
        };
        Ok(Candidate {
            variant: variant.clone(),
            fitness,
            trials: outcomes.len(),
        })
    }

    fn tournament<'a>(&self, population: &'a [Candidate]) -> Option<&'a Candidate> {
        let mut rng = self.rng.lock();
        let size = self.config.tournament_size.max(1);
        (0..size)
            .filter_map(|_| population.choose(&mut *rng))
            .max_by(|x, y| x.fitness.total_cmp(&y.fitness))
    }

    fn rank(population: &mut [Candidate]) {
        population.sort_by(|x, y| {
            y.fitness
                .total_cmp(&x.fitness)
                .then_with(|| x.variant.variant_id.cmp(&y.variant.variant_id))
        });
    }

    /// Run a generational search for `agent_name` on `task_type`.
    pub async fn evolutionary_search(
        &self,
        agent_name: &str,
        task_type: &TaskType,
        generations: usize,
    ) -> DomainResult<SearchReport> {
        let seeds: Vec<Variant> = self
            .repository
            .list(Some(agent_name))
            .await
            .into_iter()
            .filter(Variant::is_active)
            .collect();
        if seeds.is_empty() {
            return Err(DomainError::ValidationFailed(format!(
                "agent '{agent_name}' has no active variants to evolve"
            )));
        }

        let population_size = self.config.population_size.max(2);
        let mut scored: HashMap<VariantId, Candidate> = HashMap::new();
        let mut population: Vec<Candidate> = Vec::new();

        for seed in seeds.iter().take(population_size) {
            let candidate = self.score(seed, task_type).await?;
            scored.insert(seed.variant_id.clone(), candidate.clone());
            population.push(candidate);
        }
        let incumbent = {
            let mut authored = population.clone();
            Self::rank(&mut authored);
            authored.into_iter().next()
        };

        let mut attempts = 0;
        while population.len() < population_size && attempts < population_size * 4 {
            attempts += 1;
            let base = {
                let mut rng = self.rng.lock();
                seeds.choose(&mut *rng).cloned()
            };
            let Some(base) = base else { break };
            let child = match self.mutate(&base, &self.random_axis()) {
                Ok(child) => child,
                Err(_) => continue,
            };
            if scored.contains_key(&child.variant_id) {
                continue;
            }
            let candidate = self.score(&child, task_type).await?;
            scored.insert(child.variant_id.clone(), candidate.clone());
            population.push(candidate);
        }

        for generation in 0..generations {
            Self::rank(&mut population);
            let elite = self.config.elite_count.min(population.len());
            let mut next: Vec<Candidate> = population[..elite].to_vec();

            let mut attempts = 0;
            while next.len() < population_size && attempts < population_size * 4 {
                attempts += 1;
                let Some(p1) = self.tournament(&population).cloned() else {
                    break;
                };
                let crossover = population.len() > 1
                    && self.rng.lock().random_bool(self.config.crossover_rate.clamp(0.0, 1.0));
                let child = if crossover {
                    let Some(p2) = self.tournament(&population).cloned() else {
                        break;
                    };
                    if p2.variant.variant_id == p1.variant.variant_id {
                        self.mutate(&p1.variant, &self.random_axis())
                    } else {
                        self.crossover(&p1.variant, &p2.variant)
                    }
                } else {
                    self.mutate(&p1.variant, &self.random_axis())
                };
                let Ok(child) = child else { continue };
                if next.iter().any(|c| c.variant.variant_id == child.variant_id) {
                    continue;
                }

                let candidate = match scored.get(&child.variant_id) {
                    Some(known) => known.clone(),
                    None => {
                        let candidate = self.score(&child, task_type).await?;
                        scored.insert(child.variant_id.clone(), candidate.clone());
                        candidate
                    }
                };
                next.push(candidate);
            }

            population = next;
            debug!(
                generation,
                best = population.iter().map(|c| c.fitness).fold(f64::NEG_INFINITY, f64::max),
                "Generation complete"
            );
        }

        Self::rank(&mut population);
        info!(
            agent = %agent_name,
            task_type = %task_type,
            generations,
            evaluated = scored.len(),
            best = population.first().map_or(f64::NAN, |c| c.fitness),
            "Evolutionary search complete"
        );

        Ok(SearchReport {
            agent_name: agent_name.to_string(),
            task_type: task_type.clone(),
            generations,
            evaluated: scored.len(),
            population,
            incumbent,
        })
    }

    /// Add a searched candidate to the live catalog.
    pub async fn promote(&self, candidate: &Variant) -> DomainResult<()> {
        if self
            .repository
            .get(&candidate.agent_name, &candidate.variant_id)
            .await
            .is_some()
        {
            return Err(DomainError::ValidationFailed(format!(
                "variant '{}' is already in the catalog",
                candidate.variant_id
            )));
        }
        self.repository.register(candidate.clone()).await?;
        info!(agent = %candidate.agent_name, variant = %candidate.variant_id, "Variant promoted");
        Ok(())
    }

    /// Run searches on an interval in the background.
    ///
    /// Winners that beat the incumbent by `promotion_margin` are logged, and
    /// promoted when `auto_promote` is set.
    pub fn spawn_periodic_search(
        self: Arc<Self>,
        agent_name: String,
        task_type: TaskType,
        generations: usize,
        every: Duration,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let report = match self
                    .evolutionary_search(&agent_name, &task_type, generations)
                    .await
                {
                    Ok(report) => report,
                    Err(err) => {
                        warn!(agent = %agent_name, error = %err, "Periodic search failed");
                        continue;
                    }
                };
                let Some(winner) = report.winner(self.config.promotion_margin) else {
                    continue;
                };
                info!(
                    agent = %agent_name,
                    variant = %winner.variant.variant_id,
                    fitness = winner.fitness,
                    incumbent = report.incumbent.as_ref().map_or(f64::NAN, |c| c.fitness),
                    "Search found a better variant"
                );
                if self.config.auto_promote {
                    if let Err(err) = self.promote(&winner.variant).await {
                        warn!(variant = %winner.variant.variant_id, error = %err, "Auto-promotion failed");
                    }
                }
            }
        })
    }
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, n) = values.fold((0.0, 0usize), |(sum, n), v| (sum + v, n + 1));
    (n > 0).then_some(sum / n as f64)
}

fn tier_of(delta: &ConfigurationDelta) -> ModelTier {
    delta.model_tier.unwrap_or(ModelTier::Standard)
}

/// Per-feature reward effects fitted on an agent's observed variants.
#[derive(Debug, Default)]
struct FeatureEffects {
    /// Mean value with the fragment minus mean value without it.
    instructions: HashMap<String, f64>,
    /// Mean value per model tier.
    tiers: HashMap<ModelTier, f64>,
    /// Least-squares slope of value against each parameter.
    slopes: HashMap<String, f64>,
}

impl FeatureEffects {
    fn fit(observed: &[(ConfigurationDelta, f64)]) -> Self {
        let mut effects = Self::default();

        let fragments: BTreeSet<&String> = observed
            .iter()
            .flat_map(|(delta, _)| delta.instructions.iter())
            .collect();
        for fragment in fragments {
            let with = mean(
                observed
                    .iter()
                    .filter(|(d, _)| d.instructions.contains(fragment))
                    .map(|(_, v)| *v),
            );
            let without = mean(
                observed
                    .iter()
                    .filter(|(d, _)| !d.instructions.contains(fragment))
                    .map(|(_, v)| *v),
            );
            if let (Some(with), Some(without)) = (with, without) {
                effects.instructions.insert(fragment.clone(), with - without);
            }
        }

        for tier in ModelTier::ALL {
            let tier_mean = mean(
                observed
                    .iter()
                    .filter(|(d, _)| tier_of(d) == tier)
                    .map(|(_, v)| *v),
            );
            if let Some(tier_mean) = tier_mean {
                effects.tiers.insert(tier, tier_mean);
            }
        }

        let names: BTreeSet<&String> = observed
            .iter()
            .flat_map(|(delta, _)| delta.parameters.keys())
            .collect();
        for name in names {
            let points: Vec<(f64, f64)> = observed
                .iter()
                .filter_map(|(d, v)| d.parameters.get(name).map(|x| (*x, *v)))
                .collect();
            let (Some(mx), Some(mv)) = (
                mean(points.iter().map(|(x, _)| *x)),
                mean(points.iter().map(|(_, v)| *v)),
            ) else {
                continue;
            };
            let spread: f64 = points.iter().map(|(x, _)| (x - mx).powi(2)).sum();
            if spread > f64::EPSILON {
                let covariance: f64 = points.iter().map(|(x, v)| (x - mx) * (v - mv)).sum();
                effects.slopes.insert(name.clone(), covariance / spread);
            }
        }

        effects
    }

    /// Predicted value change when moving from `from` to `to`.
    ///
    /// Features without observed contrast contribute nothing.
    fn shift(&self, from: &ConfigurationDelta, to: &ConfigurationDelta) -> f64 {
        let effect = |f: &String| self.instructions.get(f).copied().unwrap_or(0.0);
        let added: f64 = to
            .instructions
            .iter()
            .filter(|f| !from.instructions.contains(f))
            .map(effect)
            .sum();
        let dropped: f64 = from
            .instructions
            .iter()
            .filter(|f| !to.instructions.contains(f))
            .map(effect)
            .sum();

        let tier = match (self.tiers.get(&tier_of(from)), self.tiers.get(&tier_of(to))) {
            (Some(a), Some(b)) => b - a,
            _ => 0.0,
        };

        let parameters: f64 = self
            .slopes
            .iter()
            .filter_map(|(name, slope)| {
                let a = from.parameters.get(name)?;
                let b = to.parameters.get(name)?;
                Some(slope * (b - a))
            })
            .sum();

        added - dropped + tier + parameters
    }
}

/// Offline evaluator that estimates trial outcomes from recorded history.
///
/// A candidate's estimate starts from the value of the nearest of itself and
/// its ancestors with history (the anchor). It is then shifted by the feature
/// effects fitted across the agent's observed variants, for every instruction
/// fragment, model tier and parameter on which the candidate differs from the
/// anchor. The estimated mean reward `m` becomes `round(p * trials)` successes
/// with `p = (m + 1) / 2`.
pub struct HistoricalEvaluator {
    store: Arc<ValueStore>,
    repository: Arc<VariantRepository>,
}

impl HistoricalEvaluator {
    pub fn new(store: Arc<ValueStore>, repository: Arc<VariantRepository>) -> Self {
        Self { store, repository }
    }

    async fn observed_value(
        &self,
        agent_name: &str,
        variant_id: &VariantId,
        task_type: &TaskType,
    ) -> Option<f64> {
        let entry = self.store.get(&StateActionKey::new(
            agent_name,
            task_type.clone(),
            variant_id.clone(),
        ));
        if !entry.is_unseen() {
            return Some(entry.value);
        }
        self.repository
            .get(agent_name, variant_id)
            .await
            .and_then(|v| v.performance.mean_for(task_type))
    }

    async fn effects(&self, agent_name: &str, task_type: &TaskType) -> FeatureEffects {
        let mut observed = Vec::new();
        for variant in self.repository.list(Some(agent_name)).await {
            if let Some(value) = self
                .observed_value(agent_name, &variant.variant_id, task_type)
                .await
            {
                observed.push((variant.configuration_delta, value));
            }
        }
        FeatureEffects::fit(&observed)
    }

    async fn estimate(&self, variant: &Variant, task_type: &TaskType) -> f64 {
        let mut chain = vec![variant.variant_id.clone()];
        chain.extend(variant.parents.iter().cloned());
        chain.extend(
            self.repository
                .lineage(&variant.agent_name, &variant.variant_id)
                .await,
        );

        for id in chain {
            let Some(value) = self.observed_value(&variant.agent_name, &id, task_type).await else {
                continue;
            };
            if id == variant.variant_id {
                return value;
            }
            let Some(anchor) = self.repository.get(&variant.agent_name, &id).await else {
                return value;
            };
            let shift = self
                .effects(&variant.agent_name, task_type)
                .await
                .shift(&anchor.configuration_delta, &variant.configuration_delta);
            debug!(
                variant = %variant.variant_id,
                anchor = %id,
                value,
                shift,
                "Estimated candidate from anchor"
            );
            return value + shift;
        }
        0.0
    }
}

#[async_trait]
impl FitnessEvaluator for HistoricalEvaluator {
    async fn evaluate(
        &self,
        variant: &Variant,
        task_type: &TaskType,
        trials: usize,
    ) -> DomainResult<Vec<OutcomeRecord>> {
        let mean = self.estimate(variant, task_type).await.clamp(-1.0, 1.0);
        let p = (mean + 1.0) / 2.0;
        let successes = (p * trials as f64).round() as usize;
        Ok((0..trials)
            .map(|i| {
                let mut outcome = OutcomeRecord::new(i < successes, p);
                outcome.task_complexity = TaskComplexity::Medium;
                outcome
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::InMemoryVariantCatalog;

    /// Rewards high temperature and the heavy tier.
    struct ShapedEvaluator;

    #[async_trait]
    impl FitnessEvaluator for ShapedEvaluator {
        async fn evaluate(
            &self,
            variant: &Variant,
            _task_type: &TaskType,
            trials: usize,
        ) -> DomainResult<Vec<OutcomeRecord>> {
            let delta = &variant.configuration_delta;
            let temperature = delta.parameters.get("temperature").copied().unwrap_or(0.0);
            let tier_bonus = match delta.model_tier {
                Some(ModelTier::Heavy) => 0.3,
                Some(ModelTier::Standard) => 0.1,
                _ => 0.0,
            };
            let quality = (0.2 + 0.5 * temperature + tier_bonus).clamp(0.0, 1.0);
            Ok((0..trials).map(|_| OutcomeRecord::new(true, quality)).collect())
        }
    }

    fn config() -> MutatorConfig {
        MutatorConfig {
            seed: Some(11),
            population_size: 6,
            ..MutatorConfig::default()
        }
    }

    async fn setup() -> (Arc<VariantRepository>, VariantMutator) {
        let repository = Arc::new(VariantRepository::new(Arc::new(InMemoryVariantCatalog::new())));
        repository
            .register(Variant::authored(
                "A",
                "base",
                ConfigurationDelta::default()
                    .with_parameter("temperature", 0.1)
                    .with_model_tier(ModelTier::Light),
            ))
            .await
            .unwrap();
        let mutator = VariantMutator::new(
            config(),
            Arc::clone(&repository),
            Arc::new(ShapedEvaluator),
            RewardCalculator::default(),
        );
        (repository, mutator)
    }

    #[test]
    fn test_derived_ids_are_deterministic() {
        let base = VariantId::from("base");
        assert_eq!(
            derive_variant_id(&base, "tier:heavy"),
            derive_variant_id(&base, "tier:heavy")
        );
        assert_ne!(
            derive_variant_id(&base, "tier:heavy"),
            derive_variant_id(&base, "tier:light")
        );
        assert!(derive_variant_id(&base, "x").as_str().starts_with("base-"));
    }

    #[test]
    fn test_derived_ids_keep_hyphenated_root() {
        let base = VariantId::from("fast-mode");
        let child = derive_variant_id(&base, "tier:heavy");
        assert!(child.as_str().starts_with("fast-mode-"));
        assert_eq!(child.as_str().len(), "fast-mode".len() + 1 + ID_HASH_LEN);

        let grandchild = derive_variant_id(&child, "tier:light");
        assert!(grandchild.as_str().starts_with("fast-mode-"));
        assert_eq!(grandchild.as_str().len(), child.as_str().len());
        assert_ne!(grandchild, child);

        assert_ne!(
            derive_variant_id(&VariantId::from("fast-mode"), "x"),
            derive_variant_id(&VariantId::from("fast-lane"), "x")
        );
    }

    #[tokio::test]
    async fn test_mutate_changes_one_axis_and_records_parent() {
        let (repository, mutator) = setup().await;
        let base = repository.require("A", &"base".into()).await.unwrap();

        let child = mutator.mutate(&base, &MutationAxis::ModelTier).unwrap();
        assert_eq!(child.configuration_delta.model_tier, Some(ModelTier::Standard));
        assert_eq!(child.configuration_delta.parameters, base.configuration_delta.parameters);
        assert_eq!(child.parents, vec![base.variant_id.clone()]);
        assert_eq!(child.origin, VariantOrigin::Mutation);

        let child = mutator
            .mutate(&base, &MutationAxis::Parameter("temperature".into()))
            .unwrap();
        let t = child.configuration_delta.parameters["temperature"];
        assert!((0.0..=1.0).contains(&t));

        let child = mutator.mutate(&base, &MutationAxis::Instruction).unwrap();
        assert_eq!(child.configuration_delta.instructions.len(), 1);

        assert!(mutator
            .mutate(&base, &MutationAxis::Parameter("unknown".into()))
            .is_err());
    }

    #[tokio::test]
    async fn test_crossover_records_both_parents() {
        let (repository, mutator) = setup().await;
        let base = repository.require("A", &"base".into()).await.unwrap();
        let other = Variant::authored(
            "A",
            "other",
            ConfigurationDelta::default()
                .with_instruction("Prefer minimal, focused diffs.")
                .with_model_tier(ModelTier::Heavy),
        );

        let child = mutator.crossover(&base, &other).unwrap();
        assert_eq!(child.parents, vec![base.variant_id.clone(), other.variant_id.clone()]);
        assert_eq!(child.origin, VariantOrigin::Crossover);
        assert!(matches!(
            child.configuration_delta.model_tier,
            Some(ModelTier::Light | ModelTier::Heavy)
        ));

        let stranger = Variant::authored("B", "x", ConfigurationDelta::default());
        assert!(mutator.crossover(&base, &stranger).is_err());
    }

    #[tokio::test]
    async fn test_search_improves_without_touching_repository() {
        let (repository, mutator) = setup().await;
        let report = mutator
            .evolutionary_search("A", &"x".into(), 6)
            .await
            .unwrap();

        let incumbent = report.incumbent.as_ref().unwrap();
        assert_eq!(incumbent.variant.variant_id.as_str(), "base");
        assert!(report.best().unwrap().fitness >= incumbent.fitness);
        assert_eq!(report.population.len(), 6);
        assert_eq!(repository.list(Some("A")).await.len(), 1);
    }

    #[tokio::test]
    async fn test_promote_adds_candidate_once() {
        let (repository, mutator) = setup().await;
        let base = repository.require("A", &"base".into()).await.unwrap();
        let child = mutator.mutate(&base, &MutationAxis::ModelTier).unwrap();

        mutator.promote(&child).await.unwrap();
        assert!(repository.get("A", &child.variant_id).await.is_some());
        assert!(mutator.promote(&child).await.is_err());
        assert_eq!(
            repository.lineage("A", &child.variant_id).await,
            vec![VariantId::from("base")]
        );
    }

    #[tokio::test]
    async fn test_search_without_variants_fails() {
        let (_, mutator) = setup().await;
        assert!(mutator
            .evolutionary_search("nobody", &"x".into(), 1)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_historical_evaluator_inherits_parent_estimate() {
        let store = Arc::new(ValueStore::in_memory());
        let repository = Arc::new(VariantRepository::new(Arc::new(InMemoryVariantCatalog::new())));
        repository
            .register(Variant::authored("A", "base", ConfigurationDelta::default()))
            .await
            .unwrap();
        store.update(&StateActionKey::new("A", "x", "base"), 0.6, true);

        let evaluator = HistoricalEvaluator::new(Arc::clone(&store), Arc::clone(&repository));
        let child = Variant::derived(
            "A",
            "base-child".into(),
            ConfigurationDelta::default(),
            vec!["base".into()],
            VariantOrigin::Mutation,
        );
        let outcomes = evaluator.evaluate(&child, &"x".into(), 10).await.unwrap();
        assert_eq!(outcomes.len(), 10);
        assert_eq!(outcomes.iter().filter(|o| o.success).count(), 8);
    }

    const PLAN_FIRST: &str = "Think through the plan before editing files.";
    const WRITE_TESTS: &str = "Write or update tests alongside code changes.";

    async fn instruction_history() -> (Arc<ValueStore>, Arc<VariantRepository>) {
        let store = Arc::new(ValueStore::in_memory());
        let repository = Arc::new(VariantRepository::new(Arc::new(InMemoryVariantCatalog::new())));
        for (id, delta, value) in [
            ("plain", ConfigurationDelta::default(), -0.4),
            ("planned", ConfigurationDelta::default().with_instruction(PLAN_FIRST), 0.4),
            ("tested", ConfigurationDelta::default().with_instruction(WRITE_TESTS), 0.4),
        ] {
            repository
                .register(Variant::authored("A", id, delta))
                .await
                .unwrap();
            store.update(&StateActionKey::new("A", "x", id), value, true);
        }
        (store, repository)
    }

    #[tokio::test]
    async fn test_historical_evaluator_shifts_by_feature_effects() {
        let (store, repository) = instruction_history().await;
        let evaluator = HistoricalEvaluator::new(store, Arc::clone(&repository));
        let planned = repository.require("A", &"planned".into()).await.unwrap();

        let both = Variant::derived(
            "A",
            "planned-both".into(),
            planned
                .configuration_delta
                .clone()
                .with_instruction(WRITE_TESTS),
            vec![planned.variant_id.clone()],
            VariantOrigin::Mutation,
        );
        let stripped = Variant::derived(
            "A",
            "planned-none".into(),
            ConfigurationDelta::default(),
            vec![planned.variant_id.clone()],
            VariantOrigin::Mutation,
        );

        let successes = |outcomes: Vec<OutcomeRecord>| outcomes.iter().filter(|o| o.success).count();
        let x: TaskType = "x".into();
        assert_eq!(successes(evaluator.evaluate(&planned, &x, 10).await.unwrap()), 7);
        assert_eq!(successes(evaluator.evaluate(&both, &x, 10).await.unwrap()), 9);
        assert_eq!(successes(evaluator.evaluate(&stripped, &x, 10).await.unwrap()), 5);
    }

    #[tokio::test]
    async fn test_search_with_historical_evaluator_finds_winner() {
        let (store, repository) = instruction_history().await;
        let config = MutatorConfig {
            seed: Some(5),
            population_size: 8,
            trials_per_candidate: 10,
            parameter_bounds: Default::default(),
            instruction_pool: vec![PLAN_FIRST.to_string(), WRITE_TESTS.to_string()],
            ..MutatorConfig::default()
        };
        let margin = config.promotion_margin;
        let mutator = VariantMutator::new(
            config,
            Arc::clone(&repository),
            Arc::new(HistoricalEvaluator::new(store, Arc::clone(&repository))),
            RewardCalculator::default(),
        );

        let report = mutator
            .evolutionary_search("A", &"x".into(), 5)
            .await
            .unwrap();

        assert_eq!(
            report.incumbent.as_ref().unwrap().variant.variant_id.as_str(),
            "planned"
        );
        let winner = report.winner(margin).expect("search should beat the incumbent");
        let instructions = &winner.variant.configuration_delta.instructions;
        assert!(instructions.iter().any(|f| f == PLAN_FIRST));
        assert!(instructions.iter().any(|f| f == WRITE_TESTS));
        assert_eq!(repository.list(Some("A")).await.len(), 3);
    }
}
