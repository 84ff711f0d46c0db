//! Problem supply
//!
//! One explicit service instance per client, shared by its sessions. Lookup
//! order for a batch:
//! 1. fresh cache entry for (topic, level)
//! 2. local level table (times/division tables), cached
//! 3. external generator, within the call budget, filtered to the topic
//! 4. synthesized arithmetic fallback
//!
//! Only one fetch may be in flight at a time; a second caller gets
//! `SupplyError::AlreadyGenerating` and should simply try again later.

pub mod cache;
pub mod external;
pub mod local;
pub mod rate_limit;

use std::collections::BTreeSet;

use rand::SeedableRng;
use rand::seq::SliceRandom;
use rand_pcg::Pcg32;

pub use cache::SupplyCache;
pub use external::{ExternalGenerator, GeneratedItem, build_prompt, parse_response};
pub use local::TopicCategory;
pub use rate_limit::RateLimiter;

use crate::consts::*;
use crate::error::{GeneratorError, SupplyError};
use crate::sim::{Operation, Problem};

/// Supply tuning
#[derive(Debug, Clone, PartialEq)]
pub struct SupplyConfig {
    pub cache_ttl_ms: u64,
    pub max_calls_per_window: usize,
    pub window_ms: u64,
    pub batch_size: usize,
    pub max_level: u32,
    pub seed: u64,
}

impl Default for SupplyConfig {
    fn default() -> Self {
        Self {
            cache_ttl_ms: SUPPLY_CACHE_TTL_MS,
            max_calls_per_window: GENERATOR_CALLS_PER_WINDOW,
            window_ms: GENERATOR_WINDOW_MS,
            batch_size: BATCH_SIZE,
            max_level: MAX_LEVEL,
            seed: 0x5eed,
        }
    }
}

/// Where the last batch came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupplySource {
    Cache,
    LocalTable,
    External,
    Fallback,
    /// Nothing could produce problems for the topic
    Unavailable,
}

/// Permission to run one fetch; returned by `begin_fetch`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTicket {
    pub topic: String,
    pub level: u32,
}

/// Problem supply service
pub struct ProblemSupplyService {
    config: SupplyConfig,
    cache: SupplyCache,
    limiter: RateLimiter,
    generator: Option<Box<dyn ExternalGenerator>>,
    generating: bool,
    rng: Pcg32,
    next_problem_id: u64,
    last_source: Option<SupplySource>,
}

impl ProblemSupplyService {
    pub fn new(config: SupplyConfig) -> Self {
        Self {
            cache: SupplyCache::new(config.cache_ttl_ms),
            limiter: RateLimiter::new(config.max_calls_per_window, config.window_ms),
            rng: Pcg32::seed_from_u64(config.seed),
            config,
            generator: None,
            generating: false,
            next_problem_id: 1,
            last_source: None,
        }
    }

    pub fn with_generator(config: SupplyConfig, generator: Box<dyn ExternalGenerator>) -> Self {
        let mut service = Self::new(config);
        service.generator = Some(generator);
        service
    }

    pub fn set_generator(&mut self, generator: Option<Box<dyn ExternalGenerator>>) {
        self.generator = generator;
    }

    pub fn is_generating(&self) -> bool {
        self.generating
    }

    pub fn last_source(&self) -> Option<SupplySource> {
        self.last_source
    }

    /// Claim the in-flight slot for a fetch
    pub fn begin_fetch(&mut self, topic: &str, level: u32) -> Result<FetchTicket, SupplyError> {
        let topic = topic.trim();
        if topic.is_empty() {
            return Err(SupplyError::EmptyTopic);
        }
        if level == 0 || level > self.config.max_level {
            return Err(SupplyError::LevelOutOfRange(level));
        }
        if self.generating {
            log::debug!("Fetch for {} level {} skipped: already generating", topic, level);
            return Err(SupplyError::AlreadyGenerating);
        }
        self.generating = true;
        Ok(FetchTicket {
            topic: topic.to_string(),
            level,
        })
    }

    /// Release the in-flight slot without producing a batch
    pub fn cancel_fetch(&mut self, ticket: FetchTicket) {
        log::debug!("Fetch for {} level {} cancelled", ticket.topic, ticket.level);
        self.generating = false;
    }

    /// Produce the batch for a claimed fetch and release the slot. Never
    /// fails; an empty batch means no path could serve the topic.
    pub fn complete_fetch(&mut self, ticket: FetchTicket, now_ms: u64) -> Vec<Problem> {
        let (batch, source) = self.produce(&ticket.topic, ticket.level, now_ms);
        self.generating = false;
        self.last_source = Some(source);
        log::info!(
            "Supplied {} problems for {} level {} ({:?})",
            batch.len(),
            ticket.topic,
            ticket.level,
            source
        );
        batch
    }

    /// Claim, produce and release in one call
    pub fn fetch_batch(&mut self, topic: &str, level: u32, now_ms: u64) -> Result<Vec<Problem>, SupplyError> {
        let ticket = self.begin_fetch(topic, level)?;
        Ok(self.complete_fetch(ticket, now_ms))
    }

    fn produce(&mut self, topic: &str, level: u32, now_ms: u64) -> (Vec<Problem>, SupplySource) {
        self.cache.purge_expired(now_ms);
        if let Some(batch) = self.cache.get(topic, level, now_ms) {
            return (batch, SupplySource::Cache);
        }

        let category = TopicCategory::parse(topic);

        if let Some(table) = local::table_batch(&category, level) {
            let batch = self.finish_batch(table);
            self.cache.insert(topic, level, batch.clone(), now_ms);
            return (batch, SupplySource::LocalTable);
        }

        match self.call_generator(topic, &category, level, now_ms) {
            Ok(problems) => {
                let batch = self.finish_batch(problems);
                self.cache.insert(topic, level, batch.clone(), now_ms);
                return (batch, SupplySource::External);
            }
            Err(GeneratorError::Unavailable) => {}
            Err(GeneratorError::RateLimited) => {
                log::info!("Generator budget spent, falling back for {} level {}", topic, level);
            }
            Err(e) => log::warn!("Generator failed for {} level {}: {}", topic, level, e),
        }

        let synthesized = local::synthesize(&category, level, self.config.batch_size, &mut self.rng);
        if synthesized.is_empty() {
            log::warn!("No supply path can serve topic {:?}", topic);
            return (Vec::new(), SupplySource::Unavailable);
        }
        (self.finish_batch(synthesized), SupplySource::Fallback)
    }

    fn call_generator(
        &mut self,
        topic: &str,
        category: &TopicCategory,
        level: u32,
        now_ms: u64,
    ) -> Result<Vec<Problem>, GeneratorError> {
        let generator = self.generator.as_mut().ok_or(GeneratorError::Unavailable)?;
        if !self.limiter.allows(now_ms) {
            return Err(GeneratorError::RateLimited);
        }

        let reply = generator.generate(topic, level, self.config.batch_size)?;
        self.limiter.record(now_ms);

        let items = parse_response(&reply)?;
        let total = items.len();
        let mut seen = BTreeSet::new();
        let problems: Vec<Problem> = items
            .into_iter()
            .filter_map(|item| {
                let operation = Operation::from_tag(&item.operation);
                if !category.accepts(&operation) || !seen.insert(item.question.clone()) {
                    return None;
                }
                Some(Problem {
                    id: 0,
                    question: item.question,
                    answer: item.answer,
                    level,
                    operation,
                })
            })
            .collect();

        if problems.len() < total {
            log::debug!("Discarded {} off-topic or duplicate items", total - problems.len());
        }
        if problems.is_empty() {
            return Err(GeneratorError::Malformed("no items matched the topic".to_string()));
        }
        Ok(problems)
    }

    /// Assign ids and shuffle
    fn finish_batch(&mut self, mut problems: Vec<Problem>) -> Vec<Problem> {
        for problem in problems.iter_mut() {
            problem.id = self.next_problem_id;
            self.next_problem_id += 1;
        }
        problems.shuffle(&mut self.rng);
        problems
    }
}

impl std::fmt::Debug for ProblemSupplyService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProblemSupplyService")
            .field("config", &self.config)
            .field("cached", &self.cache.len())
            .field("has_generator", &self.generator.is_some())
            .field("generating", &self.generating)
            .finish()
    }
}
