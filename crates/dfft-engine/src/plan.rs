//! Plan compilation, plan metadata and the planner-owned plan cache.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use dfft_runtime::{ResourceKind, ResourceToken, Runtime};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::decompose::{AxisPlan, DecompositionLimits, ScratchLayout, decompose, scratch_layout};
use crate::descriptor::{ResolvedLayout, TransformDescriptor, checked_product};
use crate::error::FftResult;
use crate::precision::Precision;

/// Admission mode controlling what enters the plan cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CacheAdmissionPolicy {
    Disabled,
    /// Keep at most `capacity` entries, evicting the least recently used.
    #[default]
    BoundedLru,
    AlwaysInsert,
}

/// Control-plane configuration for plan caching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanCacheConfig {
    pub capacity: usize,
    pub admission_policy: CacheAdmissionPolicy,
}

impl Default for PlanCacheConfig {
    fn default() -> Self {
        Self {
            capacity: 128,
            admission_policy: CacheAdmissionPolicy::BoundedLru,
        }
    }
}

/// Options shared by every plan a [`Planner`] compiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerOptions {
    /// Fall back to Bluestein for lengths with large prime factors.
    pub allow_bluestein: bool,
    /// Longest axis (or Bluestein padding) the planner will accept.
    pub max_length: usize,
    pub cache: PlanCacheConfig,
}

impl Default for PlannerOptions {
    fn default() -> Self {
        Self {
            allow_bluestein: true,
            max_length: 1 << 24,
            cache: PlanCacheConfig::default(),
        }
    }
}

impl PlannerOptions {
    #[must_use]
    pub fn with_bluestein(mut self, allow_bluestein: bool) -> Self {
        self.allow_bluestein = allow_bluestein;
        self
    }

    #[must_use]
    pub fn with_max_length(mut self, max_length: usize) -> Self {
        self.max_length = max_length;
        self
    }

    #[must_use]
    pub fn with_cache(mut self, cache: PlanCacheConfig) -> Self {
        self.cache = cache;
        self
    }

    fn limits(&self) -> DecompositionLimits {
        DecompositionLimits {
            allow_bluestein: self.allow_bluestein,
            max_length: self.max_length,
        }
    }
}

/// Stable cache key for planning decisions.
///
/// Direction, placement and layouts do not influence the decomposition or
/// scratch size, so forward and inverse plans of one shape share an entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlanKey {
    pub dimensions: Vec<usize>,
    pub number_of_transforms: usize,
    pub precision: Precision,
    pub allow_bluestein: bool,
    pub max_length: usize,
}

impl PlanKey {
    fn new(descriptor: &TransformDescriptor, options: &PlannerOptions) -> Self {
        Self {
            dimensions: descriptor.dimensions().to_vec(),
            number_of_transforms: descriptor.number_of_transforms(),
            precision: descriptor.precision(),
            allow_bluestein: options.allow_bluestein,
            max_length: options.max_length,
        }
    }
}

/// Fingerprint proving how a concrete plan was selected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanFingerprint {
    pub axes: Vec<AxisPlan>,
    pub estimated_flops: u64,
    pub scratch: ScratchLayout,
}

impl PlanFingerprint {
    /// Per-axis radix paths, in axis order.
    #[must_use]
    pub fn radix_paths(&self) -> Vec<Vec<usize>> {
        self.axes.iter().map(AxisPlan::radix_path).collect()
    }
}

/// Compiled strategy stored in the plan cache and shared by plans.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanMetadata {
    pub key: PlanKey,
    pub fingerprint: PlanFingerprint,
    /// blake3 digest (hex) of the canonical key and fingerprint.
    pub digest: String,
}

impl PlanMetadata {
    fn build(key: PlanKey, limits: DecompositionLimits) -> FftResult<Self> {
        let axes = decompose(
            &key.dimensions,
            key.number_of_transforms,
            key.precision,
            limits,
        )?;
        let total = checked_product(&key.dimensions)? * key.number_of_transforms;
        let scratch = scratch_layout(&axes, total, key.precision)?;
        let estimated_flops = axes
            .iter()
            .map(AxisPlan::estimated_flops)
            .fold(0u64, u64::saturating_add);
        let fingerprint = PlanFingerprint {
            axes,
            estimated_flops,
            scratch,
        };
        let digest = plan_digest(&key, &fingerprint);
        Ok(Self {
            key,
            fingerprint,
            digest,
        })
    }
}

fn plan_digest(key: &PlanKey, fingerprint: &PlanFingerprint) -> String {
    let mut hasher = blake3::Hasher::new();
    if let Ok(bytes) = serde_json::to_vec(key) {
        hasher.update(&bytes);
    }
    if let Ok(bytes) = serde_json::to_vec(fingerprint) {
        hasher.update(&bytes);
    }
    hasher.finalize().to_hex().to_string()
}

/// Hit/miss counters for a plan cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PlanCacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

#[derive(Debug)]
struct PlanCache {
    config: PlanCacheConfig,
    entries: HashMap<PlanKey, (Arc<PlanMetadata>, u64)>,
    clock: u64,
    stats: PlanCacheStats,
}

impl PlanCache {
    fn new(config: PlanCacheConfig) -> Self {
        Self {
            config,
            entries: HashMap::new(),
            clock: 0,
            stats: PlanCacheStats::default(),
        }
    }

    fn lookup(&mut self, key: &PlanKey) -> Option<Arc<PlanMetadata>> {
        self.clock += 1;
        let clock = self.clock;
        match self.entries.get_mut(key) {
            Some((metadata, last_used)) => {
                *last_used = clock;
                self.stats.hits += 1;
                Some(Arc::clone(metadata))
            }
            None => {
                self.stats.misses += 1;
                None
            }
        }
    }

    fn store(&mut self, metadata: Arc<PlanMetadata>) {
        match self.config.admission_policy {
            CacheAdmissionPolicy::Disabled => return,
            CacheAdmissionPolicy::BoundedLru => {
                let capacity = self.config.capacity.max(1);
                while self.entries.len() >= capacity {
                    let Some(oldest) = self
                        .entries
                        .iter()
                        .min_by_key(|(_, (_, last_used))| *last_used)
                        .map(|(key, _)| key.clone())
                    else {
                        break;
                    };
                    self.entries.remove(&oldest);
                    self.stats.evictions += 1;
                }
            }
            CacheAdmissionPolicy::AlwaysInsert => {}
        }
        self.entries
            .insert(metadata.key.clone(), (metadata, self.clock));
    }

    fn stats(&self) -> PlanCacheStats {
        PlanCacheStats {
            entries: self.entries.len(),
            ..self.stats
        }
    }
}

/// Compiles descriptors into plans against one runtime.
#[derive(Debug)]
pub struct Planner {
    runtime: Runtime,
    options: PlannerOptions,
    cache: Mutex<PlanCache>,
}

impl Planner {
    #[must_use]
    pub fn new(runtime: Runtime, options: PlannerOptions) -> Self {
        Self {
            runtime,
            options,
            cache: Mutex::new(PlanCache::new(options.cache)),
        }
    }

    #[must_use]
    pub const fn options(&self) -> &PlannerOptions {
        &self.options
    }

    #[must_use]
    pub const fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    /// Validate `descriptor` and compile it into a reusable plan.
    pub fn compile(&self, descriptor: &TransformDescriptor) -> FftResult<Plan> {
        self.runtime.ensure_initialized()?;
        let (input_layout, output_layout) = descriptor.validate()?;
        let key = PlanKey::new(descriptor, &self.options);

        let cached = self
            .cache
            .lock()
            .ok()
            .and_then(|mut cache| cache.lookup(&key));
        let cache_hit = cached.is_some();
        let metadata = match cached {
            Some(metadata) => metadata,
            None => {
                let metadata = Arc::new(PlanMetadata::build(key, self.options.limits())?);
                if let Ok(mut cache) = self.cache.lock() {
                    cache.store(Arc::clone(&metadata));
                }
                metadata
            }
        };

        let token = self.runtime.acquire(ResourceKind::Plan)?;
        debug!(
            dims = ?descriptor.dimensions(),
            batch = descriptor.number_of_transforms(),
            precision = descriptor.precision().name(),
            direction = descriptor.direction().name(),
            placement = descriptor.placement().name(),
            radix_paths = ?metadata.fingerprint.radix_paths(),
            scratch_bytes = metadata.fingerprint.scratch.total_bytes(),
            cache_hit,
            "plan compiled"
        );
        Ok(Plan {
            descriptor: descriptor.clone(),
            input_layout,
            output_layout,
            metadata,
            cache_hit,
            token,
        })
    }

    #[must_use]
    pub fn cache_stats(&self) -> PlanCacheStats {
        self.cache
            .lock()
            .map_or_else(|_| PlanCacheStats::default(), |cache| cache.stats())
    }

    /// Drop every cached strategy and reset the hit/miss/eviction counters.
    pub fn clear_cache(&self) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.entries.clear();
            cache.stats = PlanCacheStats::default();
        }
    }
}

/// Compile `descriptor` with default planner options.
///
/// Each call plans from scratch through a fresh [`Planner`], so the result
/// never reports a cache hit. Keep a `Planner` around to reuse strategies.
pub fn compile(runtime: &Runtime, descriptor: &TransformDescriptor) -> FftResult<Plan> {
    Planner::new(runtime.clone(), PlannerOptions::default()).compile(descriptor)
}

/// Scratch bytes `plan` needs bound before it can execute.
#[must_use]
pub fn get_scratch_requirement(plan: &Plan) -> usize {
    plan.scratch_requirement()
}

/// A compiled, immutable execution strategy for one descriptor.
///
/// Plans own no data buffers. They may be shared across threads and executed
/// concurrently as long as each execution uses its own context.
#[derive(Debug)]
pub struct Plan {
    descriptor: TransformDescriptor,
    input_layout: ResolvedLayout,
    output_layout: ResolvedLayout,
    metadata: Arc<PlanMetadata>,
    cache_hit: bool,
    token: ResourceToken,
}

impl Plan {
    #[must_use]
    pub const fn descriptor(&self) -> &TransformDescriptor {
        &self.descriptor
    }

    #[must_use]
    pub fn scratch_requirement(&self) -> usize {
        self.metadata.fingerprint.scratch.total_bytes()
    }

    #[must_use]
    pub fn scratch_layout(&self) -> ScratchLayout {
        self.metadata.fingerprint.scratch
    }

    #[must_use]
    pub fn fingerprint(&self) -> &PlanFingerprint {
        &self.metadata.fingerprint
    }

    #[must_use]
    pub fn axes(&self) -> &[AxisPlan] {
        &self.metadata.fingerprint.axes
    }

    #[must_use]
    pub fn digest(&self) -> &str {
        &self.metadata.digest
    }

    #[must_use]
    pub const fn input_layout(&self) -> &ResolvedLayout {
        &self.input_layout
    }

    #[must_use]
    pub const fn output_layout(&self) -> &ResolvedLayout {
        &self.output_layout
    }

    /// Whether this plan was compiled against `runtime`.
    #[must_use]
    pub fn belongs_to(&self, runtime: &Runtime) -> bool {
        self.token.belongs_to(runtime)
    }

    /// Whether the strategy came from the planner's cache.
    #[must_use]
    pub const fn cache_hit(&self) -> bool {
        self.cache_hit
    }

    /// Release the plan and its runtime accounting slot.
    ///
    /// Callers must synchronize any in-flight execution first.
    pub fn destroy(self) {
        debug!(digest = %self.metadata.digest, "plan destroyed");
    }
}
