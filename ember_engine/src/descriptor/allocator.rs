/// DescriptorAllocator - growable descriptor pool allocator
///
/// Hands out descriptor sets from a list of pools without tracking sets
/// individually. Pools move between two lists:
/// - `ready`: pools that may still have capacity
/// - `full`: pools that refused a set since the last `clear`
///
/// Every pool the allocator creates is in exactly one of the two lists until
/// `destroy_all`. When `ready` is empty a new pool is created with
/// `sets_per_pool` sets, which then grows by `growth_factor` up to
/// `max_sets_per_pool`.
///
/// Sets are only reclaimed wholesale by `clear`, which invalidates every set
/// handed out before it.

use crate::config::{DEFAULT_GROWTH_FACTOR, DEFAULT_MAX_SETS_PER_POOL};
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::gpu::device::GpuDevice;
use crate::gpu::types::{DescriptorPool, DescriptorSet, DescriptorSetLayout, PoolSizeRatio};
use crate::{engine_debug, engine_warn};

/// A set allocation is tried on at most this many pools
const MAX_ALLOCATION_ATTEMPTS: usize = 2;

pub struct DescriptorAllocator {
    ratios: Vec<PoolSizeRatio>,
    ready: Vec<DescriptorPool>,
    full: Vec<DescriptorPool>,
    sets_per_pool: u32,
    growth_factor: f32,
    max_sets_per_pool: u32,
    pools_created: usize,
}

impl Default for DescriptorAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl DescriptorAllocator {
    /// Allocator with the default growth factor (1.5) and ceiling (4092 sets)
    pub fn new() -> Self {
        Self::with_growth(DEFAULT_GROWTH_FACTOR, DEFAULT_MAX_SETS_PER_POOL)
    }

    /// Allocator with explicit growth parameters
    ///
    /// A growth factor below 1.0 (or NaN) is treated as 1.0 so that pool
    /// capacity never shrinks; a zero ceiling is treated as 1.
    pub fn with_growth(growth_factor: f32, max_sets_per_pool: u32) -> Self {
        Self {
            ratios: Vec::new(),
            ready: Vec::new(),
            full: Vec::new(),
            sets_per_pool: 0,
            growth_factor: if growth_factor >= 1.0 { growth_factor } else { 1.0 },
            max_sets_per_pool: max_sets_per_pool.max(1),
            pools_created: 0,
        }
    }

    /// Reset the allocator and create its first pool
    ///
    /// Pools left over from a previous `initialize` are destroyed first.
    ///
    /// # Arguments
    ///
    /// * `initial_sets` - Sets in the first pool (must be > 0)
    /// * `ratios` - Descriptors of each kind reserved per set, reused for every later pool
    ///
    /// # Errors
    ///
    /// `Error::InvalidResource` for a zero `initial_sets`, or the device error
    /// if the pool cannot be created.
    pub fn initialize(
        &mut self,
        device: &dyn GpuDevice,
        initial_sets: u32,
        ratios: &[PoolSizeRatio],
    ) -> Result<()> {
        if initial_sets == 0 {
            return Err(Engine::log_error(
                "ember::DescriptorAllocator",
                Error::InvalidResource("initial set count must be > 0".to_string()),
            ));
        }
        if self.pool_count() > 0 {
            self.destroy_all(device);
        }

        self.ratios = ratios.to_vec();
        self.pools_created = 0;

        let pool = device.create_descriptor_pool(initial_sets, &self.ratios)?;
        self.pools_created += 1;
        self.sets_per_pool = self.grow(initial_sets);
        self.ready.push(pool);

        engine_debug!(
            "ember::DescriptorAllocator",
            "Initialized with {} sets, next pool holds {}",
            initial_sets,
            self.sets_per_pool
        );
        Ok(())
    }

    /// Allocate one descriptor set of `layout`
    ///
    /// Tries the next ready pool (or a newly created one). If that pool is out
    /// of memory or fragmented it is marked full and a second pool is tried.
    /// Any other device error is returned as is and the pool stays ready.
    ///
    /// # Errors
    ///
    /// - `Error::AllocationExhausted` when the second pool refuses the set too
    /// - the device error when pool creation or allocation fails otherwise
    pub fn allocate(&mut self, device: &dyn GpuDevice, layout: DescriptorSetLayout) -> Result<DescriptorSet> {
        let mut pool = self.acquire_pool(device)?;
        let mut attempt = 1;

        loop {
            match device.allocate_descriptor_set(pool, layout) {
                Ok(set) => {
                    self.ready.push(pool);
                    return Ok(set);
                }
                Err(err) if err.is_pool_exhaustion() => {
                    self.full.push(pool);
                    if attempt == MAX_ALLOCATION_ATTEMPTS {
                        return Err(Engine::log_error(
                            "ember::DescriptorAllocator",
                            Error::AllocationExhausted(format!(
                                "{} pools refused a set of layout {:#x} (last: {})",
                                MAX_ALLOCATION_ATTEMPTS,
                                layout.as_raw(),
                                err
                            )),
                        ));
                    }
                    engine_warn!(
                        "ember::DescriptorAllocator",
                        "Pool {:#x} refused a set ({}), retrying on another pool",
                        pool.as_raw(),
                        err
                    );
                    attempt += 1;
                    pool = self.acquire_pool(device)?;
                }
                Err(err) => {
                    self.ready.push(pool);
                    return Err(err);
                }
            }
        }
    }

    /// Reset every pool and make all of them ready again
    ///
    /// Every set allocated before this call becomes invalid.
    pub fn clear(&mut self, device: &dyn GpuDevice) -> Result<()> {
        for &pool in self.ready.iter().chain(self.full.iter()) {
            device.reset_descriptor_pool(pool)?;
        }
        self.ready.append(&mut self.full);
        Ok(())
    }

    /// Destroy every pool (shutdown only)
    pub fn destroy_all(&mut self, device: &dyn GpuDevice) {
        for pool in self.ready.drain(..).chain(self.full.drain(..)) {
            device.destroy_descriptor_pool(pool);
        }
    }

    /// Pop a ready pool or create one at the current capacity
    fn acquire_pool(&mut self, device: &dyn GpuDevice) -> Result<DescriptorPool> {
        if let Some(pool) = self.ready.pop() {
            return Ok(pool);
        }
        if self.sets_per_pool == 0 {
            return Err(Engine::log_error(
                "ember::DescriptorAllocator",
                Error::InvalidResource("allocate called before initialize".to_string()),
            ));
        }

        let sets = self.sets_per_pool;
        let pool = device.create_descriptor_pool(sets, &self.ratios)?;
        self.pools_created += 1;
        self.sets_per_pool = self.grow(sets);

        engine_debug!(
            "ember::DescriptorAllocator",
            "Created pool #{} with {} sets (next: {})",
            self.pools_created,
            sets,
            self.sets_per_pool
        );
        Ok(pool)
    }

    fn grow(&self, sets: u32) -> u32 {
        let grown = (sets as f64 * self.growth_factor as f64) as u32;
        grown.max(sets).min(self.max_sets_per_pool)
    }

    /// Sets in the next pool this allocator creates
    pub fn sets_per_pool(&self) -> u32 {
        self.sets_per_pool
    }

    pub fn growth_factor(&self) -> f32 {
        self.growth_factor
    }

    pub fn max_sets_per_pool(&self) -> u32 {
        self.max_sets_per_pool
    }

    pub fn ready_count(&self) -> usize {
        self.ready.len()
    }

    pub fn full_count(&self) -> usize {
        self.full.len()
    }

    /// Pools currently owned (ready + full)
    pub fn pool_count(&self) -> usize {
        self.ready.len() + self.full.len()
    }

    /// Pools created since the last `initialize`
    pub fn pools_created(&self) -> usize {
        self.pools_created
    }

    pub fn ratios(&self) -> &[PoolSizeRatio] {
        &self.ratios
    }

    pub fn ready_pools(&self) -> &[DescriptorPool] {
        &self.ready
    }

    pub fn full_pools(&self) -> &[DescriptorPool] {
        &self.full
    }
}

impl Drop for DescriptorAllocator {
    fn drop(&mut self) {
        if self.pool_count() > 0 {
            engine_warn!(
                "ember::DescriptorAllocator",
                "Dropped with {} live pools; call destroy_all before dropping",
                self.pool_count()
            );
        }
    }
}

#[cfg(test)]
#[path = "allocator_tests.rs"]
mod tests;
