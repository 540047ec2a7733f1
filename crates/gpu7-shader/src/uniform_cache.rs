//! Uniform array size cache shared between compiles.
//!
//! A dynamically indexed uniform array is declared with the largest size seen for that shader
//! so far. Recompiling the same shader (for example with different register state) must never
//! shrink a declaration the host already sized buffers for, so sizes only grow.

use std::sync::Mutex;

use gpu7_isa::ShaderStage;
use hashbrown::HashMap;

/// Uniform array a size is tracked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UniformSlot {
    /// The uniform register file.
    Registers,
    /// Uniform buffer `0..16`.
    Buffer(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct CacheKey {
    hash: u64,
    stage: ShaderStage,
    slot: UniformSlot,
}

/// Grow-only size cache keyed by shader hash, stage and uniform slot. Entries are never
/// evicted.
#[derive(Debug, Default)]
pub struct UniformSizeCache {
    sizes: Mutex<HashMap<CacheKey, u32>>,
}

impl UniformSizeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `size` and returns the largest size seen for the key.
    pub fn resolve(&self, hash: u64, stage: ShaderStage, slot: UniformSlot, size: u32) -> u32 {
        let key = CacheKey { hash, stage, slot };
        let mut sizes = match self.sizes.lock() {
            Ok(sizes) => sizes,
            Err(poisoned) => poisoned.into_inner(),
        };
        let entry = sizes.entry(key).or_insert(size);
        *entry = (*entry).max(size);
        let resolved = *entry;
        if resolved != size {
            tracing::trace!(hash, %stage, ?slot, size, resolved, "uniform size grown from cache");
        }
        resolved
    }

    pub fn len(&self) -> usize {
        match self.sizes.lock() {
            Ok(sizes) => sizes.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn sizes_never_shrink() {
        let cache = UniformSizeCache::new();
        assert_eq!(cache.resolve(1, ShaderStage::Vertex, UniformSlot::Registers, 8), 8);
        assert_eq!(cache.resolve(1, ShaderStage::Vertex, UniformSlot::Registers, 4), 8);
        assert_eq!(cache.resolve(1, ShaderStage::Vertex, UniformSlot::Registers, 16), 16);
    }

    #[test]
    fn keys_are_independent() {
        let cache = UniformSizeCache::new();
        cache.resolve(1, ShaderStage::Vertex, UniformSlot::Buffer(0), 32);
        assert_eq!(cache.resolve(1, ShaderStage::Pixel, UniformSlot::Buffer(0), 2), 2);
        assert_eq!(cache.resolve(1, ShaderStage::Vertex, UniformSlot::Buffer(1), 3), 3);
        assert_eq!(cache.resolve(2, ShaderStage::Vertex, UniformSlot::Buffer(0), 5), 5);
        assert_eq!(cache.len(), 4);
    }

    #[test]
    fn resolved_sizes_are_monotonic_per_key() {
        let cache = UniformSizeCache::new();
        let mut largest = 0;
        for size in [64, 1, 2, 128, 3, 0, 127] {
            let resolved = cache.resolve(1, ShaderStage::Vertex, UniformSlot::Registers, size);
            assert!(resolved >= largest);
            largest = largest.max(size);
            assert_eq!(resolved, largest);
            // Unrelated keys do not push the tracked entry out.
            for hash in 2..64 {
                cache.resolve(hash, ShaderStage::Pixel, UniformSlot::Buffer(3), size);
            }
        }
        assert_eq!(cache.len(), 64);
    }

    #[test]
    fn concurrent_resolves_keep_the_maximum() {
        let cache = Arc::new(UniformSizeCache::new());
        let threads: Vec<_> = (0..8u32)
            .map(|thread| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    let mut previous = 0;
                    for i in 0..200u32 {
                        let size = (i * 8 + thread) % 1000;
                        let resolved = cache.resolve(7, ShaderStage::Geometry, UniformSlot::Buffer(1), size);
                        assert!(resolved >= previous);
                        assert!(resolved >= size);
                        previous = resolved;
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }
        let largest = (0..8u32)
            .flat_map(|thread| (0..200u32).map(move |i| (i * 8 + thread) % 1000))
            .max()
            .unwrap();
        assert_eq!(cache.resolve(7, ShaderStage::Geometry, UniformSlot::Buffer(1), 0), largest);
        assert_eq!(cache.len(), 1);
    }
}
