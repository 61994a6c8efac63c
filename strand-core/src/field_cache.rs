use std::collections::HashSet;

use crate::types::StrandId;

/// Memoization table for the grid's lazily evaluated density field.
///
/// For each voxel (addressed by its flat index), this table stores:
///
/// - The scalar value accumulated so far.
/// - The generation at which the voxel was last brought up to date.
///
/// In addition, it records every `(voxel, strand)` pair whose
/// contribution has already been summed, so a strand is counted at most
/// once per voxel even when several of its segments reach that voxel.
///
/// Registering a new field source bumps the table's generation via
/// [`FieldCache::invalidate`]; voxels whose checked generation is older
/// are stale and must be topped up with the contributions of strands they
/// have not seen yet. Values already summed are never recomputed.
#[derive(Debug)]
pub struct FieldCache {
    value: Vec<f32>,
    checked: Vec<u32>,
    seen: HashSet<(usize, StrandId)>,
    generation: u32,
}

impl FieldCache {
    /// Creates a table for `len` voxels. Every voxel starts stale with a
    /// value of `0.0`.
    pub fn with_len(len: usize) -> Self {
        Self {
            value: vec![0.0; len],
            checked: vec![0; len],
            seen: HashSet::new(),
            generation: 1,
        }
    }

    /// Forgets every cached value and contribution. All voxels become stale.
    pub fn clear(&mut self) {
        self.value.fill(0.0);
        self.checked.fill(0);
        self.seen.clear();
        self.generation = 1;
    }

    /// Current generation of the field.
    #[inline]
    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Marks every voxel stale. Cached sums are kept and only topped up.
    pub fn invalidate(&mut self) {
        self.generation = self.generation.wrapping_add(1).max(1);
    }

    /// Returns `true` if voxel `idx` was checked at the current generation.
    #[inline]
    pub fn is_current(&self, idx: usize) -> bool {
        self.checked[idx] == self.generation
    }

    /// Records voxel `idx` as up to date.
    #[inline]
    pub fn mark_checked(&mut self, idx: usize) {
        self.checked[idx] = self.generation;
    }

    /// Returns `true` if `strand` has already contributed to voxel `idx`.
    #[inline]
    pub fn contributed(&self, idx: usize, strand: StrandId) -> bool {
        self.seen.contains(&(idx, strand))
    }

    /// Adds the contribution of `strand` to voxel `idx`.
    ///
    /// ### Returns
    /// `false` (and leaves the value untouched) if this strand has already
    /// contributed to the voxel.
    pub fn add(&mut self, idx: usize, strand: StrandId, contribution: f32) -> bool {
        if !self.seen.insert((idx, strand)) {
            return false;
        }
        self.value[idx] += contribution;
        true
    }

    /// Cached value of voxel `idx`, current or not.
    #[inline]
    pub fn value(&self, idx: usize) -> f32 {
        self.value[idx]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_len_starts_stale_and_zeroed() {
        let cache = FieldCache::with_len(4);
        for i in 0..4 {
            assert_eq!(cache.value(i), 0.0);
            assert!(!cache.is_current(i));
        }
    }

    #[test]
    fn a_strand_contributes_once_per_voxel() {
        let mut cache = FieldCache::with_len(2);

        assert!(cache.add(0, 7, 0.5));
        // A second segment of the same strand reaching the voxel is ignored.
        assert!(!cache.add(0, 7, 0.5));
        assert!(cache.add(0, 8, 0.25));
        assert!(cache.add(1, 7, 1.0));

        assert_eq!(cache.value(0), 0.75);
        assert_eq!(cache.value(1), 1.0);
        assert!(cache.contributed(0, 7));
        assert!(!cache.contributed(1, 8));
    }

    #[test]
    fn invalidate_makes_checked_voxels_stale_but_keeps_values() {
        let mut cache = FieldCache::with_len(1);
        cache.add(0, 0, 2.0);
        cache.mark_checked(0);
        assert!(cache.is_current(0));

        let before = cache.generation();
        cache.invalidate();
        assert_ne!(cache.generation(), before);
        assert!(!cache.is_current(0));
        assert_eq!(cache.value(0), 2.0);
        assert!(cache.contributed(0, 0));
    }

    #[test]
    fn clear_forgets_values_and_contributions() {
        let mut cache = FieldCache::with_len(2);
        cache.add(1, 3, 1.0);
        cache.mark_checked(1);

        cache.clear();
        assert_eq!(cache.value(1), 0.0);
        assert!(!cache.is_current(1));
        assert!(!cache.contributed(1, 3));
    }
}
