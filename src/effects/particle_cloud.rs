//! Glow particle cloud
//!
//! A fixed-size set of points whose positions follow the person mask. Each
//! mask update gives every particle one random sample of the mask; samples
//! that land on a person pixel move the particle there, the rest leave it
//! where it was.

use rand::Rng;

use crate::ml::PersonMask;

/// Default number of particles
pub const DEFAULT_PARTICLE_COUNT: usize = 170_000;

/// Half edge of the world-space cube particles live in
pub const WORLD_HALF_EXTENT: f32 = 5.0;

/// Half depth of the slab mask-driven particles are scattered into
pub const DEPTH_HALF_EXTENT: f32 = 1.0;

/// CPU side of the particle geometry
///
/// Positions and colours are flat `xyz`/`rgb` buffers of length `3 * len()`.
pub struct ParticleCloud {
    positions: Vec<f32>,
    colors: Vec<f32>,
    /// Positions changed since the last GPU upload
    dirty: bool,
}

impl ParticleCloud {
    /// Create `count` particles with random positions in the world cube and
    /// random colours
    pub fn new<R: Rng + ?Sized>(count: usize, rng: &mut R) -> Self {
        let mut positions = Vec::with_capacity(count * 3);
        let mut colors = Vec::with_capacity(count * 3);

        for _ in 0..count {
            for _ in 0..3 {
                positions.push((rng.random::<f32>() - 0.5) * 2.0 * WORLD_HALF_EXTENT);
            }
            for _ in 0..3 {
                colors.push(rng.random::<f32>());
            }
        }

        Self {
            positions,
            colors,
            dirty: true,
        }
    }

    /// Number of particles
    pub fn len(&self) -> usize {
        self.positions.len() / 3
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Flat position buffer
    pub fn positions(&self) -> &[f32] {
        &self.positions
    }

    /// Flat colour buffer
    pub fn colors(&self) -> &[f32] {
        &self.colors
    }

    /// Position of particle `i`
    pub fn position(&self, i: usize) -> [f32; 3] {
        let p = &self.positions[i * 3..i * 3 + 3];
        [p[0], p[1], p[2]]
    }

    /// Move particles onto randomly sampled person pixels
    ///
    /// Returns how many particles were moved. Positions are marked dirty
    /// whenever the mask is non-empty.
    pub fn scatter<R: Rng + ?Sized>(&mut self, mask: &PersonMask, rng: &mut R) -> usize {
        if mask.is_empty() {
            return 0;
        }

        let mut moved = 0;
        for i in 0..self.len() {
            let x = rng.random_range(0..mask.width);
            let y = rng.random_range(0..mask.height);

            if mask.alpha_at(x, y) > 0 {
                let depth = rng.random::<f32>();
                let [wx, wy, wz] = mask_to_world(x, y, mask.width, mask.height, depth);
                self.positions[i * 3] = wx;
                self.positions[i * 3 + 1] = wy;
                self.positions[i * 3 + 2] = wz;
                moved += 1;
            }
        }

        self.dirty = true;
        moved
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Clear and return the dirty flag
    pub fn take_dirty(&mut self) -> bool {
        std::mem::replace(&mut self.dirty, false)
    }
}

/// Map a mask pixel into world space
///
/// `x` spans `[-5, 5]` left to right, `y` spans `[5, -5]` top to bottom and
/// `depth` in `[0, 1)` becomes `z` in `[-1, 1)`.
pub fn mask_to_world(x: u32, y: u32, width: u32, height: u32, depth: f32) -> [f32; 3] {
    let extent = 2.0 * WORLD_HALF_EXTENT;
    [
        (x as f32 / width as f32) * extent - WORLD_HALF_EXTENT,
        -(y as f32 / height as f32) * extent + WORLD_HALF_EXTENT,
        (depth - 0.5) * 2.0 * DEPTH_HALF_EXTENT,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(0x5eed)
    }

    fn in_mask_bounds(p: [f32; 3]) -> bool {
        (-5.0..=5.0).contains(&p[0]) && (-5.0..=5.0).contains(&p[1]) && (-1.0..=1.0).contains(&p[2])
    }

    #[test]
    fn test_buffer_lengths_match_count() {
        let cloud = ParticleCloud::new(DEFAULT_PARTICLE_COUNT, &mut rng());
        assert_eq!(cloud.len(), DEFAULT_PARTICLE_COUNT);
        assert_eq!(cloud.positions().len(), 3 * DEFAULT_PARTICLE_COUNT);
        assert_eq!(cloud.colors().len(), 3 * DEFAULT_PARTICLE_COUNT);
    }

    #[test]
    fn test_initial_positions_and_colors_in_range() {
        let cloud = ParticleCloud::new(2000, &mut rng());
        assert!(cloud.positions().iter().all(|v| (-5.0..5.0).contains(v)));
        assert!(cloud.colors().iter().all(|v| (0.0..1.0).contains(v)));
        assert!(cloud.is_dirty());
    }

    #[test]
    fn test_empty_alpha_mask_moves_nothing() {
        let mut rng = rng();
        let mut cloud = ParticleCloud::new(1000, &mut rng);
        let before = cloud.positions().to_vec();

        let mask = PersonMask::uniform(64, 48, [0, 0, 0, 0]);
        let moved = cloud.scatter(&mask, &mut rng);

        assert_eq!(moved, 0);
        assert_eq!(cloud.positions(), before.as_slice());
    }

    #[test]
    fn test_full_alpha_mask_moves_everything() {
        let mut rng = rng();
        let mut cloud = ParticleCloud::new(1000, &mut rng);
        let before = cloud.positions().to_vec();

        let mask = PersonMask::uniform(64, 48, [0, 0, 0, 255]);
        let moved = cloud.scatter(&mask, &mut rng);

        assert_eq!(moved, 1000);
        for i in 0..cloud.len() {
            let p = cloud.position(i);
            assert!(in_mask_bounds(p), "particle {} out of bounds: {:?}", i, p);
            assert_ne!(p, [before[i * 3], before[i * 3 + 1], before[i * 3 + 2]]);
        }
    }

    #[test]
    fn test_scatter_keeps_or_bounds_every_particle() {
        let mut rng = rng();
        let mut cloud = ParticleCloud::new(5000, &mut rng);
        let before = cloud.positions().to_vec();

        // Left half person, right half background
        let mut mask = PersonMask::uniform(32, 32, [0, 0, 0, 0]);
        for y in 0..32u32 {
            for x in 0..16u32 {
                mask.data[((y * 32 + x) * 4 + 3) as usize] = 255;
            }
        }

        let moved = cloud.scatter(&mask, &mut rng);
        assert!(moved > 0 && moved < 5000);

        for i in 0..cloud.len() {
            let p = cloud.position(i);
            let prior = [before[i * 3], before[i * 3 + 1], before[i * 3 + 2]];
            if p != prior {
                assert!(in_mask_bounds(p));
                assert!(p[0] < 0.0, "moved particle landed on background: {:?}", p);
            }
        }
        assert_eq!(cloud.positions().len(), 15_000);
    }

    #[test]
    fn test_colors_never_change() {
        let mut rng = rng();
        let mut cloud = ParticleCloud::new(500, &mut rng);
        let colors = cloud.colors().to_vec();
        cloud.scatter(&PersonMask::uniform(8, 8, [0, 0, 0, 255]), &mut rng);
        assert_eq!(cloud.colors(), colors.as_slice());
    }

    #[test]
    fn test_seeded_scatter_is_reproducible() {
        let mask = PersonMask::uniform(16, 16, [0, 0, 0, 128]);

        let mut a_rng = StdRng::seed_from_u64(42);
        let mut a = ParticleCloud::new(300, &mut a_rng);
        a.scatter(&mask, &mut a_rng);

        let mut b_rng = StdRng::seed_from_u64(42);
        let mut b = ParticleCloud::new(300, &mut b_rng);
        b.scatter(&mask, &mut b_rng);

        assert_eq!(a.positions(), b.positions());
    }

    #[test]
    fn test_take_dirty_clears_flag() {
        let mut rng = rng();
        let mut cloud = ParticleCloud::new(10, &mut rng);
        assert!(cloud.take_dirty());
        assert!(!cloud.take_dirty());
        cloud.scatter(&PersonMask::uniform(2, 2, [0; 4]), &mut rng);
        assert!(cloud.is_dirty());
    }

    #[test]
    fn test_mask_to_world_corners() {
        assert_eq!(mask_to_world(0, 0, 100, 50, 0.5), [-5.0, 5.0, 0.0]);
        assert_eq!(mask_to_world(50, 25, 100, 50, 0.0), [0.0, 0.0, -1.0]);
        let p = mask_to_world(99, 49, 100, 50, 0.999);
        assert!(in_mask_bounds(p));
        assert!(p[0] < 5.0 && p[1] > -5.0);
    }
}
