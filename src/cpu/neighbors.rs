// bounded per-particle neighbor lists, rebuilt every step from the hash grid
use glam::{IVec3, Vec3};
use rayon::prelude::*;

use super::grid::SpatialHashGrid;

pub struct NeighborTable {
    pub max_neighbors: usize,
    counts: Vec<u32>,
    indices: Vec<u32>, // flattened, max_neighbors slots per particle
    len: usize,
}

impl NeighborTable {
    pub fn new(capacity: usize, max_neighbors: usize) -> Self {
        Self {
            max_neighbors,
            counts: vec![0; capacity],
            indices: vec![0; capacity * max_neighbors],
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn count(&self, i: usize) -> usize {
        self.counts[i] as usize
    }

    pub fn neighbors(&self, i: usize) -> &[u32] {
        let start = i * self.max_neighbors;
        &self.indices[start..start + self.counts[i] as usize]
    }

    /// Rebuilds every active particle's list from the 3x3x3 block of cells around it.
    /// Returns how many particles hit the cap and were truncated.
    pub fn find_neighbors<P, F>(&mut self, grid: &SpatialHashGrid, particles: &[P], position: F) -> usize
    where
        P: Sync,
        F: Fn(&P) -> Vec3 + Sync,
    {
        let n = particles.len().min(self.counts.len());
        let max_n = self.max_neighbors;
        let h2 = grid.h * grid.h;
        self.len = n;

        self.indices[..n * max_n]
            .par_chunks_mut(max_n)
            .zip(self.counts[..n].par_iter_mut())
            .enumerate()
            .map(|(i, (slots, count))| {
                let p_i = position(&particles[i]);
                let c = grid.cell(p_i);
                let mut found = 0usize;
                let mut truncated = false;

                // covering the 3 x 3 x 3 surrounding cells
                'cells: for oz in -1..=1 {
                    for oy in -1..=1 {
                        for ox in -1..=1 {
                            let nc = c + IVec3::new(ox, oy, oz);
                            if !grid.contains_cell(nc) { continue; }

                            for j in grid.cell_particles(grid.flatten(nc)) {
                                if j as usize == i { continue; }
                                let r2 = (p_i - position(&particles[j as usize])).length_squared();
                                if r2 < h2 {
                                    if found == max_n {
                                        truncated = true;
                                        break 'cells;
                                    }
                                    slots[found] = j;
                                    found += 1;
                                }
                            }
                        }
                    }
                }

                *count = found as u32;
                truncated as usize
            })
            .sum()
    }
}
