// uniform spatial hash grid over the simulation bounding box
use std::sync::atomic::{AtomicU32, Ordering};

use glam::{IVec3, UVec3, Vec3};
use rayon::prelude::*;

/// Cell-start slot value for a cell holding no particles.
pub const EMPTY_CELL: u32 = u32::MAX;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SpatialHashEntry {
    pub cell_hash: u32,
    pub particle_index: u32,
}

pub struct SpatialHashGrid {
    pub min_bbox: Vec3,
    pub h: f32, // cell size
    pub dims: UVec3,
    entries: Vec<SpatialHashEntry>, // sorted by cell_hash after sort_entries
    len: usize,
    cell_start: Vec<AtomicU32>,
}

impl SpatialHashGrid {
    /// Allocates the entry table for `capacity` particles and one start slot per cell.
    pub fn new(min_bbox: Vec3, h: f32, dims: UVec3, capacity: usize) -> Self {
        let cell_count = dims.x as usize * dims.y as usize * dims.z as usize;
        Self {
            min_bbox,
            h,
            dims,
            entries: vec![SpatialHashEntry::default(); capacity],
            len: 0,
            cell_start: (0..cell_count).map(|_| AtomicU32::new(EMPTY_CELL)).collect(),
        }
    }

    pub fn cell_count(&self) -> usize {
        self.cell_start.len()
    }

    /// Unclamped integer cell coordinates of a position.
    #[inline]
    pub fn raw_cell(&self, pos: Vec3) -> IVec3 {
        ((pos - self.min_bbox) / self.h).floor().as_ivec3()
    }

    /// Cell coordinates clamped into the grid, so out-of-box particles land in a border cell.
    #[inline]
    pub fn cell(&self, pos: Vec3) -> IVec3 {
        self.raw_cell(pos).clamp(IVec3::ZERO, self.dims.as_ivec3() - IVec3::ONE)
    }

    #[inline]
    pub fn contains_cell(&self, c: IVec3) -> bool {
        c.cmpge(IVec3::ZERO).all() && c.cmplt(self.dims.as_ivec3()).all()
    }

    /// Flattened index of in-range cell coordinates.
    #[inline]
    pub fn flatten(&self, c: IVec3) -> u32 {
        c.x as u32 + self.dims.x * (c.y as u32 + self.dims.y * c.z as u32)
    }

    #[inline]
    pub fn hash(&self, pos: Vec3) -> u32 {
        self.flatten(self.cell(pos))
    }

    /// One (hash, index) entry per active particle, in particle order.
    pub fn compute_hashes<P, F>(&mut self, particles: &[P], position: F)
    where
        P: Sync,
        F: Fn(&P) -> Vec3 + Sync,
    {
        debug_assert!(particles.len() <= self.entries.len(), "more particles than hash entries");
        self.len = particles.len().min(self.entries.len());

        let grid = &*self;
        let hashes: Vec<u32> = particles[..grid.len]
            .par_iter()
            .map(|p| grid.hash(position(p)))
            .collect();

        self.entries[..self.len]
            .par_iter_mut()
            .zip(hashes)
            .enumerate()
            .for_each(|(i, (e, cell_hash))| {
                *e = SpatialHashEntry { cell_hash, particle_index: i as u32 };
            });
    }

    /// Global reordering by cell hash, ties in any order.
    pub fn sort_entries(&mut self) {
        self.entries[..self.len].par_sort_unstable_by_key(|e| e.cell_hash);
    }

    /// First sorted index per occupied cell; every other slot reads EMPTY_CELL.
    pub fn build_cell_start(&mut self) {
        self.cell_start
            .par_iter()
            .for_each(|slot| slot.store(EMPTY_CELL, Ordering::Relaxed));

        let entries = &self.entries[..self.len];
        let cell_start = &self.cell_start;
        // fetch_min keeps the slot correct whatever order the writers run in
        entries.par_iter().enumerate().for_each(|(i, e)| {
            if i == 0 || entries[i - 1].cell_hash != e.cell_hash {
                cell_start[e.cell_hash as usize].fetch_min(i as u32, Ordering::Relaxed);
            }
        });
    }

    /// Hashes, sorts and indexes the given positions in one go.
    pub fn rebuild(&mut self, positions: &[Vec3]) {
        self.compute_hashes(positions, |&p| p);
        self.sort_entries();
        self.build_cell_start();
    }

    pub fn sorted_entries(&self) -> &[SpatialHashEntry] {
        &self.entries[..self.len]
    }

    pub fn cell_start(&self, cell_hash: u32) -> Option<u32> {
        let start = self.cell_start.get(cell_hash as usize)?.load(Ordering::Relaxed);
        (start != EMPTY_CELL).then_some(start)
    }

    /// Particle indices of one cell, found by scanning from its start until the hash changes.
    pub fn cell_particles(&self, cell_hash: u32) -> impl Iterator<Item = u32> + '_ {
        let entries = self.sorted_entries();
        let start = self.cell_start(cell_hash).map_or(entries.len(), |s| s as usize);
        entries[start..]
            .iter()
            .take_while(move |e| e.cell_hash == cell_hash)
            .map(|e| e.particle_index)
    }
}
