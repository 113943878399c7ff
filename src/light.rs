//! The light engine: pass A multiplies every living tree's writer stamp
//! into the global light-influence grid (LIF); pass B reads every tree's
//! competition value back through its reader stamp.
//!
//! Pass A writes to shared grids. The dispatcher runs it over the two
//! checkerboard RU sets with a barrier in between: concurrently processed
//! RUs are at least one full RU (100 m) apart while stamp footprints reach
//! at most 48 m, so the touched cells of concurrent tasks are disjoint.
//! [`LightBuffer`] encapsulates that access; no other writer may touch the
//! LIF or height grid while pass A runs.

use crate::LIGHT_CELLS_PER_HEIGHT_CELL;
use crate::grid::Grid;
use crate::resunit::ResourceUnit;
use crate::species::SpeciesSet;
use crate::stamp::Stamp;
use crate::tree::Tree;

/// one cell of the 10 m height grid: maximum tree height and the
/// valid/stockable flag
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeightCell {
    pub height: f32,
    pub valid: bool,
}

impl Default for HeightCell {
    fn default() -> Self {
        Self {
            height: 0.,
            valid: true,
        }
    }
}

/// Shared mutable view of the LIF and height grids for pass A.
///
/// Writes go through raw pointers so tasks of one checkerboard phase can
/// run concurrently; the disjointness of their footprints (see module doc)
/// is what makes this sound. Constructing the buffer borrows both grids
/// mutably, which keeps every safe accessor away for its lifetime.
pub(crate) struct LightBuffer<'a> {
    lif: *mut f32,
    nx: usize,
    ny: usize,
    origin: (f64, f64),
    cellsize: f64,
    height: *mut HeightCell,
    hnx: usize,
    _marker: std::marker::PhantomData<&'a mut ()>,
}

unsafe impl Sync for LightBuffer<'_> {}
unsafe impl Send for LightBuffer<'_> {}

impl<'a> LightBuffer<'a> {
    pub fn new(lif: &'a mut Grid<f32>, height: &'a mut Grid<HeightCell>) -> Self {
        let nx = lif.size_x();
        let ny = lif.size_y();
        let origin = lif.origin();
        let cellsize = lif.cellsize();
        let hnx = height.size_x();
        Self {
            lif: lif.data_mut().as_mut_ptr(),
            nx,
            ny,
            origin,
            cellsize,
            height: height.data_mut().as_mut_ptr(),
            hnx,
            _marker: std::marker::PhantomData,
        }
    }

    fn index_at(&self, wx: f64, wy: f64) -> Option<(isize, isize)> {
        let x = ((wx - self.origin.0) / self.cellsize).floor() as isize;
        let y = ((wy - self.origin.1) / self.cellsize).floor() as isize;
        (x >= 0 && (x as usize) < self.nx && y >= 0 && (y as usize) < self.ny).then_some((x, y))
    }

    fn contains(&self, x: isize, y: isize) -> bool {
        x >= 0 && (x as usize) < self.nx && y >= 0 && (y as usize) < self.ny
    }

    fn stockable(&self, x: isize, y: isize) -> bool {
        let hx = x as usize / LIGHT_CELLS_PER_HEIGHT_CELL;
        let hy = y as usize / LIGHT_CELLS_PER_HEIGHT_CELL;
        // height-grid reads during pass A only touch cells inside the
        // current task's footprint (see module doc)
        unsafe { (*self.height.add(hy * self.hnx + hx)).valid }
    }

    fn multiply(&self, x: isize, y: isize, value: f32) {
        unsafe {
            let cell = self.lif.add(y as usize * self.nx + x as usize);
            *cell *= value.clamp(0., 1.);
        }
    }

    fn update_max_height(&self, x: isize, y: isize, height: f32) {
        let hx = x as usize / LIGHT_CELLS_PER_HEIGHT_CELL;
        let hy = y as usize / LIGHT_CELLS_PER_HEIGHT_CELL;
        unsafe {
            let cell = self.height.add(hy * self.hnx + hx);
            if (*cell).valid && (*cell).height < height {
                (*cell).height = height;
            }
        }
    }
}

/// pass A for one tree: multiply the writer stamp into the LIF, clipped at
/// the grid edge, skipping non-stockable cells; update the height grid at
/// the tree's own cell
pub(crate) fn apply_tree(tree: &Tree, species: &SpeciesSet, buffer: &LightBuffer) {
    let sp = species.get(tree.species());
    let Some(writer_index) = sp.stamps().writer(tree.dbh(), tree.height()) else {
        return;
    };
    let stamp = sp.stamps().get(writer_index);
    let (wx, wy) = tree.position();
    let Some((cx, cy)) = buffer.index_at(wx, wy) else {
        return;
    };
    let offset = stamp.offset() as isize;
    for sy in 0..stamp.size() {
        let gy = cy + sy as isize - offset;
        for sx in 0..stamp.size() {
            let gx = cx + sx as isize - offset;
            if !buffer.contains(gx, gy) {
                continue; // clipped at the project edge
            }
            if !buffer.stockable(gx, gy) {
                continue;
            }
            buffer.multiply(gx, gy, stamp.value(sx, sy));
        }
    }
    buffer.update_max_height(cx, cy, tree.height());
}

/// pass A for one resource unit, trees in insertion order
pub(crate) fn apply_resource_unit(ru: &ResourceUnit, species: &SpeciesSet, buffer: &LightBuffer) {
    for tree in ru.trees.iter().filter(|t| t.is_alive()) {
        apply_tree(tree, species, buffer);
    }
}

/// select the reader footprint of a tree: the paired reader stamp, or the
/// writer stamp itself when the pairing found no reader
fn reader_stamp<'a>(tree: &Tree, species: &'a SpeciesSet) -> Option<&'a Stamp> {
    let sp = species.get(tree.species());
    let writer_index = sp.stamps().writer(tree.dbh(), tree.height())?;
    match sp.stamps().reader_of(writer_index) {
        Some(reader_index) => Some(species.reader_stamps().get(reader_index)),
        None => Some(sp.stamps().get(writer_index)),
    }
}

/// pass B for one tree: the reader-stamp weighted mean of the LIF over the
/// footprint, normalised over the in-bounds, stockable cells
pub(crate) fn read_tree(
    tree: &mut Tree,
    species: &SpeciesSet,
    lif: &Grid<f32>,
    height: &Grid<HeightCell>,
) {
    let Some(reader) = reader_stamp(tree, species) else {
        tree.set_light_resource_index(1.);
        return;
    };
    let (wx, wy) = tree.position();
    let Some((cx, cy)) = lif.index_at(wx, wy) else {
        tree.set_light_resource_index(1.);
        return;
    };
    let offset = reader.offset() as isize;
    let mut sum = 0f64;
    let mut weight = 0f64;
    for sy in 0..reader.size() {
        let gy = cy as isize + sy as isize - offset;
        for sx in 0..reader.size() {
            let gx = cx as isize + sx as isize - offset;
            if gx < 0 || gy < 0 {
                continue;
            }
            let (gx, gy) = (gx as usize, gy as usize);
            if gx >= lif.size_x() || gy >= lif.size_y() {
                continue;
            }
            let hx = gx / LIGHT_CELLS_PER_HEIGHT_CELL;
            let hy = gy / LIGHT_CELLS_PER_HEIGHT_CELL;
            if !height.data()[hy * height.size_x() + hx].valid {
                continue;
            }
            let w = reader.value(sx, sy) as f64;
            if w <= 0. {
                continue;
            }
            sum += w * lif.data()[lif.index_of(gx, gy)] as f64;
            weight += w;
        }
    }
    tree.set_light_resource_index(if weight > 0. { (sum / weight) as f32 } else { 1. });
}

/// pass B for one resource unit, trees in insertion order
pub(crate) fn read_resource_unit(
    ru: &mut ResourceUnit,
    species: &SpeciesSet,
    lif: &Grid<f32>,
    height: &Grid<HeightCell>,
) {
    for tree in ru.trees.iter_mut().filter(|t| t.is_alive()) {
        read_tree(tree, species, lif, height);
    }
}

/// light-grid index of a tree position, reported to dispersal collaborators
pub(crate) fn position_index(lif: &Grid<f32>, tree: &Tree) -> Option<(usize, usize)> {
    let (x, y) = tree.position();
    lif.index_at(x, y)
}
