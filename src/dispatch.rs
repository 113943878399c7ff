//! Checkerboard work scheduling over resource units.
//!
//! RUs split by grid-index parity into two lists; the lists are first-class
//! state of the dispatcher, and running them as two parallel maps with a
//! barrier in between guarantees that concurrently processed RUs are at
//! least one RU apart (so their stamp footprints never overlap). A
//! single-threaded mode exists for determinism tests; results are identical
//! either way.

use crate::error::Result;
use crate::error::SylvaError;
use crate::resunit::ResourceUnit;
use rayon::prelude::*;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

pub struct Dispatcher {
    multithreaded: bool,
    cancel: Arc<AtomicBool>,
    even: Vec<usize>,
    odd: Vec<usize>,
}

impl Dispatcher {
    pub fn new(multithreaded: bool) -> Self {
        Self {
            multithreaded,
            cancel: Arc::new(AtomicBool::new(false)),
            even: Vec::new(),
            odd: Vec::new(),
        }
    }

    /// partition the RU list by (ix + iy) parity
    pub fn setup(&mut self, rus: &[ResourceUnit]) {
        self.even.clear();
        self.odd.clear();
        for (index, ru) in rus.iter().enumerate() {
            let (ix, iy) = ru.index();
            if (ix + iy) % 2 == 0 {
                self.even.push(index);
            } else {
                self.odd.push(index);
            }
        }
        log::debug!(
            "dispatcher: {} + {} resource units, multithreading {}",
            self.even.len(),
            self.odd.len(),
            self.multithreaded
        );
    }

    pub fn even(&self) -> &[usize] {
        &self.even
    }
    pub fn odd(&self) -> &[usize] {
        &self.odd
    }
    pub fn multithreaded(&self) -> bool {
        self.multithreaded
    }
    pub fn set_multithreaded(&mut self, multithreaded: bool) {
        self.multithreaded = multithreaded;
    }

    /// shared cancellation flag; polled at RU boundaries, so no in-flight RU
    /// is interrupted
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }
    pub fn canceled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    /// run a task once per RU (mutable access, any order); used for the
    /// phases whose per-RU state is independent
    pub fn each_ru<F>(&self, rus: &mut [ResourceUnit], task: F) -> Result<()>
    where
        F: Fn(&mut ResourceUnit) -> Result<()> + Sync + Send,
    {
        let errors: Vec<SylvaError> = if self.multithreaded {
            rus.par_iter_mut()
                .filter_map(|ru| {
                    if self.canceled() {
                        return None;
                    }
                    let id = ru.id();
                    task(ru).err().map(|source| wrap(id, source))
                })
                .collect()
        } else {
            let mut errors = Vec::new();
            for ru in rus.iter_mut() {
                if self.canceled() {
                    break;
                }
                let id = ru.id();
                if let Some(source) = task(ru).err() {
                    errors.push(wrap(id, source));
                }
            }
            errors
        };
        self.resolve(errors)
    }

    /// run a read-only task over the two checkerboard sets with a barrier in
    /// between; the task may rely on concurrently processed RUs being at
    /// least one RU apart
    pub fn each_ru_checkerboard<F>(&self, rus: &[ResourceUnit], task: F) -> Result<()>
    where
        F: Fn(&ResourceUnit) -> Result<()> + Sync + Send,
    {
        for phase in [&self.even, &self.odd] {
            let errors: Vec<SylvaError> = if self.multithreaded {
                phase
                    .par_iter()
                    .filter_map(|&index| {
                        if self.canceled() {
                            return None;
                        }
                        let ru = &rus[index];
                        task(ru).err().map(|source| wrap(ru.id(), source))
                    })
                    .collect()
            } else {
                let mut errors = Vec::new();
                for &index in phase {
                    if self.canceled() {
                        break;
                    }
                    let ru = &rus[index];
                    if let Some(source) = task(ru).err() {
                        errors.push(wrap(ru.id(), source));
                    }
                }
                errors
            };
            // the parallel map completes before the next phase starts
            self.resolve(errors)?;
        }
        Ok(())
    }

    /// run a task once per species index; species-level work (e.g. seed
    /// dispersal) is partitioned by species, not by RU
    pub fn each_species<F>(&self, species_count: usize, task: F) -> Result<()>
    where
        F: Fn(usize) -> Result<()> + Sync + Send,
    {
        let errors: Vec<SylvaError> = if self.multithreaded {
            (0..species_count)
                .into_par_iter()
                .filter_map(|index| {
                    if self.canceled() {
                        return None;
                    }
                    task(index).err()
                })
                .collect()
        } else {
            (0..species_count)
                .filter_map(|index| {
                    if self.canceled() {
                        return None;
                    }
                    task(index).err()
                })
                .collect()
        };
        self.resolve(errors)
    }

    /// split [0, len) into chunks of at least `min_chunk` elements and at
    /// most `max_chunks` chunks, and run the task per chunk
    pub fn each_chunk<F>(
        &self,
        len: usize,
        min_chunk: usize,
        max_chunks: usize,
        task: F,
    ) -> Result<()>
    where
        F: Fn(std::ops::Range<usize>) -> Result<()> + Sync + Send,
    {
        if len == 0 {
            return Ok(());
        }
        let chunk = (len.div_ceil(max_chunks.max(1))).max(min_chunk.max(1));
        let ranges: Vec<std::ops::Range<usize>> = (0..len)
            .step_by(chunk)
            .map(|start| start..(start + chunk).min(len))
            .collect();
        let errors: Vec<SylvaError> = if self.multithreaded {
            ranges
                .into_par_iter()
                .filter_map(|range| {
                    if self.canceled() {
                        return None;
                    }
                    task(range).err()
                })
                .collect()
        } else {
            ranges
                .into_iter()
                .filter_map(|range| {
                    if self.canceled() {
                        return None;
                    }
                    task(range).err()
                })
                .collect()
        };
        self.resolve(errors)
    }

    /// after joining all tasks: cancellation wins, then the first captured
    /// error is returned and the rest are logged
    fn resolve(&self, errors: Vec<SylvaError>) -> Result<()> {
        if self.canceled() {
            return Err(SylvaError::Canceled);
        }
        let mut iter = errors.into_iter();
        match iter.next() {
            None => Ok(()),
            Some(first) => {
                for extra in iter {
                    log::error!("additional worker failure: {}", extra);
                }
                Err(first)
            }
        }
    }
}

fn wrap(ru: usize, source: SylvaError) -> SylvaError {
    SylvaError::Worker {
        ru,
        source: Box::new(source),
    }
}
