use super::Stamp;
use crate::DBH_CLASS_COUNT;
use crate::DBH_CLASS_LOW;
use crate::HD_CLASS_COUNT;
use crate::HD_CLASS_LOW;
use crate::HD_CLASS_WIDTH;
use crate::error::Result;
use crate::error::SylvaError;

/// metadata of one stamp in a container, parallel to the stamp arena.
/// `dbh == 0` marks a reader stamp.
#[derive(Debug, Clone, Copy)]
pub struct StampItem {
    pub dbh: f32,
    pub hd: f32,
    pub crown_radius: f32,
    /// index into the paired reader container, set by `attach_readers`
    pub reader: Option<usize>,
}

/// Insertion-ordered stamp arena plus a dense (dbh-class x hd-class) lookup
/// table.
///
/// Writer stamps key by (dbh, hd-ratio); reader stamps reuse the same table
/// keyed by crown radius (integer part selects the dbh slot, fractional
/// tenth the hd slot). After [`finalize`](Self::finalize) every populated
/// dbh column is filled forward along the hd axis so bounded queries return
/// the closest tabulated stamp.
#[derive(Debug, Clone)]
pub struct StampContainer {
    name: String,
    desc: String,
    stamps: Vec<Stamp>,
    items: Vec<StampItem>,
    lookup: Vec<Option<usize>>,
    finalized: bool,
}

/// non-uniform dbh classification: 1 cm bins in [4, 10), 2 cm bins in
/// [10, 20), 4 cm bins from 20 cm up; classes start at 4 cm
fn dbh_class(dbh: f32) -> isize {
    if dbh < 10. {
        ((dbh - DBH_CLASS_LOW) as isize).max(0)
    } else if dbh < 20. {
        6 + ((dbh - 10.) / 2.) as isize
    } else {
        11 + ((dbh - 20.) / 4.) as isize
    }
}

/// uniform hd classification: 10-unit bins starting at hd 35
fn hd_class(hd: f32) -> isize {
    ((hd - HD_CLASS_LOW) / HD_CLASS_WIDTH) as isize
}

/// reader keying: crown radius integer part -> dbh slot, fractional tenth
/// -> hd slot
fn reader_key(crown_radius: f32) -> (usize, usize) {
    let hd_slot = (((crown_radius % 1. + 0.0001) * 10.) as usize).min(HD_CLASS_COUNT - 1);
    (crown_radius as usize, hd_slot)
}

/// linear offset into the (dbh-class x hd-class) lookup table
const fn cell(dbh_slot: usize, hd_slot: usize) -> usize {
    dbh_slot * HD_CLASS_COUNT + hd_slot
}

impl StampContainer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            desc: String::new(),
            stamps: Vec::new(),
            items: Vec::new(),
            lookup: vec![None; DBH_CLASS_COUNT * HD_CLASS_COUNT],
            finalized: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn desc(&self) -> &str {
        &self.desc
    }
    pub fn set_desc(&mut self, desc: impl Into<String>) {
        self.desc = desc.into();
    }
    pub fn len(&self) -> usize {
        self.items.len()
    }
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
    pub fn get(&self, index: usize) -> &Stamp {
        &self.stamps[index]
    }
    pub fn item(&self, index: usize) -> &StampItem {
        &self.items[index]
    }
    pub fn items(&self) -> &[StampItem] {
        &self.items
    }

    /// add a writer stamp keyed by (dbh, hd-ratio)
    pub fn add_writer(
        &mut self,
        mut stamp: Stamp,
        dbh: f32,
        hd: f32,
        crown_radius: f32,
    ) -> Result<usize> {
        let (cls_dbh, cls_hd) = (dbh_class(dbh), hd_class(hd));
        if cls_dbh < 0
            || cls_dbh >= DBH_CLASS_COUNT as isize
            || cls_hd < 0
            || cls_hd >= HD_CLASS_COUNT as isize
        {
            return Err(SylvaError::input(format!(
                "{}: stamp out of range, dbh={} hd={}",
                self.name, dbh, hd
            )));
        }
        stamp.set_crown_radius(crown_radius);
        let index = self.push(stamp, dbh, hd, crown_radius);
        self.lookup[cell(cls_dbh as usize, cls_hd as usize)] = Some(index);
        Ok(index)
    }

    /// add a reader stamp keyed by crown radius; the (dbh, hd) key of the
    /// item stays zero
    pub fn add_reader(&mut self, mut stamp: Stamp, crown_radius: f32) -> Result<usize> {
        let (dbh_slot, hd_slot) = reader_key(crown_radius);
        if dbh_slot >= DBH_CLASS_COUNT {
            return Err(SylvaError::input(format!(
                "{}: reader stamp crown radius {} out of range",
                self.name, crown_radius
            )));
        }
        stamp.set_crown_radius(crown_radius);
        let index = self.push(stamp, 0., 0., crown_radius);
        self.lookup[cell(dbh_slot, hd_slot)] = Some(index);
        Ok(index)
    }

    fn push(&mut self, stamp: Stamp, dbh: f32, hd: f32, crown_radius: f32) -> usize {
        self.stamps.push(stamp);
        self.items.push(StampItem {
            dbh,
            hd,
            crown_radius,
            reader: None,
        });
        self.items.len() - 1
    }

    /// Fill the gaps of the lookup table: per dbh column, cells below the
    /// lowest populated hd take the lowest stamp, interior gaps take the
    /// last seen stamp, and cells above the highest populated hd take the
    /// highest stamp. Bounded queries then always hit a tabulated stamp.
    pub fn finalize(&mut self) {
        for b in 0..DBH_CLASS_COUNT {
            let mut last: Option<usize> = None;
            let mut h = 0;
            while h < HD_CLASS_COUNT {
                if let Some(index) = self.lookup[cell(b, h)] {
                    for fill in 0..h {
                        self.lookup[cell(b, fill)] = Some(index);
                    }
                    last = Some(index);
                    break;
                }
                h += 1;
            }
            while h < HD_CLASS_COUNT {
                match self.lookup[cell(b, h)] {
                    Some(index) => last = Some(index),
                    None => break,
                }
                h += 1;
            }
            while h < HD_CLASS_COUNT {
                self.lookup[cell(b, h)] = last;
                h += 1;
            }
        }
        self.finalized = true;
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Writer lookup by dbh (cm) and height (m). Out-of-range hd clamps to
    /// the nearest bin of the same dbh column; out-of-range dbh falls back
    /// to the first stamp in insertion order with a diagnostic.
    pub fn writer(&self, dbh: f32, height_m: f32) -> Option<usize> {
        if self.items.is_empty() {
            return None;
        }
        let hd = 100. * height_m / dbh;
        let (cls_dbh, cls_hd) = (dbh_class(dbh), hd_class(hd));
        if cls_dbh >= 0 && cls_dbh < DBH_CLASS_COUNT as isize {
            let slot = cls_dbh as usize;
            if cls_hd >= 0 && cls_hd < HD_CLASS_COUNT as isize {
                match self.lookup[cell(slot, cls_hd as usize)] {
                    Some(index) => return Some(index),
                    None => {
                        log::warn!(
                            "{}: no stamp tabulated for dbh {} height {}",
                            self.name,
                            dbh,
                            height_m
                        );
                        return Some(0);
                    }
                }
            }
            // hd out of range: clamp within the dbh column
            let clamped = if cls_hd >= HD_CLASS_COUNT as isize {
                HD_CLASS_COUNT - 1
            } else {
                0
            };
            log::warn!(
                "{}: hd-ratio out of range for dbh {} height {} (clamping)",
                self.name,
                dbh,
                height_m
            );
            return self.lookup[cell(slot, clamped)].or(Some(0));
        }
        log::warn!(
            "{}: dbh {} out of classification range, using first stamp",
            self.name,
            dbh
        );
        Some(0)
    }

    /// reader lookup by crown radius; a miss after finalization is a logged
    /// diagnostic, not an error
    pub fn reader(&self, crown_radius: f32) -> Option<usize> {
        let (dbh_slot, hd_slot) = reader_key(crown_radius);
        if dbh_slot >= DBH_CLASS_COUNT {
            log::warn!(
                "{}: no reader stamp for crown radius {}",
                self.name,
                crown_radius
            );
            return None;
        }
        let index = self.lookup[cell(dbh_slot, hd_slot)];
        if index.is_none() {
            log::warn!(
                "{}: no reader stamp for crown radius {}",
                self.name,
                crown_radius
            );
        }
        index
    }

    /// pair every writer stamp with the reader stamp matching its crown
    /// radius; readers live in `readers`, this container stores indices
    pub fn attach_readers(&mut self, readers: &StampContainer) {
        let mut found = 0;
        for item in &mut self.items {
            item.reader = readers.reader(item.crown_radius);
            if item.reader.is_some() {
                found += 1;
            }
        }
        log::debug!(
            "{}: attached reader stamps for {} of {} items",
            self.name,
            found,
            self.items.len()
        );
    }

    pub fn reader_of(&self, index: usize) -> Option<usize> {
        self.items[index].reader
    }

    /// invert every stamp (transmittance <-> opacity)
    pub fn invert(&mut self) {
        for stamp in &mut self.stamps {
            stamp.invert();
        }
    }

    /// cells of the (dbh-class x hd-class) table that are still unpopulated
    pub fn vacant_cells(&self) -> usize {
        self.lookup.iter().filter(|c| c.is_none()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn writer_stamp() -> Stamp {
        Stamp::new_writer(5).unwrap()
    }

    #[test]
    fn dbh_classification_is_nonuniform() {
        assert_eq!(dbh_class(4.), 0);
        assert_eq!(dbh_class(4.9), 0);
        assert_eq!(dbh_class(5.), 1);
        assert_eq!(dbh_class(9.9), 5);
        assert_eq!(dbh_class(10.), 6);
        assert_eq!(dbh_class(11.9), 6);
        assert_eq!(dbh_class(12.), 7);
        assert_eq!(dbh_class(19.9), 10);
        assert_eq!(dbh_class(20.), 11);
        assert_eq!(dbh_class(23.9), 11);
        assert_eq!(dbh_class(24.), 12);
        assert_eq!(dbh_class(3.), 0);
    }

    #[test]
    fn hd_classification_is_uniform() {
        assert_eq!(hd_class(35.), 0);
        assert_eq!(hd_class(44.9), 0);
        assert_eq!(hd_class(45.), 1);
        assert_eq!(hd_class(185.), 15);
    }

    #[test]
    fn reader_keying_splits_crown_radius() {
        assert_eq!(reader_key(2.0), (2, 0));
        assert_eq!(reader_key(2.35), (2, 3));
        assert_eq!(reader_key(0.95), (0, 9));
        assert_eq!(reader_key(3.999), (3, 9));
    }

    #[test]
    fn fill_forward_completes_populated_columns() {
        let mut container = StampContainer::new("test");
        // one stamp at dbh class 6 (dbh 10), hd class 5 (hd 85)
        container
            .add_writer(writer_stamp(), 10., 85., 2.)
            .unwrap();
        // two stamps in dbh class 11 at hd classes 2 and 8
        container.add_writer(writer_stamp(), 20., 55., 2.).unwrap();
        container.add_writer(writer_stamp(), 20., 115., 3.).unwrap();
        container.finalize();
        // column 6: every hd cell resolves to the single stamp
        for h in [35., 50., 100., 190.] {
            let index = container.writer(10., h / 10.);
            assert!(index.is_some());
        }
        // column 6 cells below and above the populated cell are filled
        for h in 0..HD_CLASS_COUNT {
            assert_eq!(container.lookup[cell(6, h)], Some(0));
        }
        // column 11: below 55 -> stamp 1, between -> stamp 1, above 115 -> stamp 2
        assert_eq!(container.lookup[cell(11, 0)], Some(1));
        assert_eq!(container.lookup[cell(11, 2)], Some(1));
        assert_eq!(container.lookup[cell(11, 5)], Some(1));
        assert_eq!(container.lookup[cell(11, 8)], Some(2));
        assert_eq!(container.lookup[cell(11, 15)], Some(2));
    }

    #[test]
    fn no_vacant_cells_when_all_columns_are_seeded() {
        let mut container = StampContainer::new("dense");
        // hit every dbh class once: 1 cm steps to 10, 2 cm to 20, 4 cm beyond
        let mut dbh = 4.;
        while dbh_class(dbh) < DBH_CLASS_COUNT as isize {
            container.add_writer(writer_stamp(), dbh, 80., 2.).unwrap();
            dbh += if dbh < 10. {
                1.
            } else if dbh < 20. {
                2.
            } else {
                4.
            };
        }
        container.finalize();
        assert_eq!(container.vacant_cells(), 0);
    }

    #[test]
    fn writer_lookup_clamps_hd_and_falls_back_on_dbh() {
        let mut container = StampContainer::new("test");
        container.add_writer(writer_stamp(), 10., 85., 2.).unwrap();
        container.add_writer(writer_stamp(), 20., 55., 2.).unwrap();
        container.finalize();
        // hd far above range clamps into the same dbh column
        assert_eq!(container.writer(10., 25.), Some(0));
        // dbh beyond the classification returns the first stamp
        assert_eq!(container.writer(500., 40.), Some(0));
        // empty container has nothing to offer
        assert_eq!(StampContainer::new("empty").writer(10., 10.), None);
    }

    #[test]
    fn out_of_range_writer_is_rejected() {
        let mut container = StampContainer::new("test");
        assert!(container.add_writer(writer_stamp(), 10., 20., 2.).is_err());
        assert!(container.add_writer(writer_stamp(), 10., 300., 2.).is_err());
    }

    #[test]
    fn reader_pairing_attaches_by_crown_radius() {
        let mut readers = StampContainer::new("readers");
        readers
            .add_reader(Stamp::new_reader(5).unwrap(), 2.0)
            .unwrap();
        readers
            .add_reader(Stamp::new_reader(7).unwrap(), 3.5)
            .unwrap();
        readers.finalize();
        let mut writers = StampContainer::new("writers");
        writers.add_writer(writer_stamp(), 10., 85., 2.0).unwrap();
        writers.add_writer(writer_stamp(), 20., 55., 3.5).unwrap();
        writers.finalize();
        writers.attach_readers(&readers);
        assert_eq!(writers.reader_of(0), Some(0));
        assert_eq!(writers.reader_of(1), Some(1));
        // a crown radius with no tabulated reader stays unpaired
        let mut lonely = StampContainer::new("lonely");
        lonely.add_writer(writer_stamp(), 10., 85., 9.9).unwrap();
        lonely.finalize();
        lonely.attach_readers(&readers);
        assert_eq!(lonely.reader_of(0), None);
    }
}
