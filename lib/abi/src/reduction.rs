//! A `core::reduction::ReductionOps` implementation over raw `extern "C"`
//! function pointers, so a caller on the other side of the ABI can declare
//! a reduction without the core ever knowing about its element type.

use depcore::reduction::ReductionOps;

pub type ReductionInitFn = extern "C" fn(*mut u8, usize);
pub type ReductionCombineFn = extern "C" fn(*mut u8, *const u8, usize);

pub struct ForeignReduction {
    element_size: usize,
    init: ReductionInitFn,
    combine: ReductionCombineFn,
}

impl ForeignReduction {
    pub fn new(element_size: usize, init: ReductionInitFn, combine: ReductionCombineFn) -> Self {
        Self {
            element_size,
            init,
            combine,
        }
    }
}

impl ReductionOps for ForeignReduction {
    fn element_size(&self) -> usize {
        self.element_size
    }

    fn init(&self, slot: &mut [u8]) {
        (self.init)(slot.as_mut_ptr(), slot.len());
    }

    fn combine(&self, dest: &mut [u8], src: &[u8]) {
        (self.combine)(dest.as_mut_ptr(), src.as_ptr(), dest.len());
    }
}
