// src/bsp/bsp_cost.rs

/// Running cost analysis for one candidate partition segment.
///
/// `total` is a scalar score in 1/100ths of a "split unit"; lower is
/// better. The remaining fields are the raw tallies the score was built
/// from, kept for logging and for the final balance adjustments.
#[derive(Debug, Clone, Copy, Default)]
pub struct PartitionCost {
    pub total: i32,
    pub splits: i32,
    pub iffy: i32,
    pub near_miss: i32,
    pub map_left: i32,
    pub map_right: i32,
    pub part_left: i32,
    pub part_right: i32,
}

impl PartitionCost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_segment_right(&mut self, is_map: bool) {
        if is_map {
            self.map_right += 1;
        } else {
            self.part_right += 1;
        }
    }

    pub fn add_segment_left(&mut self, is_map: bool) {
        if is_map {
            self.map_left += 1;
        } else {
            self.part_left += 1;
        }
    }

    /// Fold another cost delta into this cumulative total.
    pub fn merge(&mut self, other: &PartitionCost) {
        self.total += other.total;
        self.splits += other.splits;
        self.iffy += other.iffy;
        self.near_miss += other.near_miss;
        self.map_left += other.map_left;
        self.map_right += other.map_right;
        self.part_left += other.part_left;
        self.part_right += other.part_right;
    }

    /// Strictly lower total wins; ties keep the incumbent.
    pub fn is_better_than(&self, other: &PartitionCost) -> bool {
        self.total < other.total
    }
}
