//! Splitting of long transfers into sequences of bus transactions.

/// Plan of (address, length) transactions covering a span of memory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChunkPlan(Vec<(u32, usize)>);

impl ChunkPlan {
    /// Plan writing `length` bytes from `address`.
    ///
    /// No transaction crosses a `page_size` boundary or carries more than
    /// `max_transfer` bytes. Devices wrap writes around within the current
    /// page, so a straddling transaction would corrupt the start of the page.
    pub fn write(address: u32, length: usize, page_size: usize, max_transfer: usize) -> Self {
        log::trace!("Creating write plan, address={} length={} page={} limit={}",
                    address, length, page_size, max_transfer);
        let mut plan = Vec::new();
        let mut addr = address as usize;
        let end = addr + length;
        while addr < end {
            let to_boundary = page_size - (addr % page_size);
            let size = (end - addr).min(max_transfer).min(to_boundary);
            plan.push((addr as u32, size));
            addr += size;
        }
        log::trace!("Write plan: {:?}", plan);
        ChunkPlan(plan)
    }

    /// Plan reading `length` bytes from `address`.
    ///
    /// Sequential reads are not limited by the page size, only by the
    /// transport's `max_transfer`.
    pub fn read(address: u32, length: usize, max_transfer: usize) -> Self {
        let start = address as usize;
        let end = start + length;
        let plan = (start..end)
            .step_by(max_transfer.max(1))
            .map(|addr| (addr as u32, usize::min(max_transfer, end - addr)))
            .collect();
        ChunkPlan(plan)
    }

    pub fn chunks(&self) -> &[(u32, usize)] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Total number of bytes covered by the plan.
    pub fn total_size(&self) -> usize {
        self.0.iter().map(|x| x.1).sum()
    }
}

#[test]
fn test_write_plan() {
    // An aligned page-sized write is a single transaction.
    assert_eq!(ChunkPlan::write(0, 16, 16, 30).0, vec![(0, 16)]);
    // The first transaction stops at the page boundary.
    assert_eq!(ChunkPlan::write(40, 100, 64, 30).0,
               vec![(40, 24), (64, 30), (94, 30), (124, 4), (128, 12)]);
    // Page size smaller than the transfer limit.
    assert_eq!(ChunkPlan::write(10, 30, 16, 30).0,
               vec![(10, 6), (16, 16), (32, 8)]);
    // Nothing to do.
    assert!(ChunkPlan::write(100, 0, 32, 30).is_empty());
}

#[test]
fn test_write_plan_never_crosses_pages() {
    for &page_size in &[16usize, 32, 64, 128] {
        for &limit in &[1usize, 7, 30, 128] {
            for address in 0..(2 * page_size as u32) {
                let plan = ChunkPlan::write(address, 300, page_size, limit);
                assert_eq!(plan.total_size(), 300);
                let mut next = address;
                for &(addr, size) in plan.chunks() {
                    assert_eq!(addr, next);
                    let to_boundary = page_size - (addr as usize % page_size);
                    assert!(size >= 1 && size <= limit.min(to_boundary));
                    next += size as u32;
                }
            }
        }
    }
}

#[test]
fn test_read_plan() {
    assert_eq!(ChunkPlan::read(40, 100, 30).0,
               vec![(40, 30), (70, 30), (100, 30), (130, 10)]);
    assert_eq!(ChunkPlan::read(0, 30, 30).0, vec![(0, 30)]);
    let plan = ChunkPlan::read(0, 61, 30);
    assert_eq!(plan.len(), 3);
    assert_eq!(plan.total_size(), 61);
    assert!(ChunkPlan::read(5, 0, 30).is_empty());
}
