//! Pending render jobs with current-image priority
//!
//! Jobs are popped from the tail. Before popping, the job for the displayed
//! entry is rotated to the tail, so the visible image is served next without a
//! separate priority queue.

/// One pending render for an entry
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderJob {
    pub index: usize,
    /// Drop cached `corrected`/`scaled` before rendering
    pub changed: bool,
    /// Decode the source before rendering
    pub load: bool,
}

impl RenderJob {
    #[must_use]
    pub const fn new(index: usize, changed: bool, load: bool) -> Self {
        Self {
            index,
            changed,
            load,
        }
    }
}

/// At most one job per entry index
#[derive(Debug, Default)]
pub struct RenderQueue {
    jobs: Vec<RenderJob>,
}

impl RenderQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a job, or OR the flags into the job already queued for `index`.
    pub fn enqueue(&mut self, index: usize, changed: bool, load: bool) {
        if let Some(job) = self.jobs.iter_mut().find(|j| j.index == index) {
            job.changed |= changed;
            job.load |= load;
        } else {
            self.jobs.push(RenderJob::new(index, changed, load));
        }
    }

    /// Move the job for `current` to the tail, keeping the others in order.
    pub fn promote(&mut self, current: usize) {
        if let Some(pos) = self.jobs.iter().position(|j| j.index == current) {
            self.jobs[pos..].rotate_left(1);
        }
    }

    pub fn pop(&mut self) -> Option<RenderJob> {
        self.jobs.pop()
    }

    pub fn retain(&mut self, keep: impl FnMut(&RenderJob) -> bool) {
        self.jobs.retain(keep);
    }

    /// Renumber jobs after the entry at `removed` left the list.
    pub fn remap_after_removal(&mut self, removed: usize) {
        self.jobs.retain(|j| j.index != removed);
        for job in &mut self.jobs {
            if job.index > removed {
                job.index -= 1;
            }
        }
    }

    pub fn clear(&mut self) {
        self.jobs.clear();
    }

    #[must_use]
    pub fn contains(&self, index: usize) -> bool {
        self.jobs.iter().any(|j| j.index == index)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Jobs from head to tail
    pub fn iter(&self) -> impl Iterator<Item = &RenderJob> {
        self.jobs.iter()
    }
}
