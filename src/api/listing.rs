use std::collections::VecDeque;

use super::store::JobStore;
use super::types::JobFilter;
use crate::error::SimError;
use crate::state_machine::JobHandle;

/// Lazy, finite listing of jobs, fetched one page at a time.
///
/// No server-side cursor is kept: pages are requested by offset, and
/// [`restart`](Self::restart) begins again from the first page.
#[derive(Debug)]
pub struct JobListing {
    store: JobStore,
    filter: JobFilter,
    offset: u64,
    yielded: usize,
    buffer: VecDeque<JobHandle>,
    exhausted: bool,
}

impl JobListing {
    pub(crate) fn new(store: JobStore, filter: JobFilter) -> Self {
        Self {
            store,
            filter,
            offset: 0,
            yielded: 0,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    /// Next job, or `None` once the listing is complete. An error ends the listing.
    pub async fn next(&mut self) -> Option<Result<JobHandle, SimError>> {
        if self.filter.limit.is_some_and(|limit| self.yielded >= limit) {
            return None;
        }
        if self.buffer.is_empty() && !self.exhausted {
            match self.store.list_page(&self.filter, self.offset).await {
                Ok(page) => {
                    // The server may cap pages below `page_size`; only `total` ends the listing.
                    let received = page.tasks.len() as u64;
                    self.offset += received;
                    if received == 0 || self.offset >= page.total {
                        self.exhausted = true;
                    }
                    self.buffer
                        .extend(page.tasks.iter().map(|info| info.to_handle()));
                }
                Err(e) => {
                    self.exhausted = true;
                    return Some(Err(e));
                }
            }
        }

        let next = self.buffer.pop_front()?;
        self.yielded += 1;
        Some(Ok(next))
    }

    pub fn restart(&mut self) {
        self.offset = 0;
        self.yielded = 0;
        self.buffer.clear();
        self.exhausted = false;
    }

    pub async fn collect_all(mut self) -> Result<Vec<JobHandle>, SimError> {
        let mut jobs = Vec::new();
        while let Some(job) = self.next().await {
            jobs.push(job?);
        }
        Ok(jobs)
    }
}
