//! crates/mentorship_core/src/pagination.rs
//!
//! Incremental loading of large per-organization collections, kept apart from
//! the bulk snapshot load.

use std::sync::{Mutex, MutexGuard};
use tracing::debug;

use crate::ports::{PageRequest, PortError, PortResult};
use crate::store::{Entity, StoreClient};

struct PagerState<E> {
    items: Vec<E>,
    cursor: Option<String>,
    has_more: bool,
    /// Ticket of the most recent refresh. Loads issued under an older one are discarded.
    epoch: u64,
    /// Ticket of the load currently running, if any.
    in_flight: Option<u64>,
    next_ticket: u64,
}

impl<E> PagerState<E> {
    fn issue_ticket(&mut self) -> u64 {
        self.next_ticket += 1;
        self.next_ticket
    }
}

/// Accumulates pages of one collection for one organization.
///
/// `load_more` is a no-op while a load or refresh is running, or once the end
/// is reached, so rapid repeated calls never fetch the same page twice. A
/// refresh takes over from a running `load_more`, whose page is then dropped.
pub struct Paginator<E: Entity> {
    store: StoreClient,
    organization_id: String,
    page_size: usize,
    state: Mutex<PagerState<E>>,
}

/// Releases the in-flight slot however a load ends, unless a newer load owns it.
struct Claim<'a, E: Entity> {
    pager: &'a Paginator<E>,
    ticket: u64,
}

impl<E: Entity> Drop for Claim<'_, E> {
    fn drop(&mut self) {
        let mut state = match self.pager.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        if state.in_flight == Some(self.ticket) {
            state.in_flight = None;
        }
    }
}

impl<E: Entity> Paginator<E> {
    pub fn new(store: StoreClient, organization_id: impl Into<String>, page_size: usize) -> Self {
        Self {
            store,
            organization_id: organization_id.into(),
            page_size: page_size.max(1),
            state: Mutex::new(PagerState {
                items: Vec::new(),
                cursor: None,
                has_more: true,
                epoch: 0,
                in_flight: None,
                next_ticket: 0,
            }),
        }
    }

    /// Fetches the next page and appends it. Returns how many records were added.
    pub async fn load_more(&self) -> PortResult<usize> {
        let (claim, cursor, epoch) = {
            let mut state = self.lock()?;
            if !state.has_more {
                return Ok(0);
            }
            if state.in_flight.is_some() {
                debug!(organization_id = %self.organization_id, "load already in flight");
                return Ok(0);
            }
            let ticket = state.issue_ticket();
            state.in_flight = Some(ticket);
            (
                Claim {
                    pager: self,
                    ticket,
                },
                state.cursor.clone(),
                state.epoch,
            )
        };

        let request = PageRequest {
            page_size: self.page_size,
            cursor: cursor.clone(),
        };
        let page = self
            .store
            .page::<E>(&self.organization_id, &request)
            .await?;

        let mut state = self.lock()?;
        if state.epoch != epoch || state.cursor != cursor {
            debug!(organization_id = %self.organization_id, "page superseded by a refresh");
            return Ok(0);
        }
        let added = page.data.len();
        state.items.extend(page.data);
        if page.next_cursor.is_some() {
            state.cursor = page.next_cursor;
        }
        state.has_more = page.has_more;
        if state.in_flight == Some(claim.ticket) {
            state.in_flight = None;
        }
        Ok(added)
    }

    /// Starts over from the first page and replaces the accumulated records.
    pub async fn refresh(&self) -> PortResult<()> {
        let claim = {
            let mut state = self.lock()?;
            let ticket = state.issue_ticket();
            state.epoch = ticket;
            state.in_flight = Some(ticket);
            Claim {
                pager: self,
                ticket,
            }
        };

        let page = self
            .store
            .page::<E>(&self.organization_id, &PageRequest::first(self.page_size))
            .await?;

        let mut state = self.lock()?;
        if state.epoch != claim.ticket {
            return Ok(());
        }
        state.items = page.data;
        state.cursor = page.next_cursor;
        state.has_more = page.has_more;
        if state.in_flight == Some(claim.ticket) {
            state.in_flight = None;
        }
        Ok(())
    }

    pub fn items(&self) -> Vec<E> {
        self.lock().map(|s| s.items.clone()).unwrap_or_default()
    }

    pub fn has_more(&self) -> bool {
        self.lock().map(|s| s.has_more).unwrap_or(false)
    }

    pub fn is_loading(&self) -> bool {
        self.lock().map(|s| s.in_flight.is_some()).unwrap_or(false)
    }

    fn lock(&self) -> PortResult<MutexGuard<'_, PagerState<E>>> {
        self.state
            .lock()
            .map_err(|_| PortError::Unexpected("paginator lock poisoned".to_string()))
    }
}
