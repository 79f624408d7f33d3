use std::collections::VecDeque;

use crate::{error::StoreError, repository::ItemStore};

/// Lazily yields every id in `[start, bound)` that `local_ids` does not contain.
///
/// `local_ids` must be ascending. Ids below the current candidate (including anything
/// below `start`) are skipped, so duplicates and out-of-range ids are harmless. The first
/// error from `local_ids` is yielded once and ends the sequence.
pub(crate) fn detect<I, E>(local_ids: I, start: i64, bound: i64) -> Gaps<I>
where
    I: Iterator<Item = Result<i64, E>>,
{
    Gaps {
        local_ids,
        local: None,
        primed: false,
        next_id: start,
        bound,
    }
}

pub(crate) struct Gaps<I> {
    local_ids: I,
    local: Option<i64>,
    primed: bool,
    next_id: i64,
    bound: i64,
}

impl<I, E> Gaps<I>
where
    I: Iterator<Item = Result<i64, E>>,
{
    fn advance(&mut self) -> Result<(), E> {
        self.local = self.local_ids.next().transpose()?;
        Ok(())
    }

    // Moves the local cursor to the first id not below `id`.
    fn seek(&mut self, id: i64) -> Result<(), E> {
        if !self.primed {
            self.primed = true;
            self.advance()?;
        }
        while matches!(self.local, Some(local) if local < id) {
            self.advance()?;
        }
        Ok(())
    }
}

impl<I, E> Iterator for Gaps<I>
where
    I: Iterator<Item = Result<i64, E>>,
{
    type Item = Result<i64, E>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.next_id < self.bound {
            let id = self.next_id;
            self.next_id += 1;
            if let Err(e) = self.seek(id) {
                self.next_id = self.bound;
                return Some(Err(e));
            }
            if self.local != Some(id) {
                return Some(Ok(id));
            }
        }
        None
    }
}

/// Ascending scan of the ids already stored in `[from, bound)`, one page at a time.
pub(crate) struct LocalIds<'a, S> {
    store: &'a mut S,
    page: VecDeque<i64>,
    page_size: usize,
    next_from: i64,
    bound: i64,
    exhausted: bool,
}

impl<'a, S: ItemStore> LocalIds<'a, S> {
    pub(crate) fn new(store: &'a mut S, from: i64, bound: i64, page_size: usize) -> Self {
        Self {
            store,
            page: VecDeque::new(),
            page_size,
            next_from: from,
            bound,
            exhausted: false,
        }
    }
}

impl<'a, S: ItemStore> Iterator for LocalIds<'a, S> {
    type Item = Result<i64, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.page.is_empty() && !self.exhausted {
            match self.store.find_item_ids(self.next_from, self.bound, self.page_size) {
                Ok(ids) => {
                    self.exhausted = ids.len() < self.page_size;
                    if let Some(last) = ids.last() {
                        self.next_from = last + 1;
                    }
                    self.page.extend(ids);
                }
                Err(e) => {
                    self.exhausted = true;
                    return Some(Err(e));
                }
            }
        }
        self.page.pop_front().map(Ok)
    }
}
