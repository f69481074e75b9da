// This file is part of TRINCI.
//
// Copyright (C) 2021 Affidaty Spa.
//
// TRINCI is free software: you can redistribute it and/or modify it under
// the terms of the GNU Affero General Public License as published by the
// Free Software Foundation, either version 3 of the License, or (at your
// option) any later version.
//
// TRINCI is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or
// FITNESS FOR A PARTICULAR PURPOSE. See the GNU Affero General Public License
// for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with TRINCI. If not, see <https://www.gnu.org/licenses/>.

//! Restartable, paginated read over the committed records.
//!
//! Records are visited most recently committed first. The cursor works on the
//! store snapshot taken at creation: records committed afterwards are not
//! visited. A page `offset` is the number of records, counting from the
//! oldest, still to be visited; passing it to `LedgerStore::resume` restarts
//! the read from the next page, even after further commits.

use crate::{
    base::RwLock,
    db::{Db, StoredRecord},
};
use std::sync::Arc;

/// Query result page.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    /// Page values.
    pub values: Vec<T>,
    /// Offset to resume the read from.
    pub offset: usize,
    /// No further pages.
    pub is_last: bool,
}

impl<T> Page<T> {
    /// Project the page values.
    pub fn map<U, F: FnMut(T) -> U>(self, f: F) -> Page<U> {
        Page {
            values: self.values.into_iter().map(f).collect(),
            offset: self.offset,
            is_last: self.is_last,
        }
    }
}

/// Forward only records cursor.
pub struct Cursor<D: Db, F> {
    db: Arc<RwLock<D>>,
    filter: F,
    page_size: usize,
    next: usize,
    lookahead: Option<StoredRecord>,
    done: bool,
}

impl<D: Db, F: Fn(&StoredRecord) -> bool> Cursor<D, F> {
    pub(crate) fn new(db: Arc<RwLock<D>>, filter: F, page_size: usize, offset: usize) -> Self {
        let count = db.read().records_count();
        Cursor {
            db,
            filter,
            page_size: page_size.max(1),
            next: offset.min(count),
            lookahead: None,
            done: false,
        }
    }

    /// Next matching record, moving backward in commit order.
    fn scan(&mut self) -> Option<StoredRecord> {
        while self.next > 0 {
            self.next -= 1;
            let entry = self.db.read().load_record(self.next);
            match entry {
                Some(entry) if (self.filter)(&entry) => return Some(entry),
                Some(_) => (),
                None => warn!("[ledger] missing record at position {}", self.next),
            }
        }
        None
    }

    /// Fetch the next page.
    pub fn next_page(&mut self) -> Option<Page<StoredRecord>> {
        if self.done {
            return None;
        }
        let mut values = Vec::with_capacity(self.page_size);
        values.extend(self.lookahead.take());
        while values.len() < self.page_size {
            match self.scan() {
                Some(entry) => values.push(entry),
                None => break,
            }
        }
        if values.is_empty() {
            self.done = true;
            return None;
        }
        // Look ahead to flag the final page.
        self.lookahead = self.scan();
        let (offset, is_last) = match self.lookahead {
            Some(_) => (self.next + 1, false),
            None => (0, true),
        };
        self.done = is_last;
        Some(Page {
            values,
            offset,
            is_last,
        })
    }
}

impl<D: Db, F: Fn(&StoredRecord) -> bool> Iterator for Cursor<D, F> {
    type Item = Page<StoredRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_page()
    }
}
