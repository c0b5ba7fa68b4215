//! Paged streaming over large result sets.

use futures::stream::{self, Stream};
use tracing::{debug, trace};

use crate::entity::Entity;
use crate::error::Result;
use crate::finder::Finder;
use crate::manager::EntityManager;

enum State<E> {
    Fetching,
    Yielding(std::vec::IntoIter<E>),
    Exhausted,
}

/// A cursor returned by [`Finder::find_all_detached`].
///
/// Rows are fetched in pages of at most the configured stream page size and
/// never more than the finder's remaining limit. Every entity is detached
/// from the manager before it is handed out, so memory stays bounded by the
/// page size. The finder is cleared once the cursor is exhausted, fails or is
/// dropped.
pub struct Detached<'a, E: Entity, M: EntityManager> {
    finder: &'a mut Finder<E>,
    manager: &'a M,
    state: State<E>,
    offset: u64,
    remaining: Option<u64>,
    page_size: u64,
    pages: usize,
}

impl<'a, E: Entity, M: EntityManager> Detached<'a, E, M> {
    pub(crate) fn new(finder: &'a mut Finder<E>, manager: &'a M) -> Self {
        let offset = finder.offset().unwrap_or(0);
        let remaining = finder.limit();
        let page_size = finder.config().stream_page_size.max(1);
        let state = if remaining == Some(0) {
            finder.clear();
            State::Exhausted
        } else {
            State::Fetching
        };
        Self {
            finder,
            manager,
            state,
            offset,
            remaining,
            page_size,
            pages: 0,
        }
    }

    /// Returns the number of pages fetched so far.
    #[must_use]
    pub const fn pages_fetched(&self) -> usize {
        self.pages
    }

    /// Returns whether the cursor has finished.
    #[must_use]
    pub const fn is_exhausted(&self) -> bool {
        matches!(self.state, State::Exhausted)
    }

    /// Returns the next entity, fetching a new page when needed.
    ///
    /// # Errors
    ///
    /// Query, hydration or detach errors. The cursor is exhausted afterwards.
    pub async fn next(&mut self) -> Result<Option<E>> {
        loop {
            match &mut self.state {
                State::Exhausted => return Ok(None),
                State::Yielding(page) => match page.next() {
                    Some(entity) => {
                        if let Err(err) = self.manager.detach(&entity) {
                            self.finish();
                            return Err(err);
                        }
                        trace!(key = %entity.identity_key(), "Detached entity");
                        return Ok(Some(entity));
                    }
                    None if self.remaining == Some(0) => self.finish(),
                    None => self.state = State::Fetching,
                },
                State::Fetching => {
                    if let Err(err) = self.fetch_page().await {
                        self.finish();
                        return Err(err);
                    }
                }
            }
        }
    }

    async fn fetch_page(&mut self) -> Result<()> {
        let size = self
            .remaining
            .map_or(self.page_size, |remaining| remaining.min(self.page_size));
        let query = self.finder.pending_page(self.offset, size)?;
        let page = self.manager.fetch_entities::<E>(&query).await?;
        self.pages += 1;

        if page.is_empty() {
            debug!(pages = self.pages, "Detached stream drained");
            self.finish();
            return Ok(());
        }

        self.offset += size;
        self.remaining = self.remaining.map(|remaining| remaining - size);
        self.state = State::Yielding(page.into_iter());
        Ok(())
    }

    fn finish(&mut self) {
        self.state = State::Exhausted;
        self.finder.clear();
    }

    /// Converts the cursor into a stream of entities.
    pub fn into_stream(self) -> impl Stream<Item = Result<E>> + 'a
    where
        E: 'a,
        M: 'a,
    {
        stream::unfold(self, |mut cursor| async move {
            match cursor.next().await {
                Ok(Some(entity)) => Some((Ok(entity), cursor)),
                Ok(None) => None,
                Err(err) => Some((Err(err), cursor)),
            }
        })
    }
}

impl<E: Entity, M: EntityManager> Drop for Detached<'_, E, M> {
    fn drop(&mut self) {
        if !self.is_exhausted() {
            debug!(pages = self.pages, "Detached stream dropped before exhaustion");
            self.finder.clear();
        }
    }
}
