//! Offset pagination over any store read.
//!
//! A [`Pages`] value fetches nothing until asked. Each call to
//! [`Pages::next_batch`] issues one fetch; a short or empty page ends the
//! sequence, and [`Pages::restart`] rewinds it to the first page.

use std::future::Future;
use std::marker::PhantomData;

use futures_util::stream::{self, Stream};

use crate::error::{AppError, Result};
use crate::types::PageRequest;

pub struct Pages<T, F> {
    fetch: F,
    page_size: usize,
    offset: usize,
    exhausted: bool,
    _rows: PhantomData<fn() -> T>,
}

impl<T, F, Fut> Pages<T, F>
where
    F: FnMut(PageRequest) -> Fut,
    Fut: Future<Output = Result<Vec<T>>>,
{
    pub fn new(page_size: usize, fetch: F) -> Self {
        Self {
            fetch,
            page_size: page_size.max(1),
            offset: 0,
            exhausted: false,
            _rows: PhantomData,
        }
    }

    /// Fetch the next batch. `Ok(None)` once the sequence is finished.
    pub async fn next_batch(&mut self) -> Result<Option<Vec<T>>> {
        if self.exhausted {
            return Ok(None);
        }
        let request = PageRequest { offset: self.offset, limit: self.page_size };
        let batch = (self.fetch)(request).await?;
        if batch.len() < self.page_size {
            self.exhausted = true;
        }
        if batch.is_empty() {
            return Ok(None);
        }
        self.offset += batch.len();
        Ok(Some(batch))
    }

    /// Rewind to the first page.
    pub fn restart(&mut self) {
        self.offset = 0;
        self.exhausted = false;
    }

    /// Drain every remaining batch into one vector.
    pub async fn collect_all(mut self) -> Result<Vec<T>> {
        let mut rows = Vec::new();
        while let Some(batch) = self.next_batch().await? {
            rows.extend(batch);
        }
        Ok(rows)
    }

    pub fn into_stream(self) -> impl Stream<Item = Result<Vec<T>>> {
        stream::try_unfold(self, |mut pages| async move {
            let next = pages.next_batch().await?;
            Ok::<_, AppError>(next.map(|batch| (batch, pages)))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::TryStreamExt;
    use std::cell::Cell;

    fn source(total: usize) -> Vec<usize> {
        (0..total).collect()
    }

    #[tokio::test]
    async fn yields_fixed_size_batches_until_short_page() {
        let rows = source(25);
        let calls = Cell::new(0);
        let mut pages = Pages::new(10, |req: PageRequest| {
            calls.set(calls.get() + 1);
            let batch: Vec<usize> = rows.iter().skip(req.offset).take(req.limit).copied().collect();
            async move { Ok(batch) }
        });

        assert_eq!(calls.get(), 0, "nothing fetched before first batch");
        assert_eq!(pages.next_batch().await.unwrap().unwrap().len(), 10);
        assert_eq!(pages.next_batch().await.unwrap().unwrap().len(), 10);
        assert_eq!(pages.next_batch().await.unwrap().unwrap(), vec![20, 21, 22, 23, 24]);
        assert!(pages.next_batch().await.unwrap().is_none());
        assert_eq!(calls.get(), 3, "short page ends the sequence without another fetch");
    }

    #[tokio::test]
    async fn exact_multiple_needs_one_empty_fetch() {
        let rows = source(20);
        let mut pages = Pages::new(10, |req: PageRequest| {
            let batch: Vec<usize> = rows.iter().skip(req.offset).take(req.limit).copied().collect();
            async move { Ok(batch) }
        });
        let mut batches = 0;
        while pages.next_batch().await.unwrap().is_some() {
            batches += 1;
        }
        assert_eq!(batches, 2);
    }

    #[tokio::test]
    async fn restart_replays_from_first_page() {
        let rows = source(12);
        let mut pages = Pages::new(5, |req: PageRequest| {
            let batch: Vec<usize> = rows.iter().skip(req.offset).take(req.limit).copied().collect();
            async move { Ok(batch) }
        });
        let first = pages.next_batch().await.unwrap().unwrap();
        pages.next_batch().await.unwrap();
        pages.restart();
        assert_eq!(pages.next_batch().await.unwrap().unwrap(), first);
    }

    #[tokio::test]
    async fn collect_and_stream_agree() {
        let rows = source(7);
        let fetch = |req: PageRequest| {
            let batch: Vec<usize> = rows.iter().skip(req.offset).take(req.limit).copied().collect();
            async move { Ok::<_, AppError>(batch) }
        };
        let all = Pages::new(3, fetch).collect_all().await.unwrap();
        assert_eq!(all, rows);

        let batches: Vec<Vec<usize>> = Pages::new(3, fetch).into_stream().try_collect().await.unwrap();
        assert_eq!(batches.len(), 3);
        assert_eq!(batches.concat(), rows);
    }

    #[tokio::test]
    async fn fetch_error_propagates() {
        let mut pages = Pages::new(3, |_req: PageRequest| async {
            Err::<Vec<u8>, _>(crate::error::AppError::BadRequest("boom".to_string()))
        });
        assert!(pages.next_batch().await.is_err());
    }
}
