//! Cursor pagination over `links.next`.

use std::collections::HashSet;
use std::future::Future;

use super::error::AscError;
use super::types::ListResponse;

/// A page of results that knows where the next one is.
pub trait Paginated {
    fn next_url(&self) -> Option<&str>;

    /// Appends `next`'s items and takes over its pagination links.
    fn absorb(&mut self, next: Self);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Paginated for ListResponse<T> {
    fn next_url(&self) -> Option<&str> {
        self.links.next.as_deref().filter(|next| !next.trim().is_empty())
    }

    fn absorb(&mut self, next: Self) {
        self.data.extend(next.data);
        self.links.next = next.links.next;
        if self.meta.is_none() {
            self.meta = next.meta;
        }
    }

    fn len(&self) -> usize {
        self.data.len()
    }
}

struct Cursor {
    seen: HashSet<String>,
    page: usize,
}

impl Cursor {
    fn new() -> Self {
        Self {
            seen: HashSet::new(),
            page: 1,
        }
    }

    /// Registers `next` as the following page. Fails if it was seen before.
    fn advance(&mut self, next: &str) -> Result<usize, AscError> {
        if !self.seen.insert(next.to_string()) {
            return Err(AscError::RepeatedNextUrl(next.to_string()).at_page(self.page + 1));
        }
        self.page += 1;
        Ok(self.page)
    }
}

/// Follows `next` links from `first` and returns every item merged into a
/// single page.
pub async fn paginate_all<P, F, Fut>(first: P, mut fetch: F) -> Result<P, AscError>
where
    P: Paginated,
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<P, AscError>>,
{
    let mut cursor = Cursor::new();
    let mut merged = first;
    while let Some(next) = merged.next_url().map(str::to_owned) {
        let page = cursor.advance(&next)?;
        let resp = fetch(next).await.map_err(|e| e.at_page(page))?;
        merged.absorb(resp);
    }
    Ok(merged)
}

/// Hands each page to `consume` in order, fetching the next one only after
/// the previous page was consumed.
pub async fn paginate_each<P, F, Fut, C>(first: P, mut fetch: F, mut consume: C) -> Result<(), AscError>
where
    P: Paginated,
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<P, AscError>>,
    C: FnMut(P) -> Result<(), AscError>,
{
    let mut cursor = Cursor::new();
    let mut current = first;
    let mut page = 1;
    loop {
        let next = current.next_url().map(str::to_owned);
        consume(current).map_err(|e| e.at_page(page))?;
        let Some(next) = next else {
            return Ok(());
        };
        page = cursor.advance(&next)?;
        current = fetch(next).await.map_err(|e| e.at_page(page))?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asc::types::{Links, ResourceData};
    use std::cell::Cell;

    fn page_url(page: usize) -> String {
        format!("https://api.appstoreconnect.apple.com/v1/apps?cursor={}", page)
    }

    fn make_page(page: usize, per_page: usize, total_pages: usize) -> ListResponse<ResourceData> {
        let data = (0..per_page)
            .map(|i| ResourceData::new("apps", format!("app-{}-{}", page, i)))
            .collect();
        let next = (page < total_pages).then(|| page_url(page + 1));
        ListResponse {
            data,
            links: Links {
                self_link: Some(page_url(page)),
                next,
                ..Links::default()
            },
            meta: None,
        }
    }

    fn page_from_url(url: &str) -> usize {
        url.rsplit('=').next().unwrap().parse().unwrap()
    }

    #[tokio::test]
    async fn aggregates_all_pages() {
        let fetches = Cell::new(0);
        let all = paginate_all(make_page(1, 2, 3), |next| {
            fetches.set(fetches.get() + 1);
            async move { Ok(make_page(page_from_url(&next), 2, 3)) }
        })
        .await
        .unwrap();
        assert_eq!(all.len(), 6);
        assert_eq!(all.data[5].id, "app-3-1");
        assert_eq!(all.next_url(), None);
        assert_eq!(all.links.self_link, Some(page_url(1)));
        assert_eq!(fetches.get(), 2);
    }

    #[tokio::test]
    async fn single_page_never_fetches() {
        let all = paginate_all(make_page(1, 3, 1), |_| async {
            Err::<ListResponse<ResourceData>, _>(AscError::Cancelled)
        })
        .await
        .unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn empty_next_link_ends_pagination() {
        let mut first = make_page(1, 1, 1);
        first.links.next = Some(String::new());
        let all = paginate_all(first, |_| async {
            Err::<ListResponse<ResourceData>, _>(AscError::Cancelled)
        })
        .await
        .unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn detects_repeated_next_url() {
        let err = paginate_all(make_page(1, 1, 3), |_| async {
            let mut page = make_page(2, 1, 3);
            page.links.next = Some(page_url(2));
            Ok(page)
        })
        .await
        .unwrap_err();
        assert!(err.to_string().contains("page 3"), "{}", err);
        let AscError::Page { source, .. } = err else {
            panic!("expected page error");
        };
        assert!(matches!(*source, AscError::RepeatedNextUrl(_)));
    }

    #[tokio::test]
    async fn fetch_error_is_wrapped_with_page() {
        let err = paginate_all(make_page(1, 1, 3), |_| async {
            Err::<ListResponse<ResourceData>, _>(AscError::Cancelled)
        })
        .await
        .unwrap_err();
        assert_eq!(err.to_string(), "page 2: operation cancelled");
    }

    #[tokio::test]
    async fn each_streams_pages_in_order() {
        let mut ids = Vec::new();
        paginate_each(
            make_page(1, 2, 3),
            |next| async move { Ok(make_page(page_from_url(&next), 2, 3)) },
            |page| {
                ids.extend(page.data.into_iter().map(|d| d.id));
                Ok(())
            },
        )
        .await
        .unwrap();
        assert_eq!(ids.len(), 6);
        assert_eq!(ids[0], "app-1-0");
        assert_eq!(ids[5], "app-3-1");
    }

    #[tokio::test]
    async fn each_consumer_error_includes_page() {
        let err = paginate_each(
            make_page(1, 1, 2),
            |_| async { Ok(make_page(2, 1, 2)) },
            |page| {
                if page.data[0].id == "app-2-0" {
                    Err(AscError::MissingArgument("consumer"))
                } else {
                    Ok(())
                }
            },
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("page 2"), "{}", err);
        let AscError::Page { page, source } = err else {
            panic!("expected page error");
        };
        assert_eq!(page, 2);
        assert!(matches!(*source, AscError::MissingArgument("consumer")));
    }

    #[tokio::test]
    async fn each_stops_after_consumer_error() {
        let fetches = Cell::new(0);
        let err = paginate_each(
            make_page(1, 1, 5),
            |next| {
                fetches.set(fetches.get() + 1);
                async move { Ok(make_page(page_from_url(&next), 1, 5)) }
            },
            |_| Err(AscError::Cancelled),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AscError::Page { page: 1, .. }));
        assert_eq!(fetches.get(), 0);
    }
}
