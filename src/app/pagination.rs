use std::future::Future;

use anyhow::{anyhow, Result};
use tracing::debug;

use crate::{
    app::retry::RetryPolicy,
    ports::{Page, PageCursor},
};

pub const MAX_PAGES: usize = 1000;

/// Follows page cursors until the platform reports no next page. Each page
/// is retried independently.
pub async fn collect_pages<T, F, Fut>(
    retry: &RetryPolicy,
    operation: &str,
    mut fetch_page: F,
) -> Result<Vec<T>>
where
    F: FnMut(Option<PageCursor>) -> Fut,
    Fut: Future<Output = Result<Page<T>>>,
{
    let mut items = Vec::new();
    let mut cursor: Option<PageCursor> = None;

    for page_index in 1..=MAX_PAGES {
        let page = retry
            .execute(operation, || fetch_page(cursor.clone()))
            .await?;
        let fetched = page.items.len();
        items.extend(page.items);
        debug!(operation, page = page_index, fetched, "fetched page");

        match page.next {
            Some(next) if Some(&next) != cursor.as_ref() => cursor = Some(next),
            Some(next) => {
                return Err(anyhow!(
                    "{operation}: platform returned the same page cursor twice ({next})"
                ))
            }
            None => return Ok(items),
        }
    }

    Err(anyhow!(
        "{operation}: pagination exceeded safety limit ({MAX_PAGES} pages)"
    ))
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use chrono::Utc;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::{app::retry::RetrySettings, ports::ClockPort};

    struct NowClock;

    impl ClockPort for NowClock {
        fn now(&self) -> chrono::DateTime<Utc> {
            Utc::now()
        }
    }

    fn retry() -> RetryPolicy {
        RetryPolicy::new(
            RetrySettings::default(),
            Arc::new(NowClock),
            CancellationToken::new(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn follows_cursors_until_the_last_page() {
        let items = collect_pages(&retry(), "notes", |cursor| async move {
            Ok(match cursor.as_deref() {
                None => Page {
                    items: vec![1, 2],
                    next: Some("2".to_string()),
                },
                Some("2") => Page {
                    items: vec![3],
                    next: Some("3".to_string()),
                },
                _ => Page::last(vec![4]),
            })
        })
        .await
        .unwrap();
        assert_eq!(items, vec![1, 2, 3, 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn failing_page_is_retried_without_restarting() {
        let calls = AtomicUsize::new(0);
        let items = collect_pages(&retry(), "notes", |cursor| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                match (cursor.as_deref(), n) {
                    (None, _) => Ok(Page {
                        items: vec!["a"],
                        next: Some("2".to_string()),
                    }),
                    (Some("2"), 1) => Err(anyhow!("connection reset")),
                    _ => Ok(Page::last(vec!["b"])),
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(items, vec!["a", "b"]);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_cursor_is_an_error() {
        let result: Result<Vec<u8>> = collect_pages(&retry(), "notes", |_| async {
            Ok(Page {
                items: vec![],
                next: Some("same".to_string()),
            })
        })
        .await;
        let message = format!("{:#}", result.unwrap_err());
        assert!(message.contains("same page cursor twice"));
    }
}
