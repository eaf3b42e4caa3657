//! Cached `date` header values.
//!
//! Formatting an HTTP date on every response is wasteful; a background task refreshes a
//! shared value instead and responses clone it.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use http::HeaderValue;
use once_cell::sync::Lazy;
use tracing::warn;

/// Keeps the current HTTP date as a ready-made header value.
#[derive(Debug)]
pub struct DateService {
    current: Arc<ArcSwap<HeaderValue>>,
    handle: tokio::task::JoinHandle<()>,
}

static DATE_SERVICE: Lazy<DateService> = Lazy::new(|| DateService::new_with_update_interval(Duration::from_millis(800)));

impl DateService {
    /// The process wide instance.
    ///
    /// The first call must happen inside a tokio runtime, it spawns the refresh task.
    pub fn get_global_instance() -> &'static DateService {
        &DATE_SERVICE
    }

    fn new_with_update_interval(update_interval: Duration) -> Self {
        let initial = format_now().unwrap_or_else(|| HeaderValue::from_static("Thu, 01 Jan 1970 00:00:00 GMT"));
        let current = Arc::new(ArcSwap::from_pointee(initial));
        let current_arc = Arc::clone(&current);

        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(update_interval).await;
                match format_now() {
                    Some(value) => current_arc.store(Arc::new(value)),
                    None => warn!("failed to format http date, keeping the previous value"),
                }
            }
        });

        DateService { current, handle }
    }

    pub fn http_date(&self) -> HeaderValue {
        self.current.load().as_ref().clone()
    }
}

fn format_now() -> Option<HeaderValue> {
    let mut buf = faf_http_date::get_date_buff_no_key();
    faf_http_date::get_date_no_key(&mut buf);
    HeaderValue::from_bytes(&buf).ok()
}

impl Drop for DateService {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
