//! Desktop notifications via notify-rust (D-Bus).

use notify_rust::Notification;
use tracing::{debug, warn};

pub struct Notifier {
    enabled: bool,
}

impl Notifier {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn finished(&self, title: &str) {
        self.notify("Finished reading", title, "dialog-information");
    }

    pub fn page_failed(&self, page: usize, error: &str) {
        self.notify(&format!("Cannot read page {page}"), error, "dialog-warning");
    }

    fn notify(&self, summary: &str, body: &str, icon: &str) {
        if !self.enabled {
            return;
        }

        debug!("Notification: {summary}");

        if let Err(e) = Notification::new()
            .appname("pdftts")
            .summary(summary)
            .body(body)
            .icon(icon)
            .timeout(4000)
            .show()
        {
            warn!("Failed to show notification: {e}");
        }
    }
}
