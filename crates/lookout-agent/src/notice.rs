//! Where operator notices end up on the agent station.

use tracing::info;

pub trait NoticeSink: Send + Sync {
    fn notice(&self, text: &str);
}

/// Prints notices to stderr and logs them.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotice;

impl NoticeSink for LogNotice {
    fn notice(&self, text: &str) {
        info!(text = %text, "Notice from monitor");
        eprintln!("\n*** {text} ***\n");
    }
}
