//! Progress reporting for programming sessions
//!
//! The engine reports what it is doing through a [`FlashProgress`] sink.
//! Every method has an empty default so a sink only implements the events it
//! cares about.

/// Progress callbacks for flash, read and probe operations
pub trait FlashProgress {
    /// Human-readable status line (e.g. "target in sync")
    fn message(&mut self, _msg: &str) {}

    /// Chip erase started
    fn erasing(&mut self) {}

    /// Page programming started
    fn writing(&mut self, _total_pages: usize, _total_bytes: usize) {}

    /// A page was programmed; `bytes_done` counts all pages so far
    fn page_written(&mut self, _page: usize, _bytes_done: usize) {}

    /// A page was read back and compared
    fn page_verified(&mut self, _page: usize, _matched: bool) {}

    /// Flash read-back started
    fn reading(&mut self, _total_bytes: usize) {}

    /// Read-back progress
    fn read_progress(&mut self, _bytes_read: usize) {}

    /// The operation finished successfully
    fn complete(&mut self, _bytes: usize) {}
}

/// A no-op progress reporter
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl FlashProgress for NoProgress {}

/// Progress reporter forwarding events to the `log` facade
#[derive(Debug, Default, Clone, Copy)]
pub struct LogProgress;

impl FlashProgress for LogProgress {
    fn message(&mut self, msg: &str) {
        log::info!("{}", msg);
    }

    fn erasing(&mut self) {
        log::info!("Erasing chip");
    }

    fn writing(&mut self, total_pages: usize, total_bytes: usize) {
        log::info!("Writing {} bytes in {} pages", total_bytes, total_pages);
    }

    fn page_written(&mut self, page: usize, bytes_done: usize) {
        log::debug!("Page {} written ({} bytes total)", page, bytes_done);
    }

    fn page_verified(&mut self, page: usize, matched: bool) {
        if matched {
            log::debug!("Page {} verified", page);
        } else {
            log::warn!("Page {} does not match", page);
        }
    }

    fn reading(&mut self, total_bytes: usize) {
        log::info!("Reading {} bytes", total_bytes);
    }

    fn complete(&mut self, bytes: usize) {
        log::info!("Done ({} bytes)", bytes);
    }
}

impl<P: FlashProgress + ?Sized> FlashProgress for &mut P {
    fn message(&mut self, msg: &str) {
        (**self).message(msg)
    }

    fn erasing(&mut self) {
        (**self).erasing()
    }

    fn writing(&mut self, total_pages: usize, total_bytes: usize) {
        (**self).writing(total_pages, total_bytes)
    }

    fn page_written(&mut self, page: usize, bytes_done: usize) {
        (**self).page_written(page, bytes_done)
    }

    fn page_verified(&mut self, page: usize, matched: bool) {
        (**self).page_verified(page, matched)
    }

    fn reading(&mut self, total_bytes: usize) {
        (**self).reading(total_bytes)
    }

    fn read_progress(&mut self, bytes_read: usize) {
        (**self).read_progress(bytes_read)
    }

    fn complete(&mut self, bytes: usize) {
        (**self).complete(bytes)
    }
}
