/*!
 * Progress reporting for bulk and single-object transfers
 */

use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Read, Write};
use std::sync::Mutex;

/// Folder progress callback: `(completed, total)` after each finished item
pub type ProgressFn = dyn Fn(usize, usize) + Send + Sync;

/// Byte progress callback: bytes transferred so far for one object
pub type ByteProgressFn = dyn Fn(u64) + Send + Sync;

/// Completed/total counter shared by the workers of one bulk call
///
/// The callback runs while the counter lock is held, so invocations never
/// overlap and `completed` is strictly increasing across them.
#[derive(Debug)]
pub struct ProgressCounter {
    completed: Mutex<usize>,
    total: usize,
}

impl ProgressCounter {
    pub fn new(total: usize) -> Self {
        Self {
            completed: Mutex::new(0),
            total,
        }
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn completed(&self) -> usize {
        *self
            .completed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Count one finished item and notify `on_progress`
    pub fn record(&self, on_progress: Option<&ProgressFn>) -> usize {
        let mut completed = self
            .completed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *completed += 1;
        if let Some(callback) = on_progress {
            callback(*completed, self.total);
        }
        *completed
    }
}

/// Reader that reports the running byte count as it is consumed
pub struct CountingReader<'a, R> {
    inner: R,
    count: u64,
    on_bytes: Option<&'a ByteProgressFn>,
}

impl<'a, R: Read> CountingReader<'a, R> {
    pub fn new(inner: R, on_bytes: Option<&'a ByteProgressFn>) -> Self {
        Self {
            inner,
            count: 0,
            on_bytes,
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }
}

impl<R: Read> Read for CountingReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n > 0 {
            self.count += n as u64;
            if let Some(callback) = self.on_bytes {
                callback(self.count);
            }
        }
        Ok(n)
    }
}

/// Writer that reports the running byte count as it is fed
pub struct CountingWriter<'a, W> {
    inner: W,
    count: u64,
    on_bytes: Option<&'a ByteProgressFn>,
}

impl<'a, W: Write> CountingWriter<'a, W> {
    pub fn new(inner: W, on_bytes: Option<&'a ByteProgressFn>) -> Self {
        Self {
            inner,
            count: 0,
            on_bytes,
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for CountingWriter<'_, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        if n > 0 {
            self.count += n as u64;
            if let Some(callback) = self.on_bytes {
                callback(self.count);
            }
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Item-count bar styled for folder transfers
pub fn folder_progress_bar(total: u64) -> ProgressBar {
    let bar = ProgressBar::new(total);
    let style = ProgressStyle::with_template(
        "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} objects ({eta})",
    )
    .map(|style| style.progress_chars("#>-"))
    .unwrap_or_else(|_| ProgressStyle::default_bar());
    bar.set_style(style);
    bar
}

/// Drive an `indicatif` bar from folder progress callbacks
///
/// ```no_run
/// use orbit_bucket::progress::{folder_progress_bar, progress_bar_callback};
///
/// let on_progress = progress_bar_callback(folder_progress_bar(0));
/// on_progress(1, 4);
/// ```
pub fn progress_bar_callback(bar: ProgressBar) -> impl Fn(usize, usize) + Send + Sync {
    move |completed, total| {
        bar.set_length(total as u64);
        bar.set_position(completed as u64);
        if completed >= total {
            bar.finish();
        }
    }
}
