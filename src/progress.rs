use std::fmt;
use std::path::Path;

/// The two stages of applying an archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Existing files are patched or copied through.
    Patch,
    /// New files and directories are extracted.
    Plain,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Patch => "patch",
            Stage::Plain => "plain",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress notifications, delivered synchronously on the applying thread.
///
/// `on_stage` fires once per stage with the number of items it will process, then
/// `on_progress` fires after each item with a 1-based index. Every method defaults to a
/// no-op so observers implement only what they display. Cancellation is up to the
/// caller: stop issuing further operations and discard the destination.
pub trait ProgressObserver {
    /// Called before archive `index` (0-based) of `total` is applied by a chain.
    fn on_archive(&mut self, _index: usize, _total: usize, _archive: &Path) {}

    fn on_stage(&mut self, _stage: Stage, _total: usize) {}

    fn on_progress(&mut self, _index: usize) {}
}

/// Observer that ignores every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct Silent;

impl ProgressObserver for Silent {}

impl<T: ProgressObserver + ?Sized> ProgressObserver for &mut T {
    fn on_archive(&mut self, index: usize, total: usize, archive: &Path) {
        (**self).on_archive(index, total, archive);
    }

    fn on_stage(&mut self, stage: Stage, total: usize) {
        (**self).on_stage(stage, total);
    }

    fn on_progress(&mut self, index: usize) {
        (**self).on_progress(index);
    }
}
