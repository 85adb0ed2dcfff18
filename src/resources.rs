//! Copies externally referenced files (textures, implicit-geometry library objects,
//! point-cloud and time-series payloads, georeferencing world files) from the input
//! layout to the output layout as features stream through. Copies run on a bounded
//! worker pool so a batch with thousands of texture references doesn't serialize
//! behind disk I/O on the main feature-processing thread.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, Sender};
use log::warn;

use crate::error::{CgtError, Result};

/// The kinds of external file a feature or appearance can reference. Per-subcommand
/// callers suppress the kinds they handle themselves (the texture clipper suppresses
/// `ParameterizedTexture`/`GeoreferencedTexture` because it writes new images rather
/// than copying the originals verbatim).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    ParameterizedTexture,
    GeoreferencedTexture,
    LibraryObject,
    PointFile,
    TimeSeriesFile,
}

struct CopyJob {
    kind: ResourceKind,
    source: PathBuf,
    dest: PathBuf,
}

/// Blocking count-latch: tracks outstanding submissions so [`ResourceProcessor::close`]
/// can wait for every queued copy to finish before reporting success or the first
/// failure.
#[derive(Default)]
struct Latch {
    outstanding: Mutex<u64>,
    idle: Condvar,
}

impl Latch {
    fn increment(&self) {
        *self.outstanding.lock().unwrap() += 1;
    }

    fn decrement(&self) {
        let mut count = self.outstanding.lock().unwrap();
        *count -= 1;
        if *count == 0 {
            self.idle.notify_all();
        }
    }

    fn wait_idle(&self) {
        let mut count = self.outstanding.lock().unwrap();
        while *count > 0 {
            count = self.idle.wait(count).unwrap();
        }
    }
}

/// Bounded worker pool that copies referenced resource files from an input directory
/// to an output directory, preserving relative subfolder structure.
pub struct ResourceProcessor {
    sender: Option<Sender<CopyJob>>,
    workers: Vec<JoinHandle<()>>,
    latch: Arc<Latch>,
    first_error: Arc<Mutex<Option<CgtError>>>,
    skip: Vec<ResourceKind>,
}

impl ResourceProcessor {
    /// Spawns `pool_size` worker threads reading off a bounded queue of capacity
    /// `queue_capacity`. `pool_size` defaults to `max(2, num_cpus)` at the call site.
    pub fn new(pool_size: usize, queue_capacity: usize) -> Self {
        let (tx, rx) = bounded::<CopyJob>(queue_capacity.max(1));
        let latch = Arc::new(Latch::default());
        let first_error: Arc<Mutex<Option<CgtError>>> = Arc::new(Mutex::new(None));

        let mut workers = Vec::with_capacity(pool_size.max(1));
        for _ in 0..pool_size.max(1) {
            let rx = rx.clone();
            let latch = Arc::clone(&latch);
            let first_error = Arc::clone(&first_error);
            workers.push(std::thread::spawn(move || {
                for job in rx.iter() {
                    if let Err(e) = copy_one(&job) {
                        let mut slot = first_error.lock().unwrap();
                        if slot.is_none() {
                            *slot = Some(e);
                        }
                    }
                    latch.decrement();
                }
            }));
        }

        ResourceProcessor {
            sender: Some(tx),
            workers,
            latch,
            first_error,
            skip: Vec::new(),
        }
    }

    /// Suppresses copies of `kind` for the lifetime of this processor.
    pub fn skip(&mut self, kind: ResourceKind) {
        self.skip.push(kind);
    }

    /// Schedules a copy of `source` (resolved against the input file's directory) to
    /// `dest` (resolved against the output directory), blocking if the queue is full.
    /// A no-op if `kind` has been suppressed via [`ResourceProcessor::skip`].
    pub fn submit(&self, kind: ResourceKind, source: impl Into<PathBuf>, dest: impl Into<PathBuf>) {
        if self.skip.contains(&kind) {
            return;
        }
        let job = CopyJob {
            kind,
            source: source.into(),
            dest: dest.into(),
        };
        self.latch.increment();
        // Capacity is bounded; a full queue blocks the caller here, which is the
        // processor's backpressure.
        if let Some(sender) = &self.sender {
            if sender.send(job).is_err() {
                self.latch.decrement();
            }
        }
    }

    /// Schedules the georeferencing world-file companion of `source`, if the naming
    /// convention resolves to an existing file: `<stem>.<ext>w`, or `<stem>.<x_w>w`
    /// using the first and last letters of a three-letter extension.
    pub fn submit_world_file(&self, source: &Path, dest: &Path) {
        let Some(world_source) = world_file_companion(source) else {
            return;
        };
        if !world_source.exists() {
            return;
        }
        let world_dest = world_file_companion(dest).unwrap_or_else(|| dest.with_extension("w"));
        self.submit(ResourceKind::GeoreferencedTexture, world_source, world_dest);
    }

    /// Awaits every outstanding copy and returns the first failure observed, if any.
    /// Idempotent: further submissions after `close` are accepted but never drained.
    pub fn close(&mut self) -> Result<()> {
        self.sender.take();
        self.latch.wait_idle();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
        if let Some(err) = self.first_error.lock().unwrap().take() {
            return Err(CgtError::Aborted(err.to_string()));
        }
        Ok(())
    }
}

impl Drop for ResourceProcessor {
    fn drop(&mut self) {
        if self.sender.is_some() {
            warn!("ResourceProcessor dropped without close(): pending copies may be lost");
        }
    }
}

fn copy_one(job: &CopyJob) -> Result<()> {
    if let Some(parent) = job.dest.parent() {
        std::fs::create_dir_all(parent).map_err(|e| CgtError::io(parent, e))?;
    }
    std::fs::copy(&job.source, &job.dest).map_err(|e| CgtError::io(&job.source, e))?;
    Ok(())
}

fn world_file_companion(path: &Path) -> Option<PathBuf> {
    let ext = path.extension()?.to_str()?;
    let world_ext = if ext.len() == 3 {
        let mut chars = ext.chars();
        let first = chars.next()?;
        let last = chars.next_back()?;
        format!("{first}{last}w")
    } else {
        format!("{ext}w")
    };
    Some(path.with_extension(world_ext))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn copies_a_file_through_the_worker_pool() {
        let src_dir = tempfile::tempdir().unwrap();
        let dst_dir = tempfile::tempdir().unwrap();
        let src = src_dir.path().join("tex.jpg");
        std::fs::File::create(&src).unwrap().write_all(b"fake-jpeg").unwrap();

        let mut proc = ResourceProcessor::new(2, 4);
        let dest = dst_dir.path().join("tex.jpg");
        proc.submit(ResourceKind::ParameterizedTexture, &src, &dest);
        proc.close().unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), b"fake-jpeg");
    }

    #[test]
    fn close_surfaces_a_copy_failure() {
        let dst_dir = tempfile::tempdir().unwrap();
        let mut proc = ResourceProcessor::new(1, 2);
        proc.submit(
            ResourceKind::PointFile,
            PathBuf::from("/nonexistent/does-not-exist.las"),
            dst_dir.path().join("does-not-exist.las"),
        );
        assert!(proc.close().is_err());
    }

    #[test]
    fn skipped_kind_is_never_copied() {
        let src_dir = tempfile::tempdir().unwrap();
        let dst_dir = tempfile::tempdir().unwrap();
        let src = src_dir.path().join("tex.jpg");
        std::fs::File::create(&src).unwrap().write_all(b"x").unwrap();

        let mut proc = ResourceProcessor::new(1, 2);
        proc.skip(ResourceKind::ParameterizedTexture);
        let dest = dst_dir.path().join("tex.jpg");
        proc.submit(ResourceKind::ParameterizedTexture, &src, &dest);
        proc.close().unwrap();

        assert!(!dest.exists());
    }

    #[test]
    fn world_file_companion_uses_first_and_last_letters() {
        let p = Path::new("ortho.jpg");
        assert_eq!(world_file_companion(p), Some(PathBuf::from("ortho.jgw")));
        let p2 = Path::new("ortho.tif");
        assert_eq!(world_file_companion(p2), Some(PathBuf::from("ortho.tfw")));
    }
}
