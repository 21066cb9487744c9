//! Shared test helpers: a scriptable decoder and sequence builders.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::color::ColorMode;
use crate::decoder::{DecodedImage, Decoder, PixelFormat};
use crate::error::{CoreError, CoreResult};
use crate::pool::WorkerPool;
use crate::sequence::{ImageList, SourceDescriptor};
use crate::view::TargetSize;

/// Upper bound on how long a gated decode blocks, so a broken test fails
/// instead of hanging.
const GATE_LIMIT: Duration = Duration::from_secs(10);

/// Path used for index `i` in [`image_list`].
pub fn fake_path(i: usize) -> PathBuf {
    PathBuf::from(format!("/fake/shots/IMG_{:04}.JPG", i))
}

/// Sequence of `n` fake sources.
pub fn image_list(n: usize) -> ImageList {
    ImageList::from_paths((0..n).map(fake_path))
}

#[derive(Debug, Default)]
struct GateState {
    open: bool,
    arrivals: usize,
}

/// Holds decodes inside the decoder until opened.
#[derive(Debug, Clone, Default)]
pub struct Gate {
    inner: Arc<(Mutex<GateState>, Condvar)>,
}

impl Gate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self) {
        let (lock, cvar) = &*self.inner;
        lock.lock().open = true;
        cvar.notify_all();
    }

    /// Block until `n` decodes have reached the gate.
    pub fn wait_for_arrivals(&self, n: usize, timeout: Duration) -> bool {
        let (lock, cvar) = &*self.inner;
        let deadline = Instant::now() + timeout;
        let mut state = lock.lock();
        while state.arrivals < n {
            if cvar.wait_until(&mut state, deadline).timed_out() {
                return state.arrivals >= n;
            }
        }
        true
    }

    fn pass(&self) {
        let (lock, cvar) = &*self.inner;
        let deadline = Instant::now() + GATE_LIMIT;
        let mut state = lock.lock();
        state.arrivals += 1;
        cvar.notify_all();
        while !state.open {
            if cvar.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
    }
}

/// Decoder that fabricates images of a fixed byte size.
///
/// Optionally holds every decode at a [`Gate`] and fails chosen indices.
#[derive(Debug)]
pub struct ScriptedDecoder {
    bytes_per_image: usize,
    gate: Option<Gate>,
    failing: Mutex<HashSet<PathBuf>>,
    calls: AtomicUsize,
    targets: Mutex<Vec<(PathBuf, TargetSize, ColorMode)>>,
}

impl ScriptedDecoder {
    pub fn new(bytes_per_image: usize) -> Self {
        Self {
            bytes_per_image: bytes_per_image.max(1),
            gate: None,
            failing: Mutex::new(HashSet::new()),
            calls: AtomicUsize::new(0),
            targets: Mutex::new(Vec::new()),
        }
    }

    pub fn gated(mut self, gate: Gate) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Make decodes of these indices fail.
    pub fn failing(self, indices: impl IntoIterator<Item = usize>) -> Self {
        self.failing.lock().extend(indices.into_iter().map(fake_path));
        self
    }

    /// Number of decodes that actually started.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Parameters of every decode, in start order.
    pub fn targets(&self) -> Vec<(PathBuf, TargetSize, ColorMode)> {
        self.targets.lock().clone()
    }
}

impl Decoder for ScriptedDecoder {
    fn decode(
        &self,
        source: &SourceDescriptor,
        target: TargetSize,
        color: ColorMode,
    ) -> CoreResult<DecodedImage> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.targets.lock().push((source.path.clone(), target, color));

        if let Some(gate) = &self.gate {
            gate.pass();
        }
        if self.failing.lock().contains(&source.path) {
            return Err(CoreError::Decode(format!("scripted failure for {}", source.path.display())));
        }
        Ok(DecodedImage::new(
            vec![0u8; self.bytes_per_image],
            self.bytes_per_image as u32,
            1,
            PixelFormat::Gray8,
        ))
    }
}

/// Wait until the pool has no unfinished tasks.
pub fn wait_idle(pool: &WorkerPool, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if pool.in_flight().is_empty() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    pool.in_flight().is_empty()
}
