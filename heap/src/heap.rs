use std::time::{Duration, Instant};

use object::{HeaderFlags, Managed, Value};
use thiserror::Error;

/// Consumers implement this to provide GC roots.
///
/// Called at safepoints to discover live roots from VM state (the frame
/// chain, the current method, interned symbols, globals, etc.). The visitor
/// receives `&mut Value` so the GC can update root pointers in place during
/// object relocation.
pub trait RootProvider {
    fn visit_roots(&mut self, visitor: &mut dyn FnMut(&mut Value));
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HeapError {
    #[error("integer {0} has no fields")]
    NotAReference(i64),
    #[error("malformed value 0x{0:016x}")]
    Malformed(u64),
    #[error("stale reference {value:?}: produced in epoch {}, heap is at epoch {current}", .value.epoch())]
    Stale { value: Value, current: u16 },
    #[error("heap exhausted")]
    Exhausted,
}

// ── Heap settings ─────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct HeapSettings {
    /// Bytes allocated between two collections.
    pub gc_threshold: usize,
    /// Collect at every safepoint.
    pub stress: bool,
}

impl Default for HeapSettings {
    fn default() -> Self {
        Self {
            gc_threshold: 8 * 1024 * 1024, // 8 MB
            stress: false,
        }
    }
}

// ── Statistics ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct GcStats {
    pub collections: u64,
    /// Objects copied to the new space, summed over all cycles.
    pub objects_moved: u64,
    pub objects_reclaimed: u64,
    pub bytes_reclaimed: u64,
    /// References found pointing into an older epoch while tracing.
    pub stale_references: u64,
    /// Sources recorded by the write barrier, summed over all cycles.
    pub remembered: u64,
    /// Collections survived by the oldest live object.
    pub oldest_survivor: u8,
    pub total_time: Duration,
}

impl std::fmt::Display for GcStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "collections: {}, moved: {}, reclaimed: {} objects / {} bytes, remembered: {}, oldest: {}, time: {:?}",
            self.collections,
            self.objects_moved,
            self.objects_reclaimed,
            self.bytes_reclaimed,
            self.remembered,
            self.oldest_survivor,
            self.total_time
        )
    }
}

// ── Heap ──────────────────────────────────────────────────────────────

const NOT_FORWARDED: u32 = u32::MAX;

/// A moving (copying) heap of [`Managed`] objects.
///
/// Objects live in an arena and are addressed by index. A collection copies
/// every reachable object into a fresh arena in breadth-first order and
/// rewrites each reference it meets, then bumps the epoch. References carry
/// the epoch they were produced in, so anything held across a collection
/// without being visited as a root is detected as stale on its next use.
///
/// [`Heap::allocate`] never collects. It only records allocation volume;
/// the mutator decides where collection is allowed by calling
/// [`Heap::safepoint`].
pub struct Heap<T: Managed> {
    objects: Vec<T>,
    epoch: u16,
    settings: HeapSettings,
    allocated_since_gc: usize,
    live_bytes: usize,
    remembered: Vec<Value>,
    stats: GcStats,
}

impl<T: Managed> Heap<T> {
    pub fn new(settings: HeapSettings) -> Self {
        Self {
            objects: Vec::new(),
            epoch: 0,
            settings,
            allocated_since_gc: 0,
            live_bytes: 0,
            remembered: Vec::new(),
            stats: GcStats::default(),
        }
    }

    pub fn settings(&self) -> &HeapSettings {
        &self.settings
    }

    #[inline(always)]
    pub fn epoch(&self) -> u16 {
        self.epoch
    }

    /// Number of objects in the arena, garbage included.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Bytes occupied, garbage included.
    pub fn live_bytes(&self) -> usize {
        self.live_bytes
    }

    pub fn stats(&self) -> &GcStats {
        &self.stats
    }

    // ── Allocation ────────────────────────────────────────────────────

    /// Move `object` into the heap and return a reference to it.
    pub fn allocate(&mut self, object: T) -> Result<Value, HeapError> {
        let index = u32::try_from(self.objects.len())
            .ok()
            .filter(|&i| i != NOT_FORWARDED)
            .ok_or(HeapError::Exhausted)?;
        let size = object.byte_size();
        self.objects.push(object);
        self.allocated_since_gc += size;
        self.live_bytes += size;
        Ok(Value::from_index(index, self.epoch))
    }

    /// Whether the next safepoint will collect.
    #[inline(always)]
    pub fn needs_collection(&self) -> bool {
        self.settings.stress || self.allocated_since_gc >= self.settings.gc_threshold
    }

    /// Collect if allocation volume (or stress mode) asks for it.
    ///
    /// Every reference the caller keeps must be reachable from `roots`;
    /// anything else is stale afterwards. Returns whether a collection ran.
    #[inline]
    pub fn safepoint(&mut self, roots: &mut dyn RootProvider) -> bool {
        if !self.needs_collection() {
            return false;
        }
        self.full_gc(roots);
        true
    }

    // ── Access ────────────────────────────────────────────────────────

    fn check(&self, value: Value) -> Result<usize, HeapError> {
        if value.is_fixnum() {
            return Err(HeapError::NotAReference(value.to_i64()));
        }
        if !value.is_ref() {
            return Err(HeapError::Malformed(value.raw()));
        }
        if value.epoch() != self.epoch || value.index() >= self.objects.len() {
            return Err(HeapError::Stale {
                value,
                current: self.epoch,
            });
        }
        Ok(value.index())
    }

    /// Whether `value` is a reference valid in the current epoch.
    pub fn is_live_ref(&self, value: Value) -> bool {
        self.check(value).is_ok()
    }

    #[inline]
    pub fn get(&self, value: Value) -> Result<&T, HeapError> {
        let index = self.check(value)?;
        Ok(&self.objects[index])
    }

    #[inline]
    pub fn get_mut(&mut self, value: Value) -> Result<&mut T, HeapError> {
        let index = self.check(value)?;
        Ok(&mut self.objects[index])
    }

    // ── Barrier ───────────────────────────────────────────────────────

    /// Record that `source` now holds a reference to `target`.
    ///
    /// Stores of inline integers need no barrier. The remembered set is
    /// reset by every collection.
    pub fn write_barrier(&mut self, source: Value, target: Value) {
        if !target.is_ref() {
            return;
        }
        let Ok(index) = self.check(source) else {
            return;
        };
        let header = self.objects[index].header_mut();
        if !header.has_flag(HeaderFlags::REMEMBERED) {
            header.add_flag(HeaderFlags::REMEMBERED);
            self.remembered.push(source);
        }
    }

    // ── Collection ────────────────────────────────────────────────────

    /// Copy every object reachable from `roots` into a fresh arena and
    /// rewrite all references.
    pub fn full_gc(&mut self, roots: &mut dyn RootProvider) {
        let start = Instant::now();
        let old_epoch = self.epoch;
        // Wraps after 65536 cycles; a reference that old is never retained.
        let new_epoch = self.epoch.wrapping_add(1);
        let old_len = self.objects.len();
        let old_bytes = self.live_bytes;

        let mut space = Evacuation {
            from: std::mem::take(&mut self.objects).into_iter().map(Some).collect(),
            forward: vec![NOT_FORWARDED; old_len],
            to: Vec::new(),
            old_epoch,
            new_epoch,
            stale: 0,
        };

        roots.visit_roots(&mut |v| space.evacuate(v));

        let mut scan = 0;
        while scan < space.to.len() {
            if let Some(mut obj) = space.to[scan].take() {
                obj.walk_references(&mut |v| space.evacuate(v));
                space.to[scan] = Some(obj);
            }
            scan += 1;
        }

        let stale = space.stale;
        self.objects = space.to.into_iter().flatten().collect();
        let mut oldest = 0;
        for obj in self.objects.iter_mut() {
            let header = obj.header_mut();
            header.remove_flag(HeaderFlags::REMEMBERED);
            oldest = oldest.max(header.increment_age().saturating_add(1));
        }
        let remembered = self.remembered.len();
        self.remembered.clear();
        self.epoch = new_epoch;
        self.live_bytes = self.objects.iter().map(Managed::byte_size).sum();
        self.allocated_since_gc = 0;

        let elapsed = start.elapsed();
        let moved = self.objects.len();
        let reclaimed = old_len - moved;
        let bytes = old_bytes.saturating_sub(self.live_bytes);
        self.stats.collections += 1;
        self.stats.objects_moved += moved as u64;
        self.stats.objects_reclaimed += reclaimed as u64;
        self.stats.bytes_reclaimed += bytes as u64;
        self.stats.stale_references += stale;
        self.stats.remembered += remembered as u64;
        self.stats.oldest_survivor = oldest;
        self.stats.total_time += elapsed;

        if stale > 0 {
            log::error!("gc: {stale} stale references survived into epoch {new_epoch}");
        }
        log::info!(
            "gc #{}: {moved} survivors, {reclaimed} objects / {bytes} bytes reclaimed in {elapsed:?}",
            self.stats.collections
        );
    }
}

/// Cheney-style copying state for one cycle.
struct Evacuation<T> {
    from: Vec<Option<T>>,
    forward: Vec<u32>,
    to: Vec<Option<T>>,
    old_epoch: u16,
    new_epoch: u16,
    stale: u64,
}

impl<T> Evacuation<T> {
    fn evacuate(&mut self, value: &mut Value) {
        if !value.is_ref() {
            return;
        }
        if value.epoch() != self.old_epoch || value.index() >= self.from.len() {
            // Already rewritten in this cycle (a root visited twice) or
            // genuinely stale.
            if value.epoch() != self.new_epoch {
                self.stale += 1;
            }
            return;
        }
        let index = value.index();
        let mut target = self.forward[index];
        if target == NOT_FORWARDED {
            let Some(obj) = self.from[index].take() else {
                return;
            };
            target = self.to.len() as u32;
            self.to.push(Some(obj));
            self.forward[index] = target;
        }
        *value = Value::from_index(target, self.new_epoch);
    }
}
