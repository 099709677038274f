// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use crate::{
    hw::{CacheSync, DmaAllocator},
    pipeline::{lock, read, write},
    queue::FrameQueue,
    Error,
};
use serde::Serialize;
use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicU8, Ordering},
        Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard,
    },
    time::{SystemTime, UNIX_EPOCH},
};
use unix_ts::Timestamp;

/// Allocation granularity of the contiguous buffer region
pub const PAGE_SIZE: usize = 4096;

/// Horizontal stride alignment required by the capture and compositor blocks
pub const STRIDE_ALIGN: u32 = 64;

/// Vertical stride alignment
pub const VSTRIDE_ALIGN: u32 = 16;

/// Video-range black, used to pre-fill rotated luma planes
pub const LUMA_BLACK: u8 = 0x10;

/// Neutral (grey) chroma, used to pre-fill rotated chroma planes
pub const CHROMA_NEUTRAL: u8 = 0x80;

/// Rounds `value` up to the next multiple of `to`.
pub const fn align(value: u32, to: u32) -> u32 {
    (value + to - 1) / to * to
}

pub const fn align_usize(value: usize, to: usize) -> usize {
    (value + to - 1) / to * to
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolKind {
    Capture,
    Rotation,
}

impl fmt::Display for PoolKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PoolKind::Capture => write!(f, "capture"),
            PoolKind::Rotation => write!(f, "rotation"),
        }
    }
}

/// Identity of one pool buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId {
    pub kind: PoolKind,
    pub index: usize,
}

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}#{}", self.kind, self.index)
    }
}

/// Ownership token for a pool buffer.
///
/// Handles are created only by [`FramePool::seed`] and are not `Clone`, so
/// a buffer is held by exactly one queue or the capture hardware at a time.
#[derive(Debug, PartialEq, Eq)]
pub struct BufferHandle {
    id: BufferId,
}

impl BufferHandle {
    pub(crate) fn new(id: BufferId) -> Self {
        BufferHandle { id }
    }

    pub fn id(&self) -> BufferId {
        self.id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaneKind {
    Luma = 0,
    Cb = 1,
    Cr = 2,
}

impl PlaneKind {
    pub const ALL: [PlaneKind; 3] = [PlaneKind::Luma, PlaneKind::Cb, PlaneKind::Cr];
}

/// One colour plane: bus address, line stride and byte size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Plane {
    pub addr: u32,
    pub stride: u32,
    pub size: u32,
}

/// Plane layout of a three-plane YUV420 frame.
///
/// Plane addresses are offsets from the start of the buffer; use
/// [`FrameLayout::at`] to place the layout at a bus address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FrameLayout {
    pub width: u32,
    pub height: u32,
    pub planes: [Plane; 3],
    /// Page-aligned allocation size of the whole frame
    pub size: usize,
}

impl FrameLayout {
    /// Computes the YUV420 layout for `width` x `height`.
    ///
    /// Luma stride is `width` rounded up to 64 bytes, chroma stride is
    /// `width / 2` rounded up to 64 bytes and the plane heights use the
    /// height rounded up to 16 lines. Chroma planes directly follow luma.
    pub fn yuv420(width: u32, height: u32) -> Self {
        let vstride = align(height, VSTRIDE_ALIGN);
        let lu_stride = align(width, STRIDE_ALIGN);
        let c_stride = align(width / 2, STRIDE_ALIGN);
        let lu_size = lu_stride * vstride;
        let c_size = c_stride * (vstride / 2);

        FrameLayout {
            width,
            height,
            planes: [
                Plane {
                    addr: 0,
                    stride: lu_stride,
                    size: lu_size,
                },
                Plane {
                    addr: lu_size,
                    stride: c_stride,
                    size: c_size,
                },
                Plane {
                    addr: lu_size + c_size,
                    stride: c_stride,
                    size: c_size,
                },
            ],
            size: align_usize((lu_size + 2 * c_size) as usize, PAGE_SIZE),
        }
    }

    /// Plane descriptors with absolute addresses for a buffer at `base`.
    pub fn at(&self, base: u32) -> [Plane; 3] {
        self.planes.map(|p| Plane {
            addr: base + p.addr,
            ..p
        })
    }

    pub fn plane(&self, kind: PlaneKind) -> Plane {
        self.planes[kind as usize]
    }
}

/// Which side currently owns a buffer's cache lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmaOwner {
    Device,
    Cpu,
}

/// A pool frame: three plane memories plus bookkeeping.
pub struct VideoBuffer {
    id: BufferId,
    layout: FrameLayout,
    bus_addr: u32,
    planes: [RwLock<Vec<u8>>; 3],
    owner: AtomicU8,
    released: AtomicBool,
    late_accesses: Arc<AtomicU64>,
    captured_ns: AtomicI64,
}

impl VideoBuffer {
    pub fn id(&self) -> BufferId {
        self.id
    }

    pub fn layout(&self) -> &FrameLayout {
        &self.layout
    }

    pub fn bus_addr(&self) -> u32 {
        self.bus_addr
    }

    /// Plane descriptors with absolute bus addresses.
    pub fn planes(&self) -> [Plane; 3] {
        self.layout.at(self.bus_addr)
    }

    /// Read access to a plane, `None` once the pool has been released.
    pub fn plane(&self, kind: PlaneKind) -> Option<RwLockReadGuard<'_, Vec<u8>>> {
        if self.check_released() {
            return None;
        }
        Some(read(&self.planes[kind as usize]))
    }

    /// Write access to a plane, `None` once the pool has been released.
    pub fn plane_mut(&self, kind: PlaneKind) -> Option<RwLockWriteGuard<'_, Vec<u8>>> {
        if self.check_released() {
            return None;
        }
        Some(write(&self.planes[kind as usize]))
    }

    pub fn owner(&self) -> DmaOwner {
        match self.owner.load(Ordering::Acquire) {
            0 => DmaOwner::Device,
            _ => DmaOwner::Cpu,
        }
    }

    /// Makes device writes visible to the CPU before reading the planes.
    pub fn sync_for_cpu(&self, cache: &dyn CacheSync) {
        cache.sync_for_cpu(self.bus_addr, self.layout.size);
        self.owner.store(1, Ordering::Release);
    }

    /// Hands the buffer back to the device after CPU writes.
    pub fn sync_for_device(&self, cache: &dyn CacheSync) {
        cache.sync_for_device(self.bus_addr, self.layout.size);
        self.owner.store(0, Ordering::Release);
    }

    /// Records the completion time of the frame held in this buffer.
    pub(crate) fn stamp(&self) {
        let ns = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .ok()
            .and_then(|d| i64::try_from(d.as_nanos()).ok())
            .unwrap_or(0);
        self.captured_ns.store(ns, Ordering::Relaxed);
    }

    /// Completion time of the last frame captured into this buffer.
    pub fn timestamp(&self) -> Option<Timestamp> {
        match self.captured_ns.load(Ordering::Relaxed) {
            0 => None,
            ns => Some(Timestamp::new(
                ns / 1_000_000_000,
                (ns % 1_000_000_000) as u32,
            )),
        }
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    fn check_released(&self) -> bool {
        if self.is_released() {
            self.late_accesses.fetch_add(1, Ordering::Relaxed);
            log::error!("access to {} after the pool was released", self.id);
            return true;
        }
        false
    }

    fn release(&self) {
        self.released.store(true, Ordering::Release);
        for plane in &self.planes {
            *write(plane) = Vec::new();
        }
    }
}

impl fmt::Debug for VideoBuffer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("VideoBuffer")
            .field("id", &self.id)
            .field("bus_addr", &format_args!("{:#010x}", self.bus_addr))
            .field("layout", &self.layout)
            .field("released", &self.is_released())
            .finish()
    }
}

/// RGB overlay drawn once per activation by the vendor hook.
pub struct OverlayBuffer {
    bus_addr: u32,
    width: u32,
    height: u32,
    bytes_per_pixel: u32,
    size: usize,
    data: Mutex<Vec<u8>>,
}

impl OverlayBuffer {
    pub fn bus_addr(&self) -> u32 {
        self.bus_addr
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn bytes_per_pixel(&self) -> u32 {
        self.bytes_per_pixel
    }

    pub fn stride(&self) -> u32 {
        self.width * self.bytes_per_pixel
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Runs `f` with exclusive access to the pixel memory.
    pub fn with_pixels<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        let mut data = lock(&self.data);
        f(&mut data)
    }
}

impl fmt::Debug for OverlayBuffer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("OverlayBuffer")
            .field("bus_addr", &format_args!("{:#010x}", self.bus_addr))
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes_per_pixel", &self.bytes_per_pixel)
            .finish()
    }
}

/// Dimensions of the buffers a [`FramePool`] allocates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSpec {
    pub count: usize,
    pub capture: (u32, u32),
    /// Rotated frame size; `None` when rotation is disabled
    pub rotation: Option<(u32, u32)>,
    /// Overlay width, height and bytes per pixel
    pub overlay: Option<(u32, u32, u32)>,
}

#[derive(Default)]
struct PoolBuffers {
    capture: Vec<Arc<VideoBuffer>>,
    rotation: Vec<Arc<VideoBuffer>>,
    overlay: Option<Arc<OverlayBuffer>>,
}

/// Fixed set of frame buffers allocated once at start-up.
pub struct FramePool {
    capture_layout: FrameLayout,
    rotation_layout: Option<FrameLayout>,
    buffers: RwLock<PoolBuffers>,
    allocator: Arc<dyn DmaAllocator>,
    released: AtomicBool,
    late_accesses: Arc<AtomicU64>,
}

impl FramePool {
    /// Allocates every buffer described by `spec`.
    ///
    /// Capture buffers are zeroed; rotation buffers are pre-filled with black
    /// luma and neutral chroma. If any allocation fails the buffers already
    /// allocated are released before the error is returned.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an out of range buffer count and
    /// [`Error::OutOfMemory`] when the allocator or the heap is exhausted.
    pub fn allocate(spec: &PoolSpec, allocator: Arc<dyn DmaAllocator>) -> Result<Self, Error> {
        if !(crate::MIN_BUFFER_COUNT..=crate::MAX_BUFFER_COUNT).contains(&spec.count) {
            return Err(Error::Config(format!(
                "buffer count {} outside {}..={}",
                spec.count,
                crate::MIN_BUFFER_COUNT,
                crate::MAX_BUFFER_COUNT
            )));
        }

        let pool = FramePool {
            capture_layout: FrameLayout::yuv420(spec.capture.0, spec.capture.1),
            rotation_layout: spec.rotation.map(|(w, h)| FrameLayout::yuv420(w, h)),
            buffers: RwLock::new(PoolBuffers::default()),
            allocator,
            released: AtomicBool::new(false),
            late_accesses: Arc::new(AtomicU64::new(0)),
        };

        // on error `pool` is dropped, which releases the partial allocation
        pool.fill(spec)?;
        log::debug!(
            "allocated {} capture buffers of {} bytes{}",
            spec.count,
            pool.capture_layout.size,
            match pool.rotation_layout {
                Some(l) => format!(", {} rotation buffers of {} bytes", spec.count, l.size),
                None => String::new(),
            }
        );
        Ok(pool)
    }

    fn fill(&self, spec: &PoolSpec) -> Result<(), Error> {
        for index in 0..spec.count {
            let buf = self.alloc_frame(
                BufferId {
                    kind: PoolKind::Capture,
                    index,
                },
                self.capture_layout,
                [0, 0, 0],
            )?;
            write(&self.buffers).capture.push(Arc::new(buf));
        }

        if let Some(layout) = self.rotation_layout {
            for index in 0..spec.count {
                let buf = self.alloc_frame(
                    BufferId {
                        kind: PoolKind::Rotation,
                        index,
                    },
                    layout,
                    [LUMA_BLACK, CHROMA_NEUTRAL, CHROMA_NEUTRAL],
                )?;
                write(&self.buffers).rotation.push(Arc::new(buf));
            }
        }

        if let Some((width, height, bytes_per_pixel)) = spec.overlay {
            let bytes = width as usize * height as usize * bytes_per_pixel as usize;
            let size = align_usize(bytes, PAGE_SIZE);
            let bus_addr = self.allocator.alloc(size)?;
            let data = match zeroed(size, 0) {
                Ok(data) => data,
                Err(err) => {
                    self.allocator.free(bus_addr, size);
                    return Err(err);
                }
            };
            write(&self.buffers).overlay = Some(Arc::new(OverlayBuffer {
                bus_addr,
                width,
                height,
                bytes_per_pixel,
                size,
                data: Mutex::new(data),
            }));
        }

        Ok(())
    }

    fn alloc_frame(
        &self,
        id: BufferId,
        layout: FrameLayout,
        fill: [u8; 3],
    ) -> Result<VideoBuffer, Error> {
        let bus_addr = self.allocator.alloc(layout.size)?;
        let mut planes = [Vec::new(), Vec::new(), Vec::new()];
        for kind in PlaneKind::ALL {
            match zeroed(layout.plane(kind).size as usize, fill[kind as usize]) {
                Ok(mem) => planes[kind as usize] = mem,
                Err(err) => {
                    self.allocator.free(bus_addr, layout.size);
                    return Err(err);
                }
            }
        }

        Ok(VideoBuffer {
            id,
            layout,
            bus_addr,
            planes: planes.map(RwLock::new),
            owner: AtomicU8::new(0),
            released: AtomicBool::new(false),
            late_accesses: Arc::clone(&self.late_accesses),
            captured_ns: AtomicI64::new(0),
        })
    }

    pub fn capture_layout(&self) -> &FrameLayout {
        &self.capture_layout
    }

    pub fn rotation_layout(&self) -> Option<&FrameLayout> {
        self.rotation_layout.as_ref()
    }

    /// Number of buffers of `kind`, zero once released.
    pub fn count(&self, kind: PoolKind) -> usize {
        let buffers = read(&self.buffers);
        match kind {
            PoolKind::Capture => buffers.capture.len(),
            PoolKind::Rotation => buffers.rotation.len(),
        }
    }

    /// Looks up a buffer, `None` for unknown ids and after release.
    pub fn get(&self, id: BufferId) -> Option<Arc<VideoBuffer>> {
        let buffers = read(&self.buffers);
        let list = match id.kind {
            PoolKind::Capture => &buffers.capture,
            PoolKind::Rotation => &buffers.rotation,
        };
        list.get(id.index).cloned()
    }

    /// All buffers of `kind`.
    pub fn buffers(&self, kind: PoolKind) -> Vec<Arc<VideoBuffer>> {
        let buffers = read(&self.buffers);
        match kind {
            PoolKind::Capture => buffers.capture.clone(),
            PoolKind::Rotation => buffers.rotation.clone(),
        }
    }

    pub fn overlay(&self) -> Option<Arc<OverlayBuffer>> {
        read(&self.buffers).overlay.clone()
    }

    /// Re-initializes `queue` and places one handle for every buffer of
    /// `kind` on it, returning the number seeded.
    ///
    /// Callers must have dropped every outstanding handle of `kind` first.
    pub fn seed(&self, kind: PoolKind, queue: &dyn FrameQueue) -> usize {
        queue.init();
        let count = self.count(kind);
        for index in 0..count {
            queue.enqueue(BufferHandle::new(BufferId { kind, index }));
        }
        count
    }

    /// Releases every buffer. Safe to call more than once and after a
    /// partial allocation.
    pub fn release(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }

        let buffers = std::mem::take(&mut *write(&self.buffers));
        for buf in buffers.capture.iter().chain(buffers.rotation.iter()) {
            buf.release();
            self.allocator.free(buf.bus_addr, buf.layout.size);
        }
        if let Some(overlay) = buffers.overlay {
            *lock(&overlay.data) = Vec::new();
            self.allocator.free(overlay.bus_addr, overlay.size);
        }
        log::debug!("frame pool released");
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Number of plane accesses attempted after [`FramePool::release`].
    pub fn late_accesses(&self) -> u64 {
        self.late_accesses.load(Ordering::Relaxed)
    }
}

impl Drop for FramePool {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for FramePool {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("FramePool")
            .field("capture_layout", &self.capture_layout)
            .field("rotation_layout", &self.rotation_layout)
            .field("capture", &self.count(PoolKind::Capture))
            .field("rotation", &self.count(PoolKind::Rotation))
            .field("released", &self.is_released())
            .finish()
    }
}

fn zeroed(len: usize, fill: u8) -> Result<Vec<u8>, Error> {
    let mut mem = Vec::new();
    mem.try_reserve_exact(len).map_err(|_| Error::OutOfMemory {
        requested: len,
        available: 0,
    })?;
    mem.resize(len, fill);
    Ok(mem)
}

/// Bump allocator over a fixed contiguous carve-out.
///
/// Bus addresses are handed out page-aligned from `base`. The region is
/// rewound once every allocation has been freed.
pub struct LinearAllocator {
    base: u32,
    capacity: usize,
    state: Mutex<LinearState>,
}

#[derive(Default)]
struct LinearState {
    next: usize,
    in_use: usize,
}

impl LinearAllocator {
    pub fn new(base: u32, capacity: usize) -> Self {
        LinearAllocator {
            base,
            capacity,
            state: Mutex::new(LinearState::default()),
        }
    }

    /// Bytes currently allocated.
    pub fn in_use(&self) -> usize {
        lock(&self.state).in_use
    }
}

impl DmaAllocator for LinearAllocator {
    fn alloc(&self, size: usize) -> Result<u32, Error> {
        let size = align_usize(size, PAGE_SIZE);
        let mut state = lock(&self.state);
        let available = self.capacity.saturating_sub(state.next);
        if size > available {
            return Err(Error::OutOfMemory {
                requested: size,
                available,
            });
        }
        let addr = self.base as usize + state.next;
        let addr = u32::try_from(addr).map_err(|_| Error::OutOfMemory {
            requested: size,
            available: 0,
        })?;
        state.next += size;
        state.in_use += size;
        Ok(addr)
    }

    fn free(&self, _addr: u32, size: usize) {
        let mut state = lock(&self.state);
        state.in_use = state.in_use.saturating_sub(align_usize(size, PAGE_SIZE));
        if state.in_use == 0 {
            state.next = 0;
        }
    }
}
