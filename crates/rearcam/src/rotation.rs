// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use crate::{
    buffer::{PlaneKind, VideoBuffer},
    config::RearcamConfig,
    pipeline::{lock, read, write, Pipeline},
    queue::FrameQueue,
    Error,
};
use std::sync::{Arc, Mutex, RwLock};

/// Rotates a `width` x `height` plane by 90 degrees.
///
/// The input pixel at column `x`, row `y` lands at column `x_offset + y`,
/// row `width - 1 - x` of the output, turning a landscape plane into a
/// portrait one. `x_offset` shifts the output right to centre it in a wider
/// destination.
///
/// # Errors
///
/// Returns [`Error::Geometry`] if either slice is too short for the given
/// dimensions and strides.
///
/// # Example
///
/// ```
/// use rearcam::rotate_plane;
///
/// // 3x2 input, stride 3
/// let src = [1, 2, 3,
///            4, 5, 6];
/// let mut dst = [0u8; 6];
/// rotate_plane(&src, 3, 3, 2, &mut dst, 2, 0)?;
/// assert_eq!(dst, [3, 6,
///                  2, 5,
///                  1, 4]);
/// # Ok::<(), rearcam::Error>(())
/// ```
pub fn rotate_plane(
    src: &[u8],
    src_stride: usize,
    width: usize,
    height: usize,
    dst: &mut [u8],
    dst_stride: usize,
    x_offset: usize,
) -> Result<(), Error> {
    if width == 0 || height == 0 {
        return Ok(());
    }
    if src_stride < width || src.len() < (height - 1) * src_stride + width {
        return Err(Error::Geometry(format!(
            "source of {} bytes with stride {} cannot hold {}x{}",
            src.len(),
            src_stride,
            width,
            height
        )));
    }
    if dst_stride < x_offset + height || dst.len() < (width - 1) * dst_stride + x_offset + height
    {
        return Err(Error::Geometry(format!(
            "destination of {} bytes with stride {} cannot hold {}x{} at offset {}",
            dst.len(),
            dst_stride,
            height,
            width,
            x_offset
        )));
    }

    for (y, row) in src.chunks(src_stride).take(height).enumerate() {
        for (x, &px) in row[..width].iter().enumerate() {
            dst[(width - 1 - x) * dst_stride + x_offset + y] = px;
        }
    }
    Ok(())
}

/// Sizes and letterbox offsets of the rotated frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RotationGeometry {
    width: u32,
    height: u32,
    rotated_width: u32,
    luma_offset: u32,
    chroma_offset: u32,
}

impl RotationGeometry {
    pub(crate) fn new(config: &RearcamConfig) -> Result<Self, Error> {
        let (width, height) = (config.capture.width, config.capture.height);
        let rotated_width = config.rotated_width();
        let rotated_chroma = config.rotated_chroma_width();

        let luma_offset = (rotated_width / 2).checked_sub(height / 2);
        let chroma_offset = (rotated_chroma / 2).checked_sub(height / 4);
        match (luma_offset, chroma_offset) {
            (Some(luma_offset), Some(chroma_offset)) => Ok(RotationGeometry {
                width,
                height,
                rotated_width,
                luma_offset,
                chroma_offset,
            }),
            _ => Err(Error::Geometry(format!(
                "{}x{} capture does not fit a {} wide rotated frame",
                width, height, rotated_width
            ))),
        }
    }

    /// Width and height of a rotated frame buffer.
    pub(crate) fn frame_size(&self) -> (u32, u32) {
        (self.rotated_width, self.width)
    }

    /// Source width, height and destination offset of one plane.
    fn plane(&self, kind: PlaneKind) -> (usize, usize, usize) {
        match kind {
            PlaneKind::Luma => (
                self.width as usize,
                self.height as usize,
                self.luma_offset as usize,
            ),
            PlaneKind::Cb | PlaneKind::Cr => (
                self.width as usize / 2,
                self.height as usize / 2,
                self.chroma_offset as usize,
            ),
        }
    }
}

/// Source and destination of the rotation in progress.
struct RotationPair {
    src: Arc<VideoBuffer>,
    dst: Arc<VideoBuffer>,
}

pub(crate) struct RotationStage {
    geometry: RotationGeometry,
    /// Held for a whole rotation cycle
    cycle: Mutex<()>,
    /// Published by the luma worker for the chroma workers
    pair: RwLock<Option<RotationPair>>,
}

impl RotationStage {
    pub(crate) fn new(config: &RearcamConfig) -> Result<Self, Error> {
        Ok(RotationStage {
            geometry: RotationGeometry::new(config)?,
            cycle: Mutex::new(()),
            pair: RwLock::new(None),
        })
    }

    pub(crate) fn geometry(&self) -> &RotationGeometry {
        &self.geometry
    }

    /// Blocks until a rotation cycle in progress has completed.
    pub(crate) fn sync(&self) {
        drop(lock(&self.cycle));
    }

    fn rotate(&self, src: &VideoBuffer, dst: &VideoBuffer, kind: PlaneKind) -> Result<(), Error> {
        let (width, height, offset) = self.geometry.plane(kind);
        let (Some(from), Some(mut to)) = (src.plane(kind), dst.plane_mut(kind)) else {
            return Err(Error::ShutDown);
        };
        rotate_plane(
            &from,
            src.layout().plane(kind).stride as usize,
            width,
            height,
            &mut to,
            dst.layout().plane(kind).stride as usize,
            offset,
        )
    }
}

impl Pipeline {
    /// Luma rotation job; drives a whole rotation cycle.
    ///
    /// Takes the newest captured frame, rotates it into an empty rotation
    /// buffer with the chroma planes handled in parallel, publishes the
    /// result to rotation-done and recycles every older captured frame.
    pub(crate) fn rotate_luma(&self) {
        let (Some(stage), Some(workers)) = (
            self.rotation.as_ref(),
            self.workers().and_then(|w| w.rotation.as_ref()),
        ) else {
            return;
        };
        let _cycle = lock(&stage.cycle);

        let done = &self.queues.capture_done;
        let q_size = done.size();
        if q_size < 1 {
            return;
        }
        let Some(src_id) = done.peek(q_size - 1) else {
            log::error!("capture done queue shrank during rotation");
            return;
        };
        let Some(dst) = self.queues.rotation_empty.dequeue() else {
            self.stats.rotation_underrun();
            log::warn!("rotation empty buffer underrun, skipping {}", src_id);
            return;
        };
        let (Some(src_buf), Some(dst_buf)) = (self.pool.get(src_id), self.pool.get(dst.id()))
        else {
            log::error!("rotation of {} into {} has no pool buffer", src_id, dst.id());
            self.queues.rotation_empty.enqueue(dst);
            return;
        };

        let cache = self.board.cache.as_ref();
        src_buf.sync_for_cpu(cache);
        *write(&stage.pair) = Some(RotationPair {
            src: Arc::clone(&src_buf),
            dst: Arc::clone(&dst_buf),
        });
        workers.cb.queue();
        workers.cr.queue();

        let luma = stage.rotate(&src_buf, &dst_buf, PlaneKind::Luma);

        workers.cb.flush();
        workers.cr.flush();
        *write(&stage.pair) = None;
        dst_buf.sync_for_device(cache);

        if let Err(err) = luma {
            log::error!("luma rotation of {} failed: {}", src_id, err);
        }
        log::trace!("rotated {} into {}", src_id, dst_buf.id());
        self.queues.rotation_done.enqueue(dst);
        let recycled = done.recycle_into(&self.queues.capture_empty, q_size - 1);
        self.stats.frame_rotated(recycled);
    }

    pub(crate) fn rotate_cb(&self) {
        self.rotate_chroma(PlaneKind::Cb);
    }

    pub(crate) fn rotate_cr(&self) {
        self.rotate_chroma(PlaneKind::Cr);
    }

    fn rotate_chroma(&self, kind: PlaneKind) {
        let Some(stage) = self.rotation.as_ref() else {
            return;
        };
        let pair = read(&stage.pair);
        let Some(pair) = pair.as_ref() else {
            log::warn!("{:?} rotation scheduled without a frame", kind);
            return;
        };
        if let Err(err) = stage.rotate(&pair.src, &pair.dst, kind) {
            log::error!("{:?} rotation of {} failed: {}", kind, pair.src.id(), err);
        }
    }
}
