// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::collections::VecDeque;
use std::ops::Deref;
use std::ops::DerefMut;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::Weak;

use crate::video_frame::FrameBuffer;
use crate::Resolution;

type FreeList = Mutex<VecDeque<FrameBuffer>>;

/// A [`FrameBuffer`] on loan from a [`FramePool`].
///
/// The buffer goes back to the pool's free list when this is dropped, provided the pool still
/// exists.
#[derive(Debug)]
pub struct Frame {
    inner: Option<FrameBuffer>,
    pool: Weak<FreeList>,
}

impl Frame {
    /// Wraps a buffer that does not belong to any pool.
    pub fn detached(buffer: FrameBuffer) -> Self {
        Self {
            inner: Some(buffer),
            pool: Weak::new(),
        }
    }
}

impl Deref for Frame {
    type Target = FrameBuffer;

    fn deref(&self) -> &FrameBuffer {
        // `inner` is only taken in `drop`.
        match self.inner.as_ref() {
            Some(inner) => inner,
            None => unreachable!(),
        }
    }
}

impl DerefMut for Frame {
    fn deref_mut(&mut self) -> &mut FrameBuffer {
        match self.inner.as_mut() {
            Some(inner) => inner,
            None => unreachable!(),
        }
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        if let (Some(pool), Some(inner)) = (self.pool.upgrade(), self.inner.take()) {
            pool.lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push_back(inner);
        }
    }
}

/// Recycle pool of frame storage for one stream resolution.
pub struct FramePool {
    resolution: Resolution,
    pool: Arc<FreeList>,
}

impl FramePool {
    pub fn new(resolution: Resolution, min_num_frames: usize) -> Self {
        let mut pool = Self {
            resolution,
            pool: Arc::new(Mutex::new(VecDeque::new())),
        };
        pool.resize(resolution, min_num_frames);
        pool
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    /// Replaces the free list with `min_num_frames` buffers of `resolution`.
    ///
    /// Frames currently on loan are not returned to the new free list.
    pub fn resize(&mut self, resolution: Resolution, min_num_frames: usize) {
        let mut pool: VecDeque<FrameBuffer> = VecDeque::new();
        for _i in 0..min_num_frames {
            pool.push_back(FrameBuffer::new(resolution));
        }
        self.resolution = resolution;
        self.pool = Arc::new(Mutex::new(pool));
    }

    /// Takes a buffer from the free list, allocating a new one if the list is empty. The
    /// macroblock records of a recycled buffer are reset.
    pub fn alloc(&mut self) -> Frame {
        let recycled = self
            .pool
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();

        let buffer = match recycled {
            Some(mut buffer) if buffer.resolution() == self.resolution => {
                buffer.reset();
                buffer
            }
            _ => {
                log::debug!("Allocating new frame buffer for {:?}", self.resolution);
                FrameBuffer::new(self.resolution)
            }
        };

        Frame {
            inner: Some(buffer),
            pool: Arc::downgrade(&self.pool),
        }
    }

    /// Returns the number of buffers currently in the free list.
    pub fn num_free(&self) -> usize {
        self.pool
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::FramePool;
    use crate::codec::h264::picture::MbType;
    use crate::Resolution;

    const RES: Resolution = Resolution {
        width: 32,
        height: 32,
    };

    #[test]
    fn dropped_frames_return_to_the_pool() {
        let mut pool = FramePool::new(RES, 2);
        assert_eq!(pool.num_free(), 2);

        let a = pool.alloc();
        let b = pool.alloc();
        let c = pool.alloc();
        assert_eq!(pool.num_free(), 0);

        drop(a);
        drop(b);
        assert_eq!(pool.num_free(), 2);
        drop(c);
        assert_eq!(pool.num_free(), 3);
    }

    #[test]
    fn recycled_frames_have_clean_records() {
        let mut pool = FramePool::new(RES, 1);
        let mut frame = pool.alloc();
        frame.mb_mut(1, 1).mb_type = MbType::Intra;
        drop(frame);

        let frame = pool.alloc();
        assert_eq!(frame.mb(1, 1).mb_type, MbType::default());
    }

    #[test]
    fn resize_discards_stale_buffers() {
        let mut pool = FramePool::new(RES, 1);
        let old = pool.alloc();

        let new_res = Resolution {
            width: 64,
            height: 48,
        };
        pool.resize(new_res, 1);
        drop(old);
        assert_eq!(pool.num_free(), 1);

        let frame = pool.alloc();
        assert_eq!(frame.resolution(), new_res);
    }
}
