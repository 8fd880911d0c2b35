// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

pub mod h264;

use std::collections::VecDeque;

use thiserror::Error;

use crate::codec::h264::dpb::MarkingError;
use crate::codec::h264::poc::PocError;
use crate::codec::h264::syntax::HeaderError;
use crate::decoder::h264::SliceLayoutError;

pub type Result<T> = std::result::Result<T, DecodeError>;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error(transparent)]
    Header(#[from] HeaderError),
    #[error(transparent)]
    Poc(#[from] PocError),
    #[error(transparent)]
    Marking(#[from] MarkingError),
    #[error(transparent)]
    SliceLayout(#[from] SliceLayoutError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// A queue where decoded frames wait until they are retrieved by the client.
pub(crate) struct ReadyFramesQueue<T> {
    /// Queue of all the frames waiting to be sent to the client.
    queue: VecDeque<T>,
}

impl<T> Default for ReadyFramesQueue<T> {
    fn default() -> Self {
        Self {
            queue: Default::default(),
        }
    }
}

impl<T> ReadyFramesQueue<T> {
    /// Push `frame` to the back of the queue.
    pub(crate) fn push(&mut self, frame: T) {
        self.queue.push_back(frame)
    }

    pub(crate) fn clear(&mut self) {
        self.queue.clear()
    }
}

/// Allows us to manipulate the frames list like an iterator without consuming it.
impl<'a, T> Iterator for &'a mut ReadyFramesQueue<T> {
    type Item = T;

    /// Returns the next frame (if any) waiting to be dequeued.
    fn next(&mut self) -> Option<T> {
        self.queue.pop_front()
    }
}
