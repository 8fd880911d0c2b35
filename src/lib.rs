// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Cross-frame core of an H.264 decoder.
//!
//! This crate covers the parts of H.264 decoding that carry state from one picture to the next:
//! picture order count derivation, reference picture marking (including gaps in `frame_num`) and
//! the in-loop deblocking filter. Bitstream parsing and macroblock reconstruction are performed
//! by the caller, which hands slice headers and per-macroblock records to the
//! [`decoder::h264::H264Decoder`].

pub mod codec;
pub mod decoder;
pub mod video_frame;

/// Size of a luma macroblock, in samples.
pub const MB_SIZE: u32 = 16;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    /// Returns the number of macroblock columns needed to cover this resolution.
    pub fn width_in_mbs(&self) -> u32 {
        self.width.div_ceil(MB_SIZE)
    }

    /// Returns the number of macroblock rows needed to cover this resolution.
    pub fn height_in_mbs(&self) -> u32 {
        self.height.div_ceil(MB_SIZE)
    }

    /// Returns the resolution rounded up to whole macroblocks, i.e. the coded size of the frame.
    pub fn coded(&self) -> Resolution {
        Resolution {
            width: self.width_in_mbs() * MB_SIZE,
            height: self.height_in_mbs() * MB_SIZE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Resolution;

    #[test]
    fn coded_size_is_macroblock_aligned() {
        let res = Resolution {
            width: 1920,
            height: 1080,
        };

        assert_eq!(res.width_in_mbs(), 120);
        assert_eq!(res.height_in_mbs(), 68);
        assert_eq!(
            res.coded(),
            Resolution {
                width: 1920,
                height: 1088
            }
        );
    }
}
