// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Storage for decoded 4:2:0 frames.
//!
//! A [`FrameBuffer`] holds the three sample planes of a picture together with the
//! [`MacroblockRecord`] arena the macroblock decoder fills in. Buffers are handed out by a
//! [`frame_pool::FramePool`] and go back to it when the last user drops them.

use std::fmt::Debug;

use crate::codec::h264::picture::MacroblockRecord;
use crate::Resolution;
use crate::MB_SIZE;

pub mod frame_pool;

pub const Y_PLANE: usize = 0;
pub const U_PLANE: usize = 1;
pub const V_PLANE: usize = 2;

/// A single plane of 8-bit samples.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Plane {
    pub data: Vec<u8>,
    pub stride: usize,
    pub width: usize,
    pub height: usize,
}

impl Plane {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            data: vec![0; width * height],
            stride: width,
            width,
            height,
        }
    }

    pub fn get(&self, x: usize, y: usize) -> u8 {
        self.data[y * self.stride + x]
    }

    pub fn set(&mut self, x: usize, y: usize, value: u8) {
        self.data[y * self.stride + x] = value;
    }

    pub fn row(&self, y: usize) -> &[u8] {
        &self.data[y * self.stride..y * self.stride + self.width]
    }

    pub fn fill(&mut self, value: u8) {
        self.data.fill(value);
    }
}

impl Debug for Plane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Plane")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("stride", &self.stride)
            .finish()
    }
}

/// Mutable view over a band of rows of a [`Plane`].
///
/// Row indices are relative to the first row of the band.
pub struct PlaneRows<'a> {
    pub data: &'a mut [u8],
    pub stride: usize,
    pub width: usize,
}

impl<'a> PlaneRows<'a> {
    pub fn num_rows(&self) -> usize {
        if self.stride == 0 {
            0
        } else {
            self.data.len() / self.stride
        }
    }

    pub fn row_mut(&mut self, y: usize) -> &mut [u8] {
        &mut self.data[y * self.stride..y * self.stride + self.width]
    }

    pub fn set(&mut self, x: usize, y: usize, value: u8) {
        self.data[y * self.stride + x] = value;
    }
}

/// Samples and macroblock records of one coded frame.
#[derive(Clone)]
pub struct FrameBuffer {
    pub planes: [Plane; 3],
    pub mbs: Vec<MacroblockRecord>,
    resolution: Resolution,
}

impl FrameBuffer {
    /// Allocates a frame covering `resolution`, rounded up to whole macroblocks.
    pub fn new(resolution: Resolution) -> Self {
        let coded = resolution.coded();
        let width = coded.width as usize;
        let height = coded.height as usize;
        let num_mbs = (resolution.width_in_mbs() * resolution.height_in_mbs()) as usize;

        Self {
            planes: [
                Plane::new(width, height),
                Plane::new(width / 2, height / 2),
                Plane::new(width / 2, height / 2),
            ],
            mbs: vec![MacroblockRecord::default(); num_mbs],
            resolution,
        }
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn width_in_mbs(&self) -> usize {
        self.resolution.width_in_mbs() as usize
    }

    pub fn height_in_mbs(&self) -> usize {
        self.resolution.height_in_mbs() as usize
    }

    /// Returns the record of the macroblock at column `mb_x`, row `mb_y`.
    pub fn mb(&self, mb_x: usize, mb_y: usize) -> &MacroblockRecord {
        &self.mbs[mb_y * self.width_in_mbs() + mb_x]
    }

    pub fn mb_mut(&mut self, mb_x: usize, mb_y: usize) -> &mut MacroblockRecord {
        let width_in_mbs = self.width_in_mbs();
        &mut self.mbs[mb_y * width_in_mbs + mb_x]
    }

    /// Clears the macroblock records so the buffer can be decoded into again. Samples are left
    /// as they are since every macroblock overwrites its own.
    pub fn reset(&mut self) {
        for mb in self.mbs.iter_mut() {
            *mb = MacroblockRecord::default();
        }
    }

    /// Returns a CRC32 over the visible samples of all three planes.
    pub fn crc32(&self) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        let heights = [
            self.resolution.height as usize,
            self.resolution.height.div_ceil(2) as usize,
            self.resolution.height.div_ceil(2) as usize,
        ];
        let widths = [
            self.resolution.width as usize,
            self.resolution.width.div_ceil(2) as usize,
            self.resolution.width.div_ceil(2) as usize,
        ];

        for ((plane, width), height) in self.planes.iter().zip(widths).zip(heights) {
            for y in 0..height {
                hasher.update(&plane.row(y)[..width]);
            }
        }

        hasher.finalize()
    }

    /// Splits the samples and macroblock records into disjoint bands of macroblock rows.
    ///
    /// `mb_row_bounds` lists the first macroblock row of every band after the first one, in
    /// increasing order. The caller is responsible for checking this ordering.
    pub(crate) fn split_mb_rows(&mut self, mb_row_bounds: &[usize]) -> Vec<FrameRows<'_>> {
        let width_in_mbs = self.width_in_mbs();
        let height_in_mbs = self.height_in_mbs();
        let [luma, cb, cr] = &mut self.planes;

        let mut bands = Vec::with_capacity(mb_row_bounds.len() + 1);
        let mut mbs = self.mbs.as_mut_slice();
        let mut luma_data = luma.data.as_mut_slice();
        let mut cb_data = cb.data.as_mut_slice();
        let mut cr_data = cr.data.as_mut_slice();
        let mut first_mb_row = 0;

        for end in mb_row_bounds
            .iter()
            .copied()
            .chain(std::iter::once(height_in_mbs))
        {
            let num_mb_rows = end - first_mb_row;
            let luma_rows = num_mb_rows * MB_SIZE as usize;
            let chroma_rows = luma_rows / 2;

            let (band_mbs, rest) =
                std::mem::take(&mut mbs).split_at_mut(num_mb_rows * width_in_mbs);
            mbs = rest;
            let (band_luma, rest) =
                std::mem::take(&mut luma_data).split_at_mut(luma_rows * luma.stride);
            luma_data = rest;
            let (band_cb, rest) =
                std::mem::take(&mut cb_data).split_at_mut(chroma_rows * cb.stride);
            cb_data = rest;
            let (band_cr, rest) =
                std::mem::take(&mut cr_data).split_at_mut(chroma_rows * cr.stride);
            cr_data = rest;

            bands.push(FrameRows {
                first_mb_row,
                width_in_mbs,
                mbs: band_mbs,
                planes: [
                    PlaneRows {
                        data: band_luma,
                        stride: luma.stride,
                        width: luma.width,
                    },
                    PlaneRows {
                        data: band_cb,
                        stride: cb.stride,
                        width: cb.width,
                    },
                    PlaneRows {
                        data: band_cr,
                        stride: cr.stride,
                        width: cr.width,
                    },
                ],
            });

            first_mb_row = end;
        }

        bands
    }
}

impl Debug for FrameBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameBuffer")
            .field("resolution", &self.resolution)
            .field("num_mbs", &self.mbs.len())
            .finish()
    }
}

/// A band of whole macroblock rows of a frame, exclusively borrowed by one slice decoding task.
pub struct FrameRows<'a> {
    /// Index of the first macroblock row of the band within the frame.
    pub first_mb_row: usize,
    pub width_in_mbs: usize,
    /// Macroblock records of the band, in raster order.
    pub mbs: &'a mut [MacroblockRecord],
    pub planes: [PlaneRows<'a>; 3],
}

impl<'a> FrameRows<'a> {
    pub fn num_mb_rows(&self) -> usize {
        if self.width_in_mbs == 0 {
            0
        } else {
            self.mbs.len() / self.width_in_mbs
        }
    }
}

#[cfg(test)]
mod tests {
    use super::FrameBuffer;
    use crate::codec::h264::picture::MbType;
    use crate::Resolution;

    fn frame_64x48() -> FrameBuffer {
        FrameBuffer::new(Resolution {
            width: 64,
            height: 48,
        })
    }

    #[test]
    fn allocates_macroblock_aligned_planes() {
        let frame = FrameBuffer::new(Resolution {
            width: 40,
            height: 20,
        });

        assert_eq!(frame.planes[0].width, 48);
        assert_eq!(frame.planes[0].height, 32);
        assert_eq!(frame.planes[1].width, 24);
        assert_eq!(frame.planes[2].height, 16);
        assert_eq!(frame.mbs.len(), 3 * 2);
    }

    #[test]
    fn split_rows_are_disjoint_and_cover_the_frame() {
        let mut frame = frame_64x48();
        let bands = frame.split_mb_rows(&[1, 2]);

        assert_eq!(bands.len(), 3);
        for (i, band) in bands.iter().enumerate() {
            assert_eq!(band.first_mb_row, i);
            assert_eq!(band.num_mb_rows(), 1);
            assert_eq!(band.mbs.len(), 4);
            assert_eq!(band.planes[0].num_rows(), 16);
            assert_eq!(band.planes[1].num_rows(), 8);
        }
    }

    #[test]
    fn writes_through_bands_land_in_the_frame() {
        let mut frame = frame_64x48();
        {
            let mut bands = frame.split_mb_rows(&[2]);
            bands[1].planes[0].set(3, 0, 200);
            bands[1].mbs[1].mb_type = MbType::Intra;
        }

        assert_eq!(frame.planes[0].get(3, 32), 200);
        assert_eq!(frame.mb(1, 2).mb_type, MbType::Intra);
    }

    #[test]
    fn reset_clears_records_only() {
        let mut frame = frame_64x48();
        frame.planes[0].fill(7);
        frame.mb_mut(0, 0).mb_type = MbType::Intra;
        frame.reset();

        assert_eq!(frame.mb(0, 0).mb_type, MbType::default());
        assert_eq!(frame.planes[0].get(0, 0), 7);
    }

    #[test]
    fn crc_tracks_visible_samples() {
        let mut frame = frame_64x48();
        let crc = frame.crc32();
        assert_eq!(crc, frame.clone().crc32());

        frame.planes[1].set(0, 0, 1);
        assert_ne!(crc, frame.crc32());
    }
}
