// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Sequencing of the cross-frame decoding stages for each access unit.
//!
//! For every picture the decoder handles gaps in `frame_num`, derives the picture order count,
//! lets the caller reconstruct the slices of the picture into a pooled frame, deblocks the result,
//! runs the reference picture marking and finally queues the picture for output.

use std::sync::Arc;

use anyhow::Context;
use log::debug;
#[cfg(feature = "parallel")]
use rayon::prelude::*;
use thiserror::Error;

use crate::codec::h264::deblock::deblock_frame;
use crate::codec::h264::dpb::Dpb;
use crate::codec::h264::frame_num::detect_gap;
use crate::codec::h264::frame_num::missing_frame_nums;
use crate::codec::h264::picture::Picture;
use crate::codec::h264::poc::compute_pic_order_count;
use crate::codec::h264::poc::PocState;
use crate::codec::h264::syntax::NalInfo;
use crate::codec::h264::syntax::SliceHeader;
use crate::decoder::ReadyFramesQueue;
use crate::decoder::Result;
use crate::video_frame::frame_pool::Frame;
use crate::video_frame::frame_pool::FramePool;
use crate::video_frame::FrameRows;
use crate::Resolution;

/// The maximum number of pictures in the DPB, as per A.3.1, clause h)
const DPB_MAX_SIZE: usize = 16;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SliceLayoutError {
    #[error("no slice in picture")]
    NoSlices,
    #[error("first slice starts at macroblock {0} instead of 0")]
    FirstSliceNotAtStart(u32),
    #[error("slice {slice_id} starts at macroblock {first_mb_in_slice}, not on a row boundary")]
    NotRowAligned { slice_id: usize, first_mb_in_slice: u32 },
    #[error("slice {slice_id} does not start after the previous one")]
    NotIncreasing { slice_id: usize },
    #[error("slice {slice_id} starts at macroblock {first_mb_in_slice}, past the end of the frame")]
    OutOfBounds { slice_id: usize, first_mb_in_slice: u32 },
}

#[derive(Clone, Debug)]
pub struct DecoderConfig {
    /// Display resolution of the stream. Frames are allocated rounded up to whole macroblocks.
    pub resolution: Resolution,
    /// Number of frames to preallocate in the frame pool. More are allocated if needed.
    pub num_frames: usize,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            resolution: Resolution {
                width: 1920,
                height: 1080,
            },
            num_frames: DPB_MAX_SIZE + 1,
        }
    }
}

/// The picture currently being decoded.
pub struct CurrentPicture {
    /// Data for the current picture as extracted from the stream. The samples are attached when
    /// the picture is finished.
    pic: Picture,
    /// Storage the slices are decoded into.
    frame: Frame,
    /// Header of the first slice.
    header: SliceHeader,
    nal: NalInfo,
    /// POC state to commit once the picture is finished.
    next_poc_state: PocState,
}

impl CurrentPicture {
    pub fn pic(&self) -> &Picture {
        &self.pic
    }

    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    pub fn frame_mut(&mut self) -> &mut Frame {
        &mut self.frame
    }
}

/// The rows of the current frame assigned to one slice.
pub struct SliceRows<'a> {
    /// Index of the slice within the picture.
    pub slice_id: u16,
    pub rows: FrameRows<'a>,
}

/// Returns the first macroblock row of every slice after the first one.
fn slice_row_bounds(
    slices: &[SliceHeader],
    width_in_mbs: usize,
    height_in_mbs: usize,
) -> std::result::Result<Vec<usize>, SliceLayoutError> {
    let first = slices.first().ok_or(SliceLayoutError::NoSlices)?;
    if first.first_mb_in_slice != 0 {
        return Err(SliceLayoutError::FirstSliceNotAtStart(
            first.first_mb_in_slice,
        ));
    }

    let mut bounds = Vec::with_capacity(slices.len() - 1);
    let mut prev_row = 0;

    for (slice_id, hdr) in slices.iter().enumerate().skip(1) {
        let first_mb = hdr.first_mb_in_slice as usize;

        if first_mb % width_in_mbs != 0 {
            return Err(SliceLayoutError::NotRowAligned {
                slice_id,
                first_mb_in_slice: hdr.first_mb_in_slice,
            });
        }

        let row = first_mb / width_in_mbs;
        if row >= height_in_mbs {
            return Err(SliceLayoutError::OutOfBounds {
                slice_id,
                first_mb_in_slice: hdr.first_mb_in_slice,
            });
        }
        if row <= prev_row {
            return Err(SliceLayoutError::NotIncreasing { slice_id });
        }

        bounds.push(row);
        prev_row = row;
    }

    Ok(bounds)
}

/// Runs `decode` on the rows of one slice, then stamps the slice-level deblocking parameters
/// into its macroblock records.
fn decode_slice<F>(hdr: &SliceHeader, mut slice: SliceRows, decode: &F) -> anyhow::Result<()>
where
    F: Fn(&SliceHeader, &mut SliceRows) -> anyhow::Result<()>,
{
    decode(hdr, &mut slice).with_context(|| format!("while decoding slice {}", slice.slice_id))?;

    for mb in slice.rows.mbs.iter_mut() {
        mb.slice_id = slice.slice_id;
        mb.alpha_c0_offset = hdr.filter_offset_a();
        mb.beta_offset = hdr.filter_offset_b();
        mb.disable_deblocking_filter_idc = hdr.disable_deblocking_filter_idc;
    }

    Ok(())
}

/// Decoder for the cross-frame stages of H.264.
///
/// Slice data is reconstructed by the caller through the closure given to
/// [`H264Decoder::decode_slices`]. Pictures are output in decoding order, tagged with their
/// picture order count.
pub struct H264Decoder {
    /// The reference pictures.
    dpb: Dpb,
    /// Picture order count and frame number continuation from the previous pictures.
    poc_state: PocState,
    /// Storage for the frames being decoded and referenced.
    frame_pool: FramePool,
    /// Frames ready to be retrieved by the client.
    ready_queue: ReadyFramesQueue<Picture>,
}

impl H264Decoder {
    pub fn new(config: DecoderConfig) -> Self {
        Self {
            dpb: Default::default(),
            poc_state: Default::default(),
            frame_pool: FramePool::new(config.resolution, config.num_frames),
            ready_queue: Default::default(),
        }
    }

    /// Read-only view of the reference pictures.
    pub fn dpb(&self) -> &Dpb {
        &self.dpb
    }

    pub fn poc_state(&self) -> &PocState {
        &self.poc_state
    }

    /// Returns the number of frames available for decoding without allocating.
    pub fn num_free_frames(&self) -> usize {
        self.frame_pool.num_free()
    }

    /// Inserts non-existing frames for the frame numbers skipped before `frame_num`, as per
    /// 8.2.5.2.
    fn handle_frame_num_gap(&mut self, frame_num: u32, max_frame_num: u32) {
        if self.dpb.is_empty() {
            debug!("frame_num gap before any reference, ignoring");
            return;
        }

        debug!(
            "frame_num gap detected: {} after {}",
            frame_num, self.poc_state.prev_ref_frame_num
        );

        for unused_short_term_frame_num in
            missing_frame_nums(frame_num, self.poc_state.prev_ref_frame_num, max_frame_num)
        {
            let frame_num_offset = self
                .poc_state
                .advance_frame_num(unused_short_term_frame_num, max_frame_num);

            self.dpb.insert_non_existing(Picture::new_non_existing(
                unused_short_term_frame_num,
                frame_num_offset,
            ));
        }
    }

    /// Starts decoding the picture whose first slice has header `hdr`.
    pub fn begin_picture(&mut self, hdr: &SliceHeader, nal: NalInfo) -> Result<CurrentPicture> {
        hdr.validate()?;

        let max_frame_num = hdr.max_frame_num();
        let frame_num = u32::from(hdr.frame_num);

        self.dpb.set_limits(hdr.max_num_ref_frames, max_frame_num);

        if !nal.is_idr && detect_gap(frame_num, self.poc_state.prev_ref_frame_num, max_frame_num) {
            self.handle_frame_num_gap(frame_num, max_frame_num);
        }

        let (poc, next_poc_state) = compute_pic_order_count(hdr, &nal, &self.poc_state)?;

        debug!(
            "Decode picture POC {} frame_num {} (nal_ref_idc {}, IDR {})",
            poc.pic_order_cnt, frame_num, nal.nal_ref_idc, nal.is_idr
        );

        let pic = Picture {
            frame_num,
            frame_num_offset: poc.frame_num_offset,
            pic_order_cnt: poc.pic_order_cnt,
            top_field_order_cnt: poc.top_field_order_cnt,
            bottom_field_order_cnt: poc.bottom_field_order_cnt,
            nal_ref_idc: nal.nal_ref_idc,
            is_idr: nal.is_idr,
            ..Default::default()
        };

        Ok(CurrentPicture {
            pic,
            frame: self.frame_pool.alloc(),
            header: hdr.clone(),
            nal,
            next_poc_state,
        })
    }

    /// Decodes the slices of `cur` by calling `decode` once per slice.
    ///
    /// Slices must start on macroblock row boundaries, in increasing order, and each slice
    /// extends until the next one. Every call gets exclusive access to the rows of its slice, so
    /// the calls may run concurrently.
    pub fn decode_slices<F>(
        &self,
        cur: &mut CurrentPicture,
        slices: &[SliceHeader],
        decode: F,
    ) -> Result<()>
    where
        F: Fn(&SliceHeader, &mut SliceRows) -> anyhow::Result<()> + Sync + Send,
    {
        let width_in_mbs = cur.frame.width_in_mbs();
        let height_in_mbs = cur.frame.height_in_mbs();
        let bounds = slice_row_bounds(slices, width_in_mbs, height_in_mbs)?;

        let jobs: Vec<(&SliceHeader, SliceRows)> = slices
            .iter()
            .zip(cur.frame.split_mb_rows(&bounds))
            .enumerate()
            .map(|(slice_id, (hdr, rows))| {
                (
                    hdr,
                    SliceRows {
                        slice_id: slice_id as u16,
                        rows,
                    },
                )
            })
            .collect();

        #[cfg(feature = "parallel")]
        jobs.into_par_iter()
            .try_for_each(|(hdr, slice)| decode_slice(hdr, slice, &decode))?;

        #[cfg(not(feature = "parallel"))]
        jobs.into_iter()
            .try_for_each(|(hdr, slice)| decode_slice(hdr, slice, &decode))?;

        Ok(())
    }

    /// Deblocks the current picture, marks it and queues it for output.
    pub fn finish_picture(&mut self, cur: CurrentPicture) -> Result<()> {
        let CurrentPicture {
            mut pic,
            mut frame,
            header,
            nal,
            next_poc_state,
        } = cur;

        deblock_frame(&mut frame);

        debug!(
            "Finishing picture POC {} crc32 {:08x}",
            pic.pic_order_cnt,
            frame.crc32()
        );

        pic.set_frame(Arc::new(frame));

        if nal.is_idr || nal.is_ref() {
            self.dpb.mark(pic.clone(), &nal, &header)?;
        }

        self.poc_state = next_poc_state;
        self.ready_queue.push(pic);

        Ok(())
    }

    /// Decodes a whole picture: begins it with the header of its first slice, decodes every
    /// slice and finishes it.
    pub fn decode_picture<F>(
        &mut self,
        nal: NalInfo,
        slices: &[SliceHeader],
        decode: F,
    ) -> Result<()>
    where
        F: Fn(&SliceHeader, &mut SliceRows) -> anyhow::Result<()> + Sync + Send,
    {
        let first = slices.first().ok_or(SliceLayoutError::NoSlices)?;

        let mut cur = self.begin_picture(first, nal)?;
        self.decode_slices(&mut cur, slices, decode)?;
        self.finish_picture(cur)
    }

    /// Returns the next decoded picture, in decoding order.
    pub fn next_decoded_frame(&mut self) -> Option<Picture> {
        (&mut self.ready_queue).next()
    }

    /// Drops every reference and resets the picture order count state, as if an IDR picture with
    /// memory_management_control_operation 5 was decoded. Pictures not yet retrieved are dropped.
    pub fn reset(&mut self) {
        debug!("Resetting decoder");

        self.dpb.clear();
        self.poc_state = Default::default();
        self.ready_queue.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::slice_row_bounds;
    use super::DecoderConfig;
    use super::H264Decoder;
    use super::SliceLayoutError;
    use crate::codec::h264::picture::MbType;
    use crate::codec::h264::syntax::HeaderError;
    use crate::codec::h264::syntax::NalInfo;
    use crate::codec::h264::syntax::SliceHeader;
    use crate::decoder::DecodeError;
    use crate::Resolution;

    const IDR: NalInfo = NalInfo {
        nal_ref_idc: 3,
        is_idr: true,
    };

    fn slice(first_mb_in_slice: u32) -> SliceHeader {
        SliceHeader {
            first_mb_in_slice,
            ..Default::default()
        }
    }

    fn decoder() -> H264Decoder {
        let _ = env_logger::try_init();

        H264Decoder::new(DecoderConfig {
            resolution: Resolution {
                width: 64,
                height: 48,
            },
            num_frames: 2,
        })
    }

    #[test]
    fn slice_layout() {
        assert_eq!(
            slice_row_bounds(&[slice(0), slice(4), slice(8)], 4, 3),
            Ok(vec![1, 2])
        );
        assert_eq!(
            slice_row_bounds(&[], 4, 3),
            Err(SliceLayoutError::NoSlices)
        );
        assert_eq!(
            slice_row_bounds(&[slice(4)], 4, 3),
            Err(SliceLayoutError::FirstSliceNotAtStart(4))
        );
        assert_eq!(
            slice_row_bounds(&[slice(0), slice(5)], 4, 3),
            Err(SliceLayoutError::NotRowAligned {
                slice_id: 1,
                first_mb_in_slice: 5
            })
        );
        assert_eq!(
            slice_row_bounds(&[slice(0), slice(8), slice(4)], 4, 3),
            Err(SliceLayoutError::NotIncreasing { slice_id: 2 })
        );
        assert_eq!(
            slice_row_bounds(&[slice(0), slice(12)], 4, 3),
            Err(SliceLayoutError::OutOfBounds {
                slice_id: 1,
                first_mb_in_slice: 12
            })
        );
    }

    #[test]
    fn slices_get_disjoint_rows() {
        let mut decoder = decoder();
        let slices = [
            slice(0),
            SliceHeader {
                slice_alpha_c0_offset_div2: 2,
                disable_deblocking_filter_idc: 1,
                ..slice(8)
            },
        ];

        let mut cur = decoder.begin_picture(&slices[0], IDR).unwrap();
        decoder
            .decode_slices(&mut cur, &slices, |_, slice| {
                let expected_rows = if slice.slice_id == 0 { 2 } else { 1 };
                anyhow::ensure!(slice.rows.num_mb_rows() == expected_rows);
                anyhow::ensure!(slice.rows.first_mb_row == 2 * slice.slice_id as usize);

                for mb in slice.rows.mbs.iter_mut() {
                    mb.mb_type = MbType::Intra;
                }
                slice.rows.planes[0].row_mut(0).fill(slice.slice_id as u8 + 1);
                Ok(())
            })
            .unwrap();

        let frame = cur.frame();
        assert_eq!(frame.planes[0].get(0, 0), 1);
        assert_eq!(frame.planes[0].get(0, 32), 2);
        assert!(frame.mbs.iter().all(|mb| mb.mb_type == MbType::Intra));
        assert_eq!(frame.mb(0, 1).slice_id, 0);
        assert_eq!(frame.mb(0, 2).slice_id, 1);
        assert_eq!(frame.mb(0, 2).alpha_c0_offset, 4);
        assert_eq!(frame.mb(0, 2).disable_deblocking_filter_idc, 1);
        assert_eq!(frame.mb(3, 0).disable_deblocking_filter_idc, 0);

        decoder.finish_picture(cur).unwrap();
        let pic = decoder.next_decoded_frame().unwrap();
        assert_eq!(pic.pic_order_cnt, 0);
        assert!(pic.frame().is_some());
    }

    #[test]
    fn slice_errors_propagate() {
        let mut decoder = decoder();

        let res = decoder.decode_picture(IDR, &[slice(0)], |_, _| {
            Err(anyhow::anyhow!("corrupted macroblock"))
        });
        assert!(matches!(res, Err(DecodeError::Other(_))));

        let res = decoder.decode_picture(IDR, &[], |_, _| Ok(()));
        assert!(matches!(
            res,
            Err(DecodeError::SliceLayout(SliceLayoutError::NoSlices))
        ));
    }

    #[test]
    fn out_of_range_headers_are_rejected() {
        let mut decoder = decoder();
        let refp = NalInfo {
            nal_ref_idc: 1,
            is_idr: false,
        };

        decoder
            .decode_picture(IDR, &[slice(0)], |_, _| Ok(()))
            .unwrap();
        assert!(decoder.next_decoded_frame().is_some());

        // MaxFrameNum is 16.
        let res = decoder.decode_picture(
            refp,
            &[SliceHeader {
                frame_num: 20,
                ..Default::default()
            }],
            |_, _| Ok(()),
        );
        assert!(matches!(
            res,
            Err(DecodeError::Header(HeaderError::FrameNumOutOfRange {
                frame_num: 20,
                max_frame_num: 16
            }))
        ));

        let res = decoder.decode_picture(
            refp,
            &[SliceHeader {
                log2_max_frame_num_minus4: 40,
                frame_num: 1,
                ..Default::default()
            }],
            |_, _| Ok(()),
        );
        assert!(matches!(
            res,
            Err(DecodeError::Header(
                HeaderError::Log2MaxFrameNumOutOfRange(40)
            ))
        ));

        let res = decoder.decode_picture(
            IDR,
            &[SliceHeader {
                log2_max_pic_order_cnt_lsb_minus4: 13,
                ..Default::default()
            }],
            |_, _| Ok(()),
        );
        assert!(matches!(
            res,
            Err(DecodeError::Header(
                HeaderError::Log2MaxPicOrderCntLsbOutOfRange(13)
            ))
        ));

        // Rejected pictures leave the references untouched.
        assert_eq!(decoder.dpb().num_short_term(), 1);
        assert!(decoder.dpb().short_term(0).is_some());
        assert!(decoder.next_decoded_frame().is_none());
    }

    #[test]
    fn unknown_poc_type() {
        let mut decoder = decoder();
        let hdr = SliceHeader {
            pic_order_cnt_type: 7,
            ..Default::default()
        };

        let res = decoder.decode_picture(IDR, &[hdr], |_, _| Ok(()));
        assert!(matches!(res, Err(DecodeError::Poc(_))));
    }
}
