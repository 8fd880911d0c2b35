// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Picture order count derivation, as per 8.2.1.

use thiserror::Error;

use crate::codec::h264::syntax::NalInfo;
use crate::codec::h264::syntax::PicOrderCntType;
use crate::codec::h264::syntax::SliceHeader;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PocError {
    #[error("unknown pic_order_cnt_type {0}")]
    UnknownPicOrderCntType(u8),
}

/// What is carried over from previously decoded pictures to derive the POC and `FrameNumOffset`
/// of the next one.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct PocState {
    /// `prevPicOrderCntMsb`, from the previous reference picture.
    pub prev_pic_order_cnt_msb: i32,
    /// `prevPicOrderCntLsb`, from the previous reference picture.
    pub prev_pic_order_cnt_lsb: i32,
    /// `frame_num` of the previous picture in decoding order, 0 if it carried MMCO 5.
    pub prev_frame_num: u32,
    /// `FrameNumOffset` of the previous picture in decoding order, 0 if it carried MMCO 5.
    pub prev_frame_num_offset: i32,
    /// `PrevRefFrameNum`, used to detect gaps in `frame_num`.
    pub prev_ref_frame_num: u32,
    /// Whether the previous picture in decoding order carried MMCO 5.
    pub prev_has_mmco_5: bool,
}

impl PocState {
    /// Returns the `FrameNumOffset` of a picture with `frame_num` following the previous one.
    pub fn frame_num_offset(&self, frame_num: u32, is_idr: bool, max_frame_num: u32) -> i32 {
        if is_idr {
            0
        } else if self.prev_frame_num > frame_num {
            self.prev_frame_num_offset + max_frame_num as i32
        } else {
            self.prev_frame_num_offset
        }
    }

    /// Advances the frame number continuation past a non-existing frame, returning its
    /// `FrameNumOffset`. Type 0 continuation is left untouched since non-existing frames have no
    /// POC.
    pub fn advance_frame_num(&mut self, frame_num: u32, max_frame_num: u32) -> i32 {
        let frame_num_offset = self.frame_num_offset(frame_num, false, max_frame_num);

        self.prev_frame_num = frame_num;
        self.prev_frame_num_offset = frame_num_offset;
        self.prev_ref_frame_num = frame_num;
        self.prev_has_mmco_5 = false;

        frame_num_offset
    }
}

/// The order counts of a frame.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct PicOrderCount {
    pub top_field_order_cnt: i32,
    pub bottom_field_order_cnt: i32,
    /// `PicOrderCnt(frame)`, the minimum of the two field order counts.
    pub pic_order_cnt: i32,
    pub frame_num_offset: i32,
}

/// Computes the order counts of the picture described by `hdr` and `nal`, and the state to use for
/// the picture that follows it.
///
/// `state` is not modified; the caller commits the returned state once the picture is decoded.
pub fn compute_pic_order_count(
    hdr: &SliceHeader,
    nal: &NalInfo,
    state: &PocState,
) -> Result<(PicOrderCount, PocState), PocError> {
    let poc_type = PicOrderCntType::n(hdr.pic_order_cnt_type)
        .ok_or(PocError::UnknownPicOrderCntType(hdr.pic_order_cnt_type))?;

    let max_frame_num = hdr.max_frame_num();
    let frame_num = u32::from(hdr.frame_num);
    let frame_num_offset = state.frame_num_offset(frame_num, nal.is_idr, max_frame_num);
    let has_mmco_5 = hdr.has_clear_all();

    let mut next = *state;

    let (top_field_order_cnt, bottom_field_order_cnt) = match poc_type {
        // 8.2.1.1
        PicOrderCntType::Explicit => {
            let (prev_msb, prev_lsb) = if nal.is_idr {
                (0, 0)
            } else {
                (state.prev_pic_order_cnt_msb, state.prev_pic_order_cnt_lsb)
            };

            let max_lsb = hdr.max_pic_order_cnt_lsb();
            let half = max_lsb / 2;
            let lsb = i32::from(hdr.pic_order_cnt_lsb);

            let msb = if lsb < prev_lsb && prev_lsb - lsb >= half {
                prev_msb + max_lsb
            } else if lsb > prev_lsb && lsb - prev_lsb > half {
                prev_msb - max_lsb
            } else {
                prev_msb
            };

            let top = msb + lsb;
            let bottom = top + hdr.delta_pic_order_cnt_bottom;

            if nal.is_ref() {
                if has_mmco_5 {
                    next.prev_pic_order_cnt_msb = 0;
                    next.prev_pic_order_cnt_lsb = std::cmp::min(top, bottom);
                } else {
                    next.prev_pic_order_cnt_msb = msb;
                    next.prev_pic_order_cnt_lsb = lsb;
                }
            }

            (top, bottom)
        }

        // 8.2.1.2
        PicOrderCntType::DeltaCycle => match hdr.poc_cycle.as_ref() {
            Some(cycle) if !cycle.offset_for_ref_frame.is_empty() => {
                let cycle_len = cycle.offset_for_ref_frame.len() as i32;

                let mut abs_frame_num = frame_num_offset + frame_num as i32;
                if !nal.is_ref() && abs_frame_num > 0 {
                    abs_frame_num -= 1;
                }

                let mut expected_pic_order_cnt = 0;
                if abs_frame_num > 0 {
                    let pic_order_cnt_cycle_cnt = (abs_frame_num - 1) / cycle_len;
                    let frame_num_in_pic_order_cnt_cycle = (abs_frame_num - 1) % cycle_len;

                    expected_pic_order_cnt = pic_order_cnt_cycle_cnt
                        * cycle.expected_delta_per_pic_order_cnt_cycle();
                    expected_pic_order_cnt += cycle.offset_for_ref_frame
                        [..=frame_num_in_pic_order_cnt_cycle as usize]
                        .iter()
                        .sum::<i32>();
                }

                if !nal.is_ref() {
                    expected_pic_order_cnt += cycle.offset_for_non_ref_pic;
                }

                let top = expected_pic_order_cnt + hdr.delta_pic_order_cnt[0];
                let bottom =
                    top + cycle.offset_for_top_to_bottom_field + hdr.delta_pic_order_cnt[1];

                (top, bottom)
            }
            _ => {
                let poc = 2 * (frame_num_offset + frame_num as i32);
                (poc, poc)
            }
        },

        // 8.2.1.3
        PicOrderCntType::DecodingOrder => {
            let poc = if nal.is_idr {
                0
            } else if !nal.is_ref() {
                2 * (frame_num_offset + frame_num as i32) - 1
            } else {
                2 * (frame_num_offset + frame_num as i32)
            };

            (poc, poc)
        }
    };

    if has_mmco_5 {
        next.prev_frame_num = 0;
        next.prev_frame_num_offset = 0;
    } else {
        next.prev_frame_num = frame_num;
        next.prev_frame_num_offset = frame_num_offset;
    }

    if nal.is_ref() {
        next.prev_ref_frame_num = if has_mmco_5 { 0 } else { frame_num };
    }
    next.prev_has_mmco_5 = has_mmco_5;

    Ok((
        PicOrderCount {
            top_field_order_cnt,
            bottom_field_order_cnt,
            pic_order_cnt: std::cmp::min(top_field_order_cnt, bottom_field_order_cnt),
            frame_num_offset,
        },
        next,
    ))
}
