// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Slice-level syntax consumed by the cross-frame decoding stages.
//!
//! These structures are filled by the bitstream parser. Only the syntax elements needed for
//! picture order count derivation, reference picture marking and deblocking are represented.

use enumn::N;
use thiserror::Error;

/// Largest value of `log2_max_frame_num_minus4` and `log2_max_pic_order_cnt_lsb_minus4`.
const MAX_LOG2_MINUS4: u8 = 12;

/// Largest value of `max_num_ref_frames`, i.e. `MaxDpbFrames` of the highest level.
pub const MAX_NUM_REF_FRAMES: u32 = 16;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HeaderError {
    #[error("log2_max_frame_num_minus4 {0} out of range")]
    Log2MaxFrameNumOutOfRange(u8),
    #[error("log2_max_pic_order_cnt_lsb_minus4 {0} out of range")]
    Log2MaxPicOrderCntLsbOutOfRange(u8),
    #[error("max_num_ref_frames {0} out of range")]
    MaxNumRefFramesOutOfRange(u32),
    #[error("frame_num {frame_num} does not fit MaxFrameNum {max_frame_num}")]
    FrameNumOutOfRange { frame_num: u16, max_frame_num: u32 },
    #[error("pic_order_cnt_lsb {pic_order_cnt_lsb} does not fit MaxPicOrderCntLsb {max}")]
    PicOrderCntLsbOutOfRange { pic_order_cnt_lsb: u16, max: i32 },
}

/// The fields of the NAL unit header that affect reference handling.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct NalInfo {
    /// Non-zero if the picture is used for reference.
    pub nal_ref_idc: u8,
    /// Whether the NAL unit type is 5 (coded slice of an IDR picture).
    pub is_idr: bool,
}

impl NalInfo {
    pub fn is_ref(&self) -> bool {
        self.nal_ref_idc != 0
    }
}

#[derive(N, Copy, Clone, Debug, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum PicOrderCntType {
    /// POC is sent explicitly as `pic_order_cnt_lsb`.
    #[default]
    Explicit = 0,
    /// POC is derived from `frame_num` and the expected-delta cycle of the SPS.
    DeltaCycle = 1,
    /// POC follows decoding order.
    DecodingOrder = 2,
}

/// Representation of `MaxLongTermFrameIdx`.
///
/// `MaxLongTermFrameIdx` is derived from `max_long_term_frame_idx_plus1`, an unsigned integer with
/// a special value indicating "no long-term frame indices". This type allows easy conversion
/// between the actual and "plus1" representation, while ensuring that the special value is always
/// handled by the code.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum MaxLongTermFrameIdx {
    #[default]
    NoLongTermFrameIndices,
    Idx(u32),
}

impl MaxLongTermFrameIdx {
    /// Create a value from `max_long_term_frame_idx_plus1`.
    pub fn from_value_plus1(max_long_term_frame_idx_plus1: u32) -> Self {
        match max_long_term_frame_idx_plus1 {
            0 => Self::NoLongTermFrameIndices,
            i @ 1.. => Self::Idx(i - 1),
        }
    }
}

impl PartialEq<u32> for MaxLongTermFrameIdx {
    fn eq(&self, other: &u32) -> bool {
        match self {
            MaxLongTermFrameIdx::NoLongTermFrameIndices => false,
            MaxLongTermFrameIdx::Idx(idx) => idx.eq(other),
        }
    }
}

impl PartialOrd<u32> for MaxLongTermFrameIdx {
    fn partial_cmp(&self, other: &u32) -> Option<std::cmp::Ordering> {
        match self {
            MaxLongTermFrameIdx::NoLongTermFrameIndices => Some(std::cmp::Ordering::Less),
            MaxLongTermFrameIdx::Idx(idx) => Some(idx.cmp(other)),
        }
    }
}

/// A decoded `memory_management_control_operation` with its operands.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RefPicMarkingOp {
    /// MMCO 1: mark the short-term picture `frame_num - difference_of_pic_nums` as unused.
    ///
    /// `difference_of_pic_nums` is `difference_of_pic_nums_minus1 + 1`.
    RemoveShort { difference_of_pic_nums: u32 },
    /// MMCO 2: mark the long-term picture with `LongTermPicNum == long_term_pic_num` as unused.
    RemoveLong { long_term_pic_num: u32 },
    /// MMCO 3: turn a short-term picture into a long-term one at `long_term_frame_idx`.
    ConvertShortToLong {
        difference_of_pic_nums: u32,
        long_term_frame_idx: u32,
    },
    /// MMCO 4: drop every long-term picture with an index above the new maximum.
    TruncateLong {
        max_long_term_frame_idx: MaxLongTermFrameIdx,
    },
    /// MMCO 5: mark all reference pictures as unused.
    ClearAll,
    /// MMCO 6: mark the current picture as long-term at `long_term_frame_idx`.
    MarkCurrentAsLong { long_term_frame_idx: u32 },
}

impl RefPicMarkingOp {
    /// Returns the `memory_management_control_operation` value of this operation.
    pub fn mmco(&self) -> u8 {
        match self {
            RefPicMarkingOp::RemoveShort { .. } => 1,
            RefPicMarkingOp::RemoveLong { .. } => 2,
            RefPicMarkingOp::ConvertShortToLong { .. } => 3,
            RefPicMarkingOp::TruncateLong { .. } => 4,
            RefPicMarkingOp::ClearAll => 5,
            RefPicMarkingOp::MarkCurrentAsLong { .. } => 6,
        }
    }
}

/// The POC type 1 cycle signalled in the SPS.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PocCycle {
    pub offset_for_non_ref_pic: i32,
    pub offset_for_top_to_bottom_field: i32,
    /// `offset_for_ref_frame[i]` for each of the `num_ref_frames_in_pic_order_cnt_cycle` frames.
    pub offset_for_ref_frame: Vec<i32>,
}

impl PocCycle {
    /// Returns `ExpectedDeltaPerPicOrderCntCycle` (7-12).
    pub fn expected_delta_per_pic_order_cnt_cycle(&self) -> i32 {
        self.offset_for_ref_frame.iter().sum()
    }
}

/// The subset of the slice header (and of its active SPS and PPS) used across frames.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SliceHeader {
    /// Used as an identifier for pictures and shall be represented by
    /// `log2_max_frame_num_minus4 + 4` bits in the bitstream.
    pub frame_num: u16,

    /// Specifies the picture order count modulo `MaxPicOrderCntLsb` for the top field of a coded
    /// frame.
    pub pic_order_cnt_lsb: u16,

    /// Specifies the picture order count difference between the bottom field and the top field
    /// of a coded frame.
    pub delta_pic_order_cnt_bottom: i32,

    /// `delta_pic_order_cnt[0]` and `delta_pic_order_cnt[1]`, used by POC type 1.
    pub delta_pic_order_cnt: [i32; 2],

    /// The adaptive marking instructions, or `None` if the sliding window is to be used
    /// (`adaptive_ref_pic_marking_mode_flag == 0`).
    pub ref_pic_marking: Option<Vec<RefPicMarkingOp>>,

    /// For IDR pictures, whether the picture is marked as long-term with index 0.
    pub long_term_reference_flag: bool,

    /// Specifies how the previously-decoded pictures in the decoded picture buffer are treated
    /// after decoding of an IDR picture.
    pub no_output_of_prior_pics_flag: bool,

    /// `pic_order_cnt_type` from the SPS.
    pub pic_order_cnt_type: u8,

    /// `log2_max_frame_num_minus4` from the SPS.
    pub log2_max_frame_num_minus4: u8,

    /// `log2_max_pic_order_cnt_lsb_minus4` from the SPS.
    pub log2_max_pic_order_cnt_lsb_minus4: u8,

    /// `max_num_ref_frames` from the SPS.
    pub max_num_ref_frames: u32,

    /// The POC type 1 cycle from the SPS, if any.
    pub poc_cycle: Option<PocCycle>,

    pub slice_alpha_c0_offset_div2: i8,
    pub slice_beta_offset_div2: i8,

    /// 0 filters all edges, 1 disables the filter, 2 skips edges shared with other slices.
    pub disable_deblocking_filter_idc: u8,

    /// Address of the first macroblock of the slice, in raster order.
    pub first_mb_in_slice: u32,
}

impl Default for SliceHeader {
    fn default() -> Self {
        Self {
            frame_num: 0,
            pic_order_cnt_lsb: 0,
            delta_pic_order_cnt_bottom: 0,
            delta_pic_order_cnt: [0; 2],
            ref_pic_marking: None,
            long_term_reference_flag: false,
            no_output_of_prior_pics_flag: false,
            pic_order_cnt_type: 0,
            log2_max_frame_num_minus4: 0,
            log2_max_pic_order_cnt_lsb_minus4: 0,
            max_num_ref_frames: 1,
            poc_cycle: None,
            slice_alpha_c0_offset_div2: 0,
            slice_beta_offset_div2: 0,
            disable_deblocking_filter_idc: 0,
            first_mb_in_slice: 0,
        }
    }
}

impl SliceHeader {
    /// Checks the ranges of the fields the derived limits and the reference arena depend on.
    ///
    /// The other methods of this type assume a header that passed this check.
    pub fn validate(&self) -> Result<(), HeaderError> {
        if self.log2_max_frame_num_minus4 > MAX_LOG2_MINUS4 {
            return Err(HeaderError::Log2MaxFrameNumOutOfRange(
                self.log2_max_frame_num_minus4,
            ));
        }
        if self.log2_max_pic_order_cnt_lsb_minus4 > MAX_LOG2_MINUS4 {
            return Err(HeaderError::Log2MaxPicOrderCntLsbOutOfRange(
                self.log2_max_pic_order_cnt_lsb_minus4,
            ));
        }
        if self.max_num_ref_frames > MAX_NUM_REF_FRAMES {
            return Err(HeaderError::MaxNumRefFramesOutOfRange(
                self.max_num_ref_frames,
            ));
        }
        if u32::from(self.frame_num) >= self.max_frame_num() {
            return Err(HeaderError::FrameNumOutOfRange {
                frame_num: self.frame_num,
                max_frame_num: self.max_frame_num(),
            });
        }
        if i32::from(self.pic_order_cnt_lsb) >= self.max_pic_order_cnt_lsb() {
            return Err(HeaderError::PicOrderCntLsbOutOfRange {
                pic_order_cnt_lsb: self.pic_order_cnt_lsb,
                max: self.max_pic_order_cnt_lsb(),
            });
        }

        Ok(())
    }

    /// Returns `MaxFrameNum` (7-10).
    pub fn max_frame_num(&self) -> u32 {
        1 << (u32::from(self.log2_max_frame_num_minus4) + 4)
    }

    /// Returns `MaxPicOrderCntLsb` (7-11).
    pub fn max_pic_order_cnt_lsb(&self) -> i32 {
        1 << (i32::from(self.log2_max_pic_order_cnt_lsb_minus4) + 4)
    }

    /// Whether the marking instructions contain memory_management_control_operation 5.
    pub fn has_clear_all(&self) -> bool {
        self.ref_pic_marking
            .as_ref()
            .is_some_and(|ops| ops.iter().any(|op| *op == RefPicMarkingOp::ClearAll))
    }

    /// `FilterOffsetA`, i.e. `slice_alpha_c0_offset_div2 << 1`.
    pub fn filter_offset_a(&self) -> i8 {
        self.slice_alpha_c0_offset_div2 << 1
    }

    /// `FilterOffsetB`, i.e. `slice_beta_offset_div2 << 1`.
    pub fn filter_offset_b(&self) -> i8 {
        self.slice_beta_offset_div2 << 1
    }
}
