// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::sync::Arc;

use enumn::N;

use crate::video_frame::frame_pool::Frame;

/// `ref_poc` of a motion vector entry that does not point to any picture.
pub const NO_REFERENCE: i32 = i32::MIN;

/// Prediction mode of a macroblock, as far as the deblocking filter is concerned.
#[derive(N, Copy, Clone, Debug, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum MbType {
    Intra = 0,
    #[default]
    Inter = 1,
    /// P_Skip or B_Skip. Filtered as an inter macroblock.
    Skip = 2,
}

impl MbType {
    pub fn is_intra(&self) -> bool {
        matches!(self, MbType::Intra)
    }
}

/// Motion of one 4x4 partition for one prediction list.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MotionVector {
    pub mv_x: i16,
    pub mv_y: i16,
    /// POC of the reference picture, or [`NO_REFERENCE`] if the list is not used.
    pub ref_poc: i32,
    /// Whether the reference picture was a short-term reference. Together with `ref_poc` this
    /// identifies the reference picture.
    pub ref_short_term: bool,
}

impl Default for MotionVector {
    fn default() -> Self {
        Self {
            mv_x: 0,
            mv_y: 0,
            ref_poc: NO_REFERENCE,
            ref_short_term: false,
        }
    }
}

impl MotionVector {
    /// Whether this entry references a picture.
    pub fn is_used(&self) -> bool {
        self.ref_poc != NO_REFERENCE
    }

    /// Whether both entries reference the same picture.
    pub fn same_reference(&self, other: &MotionVector) -> bool {
        self.ref_poc == other.ref_poc && self.ref_short_term == other.ref_short_term
    }
}

/// Decoding results of one macroblock that later stages depend on.
///
/// Per-block arrays are indexed by 4x4 luma block in raster order within the macroblock, i.e.
/// `blk_y * 4 + blk_x`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MacroblockRecord {
    pub mb_type: MbType,
    /// QPY, QPCb and QPCr. The chroma values are already mapped through the chroma QP table.
    pub qp: [i32; 3],
    /// Number of non-zero transform coefficients of each 4x4 luma block.
    pub nc: [u8; 16],
    /// Motion of each 4x4 block for list 0 and list 1.
    pub motion: [[MotionVector; 16]; 2],
    /// `FilterOffsetA` of the slice containing this macroblock.
    pub alpha_c0_offset: i8,
    /// `FilterOffsetB` of the slice containing this macroblock.
    pub beta_offset: i8,
    pub transform_8x8_used: bool,
    /// Index of the slice containing this macroblock within its picture.
    pub slice_id: u16,
    pub disable_deblocking_filter_idc: u8,
}

impl Default for MacroblockRecord {
    fn default() -> Self {
        Self {
            mb_type: MbType::default(),
            qp: [0; 3],
            nc: [0; 16],
            motion: [[MotionVector::default(); 16]; 2],
            alpha_c0_offset: 0,
            beta_offset: 0,
            transform_8x8_used: false,
            slice_id: 0,
            disable_deblocking_filter_idc: 0,
        }
    }
}

impl MacroblockRecord {
    /// Returns the number of prediction lists used by 4x4 block `blk`.
    pub fn num_lists_used(&self, blk: usize) -> usize {
        self.motion
            .iter()
            .filter(|list| list[blk].is_used())
            .count()
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum Reference {
    #[default]
    None,
    ShortTerm,
    LongTerm,
}

/// A decoded frame together with the values needed to use it as a reference.
#[derive(Clone, Default)]
pub struct Picture {
    pub frame_num: u32,
    /// `FrameNumOffset` of the picture. `frame_num_offset + frame_num` is its absolute frame
    /// number.
    pub frame_num_offset: i32,
    pub pic_order_cnt: i32,
    pub top_field_order_cnt: i32,
    pub bottom_field_order_cnt: i32,
    pub nal_ref_idc: u8,
    pub is_idr: bool,
    /// Placeholder inserted for a gap in `frame_num`. Has no samples.
    pub nonexisting: bool,
    pub long_term_frame_idx: u32,
    /// The picture carried memory_management_control_operation 5.
    pub has_mmco_5: bool,
    pub(crate) reference: Reference,
    pub(crate) frame: Option<Arc<Frame>>,
}

impl Picture {
    /// Creates the placeholder for a frame number skipped by the encoder, as per 8.2.5.2.
    pub fn new_non_existing(frame_num: u32, frame_num_offset: i32) -> Self {
        Self {
            frame_num,
            frame_num_offset,
            nonexisting: true,
            ..Default::default()
        }
    }

    pub fn is_ref(&self) -> bool {
        !matches!(self.reference, Reference::None)
    }

    pub fn is_short_term(&self) -> bool {
        matches!(self.reference, Reference::ShortTerm)
    }

    pub fn is_long_term(&self) -> bool {
        matches!(self.reference, Reference::LongTerm)
    }

    pub fn set_reference(&mut self, reference: Reference) {
        log::debug!(
            "Set reference of frame_num {} (POC {}) to {:?}",
            self.frame_num,
            self.pic_order_cnt,
            reference
        );

        self.reference = reference;
    }

    pub fn reference(&self) -> &Reference {
        &self.reference
    }

    /// The decoded samples and macroblock records, `None` for non-existing pictures.
    pub fn frame(&self) -> Option<&Arc<Frame>> {
        self.frame.as_ref()
    }

    /// Attaches the decoded samples once the picture is complete.
    pub fn set_frame(&mut self, frame: Arc<Frame>) {
        self.frame = Some(frame);
    }

    /// Returns `FrameNumOffset + frame_num`.
    pub fn abs_frame_num(&self) -> i32 {
        self.frame_num_offset + self.frame_num as i32
    }
}

impl std::fmt::Debug for Picture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Picture")
            .field("frame_num", &self.frame_num)
            .field("pic_order_cnt", &self.pic_order_cnt)
            .field("reference", &self.reference)
            .field("long_term_frame_idx", &self.long_term_frame_idx)
            .field("nonexisting", &self.nonexisting)
            .finish()
    }
}
