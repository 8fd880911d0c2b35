// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::collections::BTreeMap;

use log::debug;
use thiserror::Error;

use crate::codec::h264::frame_num::frame_num_minus;
use crate::codec::h264::frame_num::unwrap_frame_num;
use crate::codec::h264::picture::Picture;
use crate::codec::h264::picture::Reference;
use crate::codec::h264::syntax::MaxLongTermFrameIdx;
use crate::codec::h264::syntax::NalInfo;
use crate::codec::h264::syntax::RefPicMarkingOp;
use crate::codec::h264::syntax::SliceHeader;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MarkingError {
    #[error("difference_of_pic_nums {difference} out of range for MaxFrameNum {max_frame_num}")]
    DifferenceOutOfRange { difference: u32, max_frame_num: u32 },
    #[error("long-term index {idx} out of range, must be lower than {max}")]
    LongTermIdxOutOfRange { idx: u32, max: u32 },
}

/// The reference pictures, as maintained by the marking process of 8.2.5.
///
/// Short-term references are stored by `frame_num`, long-term ones by `LongTermFrameIdx`. A
/// picture is never present in both sets.
pub struct Dpb {
    /// Short-term references, indexed by `frame_num`. Has `MaxFrameNum` entries.
    short_term: Vec<Option<Picture>>,
    /// Long-term references, indexed by `LongTermFrameIdx`.
    long_term: BTreeMap<u32, Picture>,
    /// `MaxLongTermFrameIdx`, as set by the last IDR picture or MMCO 4/5.
    max_long_term_frame_idx: MaxLongTermFrameIdx,
    /// `max_num_ref_frames` of the active SPS.
    max_num_ref_frames: u32,
    /// `MaxFrameNum` of the active SPS.
    max_frame_num: u32,
}

impl Default for Dpb {
    fn default() -> Self {
        Self {
            short_term: Default::default(),
            long_term: Default::default(),
            max_long_term_frame_idx: Default::default(),
            max_num_ref_frames: 1,
            max_frame_num: 0,
        }
    }
}

impl Dpb {
    /// Set the DPB's limits from the active SPS.
    ///
    /// Short-term entries whose `frame_num` no longer fits are dropped.
    pub fn set_limits(&mut self, max_num_ref_frames: u32, max_frame_num: u32) {
        self.max_num_ref_frames = max_num_ref_frames;

        if max_frame_num as usize == self.short_term.len() {
            return;
        }

        debug!(
            "Resizing short-term references from {} to {} frame numbers",
            self.short_term.len(),
            max_frame_num
        );

        let old = std::mem::take(&mut self.short_term);
        self.short_term = vec![None; max_frame_num as usize];
        self.max_frame_num = max_frame_num;

        for pic in old.into_iter().flatten() {
            if let Some(slot) = self.short_term.get_mut(pic.frame_num as usize) {
                *slot = Some(pic);
            }
        }
    }

    pub fn max_num_ref_frames(&self) -> u32 {
        self.max_num_ref_frames
    }

    pub fn max_frame_num(&self) -> u32 {
        self.max_frame_num
    }

    pub fn max_long_term_frame_idx(&self) -> MaxLongTermFrameIdx {
        self.max_long_term_frame_idx
    }

    /// Returns the short-term reference stored for `frame_num`, if any.
    pub fn short_term(&self, frame_num: u32) -> Option<&Picture> {
        self.short_term
            .get(frame_num as usize)
            .and_then(|slot| slot.as_ref())
    }

    /// Returns the long-term reference stored at `long_term_frame_idx`, if any.
    pub fn long_term(&self, long_term_frame_idx: u32) -> Option<&Picture> {
        self.long_term.get(&long_term_frame_idx)
    }

    pub fn short_term_refs(&self) -> impl Iterator<Item = &Picture> {
        self.short_term.iter().flatten()
    }

    /// Iterates over the long-term references by ascending `LongTermFrameIdx`.
    pub fn long_term_refs(&self) -> impl Iterator<Item = &Picture> {
        self.long_term.values()
    }

    pub fn num_short_term(&self) -> usize {
        self.short_term_refs().count()
    }

    pub fn num_long_term(&self) -> usize {
        self.long_term.len()
    }

    /// Returns the number of reference frames, including non-existing ones.
    pub fn num_ref_frames(&self) -> usize {
        self.num_short_term() + self.num_long_term()
    }

    pub fn is_empty(&self) -> bool {
        self.num_ref_frames() == 0
    }

    /// Drops every reference.
    pub fn clear(&mut self) {
        log::debug!("Clearing the DPB");

        self.short_term.iter_mut().for_each(|slot| *slot = None);
        self.long_term.clear();
        self.max_long_term_frame_idx = MaxLongTermFrameIdx::NoLongTermFrameIndices;
    }

    /// Largest number of frames the reference sets may hold together.
    fn max_refs(&self) -> u32 {
        std::cmp::max(1, self.max_num_ref_frames)
    }

    fn check_long_term_idx(&self, idx: u32) -> Result<(), MarkingError> {
        if idx >= self.max_refs() {
            return Err(MarkingError::LongTermIdxOutOfRange {
                idx,
                max: self.max_refs(),
            });
        }

        Ok(())
    }

    /// Returns the `frame_num` designated by `difference_of_pic_nums` from `frame_num`.
    fn pic_num_x(&self, frame_num: u32, difference: u32) -> Result<u32, MarkingError> {
        if difference == 0 || difference >= self.max_frame_num {
            return Err(MarkingError::DifferenceOutOfRange {
                difference,
                max_frame_num: self.max_frame_num,
            });
        }

        Ok(frame_num_minus(frame_num, difference, self.max_frame_num))
    }

    fn short_term_slot(&mut self, frame_num: u32) -> Option<&mut Option<Picture>> {
        self.short_term.get_mut(frame_num as usize)
    }

    /// Stores `pic` as the short-term reference for its `frame_num`, replacing any previous
    /// occupant.
    fn store_short_term(&mut self, mut pic: Picture) {
        pic.set_reference(Reference::ShortTerm);

        let frame_num = pic.frame_num;
        match self.short_term_slot(frame_num) {
            Some(slot) => {
                if let Some(prev) = slot.replace(pic) {
                    debug!("Replacing short-term reference {:?}", prev);
                }
            }
            None => log::warn!(
                "frame_num {} does not fit MaxFrameNum {}, dropping picture",
                frame_num,
                self.max_frame_num
            ),
        }
    }

    /// Stores `pic` as the long-term reference at `long_term_frame_idx`, replacing any previous
    /// occupant.
    fn store_long_term(&mut self, mut pic: Picture, long_term_frame_idx: u32) {
        pic.set_reference(Reference::LongTerm);
        pic.long_term_frame_idx = long_term_frame_idx;

        if let Some(prev) = self.long_term.insert(long_term_frame_idx, pic) {
            debug!("Replacing long-term reference {:?}", prev);
        }
    }

    /// Marks the decoded picture `pic` as per 8.2.5.1 and stores it if it is a reference.
    ///
    /// Pictures with `nal_ref_idc == 0` are not stored.
    pub fn mark(
        &mut self,
        pic: Picture,
        nal: &NalInfo,
        hdr: &SliceHeader,
    ) -> Result<(), MarkingError> {
        if nal.is_idr {
            return self.mark_idr(pic, hdr);
        }

        if !nal.is_ref() {
            debug!("Not storing non-reference picture {:?}", pic);
            return Ok(());
        }

        match &hdr.ref_pic_marking {
            Some(ops) => self.adaptive_marking(pic, ops),
            None => {
                let frame_num = pic.frame_num;
                self.store_short_term(pic);
                self.sliding_window(frame_num);
                Ok(())
            }
        }
    }

    fn mark_idr(&mut self, pic: Picture, hdr: &SliceHeader) -> Result<(), MarkingError> {
        debug!("IDR picture, clearing all references");
        self.clear();

        if hdr.long_term_reference_flag {
            self.max_long_term_frame_idx = MaxLongTermFrameIdx::Idx(0);
            self.store_long_term(pic, 0);
        } else {
            self.max_long_term_frame_idx = MaxLongTermFrameIdx::NoLongTermFrameIndices;
            self.store_short_term(pic);
        }

        Ok(())
    }

    /// Applies the memory management control operations of the current picture, as per 8.2.5.4.
    fn adaptive_marking(
        &mut self,
        mut pic: Picture,
        ops: &[RefPicMarkingOp],
    ) -> Result<(), MarkingError> {
        let mut long_term_frame_idx = None;

        for op in ops {
            log::trace!("Dpb state before MMCO={}: {:#?}", op.mmco(), self);

            match *op {
                RefPicMarkingOp::RemoveShort {
                    difference_of_pic_nums,
                } => {
                    let pic_num_x = self.pic_num_x(pic.frame_num, difference_of_pic_nums)?;
                    debug!("MMCO op 1 for frame_num {}", pic_num_x);

                    match self.short_term_slot(pic_num_x).and_then(Option::take) {
                        Some(mut removed) => removed.set_reference(Reference::None),
                        None => log::warn!(
                            "MMCO op 1: no short-term reference with frame_num {}",
                            pic_num_x
                        ),
                    }
                }

                RefPicMarkingOp::RemoveLong { long_term_pic_num } => {
                    debug!("MMCO op 2 for long_term_pic_num {}", long_term_pic_num);
                    self.check_long_term_idx(long_term_pic_num)?;

                    match self.long_term.remove(&long_term_pic_num) {
                        Some(mut removed) => removed.set_reference(Reference::None),
                        None => log::warn!(
                            "MMCO op 2: no long-term reference with long_term_pic_num {}",
                            long_term_pic_num
                        ),
                    }
                }

                RefPicMarkingOp::ConvertShortToLong {
                    difference_of_pic_nums,
                    long_term_frame_idx,
                } => {
                    let pic_num_x = self.pic_num_x(pic.frame_num, difference_of_pic_nums)?;
                    self.check_long_term_idx(long_term_frame_idx)?;

                    debug!(
                        "MMCO op 3 for frame_num {}, long_term_frame_idx {}",
                        pic_num_x, long_term_frame_idx
                    );

                    match self.short_term_slot(pic_num_x).and_then(Option::take) {
                        Some(short) if short.nonexisting => {
                            log::warn!(
                                "MMCO op 3: frame_num {} is non-existing, not converting",
                                pic_num_x
                            );
                            self.store_short_term(short);
                        }
                        Some(short) => self.store_long_term(short, long_term_frame_idx),
                        None => log::warn!(
                            "MMCO op 3: no short-term reference with frame_num {}",
                            pic_num_x
                        ),
                    }
                }

                RefPicMarkingOp::TruncateLong {
                    max_long_term_frame_idx,
                } => {
                    debug!(
                        "MMCO op 4, max_long_term_frame_idx: {:?}",
                        max_long_term_frame_idx
                    );

                    self.long_term
                        .retain(|&idx, _| !(max_long_term_frame_idx < idx));
                    self.max_long_term_frame_idx = max_long_term_frame_idx;
                }

                RefPicMarkingOp::ClearAll => {
                    debug!("MMCO op 5, marking all pictures in the DPB as unused for reference");

                    self.clear();

                    // The picture is inferred to have had frame_num equal to 0 for all subsequent
                    // use in the decoding process.
                    pic.has_mmco_5 = true;
                    pic.frame_num = 0;
                }

                RefPicMarkingOp::MarkCurrentAsLong {
                    long_term_frame_idx: idx,
                } => {
                    debug!("MMCO op 6, long_term_frame_idx: {}", idx);
                    self.check_long_term_idx(idx)?;

                    if let Some(mut prev) = self.long_term.remove(&idx) {
                        prev.set_reference(Reference::None);
                    }
                    long_term_frame_idx = Some(idx);
                }
            }
        }

        match long_term_frame_idx {
            Some(idx) => self.store_long_term(pic, idx),
            None => self.store_short_term(pic),
        }

        Ok(())
    }

    /// Stores a non-existing frame inferred from a gap in `frame_num`, as per 8.2.5.2.
    ///
    /// The sliding window is applied as for a decoded picture.
    pub fn insert_non_existing(&mut self, pic: Picture) {
        let frame_num = pic.frame_num;
        debug!("Inserting non-existing frame {}", frame_num);

        self.store_short_term(pic);
        self.sliding_window(frame_num);
    }

    /// Returns the `frame_num` of the short-term reference with the lowest `FrameNumWrap`
    /// relative to `current_frame_num`.
    fn find_short_term_lowest_frame_num_wrap(&self, current_frame_num: u32) -> Option<u32> {
        self.short_term_refs()
            .map(|pic| pic.frame_num)
            .min_by_key(|&frame_num| {
                unwrap_frame_num(frame_num, current_frame_num, self.max_frame_num)
            })
    }

    /// Evicts the oldest short-term references until the reference sets fit `max_num_ref_frames`,
    /// as per 8.2.5.3.
    pub fn sliding_window(&mut self, current_frame_num: u32) {
        let max_short_term = std::cmp::max(
            1,
            (self.max_num_ref_frames as usize).saturating_sub(self.num_long_term()),
        );

        while self.num_short_term() > max_short_term {
            let Some(frame_num) = self.find_short_term_lowest_frame_num_wrap(current_frame_num)
            else {
                break;
            };

            if let Some(mut evicted) = self.short_term_slot(frame_num).and_then(Option::take) {
                debug!("Sliding window evicting {:?}", evicted);
                evicted.set_reference(Reference::None);
            }
        }
    }

    /// 8.2.4.2.1 Initialization process for the reference picture list for P
    /// and SP slices in frames
    ///
    /// Non-existing frames are left out as they cannot be used for inter prediction.
    pub fn build_ref_pic_list_p(&self, current_frame_num: u32) -> Vec<&Picture> {
        let mut ref_pic_list_p0: Vec<&Picture> = self
            .short_term_refs()
            .filter(|pic| !pic.nonexisting)
            .collect();

        ref_pic_list_p0.sort_by_key(|pic| {
            std::cmp::Reverse(unwrap_frame_num(
                pic.frame_num,
                current_frame_num,
                self.max_frame_num,
            ))
        });

        ref_pic_list_p0.extend(self.long_term_refs());

        debug!(
            "ref_list_p0: (ShortTerm|LongTerm, frame_num, POC) {:?}",
            ref_pic_list_p0
                .iter()
                .map(|pic| (pic.reference(), pic.frame_num, pic.pic_order_cnt))
                .collect::<Vec<_>>()
        );

        ref_pic_list_p0
    }
}

impl std::fmt::Debug for Dpb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dpb")
            .field("short_term", &self.short_term_refs().collect::<Vec<_>>())
            .field("long_term", &self.long_term)
            .field("max_long_term_frame_idx", &self.max_long_term_frame_idx)
            .field("max_num_ref_frames", &self.max_num_ref_frames)
            .field("max_frame_num", &self.max_frame_num)
            .finish()
    }
}
