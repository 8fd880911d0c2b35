// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Boundary strength derivation, as per 8.7.2.1.

use crate::codec::h264::picture::MacroblockRecord;
use crate::codec::h264::picture::MotionVector;

/// Whether two motion vectors are at least one luma sample apart in either direction.
fn far_apart(a: &MotionVector, b: &MotionVector) -> bool {
    (i32::from(a.mv_x) - i32::from(b.mv_x)).abs() >= 4
        || (i32::from(a.mv_y) - i32::from(b.mv_y)).abs() >= 4
}

/// Whether the prediction of blocks `p_blk` of `p` and `q_blk` of `q` differ enough to warrant
/// bS 1.
fn motion_differs(p: &MacroblockRecord, p_blk: usize, q: &MacroblockRecord, q_blk: usize) -> bool {
    let num_lists = p.num_lists_used(p_blk);
    if num_lists != q.num_lists_used(q_blk) {
        return true;
    }

    let [p0, p1] = [&p.motion[0][p_blk], &p.motion[1][p_blk]];
    let [q0, q1] = [&q.motion[0][q_blk], &q.motion[1][q_blk]];

    match num_lists {
        0 => false,
        1 => {
            let p = if p0.is_used() { p0 } else { p1 };
            let q = if q0.is_used() { q0 } else { q1 };

            !p.same_reference(q) || far_apart(p, q)
        }
        _ => {
            let direct = p0.same_reference(q0) && p1.same_reference(q1);
            let crossed = p0.same_reference(q1) && p1.same_reference(q0);

            if !direct && !crossed {
                return true;
            }

            let direct_far = far_apart(p0, q0) || far_apart(p1, q1);
            let crossed_far = far_apart(p0, q1) || far_apart(p1, q0);

            if p0.same_reference(p1) {
                // Both pairings are valid when both lists use the same picture.
                direct_far && crossed_far
            } else if direct {
                direct_far
            } else {
                crossed_far
            }
        }
    }
}

/// Returns the bS of the edge between 4x4 block `p_blk` of `p` and 4x4 block `q_blk` of `q`.
///
/// `mb_edge` is set when `p` and `q` are different macroblocks.
pub(super) fn boundary_strength(
    p: &MacroblockRecord,
    p_blk: usize,
    q: &MacroblockRecord,
    q_blk: usize,
    mb_edge: bool,
) -> u8 {
    if p.mb_type.is_intra() || q.mb_type.is_intra() {
        return if mb_edge { 4 } else { 3 };
    }

    if p.nc[p_blk] > 0 || q.nc[q_blk] > 0 {
        return 2;
    }

    if motion_differs(p, p_blk, q, q_blk) {
        1
    } else {
        0
    }
}
