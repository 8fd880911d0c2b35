// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The in-loop deblocking filter of 8.7, for frames with 4:2:0 8-bit samples.
//!
//! Macroblocks are processed in raster order. Within a macroblock the vertical edges are filtered
//! left to right, then the horizontal ones top to bottom, for each plane. The boundary strength
//! of each 4x4 block edge is derived from the macroblock records only, so it is computed once per
//! edge and shared by the three planes.

mod strength;
mod tables;

use crate::codec::h264::picture::MacroblockRecord;
use crate::video_frame::FrameBuffer;
use crate::video_frame::Plane;
use crate::video_frame::Y_PLANE;

use strength::boundary_strength;
use tables::ALPHA;
use tables::BETA;
use tables::TC0;

/// Orientation of the edges being filtered.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Direction {
    /// Edges between horizontally adjacent blocks.
    Vertical,
    /// Edges between vertically adjacent blocks.
    Horizontal,
}

/// Boundary strengths of the four luma edges of a macroblock in one direction, indexed by edge,
/// then by 4-sample segment along the edge.
type EdgeStrengths = [[u8; 4]; 4];

/// Whether the edge between `cur` and its neighbour `other` is filtered.
fn filter_across(cur: &MacroblockRecord, other: &MacroblockRecord) -> bool {
    !(cur.disable_deblocking_filter_idc == 2 && cur.slice_id != other.slice_id)
}

/// Derives the boundary strengths of the luma edges of `cur` in direction `dir`. `neighbour` is the
/// macroblock on the other side of edge 0, if that edge is filtered at all.
fn edge_strengths(
    cur: &MacroblockRecord,
    neighbour: Option<&MacroblockRecord>,
    dir: Direction,
) -> EdgeStrengths {
    let mut strengths = EdgeStrengths::default();

    for (edge, edge_strengths) in strengths.iter_mut().enumerate() {
        if edge % 2 == 1 && cur.transform_8x8_used {
            continue;
        }

        let p = match (edge, neighbour) {
            (0, Some(neighbour)) => neighbour,
            (0, None) => continue,
            _ => cur,
        };

        for (segment, bs) in edge_strengths.iter_mut().enumerate() {
            let (p_blk, q_blk) = match dir {
                Direction::Vertical => (segment * 4 + (edge + 3) % 4, segment * 4 + edge),
                Direction::Horizontal => (((edge + 3) % 4) * 4 + segment, edge * 4 + segment),
            };

            *bs = boundary_strength(p, p_blk, cur, q_blk, edge == 0);
        }
    }

    strengths
}

fn clip1(x: i32) -> u8 {
    x.clamp(0, 255) as u8
}

/// Thresholds used to filter one edge of one plane.
#[derive(Copy, Clone, Debug)]
struct EdgeParams {
    alpha: i32,
    beta: i32,
    index_a: usize,
}

impl EdgeParams {
    fn new(p: &MacroblockRecord, q: &MacroblockRecord, plane: usize) -> Self {
        let qp_avg = (p.qp[plane] + q.qp[plane] + 1) >> 1;
        let index_a = (qp_avg + i32::from(q.alpha_c0_offset)).clamp(0, 51) as usize;
        let index_b = (qp_avg + i32::from(q.beta_offset)).clamp(0, 51) as usize;

        Self {
            alpha: i32::from(ALPHA[index_a]),
            beta: i32::from(BETA[index_b]),
            index_a,
        }
    }

    fn tc0(&self, bs: u8) -> i32 {
        i32::from(TC0[self.index_a][usize::from(bs) - 1])
    }
}

/// Filters the luma samples across one edge on one line, as per 8.7.2.3 and 8.7.2.4.
///
/// `q0` is the index of the first sample after the edge and `step` the distance between two
/// consecutive samples across the edge.
fn filter_luma_line(s: &mut [u8], q0: usize, step: usize, bs: u8, params: &EdgeParams) {
    let sample = |i: isize| i32::from(s[(q0 as isize + i * step as isize) as usize]);

    let (p0, p1, p2) = (sample(-1), sample(-2), sample(-3));
    let (q0_, q1, q2) = (sample(0), sample(1), sample(2));
    let EdgeParams { alpha, beta, .. } = *params;

    if (p0 - q0_).abs() >= alpha || (p1 - p0).abs() >= beta || (q1 - q0_).abs() >= beta {
        return;
    }

    let ap = (p2 - p0).abs() < beta;
    let aq = (q2 - q0_).abs() < beta;

    if bs == 4 {
        let strong = (p0 - q0_).abs() < (alpha >> 2) + 2;
        let p3 = sample(-4);
        let q3 = sample(3);

        if ap && strong {
            s[q0 - step] = clip1((p2 + 2 * p1 + 2 * p0 + 2 * q0_ + q1 + 4) >> 3);
            s[q0 - 2 * step] = clip1((p2 + p1 + p0 + q0_ + 2) >> 2);
            s[q0 - 3 * step] = clip1((2 * p3 + 3 * p2 + p1 + p0 + q0_ + 4) >> 3);
        } else {
            s[q0 - step] = clip1((2 * p1 + p0 + q1 + 2) >> 2);
        }

        if aq && strong {
            s[q0] = clip1((p1 + 2 * p0 + 2 * q0_ + 2 * q1 + q2 + 4) >> 3);
            s[q0 + step] = clip1((p0 + q0_ + q1 + q2 + 2) >> 2);
            s[q0 + 2 * step] = clip1((2 * q3 + 3 * q2 + q1 + q0_ + p0 + 4) >> 3);
        } else {
            s[q0] = clip1((2 * q1 + q0_ + p1 + 2) >> 2);
        }
    } else {
        let tc0 = params.tc0(bs);
        let tc = tc0 + i32::from(ap) + i32::from(aq);
        let delta = ((((q0_ - p0) << 2) + (p1 - q1) + 4) >> 3).clamp(-tc, tc);

        s[q0 - step] = clip1(p0 + delta);
        s[q0] = clip1(q0_ - delta);

        if ap {
            s[q0 - 2 * step] =
                clip1(p1 + ((p2 + ((p0 + q0_ + 1) >> 1) - (p1 << 1)) >> 1).clamp(-tc0, tc0));
        }
        if aq {
            s[q0 + step] =
                clip1(q1 + ((q2 + ((p0 + q0_ + 1) >> 1) - (q1 << 1)) >> 1).clamp(-tc0, tc0));
        }
    }
}

/// Filters the chroma samples across one edge on one line. Only `p0` and `q0` are modified.
fn filter_chroma_line(s: &mut [u8], q0: usize, step: usize, bs: u8, params: &EdgeParams) {
    let p0 = i32::from(s[q0 - step]);
    let p1 = i32::from(s[q0 - 2 * step]);
    let q0_ = i32::from(s[q0]);
    let q1 = i32::from(s[q0 + step]);
    let EdgeParams { alpha, beta, .. } = *params;

    if (p0 - q0_).abs() >= alpha || (p1 - p0).abs() >= beta || (q1 - q0_).abs() >= beta {
        return;
    }

    if bs == 4 {
        s[q0 - step] = clip1((2 * p1 + p0 + q1 + 2) >> 2);
        s[q0] = clip1((2 * q1 + q0_ + p1 + 2) >> 2);
    } else {
        let tc = params.tc0(bs) + 1;
        let delta = ((((q0_ - p0) << 2) + (p1 - q1) + 4) >> 3).clamp(-tc, tc);

        s[q0 - step] = clip1(p0 + delta);
        s[q0] = clip1(q0_ - delta);
    }
}

/// Filters the edges of macroblock (`mb_x`, `mb_y`) of `plane` in direction `dir`.
#[allow(clippy::too_many_arguments)]
fn filter_mb_edges(
    plane: &mut Plane,
    plane_idx: usize,
    mb_x: usize,
    mb_y: usize,
    dir: Direction,
    strengths: &EdgeStrengths,
    cur: &MacroblockRecord,
    neighbour: Option<&MacroblockRecord>,
) {
    let is_luma = plane_idx == Y_PLANE;
    let mb_size = if is_luma { 16 } else { 8 };
    // Chroma edges 0 and 1 take their strengths from luma edges 0 and 2.
    let edges: &[(usize, usize)] = if is_luma {
        &[(0, 0), (1, 4), (2, 8), (3, 12)]
    } else {
        &[(0, 0), (2, 4)]
    };
    let samples_per_segment = mb_size / 4;
    let stride = plane.stride;

    for &(luma_edge, offset) in edges {
        let edge_strengths = &strengths[luma_edge];
        if edge_strengths.iter().all(|&bs| bs == 0) {
            continue;
        }

        let p = match (luma_edge, neighbour) {
            (0, Some(neighbour)) => neighbour,
            (0, None) => continue,
            _ => cur,
        };
        let params = EdgeParams::new(p, cur, plane_idx);

        for line in 0..mb_size {
            let bs = edge_strengths[line / samples_per_segment];
            if bs == 0 {
                continue;
            }

            let (q0, step) = match dir {
                Direction::Vertical => (
                    (mb_y * mb_size + line) * stride + mb_x * mb_size + offset,
                    1,
                ),
                Direction::Horizontal => (
                    (mb_y * mb_size + offset) * stride + mb_x * mb_size + line,
                    stride,
                ),
            };

            if is_luma {
                filter_luma_line(&mut plane.data, q0, step, bs, &params);
            } else {
                filter_chroma_line(&mut plane.data, q0, step, bs, &params);
            }
        }
    }
}

/// Applies the deblocking filter to the whole of `frame`, in place.
///
/// The macroblock records of `frame` must be complete. Edges on the picture boundary are never
/// filtered.
pub fn deblock_frame(frame: &mut FrameBuffer) {
    let width_in_mbs = frame.width_in_mbs();
    let height_in_mbs = frame.height_in_mbs();
    let mbs = &frame.mbs;
    let planes = &mut frame.planes;

    for mb_y in 0..height_in_mbs {
        for mb_x in 0..width_in_mbs {
            let cur = &mbs[mb_y * width_in_mbs + mb_x];
            if cur.disable_deblocking_filter_idc == 1 {
                continue;
            }

            let left = (mb_x > 0)
                .then(|| &mbs[mb_y * width_in_mbs + mb_x - 1])
                .filter(|left| filter_across(cur, left));
            let top = (mb_y > 0)
                .then(|| &mbs[(mb_y - 1) * width_in_mbs + mb_x])
                .filter(|top| filter_across(cur, top));

            let vertical = edge_strengths(cur, left, Direction::Vertical);
            let horizontal = edge_strengths(cur, top, Direction::Horizontal);

            log::trace!(
                "MB ({}, {}) bS vertical {:?} horizontal {:?}",
                mb_x,
                mb_y,
                vertical,
                horizontal
            );

            for (plane_idx, plane) in planes.iter_mut().enumerate() {
                filter_mb_edges(
                    plane,
                    plane_idx,
                    mb_x,
                    mb_y,
                    Direction::Vertical,
                    &vertical,
                    cur,
                    left,
                );
                filter_mb_edges(
                    plane,
                    plane_idx,
                    mb_x,
                    mb_y,
                    Direction::Horizontal,
                    &horizontal,
                    cur,
                    top,
                );
            }
        }
    }
}
