// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Helpers for comparing `frame_num` values across wraparound.

/// Returns whether `frame_num` skips over at least one frame number after `prev_ref_frame_num`.
///
/// A repeated `frame_num` (non-reference pictures following a reference one) is not a gap.
pub fn detect_gap(frame_num: u32, prev_ref_frame_num: u32, max_frame_num: u32) -> bool {
    frame_num != prev_ref_frame_num && frame_num != (prev_ref_frame_num + 1) % max_frame_num
}

/// Returns `FrameNumWrap` (8-27) of a short-term frame relative to `current_frame_num`.
pub fn unwrap_frame_num(frame_num: u32, current_frame_num: u32, max_frame_num: u32) -> i32 {
    if frame_num > current_frame_num {
        frame_num as i32 - max_frame_num as i32
    } else {
        frame_num as i32
    }
}

/// Returns `(frame_num - difference) mod max_frame_num`.
///
/// `difference` must be lower than `max_frame_num`.
pub fn frame_num_minus(frame_num: u32, difference: u32, max_frame_num: u32) -> u32 {
    (frame_num + max_frame_num - difference) % max_frame_num
}

/// Iterates over the frame numbers skipped between `prev_ref_frame_num` and `frame_num`, both
/// excluded, in decoding order.
///
/// At most `max_frame_num - 1` values are produced, even if `frame_num` is out of range.
pub fn missing_frame_nums(
    frame_num: u32,
    prev_ref_frame_num: u32,
    max_frame_num: u32,
) -> impl Iterator<Item = u32> {
    (1..max_frame_num)
        .map(move |i| (prev_ref_frame_num + i) % max_frame_num)
        .take_while(move |&missing| missing != frame_num)
}

#[cfg(test)]
mod tests {
    use super::detect_gap;
    use super::frame_num_minus;
    use super::missing_frame_nums;
    use super::unwrap_frame_num;

    #[test]
    fn gaps() {
        assert!(!detect_gap(3, 2, 16));
        assert!(!detect_gap(2, 2, 16));
        assert!(!detect_gap(0, 15, 16));
        assert!(detect_gap(4, 2, 16));
        assert!(detect_gap(1, 15, 16));
    }

    #[test]
    fn unwrapping() {
        assert_eq!(unwrap_frame_num(5, 7, 16), 5);
        assert_eq!(unwrap_frame_num(7, 7, 16), 7);
        assert_eq!(unwrap_frame_num(14, 2, 16), -2);
    }

    #[test]
    fn subtraction_wraps() {
        assert_eq!(frame_num_minus(5, 1, 16), 4);
        assert_eq!(frame_num_minus(1, 3, 16), 14);
    }

    #[test]
    fn missing_numbers_wrap() {
        let missing: Vec<u32> = missing_frame_nums(2, 13, 16).collect();
        assert_eq!(missing, vec![14, 15, 0, 1]);

        assert_eq!(missing_frame_nums(3, 2, 16).count(), 0);
    }

    #[test]
    fn missing_numbers_bounded() {
        // A frame_num that never comes up stops after one full cycle.
        let missing: Vec<u32> = missing_frame_nums(20, 1, 16).collect();
        assert_eq!(missing.len(), 15);
        assert_eq!(missing.first(), Some(&2));
        assert_eq!(missing.last(), Some(&0));
    }
}
