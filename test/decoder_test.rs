// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

#[cfg(test)]
mod tests {
    use cros_h264::codec::h264::picture::MbType;
    use cros_h264::codec::h264::syntax::HeaderError;
    use cros_h264::codec::h264::syntax::NalInfo;
    use cros_h264::codec::h264::syntax::RefPicMarkingOp;
    use cros_h264::codec::h264::syntax::SliceHeader;
    use cros_h264::decoder::h264::DecoderConfig;
    use cros_h264::decoder::h264::H264Decoder;
    use cros_h264::decoder::h264::SliceRows;
    use cros_h264::decoder::DecodeError;
    use cros_h264::Resolution;

    const IDR: NalInfo = NalInfo {
        nal_ref_idc: 3,
        is_idr: true,
    };
    const REF: NalInfo = NalInfo {
        nal_ref_idc: 2,
        is_idr: false,
    };
    const NON_REF: NalInfo = NalInfo {
        nal_ref_idc: 0,
        is_idr: false,
    };

    fn decoder() -> H264Decoder {
        let _ = env_logger::try_init();

        H264Decoder::new(DecoderConfig {
            resolution: Resolution {
                width: 32,
                height: 16,
            },
            num_frames: 2,
        })
    }

    /// A header with MaxFrameNum and MaxPicOrderCntLsb of 16.
    fn header(frame_num: u16, pic_order_cnt_lsb: u16, max_num_ref_frames: u32) -> SliceHeader {
        SliceHeader {
            frame_num,
            pic_order_cnt_lsb,
            max_num_ref_frames,
            ..Default::default()
        }
    }

    fn skip_slice(_: &SliceHeader, _: &mut SliceRows) -> anyhow::Result<()> {
        Ok(())
    }

    fn decode(decoder: &mut H264Decoder, nal: NalInfo, hdr: SliceHeader) -> i32 {
        decoder.decode_picture(nal, &[hdr], skip_slice).unwrap();
        decoder.next_decoded_frame().unwrap().pic_order_cnt
    }

    fn short_term_frame_nums(decoder: &H264Decoder) -> Vec<u32> {
        decoder
            .dpb()
            .short_term_refs()
            .map(|pic| pic.frame_num)
            .collect()
    }

    #[test]
    fn single_reference_gop() {
        let mut decoder = decoder();

        decode(&mut decoder, IDR, header(0, 0, 1));
        assert_eq!(short_term_frame_nums(&decoder), vec![0]);

        for frame_num in 1..=4 {
            let poc = decode(&mut decoder, REF, header(frame_num, frame_num * 2, 1));
            assert_eq!(poc, i32::from(frame_num) * 2);

            assert_eq!(short_term_frame_nums(&decoder), vec![u32::from(frame_num)]);
            assert_eq!(decoder.dpb().num_long_term(), 0);
        }
    }

    #[test]
    fn frames_are_recycled() {
        let mut decoder = decoder();
        assert_eq!(decoder.num_free_frames(), 2);

        decode(&mut decoder, IDR, header(0, 0, 1));
        assert_eq!(decoder.num_free_frames(), 1);

        // Each new picture evicts the previous one from the DPB.
        for frame_num in 1..8 {
            decode(&mut decoder, REF, header(frame_num, frame_num * 2, 1));
            assert_eq!(decoder.num_free_frames(), 1);
        }

        // Frames kept by the client are not recycled.
        decoder
            .decode_picture(REF, &[header(8, 0, 1)], skip_slice)
            .unwrap();
        let kept = decoder.next_decoded_frame().unwrap();
        decode(&mut decoder, REF, header(9, 2, 1));
        assert_eq!(decoder.num_free_frames(), 0);

        drop(kept);
        assert_eq!(decoder.num_free_frames(), 1);
    }

    #[test]
    fn output_in_decoding_order_with_poc() {
        let mut decoder = decoder();

        let pics = [
            (IDR, header(0, 0, 2)),
            (REF, header(1, 6, 2)),
            (NON_REF, header(2, 2, 2)),
            (NON_REF, header(2, 4, 2)),
            (REF, header(2, 12, 2)),
        ];
        for (nal, hdr) in pics {
            decoder.decode_picture(nal, &[hdr], skip_slice).unwrap();
        }

        let pocs: Vec<i32> = std::iter::from_fn(|| decoder.next_decoded_frame())
            .map(|pic| pic.pic_order_cnt)
            .collect();
        assert_eq!(pocs, vec![0, 6, 2, 4, 12]);
        assert_eq!(short_term_frame_nums(&decoder), vec![1, 2]);
    }

    #[test]
    fn frame_num_gap_inserts_placeholders() {
        let mut decoder = decoder();

        decode(&mut decoder, IDR, header(0, 0, 4));
        decode(&mut decoder, REF, header(1, 2, 4));
        decode(&mut decoder, REF, header(4, 8, 4));

        let placeholders: Vec<u32> = decoder
            .dpb()
            .short_term_refs()
            .filter(|pic| pic.nonexisting)
            .map(|pic| pic.frame_num)
            .collect();
        assert_eq!(placeholders, vec![2, 3]);
        assert!(decoder
            .dpb()
            .short_term_refs()
            .all(|pic| pic.nonexisting == pic.frame().is_none()));
        assert_eq!(short_term_frame_nums(&decoder), vec![1, 2, 3, 4]);

        // Placeholders are never used for prediction.
        let list: Vec<u32> = decoder
            .dpb()
            .build_ref_pic_list_p(5)
            .iter()
            .map(|pic| pic.frame_num)
            .collect();
        assert_eq!(list, vec![4, 1]);

        decode(&mut decoder, REF, header(5, 10, 4));
        assert_eq!(short_term_frame_nums(&decoder), vec![2, 3, 4, 5]);
    }

    #[test]
    fn frame_num_gap_across_wraparound() {
        let mut decoder = decoder();
        let hdr = |frame_num| SliceHeader {
            pic_order_cnt_type: 2,
            ..header(frame_num, 0, 2)
        };

        decode(&mut decoder, IDR, hdr(0));
        for frame_num in 1..=14 {
            decode(&mut decoder, REF, hdr(frame_num));
        }
        assert_eq!(short_term_frame_nums(&decoder), vec![13, 14]);

        // 15 and 0 are missing.
        let poc = decode(&mut decoder, REF, hdr(1));
        assert_eq!(poc, 2 * (16 + 1));
        assert_eq!(short_term_frame_nums(&decoder), vec![0, 1]);
        assert!(decoder.dpb().short_term(0).unwrap().nonexisting);
        assert_eq!(decoder.dpb().short_term(1).unwrap().abs_frame_num(), 17);
    }

    #[test]
    fn no_gap_before_first_reference() {
        let mut decoder = decoder();

        decode(&mut decoder, REF, header(5, 0, 4));
        assert_eq!(short_term_frame_nums(&decoder), vec![5]);
        assert!(decoder.dpb().short_term_refs().all(|pic| !pic.nonexisting));
    }

    #[test]
    fn long_term_marking() {
        let mut decoder = decoder();

        decode(&mut decoder, IDR, header(0, 0, 2));
        decode(
            &mut decoder,
            REF,
            SliceHeader {
                ref_pic_marking: Some(vec![RefPicMarkingOp::MarkCurrentAsLong {
                    long_term_frame_idx: 0,
                }]),
                ..header(1, 2, 2)
            },
        );

        let long = decoder.dpb().long_term(0).unwrap();
        assert_eq!(long.frame_num, 1);
        assert_eq!(long.pic_order_cnt, 2);
        assert!(decoder.dpb().short_term(1).is_none());
        assert_eq!(short_term_frame_nums(&decoder), vec![0]);
    }

    #[test]
    fn clear_all_restarts_poc() {
        let mut decoder = decoder();

        decode(&mut decoder, IDR, header(0, 0, 2));
        decode(&mut decoder, REF, header(1, 4, 2));
        let poc = decode(
            &mut decoder,
            REF,
            SliceHeader {
                ref_pic_marking: Some(vec![RefPicMarkingOp::ClearAll]),
                ..header(2, 8, 2)
            },
        );
        assert_eq!(poc, 8);
        assert_eq!(short_term_frame_nums(&decoder), vec![0]);
        assert_eq!(decoder.poc_state().prev_ref_frame_num, 0);
        assert_eq!(decoder.poc_state().prev_pic_order_cnt_lsb, 8);

        // The next picture follows frame_num 0, no gap.
        decode(&mut decoder, REF, header(1, 12, 2));
        assert_eq!(short_term_frame_nums(&decoder), vec![0, 1]);
        assert!(decoder.dpb().short_term_refs().all(|pic| !pic.nonexisting));
    }

    #[test]
    fn reset_clears_state() {
        let mut decoder = decoder();

        decode(&mut decoder, IDR, header(0, 0, 2));
        decode(&mut decoder, REF, header(1, 4, 2));
        decoder
            .decode_picture(REF, &[header(2, 8, 2)], skip_slice)
            .unwrap();

        decoder.reset();
        assert!(decoder.dpb().is_empty());
        assert_eq!(decoder.poc_state(), &Default::default());
        assert!(decoder.next_decoded_frame().is_none());

        assert_eq!(decode(&mut decoder, IDR, header(0, 2, 2)), 2);
    }

    #[test]
    fn output_frames_are_deblocked() {
        let mut decoder = decoder();

        decoder
            .decode_picture(IDR, &[header(0, 0, 1)], |_, slice| {
                for y in 0..slice.rows.planes[0].num_rows() {
                    let row = slice.rows.planes[0].row_mut(y);
                    row[..16].fill(60);
                    row[16..].fill(70);
                }
                for mb in slice.rows.mbs.iter_mut() {
                    mb.qp = [30; 3];
                }
                slice.rows.mbs[0].mb_type = MbType::Intra;
                Ok(())
            })
            .unwrap();

        let pic = decoder.next_decoded_frame().unwrap();
        let frame = pic.frame().unwrap();
        for y in 0..16 {
            assert_eq!(&frame.planes[0].row(y)[14..18], &[60, 63, 68, 70]);
        }
    }

    #[test]
    fn sliding_window_bounds_references() {
        for max_num_ref_frames in [1, 2, 4] {
            let mut decoder = decoder();

            decode(&mut decoder, IDR, header(0, 0, max_num_ref_frames));
            for i in 1..40u16 {
                // Skip a frame number every fifth picture.
                let frame_num = (i + i / 5) % 16;
                decode(
                    &mut decoder,
                    REF,
                    header(frame_num, (2 * frame_num) % 16, max_num_ref_frames),
                );
                assert!(decoder.dpb().num_ref_frames() <= max_num_ref_frames as usize);
            }
        }
    }

    #[test]
    fn out_of_range_frame_num_is_fatal() {
        let mut decoder = decoder();

        let res = decoder.decode_picture(IDR, &[header(16, 0, 1)], skip_slice);
        assert!(matches!(
            res,
            Err(DecodeError::Header(HeaderError::FrameNumOutOfRange { .. }))
        ));
        assert!(decoder.dpb().is_empty());

        decode(&mut decoder, IDR, header(0, 0, 4));
        decode(&mut decoder, REF, header(1, 2, 4));

        // Would otherwise look like a gap that never closes.
        let res = decoder.decode_picture(REF, &[header(20, 4, 4)], skip_slice);
        assert!(matches!(
            res,
            Err(DecodeError::Header(HeaderError::FrameNumOutOfRange {
                frame_num: 20,
                max_frame_num: 16
            }))
        ));
        assert_eq!(short_term_frame_nums(&decoder), vec![0, 1]);

        // Decoding carries on from the last valid picture.
        decode(&mut decoder, REF, header(2, 4, 4));
        assert_eq!(short_term_frame_nums(&decoder), vec![0, 1, 2]);
        assert!(decoder.dpb().short_term_refs().all(|pic| !pic.nonexisting));
    }
}
