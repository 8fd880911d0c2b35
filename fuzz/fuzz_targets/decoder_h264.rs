#![no_main]

use cros_h264::codec::h264::picture::MbType;
use cros_h264::codec::h264::syntax::MaxLongTermFrameIdx;
use cros_h264::codec::h264::syntax::NalInfo;
use cros_h264::codec::h264::syntax::RefPicMarkingOp;
use cros_h264::codec::h264::syntax::SliceHeader;
use cros_h264::decoder::h264::DecoderConfig;
use cros_h264::decoder::h264::H264Decoder;
use cros_h264::Resolution;
use libfuzzer_sys::fuzz_target;

/// Turns 4 input bytes into a marking operation.
fn marking_op(b: &[u8]) -> RefPicMarkingOp {
    let a = u32::from(b[1]);
    let c = u32::from(b[2]);

    match b[0] % 6 {
        0 => RefPicMarkingOp::RemoveShort {
            difference_of_pic_nums: a,
        },
        1 => RefPicMarkingOp::RemoveLong {
            long_term_pic_num: a,
        },
        2 => RefPicMarkingOp::ConvertShortToLong {
            difference_of_pic_nums: a,
            long_term_frame_idx: c,
        },
        3 => RefPicMarkingOp::TruncateLong {
            max_long_term_frame_idx: MaxLongTermFrameIdx::from_value_plus1(c),
        },
        4 => RefPicMarkingOp::ClearAll,
        _ => RefPicMarkingOp::MarkCurrentAsLong {
            long_term_frame_idx: c,
        },
    }
}

fuzz_target!(|data: &[u8]| {
    let mut decoder = H264Decoder::new(DecoderConfig {
        resolution: Resolution {
            width: 48,
            height: 32,
        },
        num_frames: 4,
    });

    // Each picture is described by 8 bytes, optionally followed by marking operations.
    let mut data = data;
    while data.len() >= 8 {
        let (pic, rest) = data.split_at(8);
        data = rest;

        let nal = NalInfo {
            nal_ref_idc: pic[0] & 3,
            is_idr: pic[0] & 4 != 0,
        };

        let num_ops = usize::from(pic[7] >> 5);
        let ref_pic_marking = if pic[7] & 0x10 != 0 && data.len() >= num_ops * 4 {
            let (ops, rest) = data.split_at(num_ops * 4);
            data = rest;
            Some(ops.chunks_exact(4).map(marking_op).collect())
        } else {
            None
        };

        let hdr = SliceHeader {
            frame_num: u16::from(pic[1] & 0x1f),
            pic_order_cnt_lsb: u16::from(pic[2] & 0x0f),
            pic_order_cnt_type: (pic[0] >> 3) % 4,
            max_num_ref_frames: u32::from(pic[3] % 17),
            long_term_reference_flag: pic[0] & 0x80 != 0,
            slice_alpha_c0_offset_div2: (pic[4] % 13) as i8 - 6,
            slice_beta_offset_div2: (pic[5] % 13) as i8 - 6,
            disable_deblocking_filter_idc: pic[6] % 3,
            ref_pic_marking,
            ..Default::default()
        };
        let qp = i32::from(pic[6] >> 2) % 52;
        let mb_type = MbType::n(pic[7] % 4).unwrap_or_default();

        let _ = decoder.decode_picture(nal, &[hdr], |_, slice| {
            for y in 0..slice.rows.planes[0].num_rows() {
                for (x, sample) in slice.rows.planes[0].row_mut(y).iter_mut().enumerate() {
                    *sample = ((x * 7 + y * 13) as u8) ^ pic[1];
                }
            }
            for mb in slice.rows.mbs.iter_mut() {
                mb.qp = [qp; 3];
                mb.mb_type = mb_type;
            }
            Ok(())
        });

        while decoder.next_decoded_frame().is_some() {}
    }
});
