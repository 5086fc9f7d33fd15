//! Property-based tests for the encoder and the acknowledgement plan.

use bytes::Bytes;
use epd_core::raster::packed_len;
use epd_core::transfer::AckSchedule;
use epd_core::{
    DitherMode, Framer, Opcode, PixelBuffer, Plane, Rgb, TransferJob, dither, encode_image, pack,
};
use proptest::prelude::*;

fn pixels() -> impl Strategy<Value = PixelBuffer> {
    (1u32..24, 1u32..24).prop_flat_map(|(w, h)| {
        prop::collection::vec(any::<u8>(), (w * h * 4) as usize)
            .prop_map(move |data| PixelBuffer::new(w, h, data).unwrap())
    })
}

fn mode() -> impl Strategy<Value = DitherMode> {
    prop::sample::select(DitherMode::ALL.to_vec())
}

proptest! {
    #[test]
    fn packed_length_is_ceil_of_pixels(px in pixels(), mode in mode()) {
        let image = encode_image(&px, mode, None);
        let expected = packed_len(px.pixel_count());
        prop_assert_eq!(image.bw.len(), expected);
        if let Some(red) = &image.red {
            prop_assert_eq!(red.len(), expected);
        }
        prop_assert_eq!(image.red.is_some(), mode.is_tri_color());
    }

    #[test]
    fn dither_output_stays_in_palette(px in pixels(), mode in mode(), threshold in proptest::option::of(any::<u8>())) {
        let out = dither(&px, mode, threshold);
        prop_assert_eq!(out.width(), px.width());
        prop_assert_eq!(out.height(), px.height());
        let palette = mode.palette();
        for color in out.pixels() {
            prop_assert!(palette.contains(color), "{:?} not in palette", color);
        }
    }

    #[test]
    fn zero_bits_count_ink_pixels(px in pixels(), mode in mode()) {
        let reduced = dither(&px, mode, None);
        for plane in [Plane::Bw, Plane::Red] {
            let packed = pack(&reduced, plane, false);
            let ink = reduced.pixels().filter(|&c| c == plane.ink()).count();
            let total_bits = packed.len() * 8;
            prop_assert_eq!(total_bits - packed.ones() as usize, ink);
        }
    }

    #[test]
    fn inversion_complements_every_byte(px in pixels()) {
        let reduced = dither(&px, DitherMode::TriColor, None);
        let plain = pack(&reduced, Plane::Red, false);
        let inverted = pack(&reduced, Plane::Red, true);
        prop_assert_eq!(&plain.inverted(), &inverted);
        for (a, b) in plain.bytes.iter().zip(inverted.bytes.iter()) {
            prop_assert_eq!(a ^ b, 0xFF);
        }
    }

    #[test]
    fn palette_images_survive_dithering(w in 1u32..16, h in 1u32..16, seed in prop::collection::vec(0usize..3, 256)) {
        let mut px = PixelBuffer::filled(w, h, Rgb::WHITE).unwrap();
        let colors = [Rgb::WHITE, Rgb::BLACK, Rgb::RED];
        for i in 0..px.pixel_count() {
            px.set_rgb(i, colors[seed[i % seed.len()]]);
        }
        let out = dither(&px, DitherMode::TriColor, None);
        prop_assert_eq!(out.as_bytes(), px.as_bytes());
    }

    #[test]
    fn acknowledged_writes_are_ceil_of_chunks(total in 1usize..500, every in 1usize..40) {
        let mut schedule = AckSchedule::new(total, every);
        let kinds: Vec<_> = (0..total).map(|i| schedule.next_kind(i)).collect();
        let acked = kinds.iter().filter(|k| k.is_acknowledged()).count();
        prop_assert_eq!(acked, total.div_ceil(every));
        prop_assert_eq!(acked, AckSchedule::acknowledged_total(total, every));
        prop_assert!(kinds[total - 1].is_acknowledged());
    }

    #[test]
    fn bulk_chunks_fit_the_mtu(len in 1usize..2000, mtu in 3usize..=255) {
        let mut framer = Framer::new(mtu).unwrap();
        let payload = Bytes::from(vec![0xA5; len]);
        let job = TransferJob::bulk(Opcode::SendData, payload.clone(), framer.max_payload(), 20).unwrap();
        let mut rebuilt = Vec::with_capacity(len);
        for chunk in job.chunks() {
            let frame = framer.frame(Opcode::SendData, &chunk).unwrap();
            prop_assert!(frame.len() <= mtu);
            rebuilt.extend_from_slice(&chunk);
        }
        prop_assert_eq!(job.chunk_count(), len.div_ceil(mtu - 1));
        prop_assert_eq!(Bytes::from(rebuilt), payload);
    }
}
