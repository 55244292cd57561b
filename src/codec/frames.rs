//! Chunk ⇄ frame ⇄ period conversion
//!
//! Both directions are lazy iterator adapters. Frames are `Bytes` slices
//! of the chunk they came from, so unpacking never copies audio data.

use bytes::{Bytes, BytesMut};

/// Iterator over the frames of a single chunk
pub struct UnpackFrames {
    chunk: Bytes,
    frame_size: usize,
    offset: usize,
}

impl Iterator for UnpackFrames {
    type Item = Bytes;

    fn next(&mut self) -> Option<Bytes> {
        let end = self.offset.checked_add(self.frame_size)?;
        // A trailing partial window is dropped
        if end > self.chunk.len() {
            return None;
        }
        let frame = self.chunk.slice(self.offset..end);
        self.offset = end;
        Some(frame)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.chunk.len() - self.offset) / self.frame_size;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for UnpackFrames {}

/// Slice `chunk` into consecutive, non-overlapping frames of `frame_size` bytes.
///
/// # Panics
///
/// Panics if `frame_size` is zero.
pub fn unpack_frames(chunk: Bytes, frame_size: usize) -> UnpackFrames {
    assert!(frame_size > 0, "frame size must be non-zero");
    UnpackFrames {
        chunk,
        frame_size,
        offset: 0,
    }
}

/// Iterator adapter that joins frames into periods
pub struct PackFrames<I> {
    frames: I,
    period_size: usize,
    period: BytesMut,
    count: usize,
}

impl<I> PackFrames<I> {
    /// Frames accumulated towards the next period
    pub fn pending(&self) -> usize {
        self.count
    }

    /// Period size in frames
    pub fn period_size(&self) -> usize {
        self.period_size
    }
}

impl<I> Iterator for PackFrames<I>
where
    I: Iterator<Item = Bytes>,
{
    type Item = Bytes;

    fn next(&mut self) -> Option<Bytes> {
        for frame in self.frames.by_ref() {
            self.period.extend_from_slice(&frame);
            self.count += 1;
            if self.count == self.period_size {
                self.count = 0;
                return Some(self.period.split().freeze());
            }
        }
        // Partial periods at end of stream are not flushed
        None
    }
}

/// Join every `period_size` frames of `frames` into one period.
///
/// # Panics
///
/// Panics if `period_size` is zero.
pub fn pack_frames<I>(frames: I, period_size: usize) -> PackFrames<I::IntoIter>
where
    I: IntoIterator<Item = Bytes>,
{
    assert!(period_size > 0, "period size must be non-zero");
    PackFrames {
        frames: frames.into_iter(),
        period_size,
        period: BytesMut::with_capacity(period_size * crate::constants::FRAME_SIZE),
        count: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{CHUNK_SIZE, FRAME_SIZE};
    use proptest::prelude::*;

    fn ramp(len: usize) -> Bytes {
        (0..len).map(|i| (i % 251) as u8).collect::<Vec<u8>>().into()
    }

    #[test]
    fn test_unpack_full_chunk() {
        let chunk = ramp(CHUNK_SIZE);
        let frames: Vec<Bytes> = unpack_frames(chunk.clone(), FRAME_SIZE).collect();

        assert_eq!(frames.len(), 256);
        assert!(frames.iter().all(|f| f.len() == 4));
        assert_eq!(frames.concat(), chunk.to_vec());
    }

    #[test]
    fn test_unpack_discards_trailing_partial() {
        let frames: Vec<Bytes> = unpack_frames(ramp(10), 4).collect();
        assert_eq!(frames.len(), 2);
        assert_eq!(&frames[1][..], &[4, 5, 6, 7]);

        assert_eq!(unpack_frames(ramp(3), 4).count(), 0);
        assert_eq!(unpack_frames(Bytes::new(), 4).len(), 0);
    }

    #[test]
    fn test_pack_periods_in_order() {
        let frames = unpack_frames(ramp(CHUNK_SIZE), FRAME_SIZE);
        let periods: Vec<Bytes> = pack_frames(frames, 64).collect();

        assert_eq!(periods.len(), 4);
        assert!(periods.iter().all(|p| p.len() == 64 * FRAME_SIZE));
        assert_eq!(periods.concat(), ramp(CHUNK_SIZE).to_vec());
    }

    #[test]
    fn test_pack_does_not_flush_partial_period() {
        let frames = unpack_frames(ramp(4 * 10), 4);
        let mut packer = pack_frames(frames, 4);

        assert!(packer.next().is_some());
        assert!(packer.next().is_some());
        assert!(packer.next().is_none());
        assert_eq!(packer.pending(), 2);
    }

    #[test]
    fn test_pack_is_lazy_over_infinite_stream() {
        let frames = std::iter::repeat(Bytes::from_static(&[1, 2, 3, 4]));
        let period = pack_frames(frames, 3).next().unwrap();
        assert_eq!(&period[..], &[1, 2, 3, 4, 1, 2, 3, 4, 1, 2, 3, 4]);
    }

    proptest! {
        #[test]
        fn prop_pack_yields_len_over_period(periods in 1usize..20, period_size in 1usize..16) {
            let n = periods * period_size;
            let frames: Vec<Bytes> = (0..n)
                .map(|i| Bytes::from((i as u32).to_le_bytes().to_vec()))
                .collect();

            let packed: Vec<Bytes> = pack_frames(frames.clone(), period_size).collect();

            prop_assert_eq!(packed.len(), periods);
            for (i, period) in packed.iter().enumerate() {
                let expected = frames[i * period_size..(i + 1) * period_size].concat();
                prop_assert_eq!(&period[..], &expected[..]);
            }
        }

        #[test]
        fn prop_unpack_concatenates_back(data in proptest::collection::vec(any::<u8>(), 0..2048)) {
            let chunk = Bytes::from(data.clone());
            let frames: Vec<Bytes> = unpack_frames(chunk, FRAME_SIZE).collect();
            let whole = data.len() / FRAME_SIZE * FRAME_SIZE;

            prop_assert_eq!(frames.len(), data.len() / FRAME_SIZE);
            prop_assert_eq!(frames.concat(), data[..whole].to_vec());
        }
    }
}
