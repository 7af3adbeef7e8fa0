//! Fixed-size, fixed-hop framing over a buffer or an unbounded stream.

use crate::error::{Error, Result};

#[derive(Clone, Copy, Debug)]
pub struct FrameIterationOptions<'a> {
    pub samples: &'a [f32],
    pub frame_size: usize,
    pub hop_size: usize,
    pub sample_rate: f64,
    /// Zero-pad the trailing partial frame instead of dropping it. A short
    /// first frame is always emitted for non-empty input.
    pub pad_end: bool,
}

impl<'a> FrameIterationOptions<'a> {
    pub fn new(samples: &'a [f32], frame_size: usize, hop_size: usize, sample_rate: f64) -> Self {
        Self {
            samples,
            frame_size,
            hop_size,
            sample_rate,
            pad_end: true,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.frame_size == 0 {
            return Err(Error::invalid_input("frame size must be a positive integer"));
        }
        if self.hop_size == 0 {
            return Err(Error::invalid_input("hop size must be a positive integer"));
        }
        if !self.sample_rate.is_finite() || self.sample_rate <= 0.0 {
            return Err(Error::invalid_input("sample rate must be positive"));
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct FrameContext<'a> {
    pub frame: &'a [f32],
    pub start_sample: usize,
    /// Frame centre in seconds.
    pub time_sec: f64,
    pub frame_index: usize,
}

/// Walks `samples` from offset 0 and returns the number of frames visited.
///
/// The frame buffer handed to `callback` is reused between calls.
pub fn for_each_frame<F>(options: FrameIterationOptions<'_>, mut callback: F) -> Result<usize>
where
    F: FnMut(FrameContext<'_>),
{
    options.validate()?;
    let FrameIterationOptions {
        samples,
        frame_size,
        hop_size,
        sample_rate,
        pad_end,
    } = options;

    let mut frame = vec![0.0f32; frame_size];
    let mut frame_index = 0;
    let mut start = 0;

    loop {
        let end = (start + frame_size).min(samples.len());
        let available = end.saturating_sub(start);
        let partial = available < frame_size;

        // Unpadded walks still emit a short first frame of non-empty input.
        if partial && !pad_end && (frame_index > 0 || samples.is_empty()) {
            break;
        }
        if start >= samples.len() && frame_index > 0 {
            break;
        }

        frame.fill(0.0);
        if available > 0 {
            frame[..available].copy_from_slice(&samples[start..end]);
        }

        callback(FrameContext {
            frame: &frame,
            start_sample: start,
            time_sec: (start as f64 + frame_size as f64 / 2.0) / sample_rate,
            frame_index,
        });

        frame_index += 1;
        start += hop_size;
        if partial {
            break;
        }
    }

    Ok(frame_index)
}

/// Frames [`for_each_frame`] visits with `pad_end` set. Sizes must be nonzero.
pub fn padded_frame_count(length: usize, frame_size: usize, hop_size: usize) -> usize {
    if length < frame_size {
        return 1;
    }
    let full = (length - frame_size) / hop_size + 1;
    full + usize::from(full * hop_size < length)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScheduledFrame {
    pub start: u64,
    pub end: u64,
}

impl ScheduledFrame {
    pub fn len(&self) -> usize {
        (self.end - self.start) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }
}

/// Emits frame boundaries as samples arrive in arbitrarily sized chunks.
///
/// Frame starts are always whole multiples of the hop from the stream
/// origin; positions are absolute sample counts.
#[derive(Clone, Debug)]
pub struct RealtimeFrameScheduler {
    buffer_size: u64,
    hop_size: u64,
    write_index: u64,
    next_start: u64,
}

impl RealtimeFrameScheduler {
    pub fn new(buffer_size: usize, hop_size: usize) -> Result<Self> {
        if buffer_size == 0 {
            return Err(Error::invalid_input("buffer size must be a positive integer"));
        }
        if hop_size == 0 {
            return Err(Error::invalid_input("hop size must be a positive integer"));
        }
        Ok(Self {
            buffer_size: buffer_size as u64,
            hop_size: hop_size as u64,
            write_index: 0,
            next_start: 0,
        })
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size as usize
    }

    pub fn hop_size(&self) -> usize {
        self.hop_size as usize
    }

    pub fn write_index(&self) -> u64 {
        self.write_index
    }

    pub fn next_frame_start(&self) -> u64 {
        self.next_start
    }

    /// Advances the write cursor by `sample_count`.
    ///
    /// The returned iterator is lazy: frames not pulled from it remain
    /// pending and are yielded by the next `append`.
    pub fn append(&mut self, sample_count: usize) -> ReadyFrames<'_> {
        self.write_index += sample_count as u64;
        ReadyFrames { scheduler: self }
    }

    pub fn reset(&mut self) {
        self.write_index = 0;
        self.next_start = 0;
    }
}

pub struct ReadyFrames<'a> {
    scheduler: &'a mut RealtimeFrameScheduler,
}

impl Iterator for ReadyFrames<'_> {
    type Item = ScheduledFrame;

    fn next(&mut self) -> Option<ScheduledFrame> {
        let s = &mut *self.scheduler;
        if s.write_index - s.next_start < s.buffer_size {
            return None;
        }
        let start = s.next_start;
        s.next_start += s.hop_size;
        Some(ScheduledFrame {
            start,
            end: start + s.buffer_size,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let s = &*self.scheduler;
        let backlog = s.write_index - s.next_start;
        let ready = if backlog < s.buffer_size {
            0
        } else {
            ((backlog - s.buffer_size) / s.hop_size + 1) as usize
        };
        (ready, Some(ready))
    }
}

impl ExactSizeIterator for ReadyFrames<'_> {}
