//! Composite timeline: the base clip followed by trailer slides.
//!
//! Global time runs from 0 to `source + Σ slides`. Each slide occupies a
//! half-open interval `[start, start + duration)`, so a boundary instant
//! belongs to the slide that begins there. The very last instant belongs to
//! the last slide.

use serde::{Deserialize, Serialize};

/// Where a global time falls.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "segment", rename_all = "snake_case")]
pub enum Segment {
    /// Offset into the base clip.
    Base { local: f64 },
    /// Offset into trailer slide `index`.
    Slide { index: usize, local: f64 },
    /// Past the end of everything.
    Complete,
}

/// Immutable layout of the base clip and its trailing slides.
#[derive(Debug, Clone, PartialEq)]
pub struct CompositeTimeline {
    source_duration: f64,
    slide_durations: Vec<f64>,
    slide_starts: Vec<f64>,
    total: f64,
}

impl CompositeTimeline {
    /// Negative or non-finite durations are treated as zero.
    pub fn new(source_duration: f64, slide_durations: impl IntoIterator<Item = f64>) -> Self {
        let source_duration = sanitize(source_duration);
        let slide_durations: Vec<f64> = slide_durations.into_iter().map(sanitize).collect();

        let mut slide_starts = Vec::with_capacity(slide_durations.len());
        let mut cursor = source_duration;
        for d in &slide_durations {
            slide_starts.push(cursor);
            cursor += d;
        }

        Self {
            source_duration,
            slide_durations,
            slide_starts,
            total: cursor,
        }
    }

    pub fn source_duration(&self) -> f64 {
        self.source_duration
    }

    pub fn total_duration(&self) -> f64 {
        self.total
    }

    pub fn slide_count(&self) -> usize {
        self.slide_durations.len()
    }

    pub fn slide_duration(&self, index: usize) -> Option<f64> {
        self.slide_durations.get(index).copied()
    }

    /// Global time at which slide `index` starts.
    pub fn slide_start(&self, index: usize) -> Option<f64> {
        self.slide_starts.get(index).copied()
    }

    /// Resolve a global time to a segment.
    pub fn segment_at(&self, t: f64) -> Segment {
        if t.is_nan() {
            return Segment::Complete;
        }
        let t = t.max(0.0);

        if t < self.source_duration {
            return Segment::Base { local: t };
        }
        if self.slide_durations.is_empty() || t > self.total {
            return Segment::Complete;
        }

        for (index, (&start, &duration)) in self
            .slide_starts
            .iter()
            .zip(self.slide_durations.iter())
            .enumerate()
        {
            if t < start + duration {
                return Segment::Slide {
                    index,
                    local: t - start,
                };
            }
        }

        // t == total: the closing instant of the last slide.
        let last = self.slide_durations.len() - 1;
        Segment::Slide {
            index: last,
            local: t - self.slide_starts[last],
        }
    }

    /// Frames needed to render the base clip and every slide at `fps`.
    pub fn frame_count(&self, fps: u32) -> u64 {
        frames_for(self.source_duration, fps)
            + self
                .slide_durations
                .iter()
                .map(|d| frames_for(*d, fps))
                .sum::<u64>()
    }

    /// Iterate one tick per output frame across all slides.
    pub fn slide_ticks(&self, fps: u32) -> SlideSequencer<'_> {
        SlideSequencer::new(self, fps)
    }
}

fn sanitize(duration: f64) -> f64 {
    if duration.is_finite() {
        duration.max(0.0)
    } else {
        0.0
    }
}

/// Number of frames needed to cover `duration_secs` at `fps`.
pub fn frames_for(duration_secs: f64, fps: u32) -> u64 {
    if duration_secs.is_nan() || duration_secs <= 0.0 {
        return 0;
    }
    // 3.0000000001 * 30 must not round up to an extra frame.
    let raw = duration_secs * fps.max(1) as f64;
    (raw - 1e-9).ceil().max(0.0) as u64
}

/// One output frame of the trailer-slide sequence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlideTick {
    /// Slide being shown.
    pub index: usize,
    /// Offset into that slide.
    pub local_secs: f64,
    /// Position on the composite timeline.
    pub global_secs: f64,
    /// Output frame number, counted from the start of the composite.
    pub frame: u64,
}

/// Steps through trailer slides at a fixed frame rate.
///
/// Each slide yields `ceil(duration × fps)` ticks. Frame numbers continue
/// from the end of the base clip, so they line up with frames already
/// rendered from the source.
#[derive(Debug, Clone)]
pub struct SlideSequencer<'a> {
    timeline: &'a CompositeTimeline,
    fps: u32,
    index: usize,
    frame_in_slide: u64,
    frame: u64,
}

impl<'a> SlideSequencer<'a> {
    pub fn new(timeline: &'a CompositeTimeline, fps: u32) -> Self {
        let fps = fps.max(1);
        Self {
            timeline,
            fps,
            index: 0,
            frame_in_slide: 0,
            frame: frames_for(timeline.source_duration, fps),
        }
    }

    /// Continue numbering from an explicit frame (e.g. when the source ran
    /// short of its reported duration).
    pub fn starting_at_frame(mut self, frame: u64) -> Self {
        self.frame = frame;
        self
    }

    /// Ticks not yet yielded.
    pub fn remaining(&self) -> u64 {
        let current = self
            .timeline
            .slide_duration(self.index)
            .map(|d| frames_for(d, self.fps).saturating_sub(self.frame_in_slide))
            .unwrap_or(0);
        let rest: u64 = self
            .timeline
            .slide_durations
            .iter()
            .skip(self.index + 1)
            .map(|d| frames_for(*d, self.fps))
            .sum();
        current + rest
    }
}

impl Iterator for SlideSequencer<'_> {
    type Item = SlideTick;

    fn next(&mut self) -> Option<SlideTick> {
        loop {
            let duration = self.timeline.slide_duration(self.index)?;
            if self.frame_in_slide < frames_for(duration, self.fps) {
                break;
            }
            self.index += 1;
            self.frame_in_slide = 0;
        }

        let local_secs = self.frame_in_slide as f64 / self.fps as f64;
        let start = self.timeline.slide_starts[self.index];
        let tick = SlideTick {
            index: self.index,
            local_secs,
            global_secs: start + local_secs,
            frame: self.frame,
        };
        self.frame_in_slide += 1;
        self.frame += 1;
        Some(tick)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.remaining() as usize;
        (n, Some(n))
    }
}
