use ringbuf::traits::Producer;

use super::registry::ChannelState;
use crate::events::ChannelId;

pub type Frame = [f32; 2];

/// Destination of rendered frames: a device ring buffer, an offline buffer, or
/// nowhere.
pub trait FrameSink: Send {
    /// Returns false when the frame was dropped.
    fn write_frame(&mut self, frame: Frame) -> bool;
}

impl FrameSink for ringbuf::HeapProd<Frame> {
    fn write_frame(&mut self, frame: Frame) -> bool {
        self.try_push(frame).is_ok()
    }
}

impl FrameSink for Vec<Frame> {
    fn write_frame(&mut self, frame: Frame) -> bool {
        self.push(frame);
        true
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Discard;

impl FrameSink for Discard {
    fn write_frame(&mut self, _frame: Frame) -> bool {
        true
    }
}

/// Shared mixing sink the instruments write into during a tick. Channel inputs
/// are scaled by the channel's volume and panned when the frame is emitted;
/// effect sends go straight to both sides.
pub struct MixBus {
    channels: Vec<Frame>,
    fx: Vec<f32>,
    sink: Box<dyn FrameSink>,
    frames: u64,
    dropped: u64,
    peak: f32,
}

impl MixBus {
    pub fn new(num_channels: usize, num_fx: usize, sink: Box<dyn FrameSink>) -> Self {
        Self {
            channels: vec![[0.0; 2]; num_channels.max(1)],
            fx: vec![0.0; num_fx],
            sink,
            frames: 0,
            dropped: 0,
            peak: 0.0,
        }
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    /// Mono input, panned by the channel pan at emit time.
    pub fn output(&mut self, channel: ChannelId, sample: f32) {
        if let Some(slot) = self.channels.get_mut(channel) {
            slot[0] += sample;
            slot[1] += sample;
        }
    }

    pub fn output2(&mut self, channel: ChannelId, left: f32, right: f32) {
        if let Some(slot) = self.channels.get_mut(channel) {
            slot[0] += left;
            slot[1] += right;
        }
    }

    pub fn fx_send(&mut self, unit: usize, sample: f32) {
        if let Some(slot) = self.fx.get_mut(unit) {
            *slot += sample;
        }
    }

    /// Mixes the accumulated inputs into one frame, hands it to the sink and
    /// clears the accumulators.
    pub fn emit(&mut self, states: &[ChannelState]) -> Frame {
        let mut frame = [0.0f32; 2];

        for (ch, input) in self.channels.iter_mut().enumerate() {
            let (volume, pan) = states
                .get(ch)
                .map_or((1.0, 0.0), |state| (state.volume, state.pan));
            let (l_gain, r_gain) = pan_to_gains(pan);

            frame[0] += input[0] * l_gain * volume;
            frame[1] += input[1] * r_gain * volume;
            *input = [0.0; 2];
        }

        for send in self.fx.iter_mut() {
            frame[0] += *send;
            frame[1] += *send;
            *send = 0.0;
        }

        self.peak = self.peak.max(frame[0].abs()).max(frame[1].abs());
        if !self.sink.write_frame(frame) {
            self.dropped += 1;
        }
        self.frames += 1;
        frame
    }

    pub fn clear(&mut self) {
        self.channels.iter_mut().for_each(|slot| *slot = [0.0; 2]);
        self.fx.iter_mut().for_each(|slot| *slot = 0.0);
    }

    pub fn reset_counters(&mut self) {
        self.frames = 0;
        self.dropped = 0;
        self.peak = 0.0;
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Frames the sink refused (ring buffer full).
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn peak(&self) -> f32 {
        self.peak
    }

    pub fn replace_sink(&mut self, sink: Box<dyn FrameSink>) -> Box<dyn FrameSink> {
        std::mem::replace(&mut self.sink, sink)
    }
}

/// Equal-power pan law. Centre gives both sides cos(pi/4), so a centred mono
/// input is scaled by ~0.707 on each side.
pub fn pan_to_gains(pan: f32) -> (f32, f32) {
    let pan = pan.clamp(-1.0, 1.0);
    let angle = (pan + 1.0) * std::f32::consts::FRAC_PI_4; // 0 to PI/2
    (angle.cos(), angle.sin())
}
