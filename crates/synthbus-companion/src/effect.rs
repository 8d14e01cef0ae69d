//! Processing applied to each frame between the OUT and IN buffers.

/// One frame of captured audio: every channel, interleaved stereo.
pub struct ChannelFrames<'a> {
    buffers: &'a [Vec<f32>],
    frames: usize,
}

impl<'a> ChannelFrames<'a> {
    /// Each buffer must hold at least `frames * 2` samples.
    pub fn new(buffers: &'a [Vec<f32>], frames: usize) -> Self {
        Self { buffers, frames }
    }

    pub fn channels(&self) -> usize {
        self.buffers.len()
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn channel(&self, channel: usize) -> Option<&'a [f32]> {
        self.buffers
            .get(channel)
            .map(|buffer| &buffer[..self.frames * 2])
    }

    pub fn iter(&self) -> impl Iterator<Item = &'a [f32]> + '_ {
        (0..self.channels()).filter_map(move |ch| self.channel(ch))
    }
}

/// Turns a frame of per-channel audio into one stereo frame.
///
/// `output` is zeroed and holds exactly `input.frames() * 2` samples.
pub trait Effect: Send {
    fn process(&mut self, input: &ChannelFrames<'_>, output: &mut [f32]);
}

impl<F> Effect for F
where
    F: FnMut(&ChannelFrames<'_>, &mut [f32]) + Send,
{
    fn process(&mut self, input: &ChannelFrames<'_>, output: &mut [f32]) {
        self(input, output)
    }
}

/// Sums all channels into stereo with per-channel and master gain.
///
/// With default gains this is a plain passthrough of the synth's mix.
#[derive(Debug, Clone)]
pub struct Mixdown {
    gains: Vec<f32>,
    master: f32,
}

impl Mixdown {
    pub fn new(channels: usize) -> Self {
        Self {
            gains: vec![1.0; channels],
            master: 1.0,
        }
    }

    pub fn set_channel_gain(&mut self, channel: usize, gain: f32) {
        if let Some(slot) = self.gains.get_mut(channel) {
            *slot = gain;
        }
    }

    pub fn set_master_gain(&mut self, gain: f32) {
        self.master = gain;
    }

    pub fn channel_gain(&self, channel: usize) -> f32 {
        self.gains.get(channel).copied().unwrap_or(0.0)
    }
}

impl Effect for Mixdown {
    fn process(&mut self, input: &ChannelFrames<'_>, output: &mut [f32]) {
        for (channel, samples) in input.iter().enumerate() {
            let gain = self.channel_gain(channel) * self.master;
            if gain == 0.0 {
                continue;
            }
            for (out, sample) in output.iter_mut().zip(samples) {
                *out += sample * gain;
            }
        }
    }
}
