//! cpal playback of the engine's interleaved stereo ring.

use color_eyre::eyre::{eyre, Result as EyreResult, WrapErr};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

pub struct Device {
    device: cpal::Device,
    config: cpal::SupportedStreamConfig,
}

impl Device {
    pub fn open() -> EyreResult<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| eyre!("no default output device available"))?;
        let config = device
            .default_output_config()
            .wrap_err("failed to fetch default output config")?;
        if config.sample_format() != cpal::SampleFormat::F32 {
            return Err(eyre!("unsupported sample format {:?}", config.sample_format()));
        }
        Ok(Self { device, config })
    }

    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate().0
    }

    /// Start a stream draining `ring`. Missing samples play as silence.
    pub fn play(&self, mut ring: rtrb::Consumer<f32>) -> EyreResult<cpal::Stream> {
        let channels = self.config.channels() as usize;
        let stream = self
            .device
            .build_output_stream(
                &self.config.clone().into(),
                move |data: &mut [f32], _| {
                    for frame in data.chunks_mut(channels) {
                        // frames are pushed whole, pop both or neither
                        let (left, right) = if ring.slots() >= 2 {
                            (ring.pop().unwrap_or(0.0), ring.pop().unwrap_or(0.0))
                        } else {
                            (0.0, 0.0)
                        };
                        match frame {
                            [mono] => *mono = 0.5 * (left + right),
                            [l, r, rest @ ..] => {
                                *l = left;
                                *r = right;
                                rest.fill(0.0);
                            }
                            [] => {}
                        }
                    }
                },
                |err| log::error!("audio stream error: {err}"),
                None,
            )
            .wrap_err("failed to build output stream")?;
        stream.play().wrap_err("failed to start output stream")?;
        Ok(stream)
    }
}
