//! PCM ↔ WebRTC track bridging.
//!
//! [`AudioSource`] injects caller-supplied PCM into the outbound Opus
//! track; [`AudioSink`] drains an inbound track back into PCM frames.
//! Neither side buffers for pacing: callers push at real-time rate and
//! inbound frames are forwarded as they decode.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use opus::{Application, Channels};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use webrtc::api::media_engine::MIME_TYPE_OPUS;
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_remote::TrackRemote;

use airwave_core::{AudioFrame, Error, Result};

/// Opus packet duration produced by the source side.
const FRAME_MS: u32 = 20;

/// Largest decodable Opus frame: 120 ms at 48 kHz, stereo.
const MAX_DECODED_SAMPLES: usize = 5760 * 2;

fn opus_err(e: opus::Error) -> Error {
    Error::MediaNegotiation(format!("opus: {e}"))
}

fn channels_of(count: u8) -> Result<Channels> {
    match count {
        1 => Ok(Channels::Mono),
        2 => Ok(Channels::Stereo),
        other => Err(Error::Capability(format!(
            "unsupported channel count {other}"
        ))),
    }
}

/// Source side of the audio bridge: PCM in, Opus track out.
///
/// Callers are responsible for real-time pacing; pushed PCM is
/// packetized into 20 ms Opus samples and written immediately. A
/// sub-packet remainder is staged until the next push. No resampling
/// or rate adaptation happens here.
#[derive(Debug)]
pub struct AudioSource {
    track: Arc<TrackLocalStaticSample>,
    encoder: Mutex<opus::Encoder>,
    pending: Mutex<Vec<i16>>,
    sample_rate: u32,
    channel_count: u8,
}

impl AudioSource {
    /// Create a source for the given PCM format. The sample rate must
    /// be one Opus accepts (8/12/16/24/48 kHz).
    pub fn new(sample_rate: u32, channel_count: u8, stream_name: &str) -> Result<Self> {
        if !matches!(sample_rate, 8_000 | 12_000 | 16_000 | 24_000 | 48_000) {
            return Err(Error::Capability(format!(
                "sample rate {sample_rate} is not an opus rate"
            )));
        }
        let channels = channels_of(channel_count)?;
        let encoder =
            opus::Encoder::new(sample_rate, channels, Application::Voip).map_err(opus_err)?;
        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                clock_rate: 48_000,
                channels: channel_count as u16,
                ..Default::default()
            },
            "audio".to_owned(),
            stream_name.to_owned(),
        ));
        Ok(Self {
            track,
            encoder: Mutex::new(encoder),
            pending: Mutex::new(Vec::new()),
            sample_rate,
            channel_count,
        })
    }

    /// The local track to add to a peer connection.
    pub fn track(&self) -> Arc<TrackLocalStaticSample> {
        Arc::clone(&self.track)
    }

    /// Samples per 20 ms packet, all channels interleaved.
    fn packet_len(&self) -> usize {
        (self.sample_rate / 1000 * FRAME_MS) as usize * self.channel_count as usize
    }

    /// Push interleaved PCM. The format must match the one the source
    /// was created with; whole 20 ms packets are encoded and written,
    /// the remainder is staged for the next push.
    pub async fn push_pcm(&self, samples: &[i16], sample_rate: u32, channel_count: u8) -> Result<()> {
        if sample_rate != self.sample_rate || channel_count != self.channel_count {
            return Err(Error::Capability(format!(
                "pushed format {sample_rate}Hz/{channel_count}ch does not match negotiated {}Hz/{}ch",
                self.sample_rate, self.channel_count
            )));
        }

        let packet_len = self.packet_len();
        let packets = {
            let mut pending = self.pending.lock();
            pending.extend_from_slice(samples);
            let mut encoder = self.encoder.lock();
            let mut packets = Vec::new();
            while pending.len() >= packet_len {
                let frame: Vec<i16> = pending.drain(..packet_len).collect();
                let mut buf = vec![0u8; 1500];
                let len = encoder.encode(&frame, &mut buf).map_err(opus_err)?;
                buf.truncate(len);
                packets.push(buf);
            }
            packets
        };

        for packet in packets {
            self.track
                .write_sample(&Sample {
                    data: Bytes::from(packet),
                    duration: Duration::from_millis(FRAME_MS as u64),
                    ..Default::default()
                })
                .await
                .map_err(|e| Error::MediaNegotiation(format!("write sample: {e}")))?;
        }
        Ok(())
    }
}

/// Sink side of the audio bridge: inbound track in, PCM frames out.
///
/// Wraps a remote track in an RTP read loop that decodes Opus to PCM
/// and forwards one [`AudioFrame`] per inbound packet. After [`stop`],
/// no further frames are delivered.
///
/// [`stop`]: AudioSink::stop
pub struct AudioSink {
    stopped: Arc<AtomicBool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl AudioSink {
    /// Start draining `track`, attributing frames to `user_id`.
    pub fn start(
        track: Arc<TrackRemote>,
        user_id: Option<String>,
        frames: mpsc::Sender<AudioFrame>,
    ) -> Result<Arc<Self>> {
        let mut decoder = opus::Decoder::new(48_000, Channels::Mono).map_err(opus_err)?;
        let stopped = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stopped);

        let task = tokio::spawn(async move {
            let mut pcm = vec![0i16; MAX_DECODED_SAMPLES];
            loop {
                if stop_flag.load(Ordering::SeqCst) {
                    break;
                }
                let (packet, _) = match track.read_rtp().await {
                    Ok(packet) => packet,
                    Err(e) => {
                        debug!(error = %e, "rtp read ended");
                        break;
                    }
                };
                if packet.payload.is_empty() {
                    continue;
                }
                let decoded = match decoder.decode(&packet.payload, &mut pcm, false) {
                    Ok(count) => count,
                    Err(e) => {
                        warn!(error = %e, "opus decode failed; skipping packet");
                        continue;
                    }
                };
                if stop_flag.load(Ordering::SeqCst) {
                    break;
                }
                let frame = AudioFrame {
                    bits_per_sample: 16,
                    sample_rate: 48_000,
                    channel_count: 1,
                    samples: pcm[..decoded].to_vec(),
                    user_id: user_id.clone(),
                };
                if frames.send(frame).await.is_err() {
                    debug!("audio frame receiver dropped; stopping sink");
                    break;
                }
            }
        });

        Ok(Arc::new(Self {
            stopped,
            task: Mutex::new(Some(task)),
        }))
    }

    /// Stop the read loop. Idempotent; no frames fire afterwards.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }
}

impl Drop for AudioSink {
    fn drop(&mut self) {
        self.stop();
    }
}
