use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex};
use webrtc::api::media_engine::{
    MIME_TYPE_AV1, MIME_TYPE_G722, MIME_TYPE_H264, MIME_TYPE_OPUS, MIME_TYPE_PCMA, MIME_TYPE_PCMU,
    MIME_TYPE_VP8, MIME_TYPE_VP9,
};
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_remote::TrackRemote;

/// Indicates the device from which the media stream originates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaSource {
    /// audio destination
    Microphone,
    /// video destination
    Camera,
    /// video destination
    Screen,
}

impl MediaSource {
    pub fn track_id(&self) -> &'static str {
        match self {
            MediaSource::Microphone => "microphone",
            MediaSource::Camera => "camera",
            MediaSource::Screen => "screen",
        }
    }
}

/// represents the MIME types from webrtc::api::media_engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MimeType {
    // https://en.wikipedia.org/wiki/Advanced_Video_Coding
    H264,
    // https://en.wikipedia.org/wiki/VP8
    VP8,
    // https://en.wikipedia.org/wiki/VP9
    VP9,
    // https://en.wikipedia.org/wiki/AV1
    AV1,
    // https://en.wikipedia.org/wiki/Opus_(audio_format)
    OPUS,
    // https://en.wikipedia.org/wiki/G.722
    G722,
    // also known as G.711 µ-law
    PCMU,
    // also known as G.711 A-law
    PCMA,
}

impl fmt::Display for MimeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MimeType::H264 => MIME_TYPE_H264,
            MimeType::VP8 => MIME_TYPE_VP8,
            MimeType::VP9 => MIME_TYPE_VP9,
            MimeType::AV1 => MIME_TYPE_AV1,
            MimeType::OPUS => MIME_TYPE_OPUS,
            MimeType::G722 => MIME_TYPE_G722,
            MimeType::PCMU => MIME_TYPE_PCMU,
            MimeType::PCMA => MIME_TYPE_PCMA,
        };
        f.write_str(s)
    }
}

impl MimeType {
    /// webrtc reports codec mime types with varying case ("audio/opus" vs "audio/OPUS")
    pub fn from_string(s: &str) -> Result<Self> {
        let candidates = [
            MimeType::H264,
            MimeType::VP8,
            MimeType::VP9,
            MimeType::AV1,
            MimeType::OPUS,
            MimeType::G722,
            MimeType::PCMU,
            MimeType::PCMA,
        ];
        match candidates
            .into_iter()
            .find(|m| m.to_string().eq_ignore_ascii_case(s))
        {
            Some(m) => Ok(m),
            None => bail!("invalid mime type: {}", s),
        }
    }
}

#[derive(Clone)]
pub enum MediaTrack {
    /// written to by the capture collaborator, sent to every peer the stream is attached to
    Local(Arc<TrackLocalStaticRTP>),
    /// received from a peer, read by the rendering collaborator
    Remote(Arc<TrackRemote>),
}

/// An opaque media stream: an id plus the tracks which belong to it.
///
/// Clones share the track list, so tracks which arrive after the stream was surfaced are visible
/// to whoever holds the handle.
#[derive(Clone)]
pub struct MediaStreamHandle {
    id: String,
    tracks: Arc<Mutex<Vec<MediaTrack>>>,
}

impl MediaStreamHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tracks: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// creates a track the capture side can write RTP packets to
    pub fn add_local_track(
        &self,
        source: MediaSource,
        mime_type: MimeType,
        clock_rate: u32,
        channels: u16,
    ) -> Arc<TrackLocalStaticRTP> {
        let track = Arc::new(TrackLocalStaticRTP::new(
            RTCRtpCodecCapability {
                mime_type: mime_type.to_string(),
                clock_rate,
                channels,
                ..Default::default()
            },
            source.track_id().to_string(),
            self.id.clone(),
        ));
        self.push(MediaTrack::Local(track.clone()));
        track
    }

    pub fn add_remote_track(&self, track: Arc<TrackRemote>) {
        self.push(MediaTrack::Remote(track));
    }

    pub fn tracks(&self) -> Vec<MediaTrack> {
        self.lock().clone()
    }

    pub fn local_tracks(&self) -> Vec<Arc<TrackLocalStaticRTP>> {
        self.lock()
            .iter()
            .filter_map(|t| match t {
                MediaTrack::Local(track) => Some(track.clone()),
                MediaTrack::Remote(_) => None,
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn push(&self, track: MediaTrack) {
        self.lock().push(track);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<MediaTrack>> {
        // the list is never left half-updated, so a poisoned lock is still usable
        self.tracks.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl fmt::Debug for MediaStreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaStreamHandle")
            .field("id", &self.id)
            .field("tracks", &self.lock().len())
            .finish()
    }
}

impl PartialEq for MediaStreamHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && Arc::ptr_eq(&self.tracks, &other.tracks)
    }
}
