//! Replay file format and recorder.
//!
//! A replay is one zstd stream holding a header followed by frames:
//!
//! ```text
//! header: i32 version | i64 created_at_millis | str origin | str name
//! frame:  i64 elapsed_nanos | u8 packet_id | u16 payload_len | payload
//!         (a wire frame behind a timestamp)
//! ```
//!
//! Integers are big-endian, strings are `u16` length + UTF-8. The end of the
//! stream (or the first unreadable frame) ends the replay.

use crate::codec::{self, encode_payload, MAX_PAYLOAD_LEN};
use crate::packet::{Packet, PacketError, PacketKind};
use serde::{Deserialize, Serialize};
use skylane_core::ByteWriter;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Current replay format version.
pub const REPLAY_VERSION: i32 = 2;

/// File extension of replay files.
pub const REPLAY_EXTENSION: &str = "srep";

/// Stand-in for origin and name when identity is anonymized.
pub const ANONYMOUS: &str = "anonymous";

const COMPRESSION_LEVEL: i32 = 3;
const TIMESTAMP_LEN: usize = 8;

/// Errors raised by replay I/O.
#[derive(Debug, Error)]
pub enum ReplayError {
    /// Underlying file or decompression failure.
    #[error("replay I/O failed: {0}")]
    Io(#[from] io::Error),

    /// Header carried a version this build cannot read.
    #[error("unsupported replay version {0}, expected {}", REPLAY_VERSION)]
    UnsupportedVersion(i32),

    /// Header string was not UTF-8.
    #[error("replay header holds an invalid string")]
    InvalidString,

    /// A frame's payload did not decode as its packet kind.
    #[error("bad replay frame: {0}")]
    Packet(#[from] PacketError),

    /// Payload does not fit a frame's `u16` length.
    #[error("{kind} payload of {len} bytes exceeds replay frame limit")]
    PayloadTooLarge {
        /// Packet kind that was skipped.
        kind: PacketKind,
        /// Serialized payload size.
        len: usize,
    },
}

/// Replay file header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayHeader {
    /// Format version.
    pub version: i32,
    /// Wall-clock creation time, unix milliseconds.
    pub created_at_millis: i64,
    /// Address the session connected to, or [`ANONYMOUS`].
    pub origin: String,
    /// Player display name, or [`ANONYMOUS`].
    pub name: String,
}

impl ReplayHeader {
    /// Header stamped with the current time.
    pub fn now(origin: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            version: REPLAY_VERSION,
            created_at_millis: unix_millis(),
            origin: origin.into(),
            name: name.into(),
        }
    }

    fn write_to(&self, out: &mut impl Write) -> io::Result<()> {
        let mut w = ByteWriter::new();
        w.i32(self.version)
            .i64(self.created_at_millis)
            .str(&self.origin)
            .str(&self.name);
        out.write_all(w.as_slice())
    }

    fn read_from(input: &mut impl Read) -> Result<Self, ReplayError> {
        Ok(Self {
            version: i32::from_be_bytes(read_array(input)?),
            created_at_millis: i64::from_be_bytes(read_array(input)?),
            origin: read_str(input)?,
            name: read_str(input)?,
        })
    }
}

/// One recorded packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayFrame {
    /// Time since recording started.
    pub elapsed_nanos: i64,
    /// Packet table id.
    pub packet_id: u8,
    /// Packet payload as sent on the wire.
    pub payload: Vec<u8>,
}

impl ReplayFrame {
    /// Rebuild the packet this frame holds.
    pub fn packet(&self) -> Result<Packet, PacketError> {
        Packet::read(self.packet_id, &self.payload)
    }

    fn read_from(input: &mut impl Read) -> Result<Option<Self>, ReplayError> {
        let mut nanos = [0u8; TIMESTAMP_LEN];
        if !read_exact_or_eof(input, &mut nanos)? {
            return Ok(None);
        }
        let (packet_id, len) = codec::parse_frame_header(read_array(input)?);
        let mut payload = vec![0u8; len];
        input.read_exact(&mut payload)?;
        Ok(Some(Self {
            elapsed_nanos: i64::from_be_bytes(nanos),
            packet_id,
            payload,
        }))
    }
}

fn read_array<const N: usize>(input: &mut impl Read) -> io::Result<[u8; N]> {
    let mut buf = [0u8; N];
    input.read_exact(&mut buf)?;
    Ok(buf)
}

fn read_str(input: &mut impl Read) -> Result<String, ReplayError> {
    let len = u16::from_be_bytes(read_array(input)?) as usize;
    let mut buf = vec![0u8; len];
    input.read_exact(&mut buf)?;
    String::from_utf8(buf).map_err(|_| ReplayError::InvalidString)
}

/// Fill `buf` completely, or report a clean end of stream if nothing was read.
fn read_exact_or_eof(input: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        match input.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(false),
            Ok(0) => return Err(io::ErrorKind::UnexpectedEof.into()),
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(true)
}

fn unix_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Compressed replay writer.
pub struct ReplayWriter {
    encoder: Option<zstd::stream::write::Encoder<'static, BufWriter<File>>>,
    path: PathBuf,
    frames_written: u64,
}

impl ReplayWriter {
    /// Create `path` and write `header`.
    pub fn create(path: impl AsRef<Path>, header: &ReplayHeader) -> Result<Self, ReplayError> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)?;
        let mut encoder = zstd::stream::write::Encoder::new(BufWriter::new(file), COMPRESSION_LEVEL)?;
        header.write_to(&mut encoder)?;
        Ok(Self {
            encoder: Some(encoder),
            path,
            frames_written: 0,
        })
    }

    /// Append a frame.
    pub fn write_frame(
        &mut self,
        elapsed_nanos: i64,
        packet_id: u8,
        payload: &[u8],
    ) -> Result<(), ReplayError> {
        let Some(header) = codec::frame_header(packet_id, payload.len()) else {
            let kind = PacketKind::try_from(packet_id)?;
            return Err(ReplayError::PayloadTooLarge {
                kind,
                len: payload.len(),
            });
        };
        let encoder = self
            .encoder
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "replay writer finished"))?;
        encoder.write_all(&elapsed_nanos.to_be_bytes())?;
        encoder.write_all(&header)?;
        encoder.write_all(payload)?;
        self.frames_written += 1;
        Ok(())
    }

    /// Flush buffered writes without ending the stream.
    pub fn flush(&mut self) -> Result<(), ReplayError> {
        if let Some(encoder) = self.encoder.as_mut() {
            encoder.flush()?;
        }
        Ok(())
    }

    /// End the compressed stream and close the file.
    pub fn finish(mut self) -> Result<(), ReplayError> {
        self.finish_stream()
    }

    fn finish_stream(&mut self) -> Result<(), ReplayError> {
        if let Some(encoder) = self.encoder.take() {
            let mut inner = encoder.finish()?;
            inner.flush()?;
        }
        Ok(())
    }

    /// File being written.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Frames written so far.
    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }
}

impl Drop for ReplayWriter {
    fn drop(&mut self) {
        if let Err(err) = self.finish_stream() {
            warn!(path = ?self.path, %err, "failed to close replay file");
        }
    }
}

/// Compressed replay reader.
pub struct ReplayReader {
    decoder: zstd::stream::read::Decoder<'static, BufReader<File>>,
    header: ReplayHeader,
}

impl ReplayReader {
    /// Open `path` for playback.
    ///
    /// Fails with [`ReplayError::UnsupportedVersion`] when the frames were
    /// written by another format version.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ReplayError> {
        let reader = Self::open_any(path)?;
        match reader.header.version {
            REPLAY_VERSION => Ok(reader),
            version => Err(ReplayError::UnsupportedVersion(version)),
        }
    }

    /// Open `path` and read the header whatever its version.
    fn open_any(path: impl AsRef<Path>) -> Result<Self, ReplayError> {
        let file = File::open(path.as_ref())?;
        let mut decoder = zstd::stream::read::Decoder::new(file)?;
        let header = ReplayHeader::read_from(&mut decoder)?;
        Ok(Self { decoder, header })
    }

    /// Header read at open.
    pub fn header(&self) -> &ReplayHeader {
        &self.header
    }

    /// Next frame, or `None` at a clean end of stream.
    pub fn next_frame(&mut self) -> Result<Option<ReplayFrame>, ReplayError> {
        ReplayFrame::read_from(&mut self.decoder)
    }
}

/// Statistics gathered by reading a whole replay without applying it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplaySummary {
    /// File header.
    pub header: ReplayHeader,
    /// Frames read.
    pub frames: u64,
    /// Payload bytes read.
    pub payload_bytes: u64,
    /// Timestamp of the last frame.
    pub duration_nanos: i64,
    /// Frame count per packet kind name.
    pub counts: BTreeMap<String, u64>,
    /// Why reading stopped before a clean end, if it did.
    pub truncated: Option<String>,
}

impl ReplaySummary {
    /// Read `path` end to end.
    ///
    /// Only an unreadable header is an error; a bad frame ends the scan and
    /// is reported in [`ReplaySummary::truncated`]. Files of another format
    /// version report their header and no frames.
    pub fn scan(path: impl AsRef<Path>) -> Result<Self, ReplayError> {
        let mut reader = ReplayReader::open_any(path)?;
        let mut summary = Self {
            header: reader.header().clone(),
            frames: 0,
            payload_bytes: 0,
            duration_nanos: 0,
            counts: BTreeMap::new(),
            truncated: None,
        };
        if summary.header.version != REPLAY_VERSION {
            let err = ReplayError::UnsupportedVersion(summary.header.version);
            summary.truncated = Some(err.to_string());
            return Ok(summary);
        }

        loop {
            match reader.next_frame() {
                Ok(Some(frame)) => summary.count(&frame),
                Ok(None) => break,
                Err(err) => {
                    summary.truncated = Some(err.to_string());
                    break;
                }
            }
        }
        Ok(summary)
    }

    fn count(&mut self, frame: &ReplayFrame) {
        let name = match PacketKind::try_from(frame.packet_id) {
            Ok(kind) => kind.name().to_string(),
            Err(_) => format!("unknown({})", frame.packet_id),
        };
        *self.counts.entry(name).or_insert(0) += 1;
        self.frames += 1;
        self.payload_bytes += frame.payload.len() as u64;
        self.duration_nanos = self.duration_nanos.max(frame.elapsed_nanos);
    }

    /// Length of the recording.
    pub fn duration(&self) -> Duration {
        Duration::from_nanos(self.duration_nanos.max(0) as u64)
    }
}

/// Recording switches, taken from client configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecorderSettings {
    /// Record sessions at all.
    pub enabled: bool,
    /// Write [`ANONYMOUS`] instead of origin and name.
    pub anonymize: bool,
    /// Directory new replays go to.
    pub dir: PathBuf,
}

struct Recording {
    writer: ReplayWriter,
    started: Instant,
}

/// Taps inbound packets into a replay file.
pub struct ReplayRecorder {
    settings: RecorderSettings,
    recording: Option<Recording>,
    scratch: ByteWriter,
}

impl ReplayRecorder {
    /// Idle recorder.
    pub fn new(settings: RecorderSettings) -> Self {
        Self {
            settings,
            recording: None,
            scratch: ByteWriter::new(),
        }
    }

    /// Current settings.
    pub fn settings(&self) -> &RecorderSettings {
        &self.settings
    }

    /// Replace settings. Takes effect on the next [`ReplayRecorder::start`].
    pub fn set_settings(&mut self, settings: RecorderSettings) {
        self.settings = settings;
    }

    /// Whether a file is open.
    pub fn is_recording(&self) -> bool {
        self.recording.is_some()
    }

    /// File being written, if any.
    pub fn path(&self) -> Option<&Path> {
        self.recording.as_ref().map(|r| r.writer.path())
    }

    /// Open a new replay for a session with `origin`.
    ///
    /// Does nothing (returns `Ok(None)`) when recording is disabled or a replay
    /// is being played back. A recording already in progress is closed first.
    pub fn start(
        &mut self,
        origin: &str,
        name: &str,
        replaying: bool,
    ) -> Result<Option<PathBuf>, ReplayError> {
        if !self.settings.enabled || replaying {
            return Ok(None);
        }
        self.stop();

        fs::create_dir_all(&self.settings.dir)?;
        let header = if self.settings.anonymize {
            ReplayHeader::now(ANONYMOUS, ANONYMOUS)
        } else {
            ReplayHeader::now(origin, name)
        };
        let path = self.unused_path(header.created_at_millis);
        let writer = ReplayWriter::create(&path, &header)?;
        info!(path = ?path, "recording replay");
        self.recording = Some(Recording {
            writer,
            started: Instant::now(),
        });
        Ok(Some(path))
    }

    fn unused_path(&self, millis: i64) -> PathBuf {
        let mut path = self.settings.dir.join(format!("{millis}.{REPLAY_EXTENSION}"));
        let mut n = 1;
        while path.exists() {
            path = self
                .settings
                .dir
                .join(format!("{millis}-{n}.{REPLAY_EXTENSION}"));
            n += 1;
        }
        path
    }

    /// Close the current file. Safe to call when idle; close errors are logged.
    pub fn stop(&mut self) {
        if let Some(recording) = self.recording.take() {
            let frames = recording.writer.frames_written();
            let path = recording.writer.path().to_path_buf();
            match recording.writer.finish() {
                Ok(()) => info!(path = ?path, frames, "replay saved"),
                Err(err) => warn!(path = ?path, %err, "failed to finish replay"),
            }
        }
    }

    /// Append `packet` stamped with the time since [`ReplayRecorder::start`].
    pub fn record(&mut self, packet: &Packet) -> Result<(), ReplayError> {
        let elapsed = match &self.recording {
            Some(recording) => recording.started.elapsed(),
            None => return Ok(()),
        };
        self.record_at(packet, elapsed)
    }

    /// Append `packet` with an explicit timestamp.
    ///
    /// World streams are never recorded. Payloads too large for a frame are
    /// skipped with a warning.
    pub fn record_at(&mut self, packet: &Packet, elapsed: Duration) -> Result<(), ReplayError> {
        let Some(recording) = self.recording.as_mut() else {
            return Ok(());
        };
        if packet.kind() == PacketKind::WorldStream {
            return Ok(());
        }

        let payload = encode_payload(packet, &mut self.scratch);
        if payload.len() > MAX_PAYLOAD_LEN {
            warn!(
                kind = %packet.kind(),
                len = payload.len(),
                "packet too large for replay frame, skipped"
            );
            return Ok(());
        }
        let nanos = i64::try_from(elapsed.as_nanos()).unwrap_or(i64::MAX);
        recording.writer.write_frame(nanos, packet.id(), payload)?;
        debug!(kind = %packet.kind(), len = payload.len(), "recorded packet");
        Ok(())
    }
}

impl Drop for ReplayRecorder {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::RemoteCall;
    use tempfile::tempdir;

    fn settings(dir: &Path) -> RecorderSettings {
        RecorderSettings {
            enabled: true,
            anonymize: false,
            dir: dir.to_path_buf(),
        }
    }

    #[test]
    fn test_writer_reader_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.srep");
        let header = ReplayHeader {
            version: REPLAY_VERSION,
            created_at_millis: 1_700_000_000_000,
            origin: "1.2.3.4".into(),
            name: "Bob".into(),
        };

        let mut writer = ReplayWriter::create(&path, &header).unwrap();
        writer.write_frame(0, 5, &[9, 9, 9]).unwrap();
        writer.write_frame(1_000, 1, &[]).unwrap();
        writer.finish().unwrap();

        let mut reader = ReplayReader::open(&path).unwrap();
        assert_eq!(reader.header(), &header);
        let first = reader.next_frame().unwrap().unwrap();
        assert_eq!(first.payload, vec![9, 9, 9]);
        assert_eq!(first.packet_id, 5);
        let second = reader.next_frame().unwrap().unwrap();
        assert_eq!(second.elapsed_nanos, 1_000);
        assert!(reader.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_file_is_compressed_from_the_first_byte() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("b.srep");
        ReplayWriter::create(&path, &ReplayHeader::now("x", "y"))
            .unwrap()
            .finish()
            .unwrap();

        let raw = fs::read(&path).unwrap();
        // zstd frame magic, little-endian 0xFD2FB528
        assert_eq!(&raw[..4], &[0x28, 0xB5, 0x2F, 0xFD]);
    }

    #[test]
    fn test_wrong_version_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("c.srep");
        let mut header = ReplayHeader::now("x", "y");
        header.version = 1;
        ReplayWriter::create(&path, &header).unwrap().finish().unwrap();

        assert!(matches!(
            ReplayReader::open(&path),
            Err(ReplayError::UnsupportedVersion(1))
        ));
    }

    #[test]
    fn test_scan_reports_other_version_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("d.srep");
        let mut header = ReplayHeader::now("10.0.0.9", "Carol");
        header.version = 7;
        let mut writer = ReplayWriter::create(&path, &header).unwrap();
        writer.write_frame(0, 5, &[1, 2]).unwrap();
        writer.finish().unwrap();

        let summary = ReplaySummary::scan(&path).unwrap();
        assert_eq!(summary.header, header);
        assert_eq!(summary.frames, 0);
        assert!(summary
            .truncated
            .as_deref()
            .is_some_and(|reason| reason.contains("version 7")));
    }

    #[test]
    fn test_recorder_skips_world_stream() {
        let dir = tempdir().unwrap();
        let mut recorder = ReplayRecorder::new(settings(dir.path()));
        let path = recorder.start("10.0.0.1", "Alice", false).unwrap().unwrap();

        recorder
            .record_at(&Packet::WorldStream { data: vec![1; 64] }, Duration::ZERO)
            .unwrap();
        recorder
            .record_at(
                &RemoteCall::ConnectConfirm.into_packet(),
                Duration::from_millis(5),
            )
            .unwrap();
        recorder.stop();
        assert!(!recorder.is_recording());

        let summary = ReplaySummary::scan(&path).unwrap();
        assert_eq!(summary.frames, 1);
        assert_eq!(summary.counts.get("Invoke"), Some(&1));
        assert_eq!(summary.header.origin, "10.0.0.1");
        assert_eq!(summary.duration(), Duration::from_millis(5));
        assert!(summary.truncated.is_none());
    }

    #[test]
    fn test_recorder_disabled_or_replaying() {
        let dir = tempdir().unwrap();
        let mut disabled = settings(dir.path());
        disabled.enabled = false;

        let mut recorder = ReplayRecorder::new(disabled);
        assert!(recorder.start("x", "y", false).unwrap().is_none());

        let mut recorder = ReplayRecorder::new(settings(dir.path()));
        assert!(recorder.start("x", "y", true).unwrap().is_none());
        assert!(!recorder.is_recording());

        // Recording while idle is a no-op
        recorder.record(&Packet::Disconnect).unwrap();
        recorder.stop();
    }

    #[test]
    fn test_recorder_anonymizes() {
        let dir = tempdir().unwrap();
        let mut anon = settings(dir.path());
        anon.anonymize = true;

        let mut recorder = ReplayRecorder::new(anon);
        let path = recorder.start("10.0.0.1", "Alice", false).unwrap().unwrap();
        recorder.stop();

        let reader = ReplayReader::open(&path).unwrap();
        assert_eq!(reader.header().origin, ANONYMOUS);
        assert_eq!(reader.header().name, ANONYMOUS);
        assert_eq!(path.extension().unwrap(), REPLAY_EXTENSION);
    }

    #[test]
    fn test_oversized_packet_skipped() {
        let dir = tempdir().unwrap();
        let mut recorder = ReplayRecorder::new(settings(dir.path()));
        let path = recorder.start("x", "y", false).unwrap().unwrap();

        let huge = Packet::Invoke {
            method: 7,
            payload: vec![0; MAX_PAYLOAD_LEN + 10],
        };
        recorder.record_at(&huge, Duration::ZERO).unwrap();
        recorder.stop();

        assert_eq!(ReplaySummary::scan(&path).unwrap().frames, 0);
    }

    #[test]
    fn test_truncated_tail_reported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("d.srep");
        let mut writer = ReplayWriter::create(&path, &ReplayHeader::now("x", "y")).unwrap();
        writer.write_frame(0, 1, &[]).unwrap();
        writer.write_frame(10, 5, &[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        writer.finish().unwrap();

        // Re-encode with the last frame cut short
        let mut reader = ReplayReader::open(&path).unwrap();
        let mut plain = Vec::new();
        reader.decoder.read_to_end(&mut plain).unwrap();
        let mut raw = Vec::new();
        ReplayHeader::now("x", "y").write_to(&mut raw).unwrap();
        raw.extend_from_slice(&plain[..plain.len() - 3]);
        fs::write(&path, zstd::encode_all(raw.as_slice(), 0).unwrap()).unwrap();

        let summary = ReplaySummary::scan(&path).unwrap();
        assert_eq!(summary.frames, 1);
        assert!(summary.truncated.is_some());
    }
}
