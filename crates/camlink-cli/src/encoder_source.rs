//! A file-backed [`EncoderSource`] for LAN/loopback testing and canned
//! playback: the camera and H.264 encoder are external collaborators, out
//! of scope for the core, but the CLI still needs something to feed the
//! sender framer without real capture hardware attached.
//!
//! Each file in `dir`, sorted by name, is treated as one complete Access
//! Unit of Annex-B bytes (e.g. `frame_0000.h264`, `frame_0001.h264`, ...).
//! Encoder output is the only pacing source the framer respects — it adds
//! no inter-AU delay of its own — so this fixture supplies that pacing
//! itself, standing in for a real encoder's own cadence.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use camlink_codec::annexb::{contains_idr, contains_spspps};
use camlink_codec::{AccessUnit, EncoderSource};
use tracing::{info, warn};

pub struct FileEncoderSource {
    aus: Vec<Vec<u8>>,
    next_index: usize,
    loop_playback: bool,
    frame_interval: Duration,
    next_emit_at: Instant,
    idr_forced: bool,
    started_at: Instant,
}

impl FileEncoderSource {
    pub fn load(dir: &Path, fps: f64, loop_playback: bool) -> anyhow::Result<Self> {
        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|p| p.is_file())
            .collect();
        paths.sort();
        if paths.is_empty() {
            anyhow::bail!("no Access Unit files found in {dir:?}");
        }
        let aus: Vec<Vec<u8>> = paths
            .iter()
            .map(std::fs::read)
            .collect::<Result<_, _>>()?;
        info!(count = aus.len(), fps, "loaded canned Access Unit sequence");
        let now = Instant::now();
        Ok(Self {
            aus,
            next_index: 0,
            loop_playback,
            frame_interval: Duration::from_secs_f64(1.0 / fps.max(1.0)),
            next_emit_at: now,
            idr_forced: false,
            started_at: now,
        })
    }

    fn monotonic_ts_ms(&self) -> u32 {
        self.started_at.elapsed().as_millis() as u32
    }
}

impl EncoderSource for FileEncoderSource {
    fn try_next_au(&mut self) -> Option<AccessUnit> {
        let now = Instant::now();
        if now < self.next_emit_at {
            return None;
        }
        if self.next_index >= self.aus.len() {
            if !self.loop_playback {
                return None;
            }
            self.next_index = 0;
        }

        let mut index = self.next_index;
        // A forced IDR is honored by jumping to the next file that is
        // itself a keyframe, if the canned sequence has one; otherwise we
        // fall through and just emit the next scheduled AU — this fixture's
        // control is limited to reordering within what it already has.
        if self.idr_forced {
            if let Some(found) = self.aus[index..]
                .iter()
                .position(|data| contains_idr(data))
                .map(|offset| index + offset)
            {
                index = found;
                self.idr_forced = false;
            } else {
                warn!("IDR forced but no keyframe available in canned sequence");
            }
        }

        let data = self.aus[index].clone();
        self.next_index = index + 1;
        self.next_emit_at = now + self.frame_interval;

        Some(AccessUnit {
            is_keyframe: contains_idr(&data),
            has_spspps: contains_spspps(&data),
            ts_ms: self.monotonic_ts_ms(),
            data,
        })
    }

    fn request_idr(&mut self) {
        self.idr_forced = true;
    }

    fn is_exhausted(&self) -> bool {
        !self.loop_playback && self.next_index >= self.aus.len()
    }
}
