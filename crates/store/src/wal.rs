// SPDX-License-Identifier: MIT
// Copyright (c) 2026 The Gantry Authors

//! Append-only write-ahead log of control-plane events.
//!
//! One JSON object per line: `{"seq": N, "event": {...}}`. The WAL is the
//! durability boundary — an event is committed once `append` + `flush`
//! return. Snapshots truncate the log; replay applies the snapshot first,
//! then every remaining line in order.

use crate::error::StoreError;
use gantry_core::Event;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Serialize, Deserialize)]
struct WalLine {
    seq: u64,
    event: Event,
}

/// A sequenced WAL entry yielded by replay.
#[derive(Debug)]
pub struct WalEntry {
    pub seq: u64,
    pub event: Event,
}

pub struct Wal {
    path: PathBuf,
    writer: BufWriter<File>,
    write_seq: u64,
}

impl Wal {
    /// Open (or create) the WAL at `path`, scanning existing lines to
    /// resume the sequence counter. A torn final line (crash mid-write) is
    /// truncated away so the next append starts on a clean line.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let write_seq = match File::open(path) {
            Ok(file) => {
                let (seq, valid_len) = scan(file, path)?;
                let on_disk = std::fs::metadata(path)?.len();
                if valid_len < on_disk {
                    tracing::warn!(
                        path = %path.display(),
                        dropped = on_disk - valid_len,
                        "truncating torn wal tail"
                    );
                    let file = OpenOptions::new().write(true).open(path)?;
                    file.set_len(valid_len)?;
                }
                seq
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(e) => return Err(e.into()),
        };
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self { path: path.to_path_buf(), writer: BufWriter::new(file), write_seq })
    }

    /// Append one event, returning its sequence number. Callers must
    /// `flush` before treating the event as committed.
    pub fn append(&mut self, event: &Event) -> Result<u64, StoreError> {
        self.write_seq += 1;
        let line = WalLine { seq: self.write_seq, event: event.clone() };
        serde_json::to_writer(&mut self.writer, &line)
            .map_err(|e| StoreError::Corrupt { line: self.write_seq as usize, reason: e.to_string() })?;
        self.writer.write_all(b"\n")?;
        Ok(self.write_seq)
    }

    pub fn flush(&mut self) -> Result<(), StoreError> {
        self.writer.flush()?;
        self.writer.get_ref().sync_data()?;
        Ok(())
    }

    pub fn write_seq(&self) -> u64 {
        self.write_seq
    }

    /// Replay every entry currently on disk, oldest first.
    pub fn replay(&self) -> Result<Vec<WalEntry>, StoreError> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let lines: Vec<String> = BufReader::new(file).lines().collect::<Result<_, _>>()?;
        let mut entries = Vec::new();
        for (idx, line) in lines.iter().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<WalLine>(line) {
                Ok(parsed) => entries.push(WalEntry { seq: parsed.seq, event: parsed.event }),
                // Same tolerance as open(): a torn final line is a crash
                // artifact, anything earlier is corruption.
                Err(e) if idx + 1 == lines.len() => {
                    tracing::warn!(path = %self.path.display(), "dropping torn wal tail: {e}");
                }
                Err(e) => {
                    return Err(StoreError::Corrupt { line: idx + 1, reason: e.to_string() });
                }
            }
        }
        Ok(entries)
    }

    /// Truncate the log after a snapshot has captured its effects.
    ///
    /// The sequence counter keeps counting; only the file restarts.
    pub fn truncate(&mut self) -> Result<(), StoreError> {
        self.writer.flush()?;
        let file = OpenOptions::new().create(true).write(true).truncate(true).open(&self.path)?;
        self.writer = BufWriter::new(file);
        Ok(())
    }
}

/// Scan an existing WAL: returns the last sequence number and the byte
/// length of the valid prefix.
///
/// A parse failure on the final line is a crash artifact; anywhere else it
/// is corruption.
fn scan(file: File, _path: &Path) -> Result<(u64, u64), StoreError> {
    let mut seq = 0;
    let mut valid_len: u64 = 0;
    let lines: Vec<String> = BufReader::new(file).lines().collect::<Result<_, _>>()?;
    for (idx, line) in lines.iter().enumerate() {
        if line.trim().is_empty() {
            valid_len += line.len() as u64 + 1;
            continue;
        }
        match serde_json::from_str::<WalLine>(line) {
            Ok(parsed) => {
                seq = parsed.seq;
                valid_len += line.len() as u64 + 1;
            }
            Err(e) if idx + 1 == lines.len() => {
                tracing::warn!("dropping torn wal tail: {e}");
            }
            Err(e) => {
                return Err(StoreError::Corrupt { line: idx + 1, reason: e.to_string() });
            }
        }
    }
    Ok((seq, valid_len))
}

#[cfg(test)]
#[path = "wal_tests.rs"]
mod tests;
