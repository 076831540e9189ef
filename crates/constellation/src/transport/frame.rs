// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Length-prefixed multipart framing over a byte stream.
//!
//! Wire format per message:
//!
//! ```text
//! +--------------+----------------+---------+-----+
//! | nframes (1B) | len (4B BE)    | frame 0 | ... |
//! +--------------+----------------+---------+-----+
//! ```
//!
//! CSCP and CHP messages are at most three frames; the limits below reject
//! anything a well-behaved peer would never send.

use std::io::{self, Read, Write};

/// Maximum frames per message.
const MAX_FRAMES: usize = 8;
/// Maximum bytes per frame (16 MiB).
const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Write a multipart message to the stream.
pub fn write_frames<W: Write>(writer: &mut W, frames: &[Vec<u8>]) -> io::Result<()> {
    if frames.is_empty() || frames.len() > MAX_FRAMES {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid frame count {}", frames.len()),
        ));
    }
    writer.write_all(&[frames.len() as u8])?;
    for frame in frames {
        if frame.len() > MAX_FRAME_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("frame of {} bytes exceeds limit", frame.len()),
            ));
        }
        writer.write_all(&(frame.len() as u32).to_be_bytes())?;
        writer.write_all(frame)?;
    }
    writer.flush()
}

/// Read one multipart message from the stream.
///
/// Blocks until a full message arrived; honours any read timeout configured
/// on the underlying socket.
pub fn read_frames<R: Read>(reader: &mut R) -> io::Result<Vec<Vec<u8>>> {
    let mut count = [0u8; 1];
    reader.read_exact(&mut count)?;
    let count = usize::from(count[0]);
    if count == 0 || count > MAX_FRAMES {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("invalid frame count {}", count),
        ));
    }

    let mut frames = Vec::with_capacity(count);
    for _ in 0..count {
        let mut len = [0u8; 4];
        reader.read_exact(&mut len)?;
        let len = u32::from_be_bytes(len) as usize;
        if len > MAX_FRAME_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("frame of {} bytes exceeds limit", len),
            ));
        }
        let mut frame = vec![0u8; len];
        reader.read_exact(&mut frame)?;
        frames.push(frame);
    }
    Ok(frames)
}
