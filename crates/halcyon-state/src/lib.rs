//! Save-state byte stream.
//!
//! A [`StateStream`] is a flat byte cursor with two modes: SAVE appends,
//! LOAD consumes. Every primitive goes through a single `do_*` entry point
//! that either writes or reads depending on the mode, so the save and load
//! paths of a component are the same code and cannot drift apart.
//!
//! Sections are delimited by named [markers](StateStream::marker). The stream
//! carries no type tags or version header of its own; compatibility between a
//! saved stream and the loading emulator is enforced entirely by marker-name
//! matching. A mismatched marker means the component ordering or a section's
//! layout changed, and the load is aborted — missing data is never guessed.

#![forbid(unsafe_code)]

use thiserror::Error;

pub type Result<T> = std::result::Result<T, StateError>;

/// Upper bound for length-prefixed strings read from a stream. Streams come
/// from files on disk, so decoding must stay bounded even when the length
/// prefix is garbage.
const MAX_STRING_LEN: usize = 1 << 20;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StateError {
    #[error("state stream truncated: needed {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },

    #[error("state marker mismatch: expected {expected:?}, found {found:?}")]
    MarkerMismatch { expected: String, found: String },

    #[error("corrupt state stream: {0}")]
    Corrupt(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamMode {
    Save,
    Load,
}

pub struct StateStream {
    mode: StreamMode,
    buf: Vec<u8>,
    pos: usize,
}

impl StateStream {
    pub fn new_save() -> Self {
        Self {
            mode: StreamMode::Save,
            buf: Vec::new(),
            pos: 0,
        }
    }

    pub fn new_load(bytes: Vec<u8>) -> Self {
        Self {
            mode: StreamMode::Load,
            buf: bytes,
            pos: 0,
        }
    }

    pub fn mode(&self) -> StreamMode {
        self.mode
    }

    /// Unread bytes remaining in LOAD mode (total length in SAVE mode).
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Finishes a SAVE and yields the stream bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    fn take(&mut self, needed: usize) -> Result<&[u8]> {
        let remaining = self.remaining();
        if needed > remaining {
            return Err(StateError::Truncated { needed, remaining });
        }
        let slice = &self.buf[self.pos..self.pos + needed];
        self.pos += needed;
        Ok(slice)
    }

    pub fn do_u8(&mut self, v: &mut u8) -> Result<()> {
        match self.mode {
            StreamMode::Save => self.buf.push(*v),
            StreamMode::Load => *v = self.take(1)?[0],
        }
        Ok(())
    }

    pub fn do_u16(&mut self, v: &mut u16) -> Result<()> {
        match self.mode {
            StreamMode::Save => self.buf.extend_from_slice(&v.to_le_bytes()),
            StreamMode::Load => {
                let bytes = self.take(2)?;
                *v = u16::from_le_bytes([bytes[0], bytes[1]]);
            }
        }
        Ok(())
    }

    pub fn do_u32(&mut self, v: &mut u32) -> Result<()> {
        match self.mode {
            StreamMode::Save => self.buf.extend_from_slice(&v.to_le_bytes()),
            StreamMode::Load => {
                let bytes = self.take(4)?;
                *v = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            }
        }
        Ok(())
    }

    pub fn do_u64(&mut self, v: &mut u64) -> Result<()> {
        match self.mode {
            StreamMode::Save => self.buf.extend_from_slice(&v.to_le_bytes()),
            StreamMode::Load => {
                let bytes = self.take(8)?;
                let mut raw = [0u8; 8];
                raw.copy_from_slice(bytes);
                *v = u64::from_le_bytes(raw);
            }
        }
        Ok(())
    }

    pub fn do_bool(&mut self, v: &mut bool) -> Result<()> {
        let mut byte = u8::from(*v);
        self.do_u8(&mut byte)?;
        *v = byte != 0;
        Ok(())
    }

    /// Passes an opaque byte range through the stream, exact length.
    pub fn do_raw(&mut self, data: &mut [u8]) -> Result<()> {
        match self.mode {
            StreamMode::Save => self.buf.extend_from_slice(data),
            StreamMode::Load => {
                let len = data.len();
                data.copy_from_slice(self.take(len)?);
            }
        }
        Ok(())
    }

    /// u32 length prefix + UTF-8 bytes.
    pub fn do_string(&mut self, s: &mut String) -> Result<()> {
        match self.mode {
            StreamMode::Save => {
                let len: u32 = s
                    .len()
                    .try_into()
                    .map_err(|_| StateError::Corrupt("string length does not fit in u32"))?;
                self.buf.extend_from_slice(&len.to_le_bytes());
                self.buf.extend_from_slice(s.as_bytes());
            }
            StreamMode::Load => {
                let mut len = 0u32;
                self.do_u32(&mut len)?;
                let len = len as usize;
                if len > MAX_STRING_LEN {
                    return Err(StateError::Corrupt("string length exceeds sanity bound"));
                }
                let bytes = self.take(len)?;
                *s = String::from_utf8(bytes.to_vec())
                    .map_err(|_| StateError::Corrupt("string is not valid UTF-8"))?;
            }
        }
        Ok(())
    }

    /// Named structural checkpoint.
    ///
    /// SAVE writes the name; LOAD reads it back and fails the load on any
    /// mismatch. Placed after every logical section so a drifted layout is
    /// caught at the section boundary instead of corrupting everything after.
    pub fn marker(&mut self, name: &str) -> Result<()> {
        match self.mode {
            StreamMode::Save => {
                let mut owned = name.to_owned();
                self.do_string(&mut owned)
            }
            StreamMode::Load => {
                let mut found = String::new();
                self.do_string(&mut found)?;
                if found != name {
                    return Err(StateError::MarkerMismatch {
                        expected: name.to_owned(),
                        found,
                    });
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn primitives_roundtrip_in_call_order() {
        let mut save = StateStream::new_save();
        let mut a = 0xABu8;
        let mut b = 0x1234u16;
        let mut c = 0xDEAD_BEEFu32;
        let mut d = 0x0123_4567_89AB_CDEFu64;
        let mut e = true;
        let mut s = String::from("scratch/file.bin");
        save.do_u8(&mut a).unwrap();
        save.do_u16(&mut b).unwrap();
        save.do_u32(&mut c).unwrap();
        save.do_u64(&mut d).unwrap();
        save.do_bool(&mut e).unwrap();
        save.do_string(&mut s).unwrap();

        let mut load = StateStream::new_load(save.into_bytes());
        let (mut a2, mut b2, mut c2, mut d2, mut e2, mut s2) =
            (0u8, 0u16, 0u32, 0u64, false, String::new());
        load.do_u8(&mut a2).unwrap();
        load.do_u16(&mut b2).unwrap();
        load.do_u32(&mut c2).unwrap();
        load.do_u64(&mut d2).unwrap();
        load.do_bool(&mut e2).unwrap();
        load.do_string(&mut s2).unwrap();
        assert_eq!((a2, b2, c2, d2, e2, s2.as_str()), (a, b, c, d, e, s.as_str()));
        assert_eq!(load.remaining(), 0);
    }

    #[test]
    fn matching_marker_passes_and_mismatch_is_fatal() {
        let mut save = StateStream::new_save();
        save.marker("Memory").unwrap();
        save.marker("Video").unwrap();
        let bytes = save.into_bytes();

        let mut ok = StateStream::new_load(bytes.clone());
        ok.marker("Memory").unwrap();
        ok.marker("Video").unwrap();

        let mut bad = StateStream::new_load(bytes);
        bad.marker("Memory").unwrap();
        let err = bad.marker("Serial").unwrap_err();
        assert_eq!(
            err,
            StateError::MarkerMismatch {
                expected: "Serial".to_owned(),
                found: "Video".to_owned(),
            }
        );
    }

    #[test]
    fn truncated_stream_is_fatal() {
        let mut load = StateStream::new_load(vec![0x01, 0x02]);
        let mut v = 0u32;
        let err = load.do_u32(&mut v).unwrap_err();
        assert_eq!(
            err,
            StateError::Truncated {
                needed: 4,
                remaining: 2
            }
        );
    }

    #[test]
    fn garbage_string_length_is_bounded() {
        // Length prefix far beyond the stream and beyond the sanity bound.
        let mut load = StateStream::new_load(u32::MAX.to_le_bytes().to_vec());
        let mut s = String::new();
        assert_eq!(
            load.do_string(&mut s).unwrap_err(),
            StateError::Corrupt("string length exceeds sanity bound")
        );
    }

    proptest! {
        #[test]
        fn raw_bytes_roundtrip(data in proptest::collection::vec(any::<u8>(), 0..4096)) {
            let mut save = StateStream::new_save();
            let mut out = data.clone();
            save.do_raw(&mut out).unwrap();
            let mut load = StateStream::new_load(save.into_bytes());
            let mut back = vec![0u8; data.len()];
            load.do_raw(&mut back).unwrap();
            prop_assert_eq!(back, data);
        }

        #[test]
        fn strings_roundtrip(s in "\\PC{0,256}") {
            let mut save = StateStream::new_save();
            let mut owned = s.clone();
            save.do_string(&mut owned).unwrap();
            let mut load = StateStream::new_load(save.into_bytes());
            let mut back = String::new();
            load.do_string(&mut back).unwrap();
            prop_assert_eq!(back, s);
        }
    }
}
