/// Incremental UTF-8 decoder for byte streams.
///
/// A multi-byte sequence split across two network reads is held back until
/// the rest of it arrives. Invalid sequences decode to U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8ChunkDecoder {
    remainder: Vec<u8>,
}

impl Utf8ChunkDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode `bytes` and append the text into `out`.
    pub fn decode_into(&mut self, bytes: &[u8], out: &mut String) {
        if self.remainder.is_empty() {
            self.decode_fresh(bytes, out);
            return;
        }
        let mut joined = std::mem::take(&mut self.remainder);
        joined.extend_from_slice(bytes);
        self.decode_fresh(&joined, out);
    }

    /// Flush a dangling incomplete sequence as U+FFFD.
    pub fn finish_into(&mut self, out: &mut String) {
        if !self.remainder.is_empty() {
            self.remainder.clear();
            out.push(char::REPLACEMENT_CHARACTER);
        }
    }

    #[must_use]
    pub fn has_remainder(&self) -> bool {
        !self.remainder.is_empty()
    }

    fn decode_fresh(&mut self, mut bytes: &[u8], out: &mut String) {
        loop {
            match std::str::from_utf8(bytes) {
                Ok(text) => {
                    out.push_str(text);
                    return;
                }
                Err(err) => {
                    let valid = err.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&bytes[..valid]));
                    match err.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            bytes = &bytes[valid + bad..];
                        }
                        None => {
                            self.remainder.extend_from_slice(&bytes[valid..]);
                            return;
                        }
                    }
                }
            }
        }
    }
}
