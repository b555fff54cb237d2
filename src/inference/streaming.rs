//! Incremental UTF-8 assembly
//!
//! Token pieces are raw bytes and a multi-byte character may be split across
//! two tokens. [`Utf8Stream`] buffers bytes and only hands out complete
//! characters.

/// Byte accumulator that yields valid UTF-8 prefixes
#[derive(Debug, Default)]
pub struct Utf8Stream {
    buffer: Vec<u8>,
}

impl Utf8Stream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `bytes` and return the longest decodable prefix, if any.
    ///
    /// Invalid sequences that can never complete are replaced with U+FFFD.
    pub fn push(&mut self, bytes: &[u8]) -> Option<String> {
        self.buffer.extend_from_slice(bytes);

        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.buffer) {
                Ok(s) => {
                    out.push_str(s);
                    self.buffer.clear();
                    break;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.buffer[..valid]));
                    match e.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.buffer.drain(..valid + bad);
                        }
                        None => {
                            // Incomplete sequence at the end, wait for more bytes
                            self.buffer.drain(..valid);
                            break;
                        }
                    }
                }
            }
        }

        if out.is_empty() {
            None
        } else {
            Some(out)
        }
    }

    /// Flush whatever is left, lossily.
    pub fn finish(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        let rest = String::from_utf8_lossy(&self.buffer).to_string();
        self.buffer.clear();
        Some(rest)
    }
}
