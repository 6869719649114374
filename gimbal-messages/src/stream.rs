use alloc::string::String;

const BUFFER_LEN: usize = 1024;

/// Splits a byte stream into newline terminated lines.
///
/// Invalid UTF-8 is replaced, a trailing `\r` is dropped. A buffer that fills up without a line
/// terminator is thrown away as a whole.
pub struct LineStreamDecoder {
    buffer: [u8; BUFFER_LEN],
    len: usize,
    discarded: usize,
}

impl LineStreamDecoder {
    pub fn new() -> Self {
        Self {
            buffer: [0; BUFFER_LEN],
            len: 0,
            discarded: 0,
        }
    }

    /// Read data into internal buffer, returns the number of bytes read.
    pub fn receive(&mut self, f: impl FnOnce(&mut [u8]) -> usize) -> usize {
        if self.len == self.buffer.len() {
            self.len = 0;
            self.discarded += 1;
        }

        let read_len = f(&mut self.buffer[self.len..]);
        self.len += read_len;
        read_len
    }

    /// Drops any partial line.
    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// How many times a full buffer without line terminator was thrown away.
    pub fn discarded(&self) -> usize {
        self.discarded
    }
}

impl Default for LineStreamDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Iterator for LineStreamDecoder {
    type Item = String;

    fn next(&mut self) -> Option<Self::Item> {
        let end = self.buffer[..self.len].iter().position(|&b| b == b'\n')?;

        let line = self.buffer[..end]
            .strip_suffix(b"\r")
            .unwrap_or(&self.buffer[..end]);
        let line = String::from_utf8_lossy(line).into_owned();

        // Shift remaining data to start of buffer
        self.buffer.copy_within(end + 1..self.len, 0);
        self.len -= end + 1;

        Some(line)
    }
}
