use crate::config::LINE_BUFFER_LEN;

const BACKSPACE: u8 = 0x08;
const DELETE: u8 = 0x7F;

#[derive(Debug, PartialEq, Eq)]
pub enum LineReadEvent<'a> {
    None,
    /// A byte was stored and may be echoed.
    Stored(u8),
    /// The last stored byte was dropped; echo `"\b \b"`.
    Erased,
    Complete(&'a [u8]),
    Overflow,
}

/// Assembles console bytes into lines, one byte at a time.
pub struct SerialLineReader {
    line_buf: [u8; LINE_BUFFER_LEN],
    line_len: usize,
    overflowed: bool,
}

impl Default for SerialLineReader {
    fn default() -> Self {
        Self::new()
    }
}

impl SerialLineReader {
    pub const fn new() -> Self {
        Self {
            line_buf: [0; LINE_BUFFER_LEN],
            line_len: 0,
            overflowed: false,
        }
    }

    pub fn push_byte(&mut self, byte: u8) -> LineReadEvent<'_> {
        if byte == b'\r' || byte == b'\n' {
            if self.overflowed {
                self.overflowed = false;
                return LineReadEvent::None;
            }
            if self.line_len == 0 {
                return LineReadEvent::None;
            }
            let complete_len = self.line_len;
            self.line_len = 0;
            return LineReadEvent::Complete(&self.line_buf[..complete_len]);
        }

        if self.overflowed {
            return LineReadEvent::None;
        }

        if byte == BACKSPACE || byte == DELETE {
            if self.line_len == 0 {
                return LineReadEvent::None;
            }
            self.line_len -= 1;
            return LineReadEvent::Erased;
        }

        if self.line_len < self.line_buf.len() {
            self.line_buf[self.line_len] = byte;
            self.line_len += 1;
            return LineReadEvent::Stored(byte);
        }

        self.line_len = 0;
        self.overflowed = true;
        LineReadEvent::Overflow
    }
}
