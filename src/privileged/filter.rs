//! Turns raw pseudo-terminal output into plain text lines.
//!
//! Terminal programs paint: they move the cursor, recolor, and redraw progress
//! bars in place with `\r`. The filter keeps only what a reader would see once
//! the painting settles. Escape sequences are recognized by a `vte` parser,
//! which also carries partial sequences and UTF-8 characters over to the next
//! chunk.

use vte::{Parser, Perform};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Filtered {
    /// Text ready to show.
    pub text: String,
    /// How many password prompts were removed from this chunk.
    pub prompts: usize,
}

pub struct OutputFilter {
    parser: Parser,
    line: LineBuilder,
    /// A chunk ended on 0xC2, the first byte of a UTF-8 encoded C1 control.
    pending_c2: bool,
}

impl OutputFilter {
    /// `prompt` is removed wherever it appears, and counted.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            parser: Parser::new(),
            line: LineBuilder {
                prompt: prompt.into(),
                ..LineBuilder::default()
            },
            pending_c2: false,
        }
    }

    /// Feed one chunk. Only complete lines are returned; an unterminated
    /// line is held until it ends, or until [`OutputFilter::flush_partial`].
    pub fn push(&mut self, bytes: &[u8]) -> Filtered {
        let bytes = self.seven_bit(bytes);
        self.parser.advance(&mut self.line, &bytes);
        std::mem::take(&mut self.line.out)
    }

    /// Hand out the unterminated line, so prompts like `[Y/n]` are visible
    /// while the program waits. A line that could still become the password
    /// prompt is held back.
    pub fn flush_partial(&mut self) -> String {
        let line = &mut self.line;
        if line.line.len() <= line.emitted {
            return String::new();
        }
        if line.emitted == 0 && line.prompt.starts_with(line.line.as_str()) {
            return String::new();
        }
        let text = line.line[line.emitted..].to_string();
        line.emitted = line.line.len();
        text
    }

    /// Everything still buffered, for when the stream has ended. An escape
    /// sequence cut off by the end of the stream is dropped.
    pub fn finish(&mut self) -> String {
        self.pending_c2 = false;
        let line = &mut self.line;
        let mut text = std::mem::take(&mut line.out.text);
        if line.line.len() > line.emitted {
            text.push_str(&line.line[line.emitted..]);
        }
        line.line.clear();
        line.emitted = 0;
        text
    }

    /// Rewrite UTF-8 encoded C1 controls (U+0080..U+009F) to their 7-bit
    /// `ESC Fe` form, so CSI, DCS, OSC and ST introduced that way are parsed
    /// as sequences instead of printed.
    fn seven_bit(&mut self, bytes: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(bytes.len() + 1);
        let mut c2 = std::mem::take(&mut self.pending_c2);

        for &b in bytes {
            if c2 {
                c2 = false;
                if (0x80..=0x9f).contains(&b) {
                    out.push(0x1b);
                    out.push(b - 0x40);
                } else {
                    out.push(0xc2);
                    out.push(b);
                }
            } else if b == 0xc2 {
                c2 = true;
            } else {
                out.push(b);
            }
        }

        self.pending_c2 = c2;
        out
    }
}

/// Builds lines from the characters and C0 controls the parser lets through.
/// Every other `Perform` callback keeps its no-op default, which is what
/// drops CSI, OSC, DCS and the rest.
#[derive(Debug, Default)]
struct LineBuilder {
    prompt: String,
    /// The line being built, not yet terminated by `\n`.
    line: String,
    /// Bytes of `line` already handed out by `flush_partial`.
    emitted: usize,
    cr_pending: bool,
    after_prompt: bool,
    out: Filtered,
}

impl Perform for LineBuilder {
    fn print(&mut self, c: char) {
        if self.cr_pending {
            self.cr_pending = false;
            if self.emitted > 0 {
                self.out.text.push('\n');
            }
            self.line.clear();
            self.emitted = 0;
        }
        self.line.push(c);
        self.after_prompt = false;

        if !self.prompt.is_empty() && self.line.ends_with(self.prompt.as_str()) {
            let cut = self.line.len() - self.prompt.len();
            self.line.truncate(cut);
            self.emitted = self.emitted.min(cut);
            self.after_prompt = true;
            self.out.prompts += 1;
        }
    }

    fn execute(&mut self, byte: u8) {
        match byte {
            b'\n' => self.newline(),
            b'\r' => self.cr_pending = true,
            b'\t' => self.print('\t'),
            0x08 => {
                if self.line.len() > self.emitted {
                    self.line.pop();
                }
            }
            _ => {}
        }
    }
}

impl LineBuilder {
    fn newline(&mut self) {
        if self.after_prompt && self.line.is_empty() {
            // The newline sudo prints after reading the password
            self.after_prompt = false;
            self.cr_pending = false;
            return;
        }
        self.out.text.push_str(&self.line[self.emitted..]);
        self.out.text.push('\n');
        self.line.clear();
        self.emitted = 0;
        self.cr_pending = false;
        self.after_prompt = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROMPT: &str = "[sudo] password: ";

    fn filter() -> OutputFilter {
        OutputFilter::new(PROMPT)
    }

    #[test]
    fn strips_color_and_title_sequences() {
        let mut f = filter();
        let out = f.push(b"\x1b[1;32m::\x1b[0m Done\x1b]0;title\x07\x1b(B\n");
        assert_eq!(out.text, ":: Done\n");
    }

    #[test]
    fn strips_device_control_strings_and_c1_controls() {
        let mut f = filter();
        let out = f.push(b"a\x1bPq#0;2;0;0;0\x1b\\b\n\xc2\x9b31mc\n");
        assert_eq!(out.text, "ab\nc\n");
    }

    #[test]
    fn c1_control_split_across_chunks() {
        let mut f = filter();
        assert_eq!(f.push(b"x\xc2").text, "");
        assert_eq!(f.push(b"\x9b1my\n").text, "xy\n");
    }

    #[test]
    fn other_two_byte_characters_survive() {
        let mut f = filter();
        assert_eq!(f.push("°C ½\n".as_bytes()).text, "°C ½\n");
    }

    #[test]
    fn escape_split_across_chunks() {
        let mut f = filter();
        assert_eq!(f.push(b"ok \x1b[3").text, "");
        assert_eq!(f.push(b"1mred\x1b[0m\n").text, "ok red\n");
    }

    #[test]
    fn utf8_split_across_chunks() {
        let mut f = filter();
        let bytes = "héllo\n".as_bytes();
        // split inside the two-byte é
        assert_eq!(f.push(&bytes[..2]).text, "");
        assert_eq!(f.push(&bytes[2..]).text, "héllo\n");
    }

    #[test]
    fn carriage_return_keeps_last_paint() {
        let mut f = filter();
        let out = f.push(b" 10%\r 55%\r100%\r\n");
        assert_eq!(out.text, "100%\n");
    }

    #[test]
    fn overwrite_after_flush_starts_a_new_line() {
        let mut f = filter();
        f.push(b"downloading 10%");
        assert_eq!(f.flush_partial(), "downloading 10%");
        let out = f.push(b"\rdownloading 100%\n");
        assert_eq!(out.text, "\ndownloading 100%\n");
    }

    #[test]
    fn prompt_is_removed_and_counted() {
        let mut f = filter();
        let first = f.push(b"[sudo] pass");
        assert_eq!(first.prompts, 0);
        assert_eq!(f.flush_partial(), "");

        let second = f.push(b"word: \nresolving dependencies...\n");
        assert_eq!(second.prompts, 1);
        assert_eq!(second.text, "resolving dependencies...\n");
    }

    #[test]
    fn rejection_keeps_message_and_counts_reprompt() {
        let mut f = filter();
        let out = f.push(b"[sudo] password: \nSorry, try again.\n[sudo] password: ");
        assert_eq!(out.prompts, 2);
        assert_eq!(out.text, "Sorry, try again.\n");
    }

    #[test]
    fn partial_line_flushes_once() {
        let mut f = filter();
        f.push(b":: Proceed with installation? [Y/n] ");
        assert_eq!(f.flush_partial(), ":: Proceed with installation? [Y/n] ");
        assert_eq!(f.flush_partial(), "");
        assert_eq!(f.push(b"\n").text, "\n");
    }

    #[test]
    fn finish_returns_trailing_text() {
        let mut f = filter();
        f.push(b"no newline\x1b[");
        assert_eq!(f.finish(), "no newline");
    }
}
