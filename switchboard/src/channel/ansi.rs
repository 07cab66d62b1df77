//! ANSI escape stripping using the vte state machine.

use vte::{Parser, Perform};

struct Printer {
    out: String,
}

impl Perform for Printer {
    fn print(&mut self, c: char) {
        self.out.push(c);
    }

    fn execute(&mut self, byte: u8) {
        if matches!(byte, b'\n' | b'\r' | b'\t') {
            self.out.push(byte as char);
        }
    }
}

/// Remove escape sequences and non-printing control bytes from `text`.
pub fn strip_ansi(text: &str) -> String {
    if !text.bytes().any(|b| b == 0x1B || (b < 0x20 && !matches!(b, b'\n' | b'\r' | b'\t'))) {
        return text.to_string();
    }
    let mut parser = Parser::new();
    let mut printer = Printer {
        out: String::with_capacity(text.len()),
    };
    parser.advance(&mut printer, text.as_bytes());
    printer.out
}
