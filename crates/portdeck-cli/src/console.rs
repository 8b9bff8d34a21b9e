use std::io::{self, IsTerminal, Write};

use portdeck_core::{Callback, MessageDedup, ProgressHint};

/// Terminal-facing callback sink: plain status lines on stderr, a single
/// rewritten progress line when stderr is a terminal, and last-message
/// de-duplication per the sink contract.
pub struct ConsoleCallback {
    quiet: bool,
    interactive: bool,
    dedup: MessageDedup,
}

impl ConsoleCallback {
    #[must_use]
    pub fn new(quiet: bool) -> Self {
        Self {
            quiet,
            interactive: io::stderr().is_terminal(),
            dedup: MessageDedup::default(),
        }
    }

    fn emit(&self, text: &str) {
        if self.quiet || !self.dedup.observe(text) {
            return;
        }
        if self.interactive {
            // Clear any progress line the message would otherwise overlap.
            let _ = io::stderr().write_all(b"\r\x1b[2K");
        }
        eprintln!("portdeck ▸ {text}");
    }
}

impl Callback for ConsoleCallback {
    fn progress(&self, message: Option<&str>, amount: u64, total: Option<u64>, hint: ProgressHint) {
        let Some(message) = message else {
            self.dedup.reset();
            return;
        };
        if self.quiet || !self.interactive {
            return;
        }
        let line = match (total, hint) {
            (Some(total), ProgressHint::Data) => {
                format!("\r\x1b[2Kportdeck ▸ {message} [{amount}/{total} bytes]")
            }
            (Some(total), _) => format!("\r\x1b[2Kportdeck ▸ {message} [{amount}/{total}]"),
            (None, _) => format!("\r\x1b[2Kportdeck ▸ {message} [{amount}]"),
        };
        let _ = io::stderr().write_all(line.as_bytes());
        let _ = io::stderr().flush();
    }

    fn message(&self, text: &str) {
        self.emit(text);
    }

    fn message_box(&self, text: &str) {
        // No modal surface on a terminal; make it stand out instead.
        if !self.quiet {
            if self.interactive {
                let _ = io::stderr().write_all(b"\r\x1b[2K");
            }
            eprintln!("portdeck ▸▸ {text}");
        }
    }
}
