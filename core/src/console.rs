//! The user-facing output handle.
//!
//! Chat output is not logging: it has to interleave cleanly with the
//! input prompt, which the binary's output thread owns. Components
//! therefore never print — they push lines through this handle, and
//! the output thread drains them under the console mutex.
//!
//! The handle is constructed once by whoever owns the output side and
//! cloned into every component that talks to the user.

use crossbeam_channel::{unbounded, Receiver, Sender};

/// Cloneable sender half of the console queue.
#[derive(Debug, Clone)]
pub struct Console {
    sender: Sender<String>,
    debug: bool,
}

impl Console {
    /// Create the console queue. The receiver goes to the output
    /// thread, the handle to the components.
    pub fn channel(debug: bool) -> (Self, Receiver<String>) {
        let (sender, receiver) = unbounded();
        (Self { sender, debug }, receiver)
    }

    /// A console whose output is discarded. Test helper.
    pub fn sink() -> Self {
        let (console, _receiver) = Self::channel(false);
        console
    }

    /// Whether debug lines are shown.
    pub fn debug_enabled(&self) -> bool {
        self.debug
    }

    /// Plain status line.
    pub fn say(&self, line: impl Into<String>) {
        let _ = self.sender.send(line.into());
    }

    /// A delivered chat message.
    pub fn chat(&self, line: impl Into<String>) {
        let _ = self.sender.send(line.into());
    }

    /// Something the user did wrong; state unchanged.
    pub fn warn(&self, line: impl Into<String>) {
        let _ = self.sender.send(format!("[warn] {}", line.into()));
    }

    /// Something went wrong underneath the user.
    pub fn error(&self, line: impl Into<String>) {
        let _ = self.sender.send(format!("[error] {}", line.into()));
    }

    /// Protocol chatter, shown only with `--debug`.
    pub fn debug(&self, line: impl Into<String>) {
        if self.debug {
            let _ = self.sender.send(format!("[debug] {}", line.into()));
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
