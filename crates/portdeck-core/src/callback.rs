/// Format hint accompanying a progress callback.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ProgressHint {
    #[default]
    None,
    /// `amount`/`total` are byte counts.
    Data,
    /// `amount`/`total` are percentage points.
    Percent,
}

/// Progress and message sink consumed by every long-running operation.
///
/// Implementations must tolerate an unknown `total` (open-ended progress)
/// and should de-duplicate repeated `message` values; `progress(None, ...)`
/// resets that de-duplication state.
pub trait Callback: Send + Sync {
    fn progress(&self, message: Option<&str>, amount: u64, total: Option<u64>, hint: ProgressHint);

    fn message(&self, text: &str);

    /// Modal-style notice; presentation layers may block on acknowledgement.
    fn message_box(&self, text: &str);
}

/// Sink that swallows everything. Used by the command bus and by tests that
/// do not inspect progress.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullCallback;

impl Callback for NullCallback {
    fn progress(&self, _: Option<&str>, _: u64, _: Option<u64>, _: ProgressHint) {}
    fn message(&self, _: &str) {}
    fn message_box(&self, _: &str) {}
}

/// Last-message de-duplication shared by console-style sinks.
///
/// `observe` returns true when the message should be emitted; a reset (the
/// `progress(None, ...)` contract) clears the remembered value.
#[derive(Debug, Default)]
pub struct MessageDedup {
    last: std::sync::Mutex<Option<String>>,
}

impl MessageDedup {
    pub fn observe(&self, text: &str) -> bool {
        let mut last = self.last.lock().expect("dedup lock poisoned");
        if last.as_deref() == Some(text) {
            return false;
        }
        *last = Some(text.to_string());
        true
    }

    pub fn reset(&self) {
        let mut last = self.last.lock().expect("dedup lock poisoned");
        *last = None;
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::{Callback, ProgressHint};
    use std::sync::Mutex;

    /// Records every callback invocation for assertions.
    #[derive(Debug, Default)]
    pub(crate) struct RecordingCallback {
        pub(crate) messages: Mutex<Vec<String>>,
        pub(crate) progress: Mutex<Vec<(Option<String>, u64, Option<u64>)>>,
    }

    impl Callback for RecordingCallback {
        fn progress(
            &self,
            message: Option<&str>,
            amount: u64,
            total: Option<u64>,
            _hint: ProgressHint,
        ) {
            self.progress
                .lock()
                .unwrap()
                .push((message.map(ToString::to_string), amount, total));
        }

        fn message(&self, text: &str) {
            self.messages.lock().unwrap().push(text.to_string());
        }

        fn message_box(&self, text: &str) {
            self.messages.lock().unwrap().push(format!("[box] {text}"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_suppresses_repeats_until_reset() {
        let dedup = MessageDedup::default();
        assert!(dedup.observe("fetching"));
        assert!(!dedup.observe("fetching"));
        assert!(dedup.observe("extracting"));
        dedup.reset();
        assert!(dedup.observe("extracting"));
    }
}
