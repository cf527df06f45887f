/// Sink for the output of a remote command.
pub trait OutputReceiver {
    fn add_output(&mut self, data: &[u8]);

    /// Called once the command finished and all output was delivered.
    fn flush(&mut self) {}

    fn is_cancelled(&self) -> bool {
        false
    }
}

#[derive(Debug, Default)]
pub struct NullReceiver;

impl OutputReceiver for NullReceiver {
    fn add_output(&mut self, _data: &[u8]) {}
}

/// Buffers everything and exposes it as (lossy) UTF-8 text.
#[derive(Debug, Default)]
pub struct CollectingReceiver {
    buffer: Vec<u8>,
    finished: bool,
}

impl CollectingReceiver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn output(&self) -> String {
        String::from_utf8_lossy(&self.buffer).to_string()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

impl OutputReceiver for CollectingReceiver {
    fn add_output(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    fn flush(&mut self) {
        self.finished = true;
    }
}

/// Splits output into lines (without terminators) and hands each to a callback.
/// A trailing partial line is delivered on flush.
pub struct LineReceiver<F: FnMut(&str)> {
    pending: String,
    on_line: F,
}

impl<F: FnMut(&str)> LineReceiver<F> {
    pub fn new(on_line: F) -> Self {
        Self {
            pending: String::new(),
            on_line,
        }
    }
}

impl<F: FnMut(&str)> OutputReceiver for LineReceiver<F> {
    fn add_output(&mut self, data: &[u8]) {
        self.pending.push_str(&String::from_utf8_lossy(data));
        while let Some(index) = self.pending.find('\n') {
            let line = self.pending[..index].trim_end_matches('\r').to_string();
            self.pending.drain(..=index);
            (self.on_line)(&line);
        }
    }

    fn flush(&mut self) {
        if !self.pending.is_empty() {
            let line = std::mem::take(&mut self.pending);
            (self.on_line)(line.trim_end_matches('\r'));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collecting_receiver_joins_chunks() {
        let mut receiver = CollectingReceiver::new();
        receiver.add_output(b"Succ");
        receiver.add_output(b"ess\n");
        receiver.flush();
        assert_eq!(receiver.output(), "Success\n");
        assert!(receiver.is_finished());
    }

    #[test]
    fn line_receiver_handles_split_lines_and_crlf() {
        let mut lines = Vec::new();
        {
            let mut receiver = LineReceiver::new(|line: &str| lines.push(line.to_string()));
            receiver.add_output(b"/sdc");
            receiver.add_output(b"ard\r\n\n/storage/emu");
            receiver.add_output(b"lated/0");
            receiver.flush();
        }
        assert_eq!(lines, vec!["/sdcard", "", "/storage/emulated/0"]);
    }
}
