use crate::app::adb::collaborators::SyncProgress;

/// Extracts the completion percentage from one line of `adb push/pull -p` output.
pub fn parse_progress_percent(line: &str) -> Option<u8> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }

    // Common adb `-p` output looks like: "[ 42%] /remote/file -> /local/file"
    let bracketed = trimmed
        .find('[')
        .and_then(|open| trimmed[open..].find(']').map(|close| &trimmed[open + 1..open + close]));
    if let Some(percent) = bracketed.and_then(parse_loose_percent) {
        return Some(percent);
    }

    parse_loose_percent(trimmed)
}

fn parse_loose_percent(input: &str) -> Option<u8> {
    let percent_index = input.find('%')?;
    let digits_start = input[..percent_index]
        .char_indices()
        .rev()
        .take_while(|(_, ch)| ch.is_ascii_digit())
        .take(3)
        .last()
        .map(|(index, _)| index)?;
    let value: u8 = input[digits_start..percent_index].parse().ok()?;
    (value <= 100).then_some(value)
}

/// Feeds percent lines into a [`SyncProgress`] as 100 units of work.
pub struct PercentProgress<'a> {
    progress: &'a mut dyn SyncProgress,
    last: u8,
    started: bool,
}

impl<'a> PercentProgress<'a> {
    pub fn new(progress: &'a mut dyn SyncProgress) -> Self {
        Self {
            progress,
            last: 0,
            started: false,
        }
    }

    pub fn feed_line(&mut self, line: &str) {
        let Some(percent) = parse_progress_percent(line) else {
            return;
        };
        if !self.started {
            self.progress.start(100);
            self.started = true;
        }
        if percent > self.last {
            self.progress.advance(u64::from(percent - self.last));
            self.last = percent;
        }
    }

    pub fn finish(self) {
        if self.started {
            self.progress.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bracket_percent() {
        assert_eq!(
            parse_progress_percent("[ 42%] /sdcard/file -> /tmp/file"),
            Some(42)
        );
        assert_eq!(
            parse_progress_percent("[100%] /sdcard/file -> /tmp/file"),
            Some(100)
        );
    }

    #[test]
    fn parses_loose_percent() {
        assert_eq!(parse_progress_percent("42% /sdcard/file"), Some(42));
        assert_eq!(parse_progress_percent("Progress: 7%"), Some(7));
    }

    #[test]
    fn ignores_invalid_percent() {
        assert_eq!(parse_progress_percent("no percent here"), None);
        assert_eq!(parse_progress_percent("200%"), None);
        assert_eq!(parse_progress_percent("%"), None);
    }

    #[derive(Default)]
    struct Recorded {
        total: u64,
        advanced: u64,
        stopped: bool,
    }

    impl SyncProgress for Recorded {
        fn start(&mut self, total_work: u64) {
            self.total = total_work;
        }
        fn advance(&mut self, work: u64) {
            self.advanced += work;
        }
        fn stop(&mut self) {
            self.stopped = true;
        }
    }

    #[test]
    fn percent_lines_drive_progress_monitor() {
        let mut recorded = Recorded::default();
        {
            let mut tracker = PercentProgress::new(&mut recorded);
            tracker.feed_line("[ 10%] /tmp/app.apk");
            tracker.feed_line("[ 10%] /tmp/app.apk");
            tracker.feed_line("[ 65%] /tmp/app.apk");
            tracker.feed_line("/tmp/app.apk: 1 file pushed");
            tracker.feed_line("[100%] /tmp/app.apk");
            tracker.finish();
        }
        assert_eq!(recorded.total, 100);
        assert_eq!(recorded.advanced, 100);
        assert!(recorded.stopped);
    }
}
