use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Host notification surface (a foreground-service notification, a system
/// tray, a test recorder). The engine shapes and rate-limits what goes
/// through here; rendering is the host's concern.
pub trait NotificationSink: Send + Sync {
    /// Progress channel: a persistent, updatable notification.
    fn update(&self, title: &str, body: &str, percent: u8);

    /// Terminal channel: a one-shot completion notice. Never throttled.
    fn completion(&self, message: &str);
}

/// A sink shared behind an `Arc` is still a sink, so hosts can hold onto
/// their handle while the throttle owns another.
impl<S: NotificationSink + ?Sized> NotificationSink for Arc<S> {
    fn update(&self, title: &str, body: &str, percent: u8) {
        (**self).update(title, body, percent);
    }

    fn completion(&self, message: &str) {
        (**self).completion(message);
    }
}

/// Derive a 0–100 percentage from a `"<current> / <total>"`-shaped body.
/// Malformed bodies degrade to 0 rather than erroring.
pub fn parse_progress_percent(body: &str) -> u8 {
    let Some((left, right)) = body.split_once(" / ") else {
        return 0;
    };
    let digits = |s: &str| -> u64 {
        s.chars()
            .filter(char::is_ascii_digit)
            .collect::<String>()
            .parse()
            .unwrap_or(0)
    };
    let current = digits(left);
    let total = digits(right).max(1);
    ((current * 100 / total).min(100)) as u8
}

/// Rate-limits the progress notification channel.
///
/// Non-forced emissions inside the minimum interval are dropped; forced
/// emissions (state transitions: start, pause-on-error, finalize) always go
/// through, as does the terminal completion channel.
pub struct NotificationThrottle<S: NotificationSink> {
    sink: S,
    min_interval: Duration,
    last_emit: Mutex<Option<Instant>>,
    last_percent: Mutex<u8>,
}

impl<S: NotificationSink> NotificationThrottle<S> {
    pub fn new(sink: S, min_interval: Duration) -> Self {
        Self {
            sink,
            min_interval,
            last_emit: Mutex::new(None),
            last_percent: Mutex::new(0),
        }
    }

    /// Emit on the progress channel. Returns whether the emission went
    /// through or was dropped by the throttle.
    pub fn emit(&self, title: &str, body: &str, force: bool) -> bool {
        {
            let mut last = match self.last_emit.lock() {
                Ok(guard) => guard,
                Err(_) => return false,
            };
            if !force {
                if let Some(stamp) = *last {
                    if stamp.elapsed() < self.min_interval {
                        return false;
                    }
                }
            }
            *last = Some(Instant::now());
        }

        let percent = parse_progress_percent(body);
        if let Ok(mut p) = self.last_percent.lock() {
            *p = percent;
        }
        self.sink.update(title, body, percent);
        true
    }

    /// Emit on the terminal channel. Bypasses the throttle entirely so a
    /// completion can never be swallowed.
    pub fn completion(&self, message: &str) {
        self.sink.completion(message);
    }

    /// Most recently emitted percentage.
    pub fn last_percent(&self) -> u8 {
        self.last_percent.lock().map(|p| *p).unwrap_or(0)
    }
}
