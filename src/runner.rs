//! Poll/render/wait loop.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Local;
use tracing::{debug, info};

use crate::monitor::{Connector, Snapshot, poll};
use crate::render::Render;

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);

/// Granularity of stop-flag checks while waiting between ticks.
const SLEEP_SLICE: Duration = Duration::from_millis(100);

/// Counters reported when the loop ends.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub ticks: u64,
    pub healthy: u64,
    pub failed: u64,
}

/// Repeatedly polls a database and hands each snapshot to a renderer.
pub struct Monitor<C: Connector, R: Render> {
    connector: C,
    renderer: R,
    tables: Vec<String>,
    interval: Duration,
    max_ticks: Option<u64>,
    running: Arc<AtomicBool>,
}

impl<C: Connector, R: Render> Monitor<C, R> {
    pub fn new(connector: C, renderer: R, tables: Vec<String>) -> Self {
        Self {
            connector,
            renderer,
            tables,
            interval: DEFAULT_INTERVAL,
            max_ticks: None,
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Sets the wait between ticks.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Stops after `ticks` ticks instead of running until interrupted.
    pub fn with_max_ticks(mut self, ticks: u64) -> Self {
        self.max_ticks = Some(ticks);
        self
    }

    /// Shares an externally owned run flag; clearing it stops the loop.
    pub fn with_running_flag(mut self, running: Arc<AtomicBool>) -> Self {
        self.running = running;
        self
    }

    /// Handle that stops the loop when set to `false`.
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    /// Runs until the run flag is cleared or the tick limit is reached.
    ///
    /// A snapshot that has been polled is always rendered in full before the
    /// flag is checked again. Only a renderer I/O failure ends the loop with
    /// an error; database failures are rendered and retried on the next tick.
    pub fn run(&mut self) -> io::Result<RunSummary> {
        let mut summary = RunSummary::default();

        info!(
            tables = self.tables.len(),
            interval_secs = self.interval.as_secs_f64(),
            "starting poll loop"
        );

        while self.running.load(Ordering::SeqCst) {
            let at = Local::now();
            let snapshot = poll(&self.connector, &self.tables);

            summary.ticks += 1;
            match &snapshot {
                Snapshot::Connected { .. } => summary.healthy += 1,
                Snapshot::ConnectionFailed { error } => {
                    summary.failed += 1;
                    debug!(error = %error, tick = summary.ticks, "poll failed");
                }
            }

            self.renderer.render(at, &snapshot)?;

            if self.max_ticks.is_some_and(|max| summary.ticks >= max) {
                debug!(ticks = summary.ticks, "tick limit reached");
                break;
            }

            self.wait();
        }

        info!(
            ticks = summary.ticks,
            healthy = summary.healthy,
            failed = summary.failed,
            "poll loop stopped"
        );
        Ok(summary)
    }

    /// Sleeps for one interval with periodic checks for the stop flag.
    fn wait(&self) {
        let mut remaining = self.interval;
        while remaining > Duration::ZERO && self.running.load(Ordering::SeqCst) {
            let sleep_time = remaining.min(SLEEP_SLICE);
            std::thread::sleep(sleep_time);
            remaining = remaining.saturating_sub(sleep_time);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::mock::MockConnector;
    use crate::monitor::{TableCount, default_tables};
    use crate::render::TextRenderer;
    use chrono::DateTime;
    use std::time::Instant;

    /// Keeps every snapshot it is given and runs a hook after each one.
    #[derive(Default)]
    struct Recorder {
        seen: Vec<Snapshot>,
        after_render: Option<Box<dyn FnMut(usize)>>,
    }

    impl Recorder {
        fn with_hook(hook: impl FnMut(usize) + 'static) -> Self {
            Self {
                seen: Vec::new(),
                after_render: Some(Box::new(hook)),
            }
        }
    }

    impl Render for Recorder {
        fn render(&mut self, _at: DateTime<Local>, snapshot: &Snapshot) -> io::Result<()> {
            self.seen.push(snapshot.clone());
            if let Some(hook) = self.after_render.as_mut() {
                hook(self.seen.len());
            }
            Ok(())
        }
    }

    struct BrokenPipe;

    impl Render for BrokenPipe {
        fn render(&mut self, _at: DateTime<Local>, _snapshot: &Snapshot) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "stdout closed"))
        }
    }

    fn end_to_end_db() -> MockConnector {
        MockConnector::new()
            .with_table("Users", 10)
            .with_table("Posts", 25)
            .with_table("Likes", 0)
            .with_table("Friendships", 0)
            .with_table("Notifications", 0)
            .with_table("Bookmarks", 0)
    }

    #[test]
    fn single_tick_renders_end_to_end_snapshot() {
        let connector = end_to_end_db();
        let mut monitor = Monitor::new(
            connector.clone(),
            TextRenderer::new(Vec::new(), false),
            default_tables(),
        )
        .with_max_ticks(1);

        let summary = monitor.run().unwrap();
        assert_eq!(
            summary,
            RunSummary {
                ticks: 1,
                healthy: 1,
                failed: 0
            }
        );

        let out = String::from_utf8(monitor.renderer.into_inner()).unwrap();
        assert!(out.contains("Connection: Healthy"));
        assert!(out.contains("| Users           | 10         |"));
        assert!(out.contains("| Posts           | 25         |"));
        assert!(out.contains("| Comments        | N/A        |"));
        assert!(out.contains("| Bookmarks       | 0          |"));
        assert!(connector.all_sessions_closed());
    }

    #[test]
    fn unreachable_database_fails_every_tick() {
        let connector = end_to_end_db().refuse("Can't connect to MySQL server on 'db:4001'");
        let mut monitor = Monitor::new(connector.clone(), Recorder::default(), default_tables())
            .with_interval(Duration::from_millis(10))
            .with_max_ticks(2);

        let summary = monitor.run().unwrap();
        assert_eq!(summary.ticks, 2);
        assert_eq!(summary.failed, 2);
        assert_eq!(connector.connect_attempts(), 2);
        assert!(connector.queries().is_empty());
        for snapshot in &monitor.renderer().seen {
            match snapshot {
                Snapshot::ConnectionFailed { error } => assert!(!error.is_empty()),
                other => panic!("expected connection failure, got {:?}", other),
            }
        }
    }

    #[test]
    fn each_tick_sees_fresh_counts() {
        let connector = end_to_end_db();
        let flag = Arc::new(AtomicBool::new(true));
        let recorder = {
            let connector = connector.clone();
            let flag = Arc::clone(&flag);
            Recorder::with_hook(move |rendered| {
                if rendered == 1 {
                    connector.set_rows("Users", 11);
                } else {
                    flag.store(false, Ordering::SeqCst);
                }
            })
        };
        let mut monitor = Monitor::new(connector.clone(), recorder, default_tables())
            .with_interval(Duration::ZERO)
            .with_running_flag(flag);

        let summary = monitor.run().unwrap();
        assert_eq!(summary.ticks, 2);

        let seen = &monitor.renderer().seen;
        assert_eq!(seen[0].count_of("Users"), Some(TableCount::Count(10)));
        assert_eq!(seen[1].count_of("Users"), Some(TableCount::Count(11)));
        assert_eq!(seen[1].count_of("Posts"), Some(TableCount::Count(25)));
        assert_eq!(connector.connects(), 2);
        assert!(connector.all_sessions_closed());
    }

    #[test]
    fn cleared_flag_prevents_any_tick() {
        let connector = end_to_end_db();
        let mut monitor = Monitor::new(connector.clone(), Recorder::default(), default_tables());
        monitor.running_flag().store(false, Ordering::SeqCst);

        let summary = monitor.run().unwrap();
        assert_eq!(summary.ticks, 0);
        assert_eq!(connector.connect_attempts(), 0);
    }

    #[test]
    fn stop_during_wait_returns_promptly() {
        let flag = Arc::new(AtomicBool::new(true));
        let recorder = {
            let flag = Arc::clone(&flag);
            Recorder::with_hook(move |_| flag.store(false, Ordering::SeqCst))
        };
        let mut monitor = Monitor::new(end_to_end_db(), recorder, default_tables())
            .with_interval(Duration::from_secs(60))
            .with_running_flag(flag);

        let started = Instant::now();
        let summary = monitor.run().unwrap();
        assert_eq!(summary.ticks, 1);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn stop_from_another_thread_interrupts_wait() {
        let mut monitor = Monitor::new(end_to_end_db(), Recorder::default(), default_tables())
            .with_interval(Duration::from_secs(60));
        let flag = monitor.running_flag();

        let stopper = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(200));
            flag.store(false, Ordering::SeqCst);
        });

        let started = Instant::now();
        let summary = monitor.run().unwrap();
        stopper.join().unwrap();

        assert_eq!(summary.ticks, 1);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn renderer_failure_ends_loop_with_error() {
        let connector = end_to_end_db();
        let mut monitor = Monitor::new(connector.clone(), BrokenPipe, default_tables());
        let err = monitor.run().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
        assert!(connector.all_sessions_closed());
    }
}
