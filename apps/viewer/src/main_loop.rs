//! Render-loop cadence.
//!
//! The capture core only needs something that ticks; this drives a
//! [`MainLoop`] at a fixed rate until it asks to stop or the process is
//! interrupted.

use std::time::{Duration, Instant};

use tokio::time::{interval, MissedTickBehavior};
use tracing::info;

/// A window-like consumer polled once per tick.
pub trait MainLoop {
    /// Draw one frame.
    ///
    /// # Arguments
    /// * `width` - Current surface width
    /// * `height` - Current surface height
    /// * `time` - Seconds since the loop started
    ///
    /// Returns `false` to leave the loop.
    fn on_main_loop(&mut self, width: u32, height: u32, time: f64) -> bool;

    /// Present the frame drawn by `on_main_loop`.
    fn swap_buffers(&mut self) {}

    /// Surface size handed to `on_main_loop`.
    fn surface_size(&self) -> (u32, u32);
}

#[derive(Debug, Clone, Copy)]
pub struct LoopStats {
    pub ticks: u64,
    pub elapsed: Duration,
    pub interrupted: bool,
}

/// Tick `window` at `fps` Hz. Late ticks are skipped rather than bunched.
pub async fn run_main_loop(window: &mut impl MainLoop, fps: u32) -> LoopStats {
    let mut ticker = interval(Duration::from_secs(1) / fps.max(1));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let start = Instant::now();
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let mut ticks = 0u64;
    let mut interrupted = false;
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = &mut shutdown => {
                info!("Interrupted, leaving main loop");
                interrupted = true;
                break;
            }
        }

        ticks += 1;
        let (width, height) = window.surface_size();
        if !window.on_main_loop(width, height, start.elapsed().as_secs_f64()) {
            break;
        }
        window.swap_buffers();
    }

    LoopStats {
        ticks,
        elapsed: start.elapsed(),
        interrupted,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counter {
        drawn: u32,
        swapped: u32,
        last_time: f64,
    }

    impl MainLoop for Counter {
        fn on_main_loop(&mut self, width: u32, height: u32, time: f64) -> bool {
            assert_eq!((width, height), (320, 240));
            assert!(time >= self.last_time);
            self.last_time = time;
            self.drawn += 1;
            self.drawn < 5
        }

        fn swap_buffers(&mut self) {
            self.swapped += 1;
        }

        fn surface_size(&self) -> (u32, u32) {
            (320, 240)
        }
    }

    #[tokio::test]
    async fn test_runs_until_window_stops() {
        let mut window = Counter {
            drawn: 0,
            swapped: 0,
            last_time: 0.0,
        };
        let stats = run_main_loop(&mut window, 1000).await;
        assert_eq!(stats.ticks, 5);
        assert!(!stats.interrupted);
        assert_eq!(window.drawn, 5);
        // the stopping tick is not presented
        assert_eq!(window.swapped, 4);
    }
}
