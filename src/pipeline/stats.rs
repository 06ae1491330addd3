//! Pipeline counters.
//!
//! Every stage records what it did with a relaxed atomic increment; nothing
//! reads these on the hot path. [`PipelineStats::snapshot`] copies them into a
//! plain value for reporting.

use std::sync::atomic::{AtomicU64, Ordering};

macro_rules! pipeline_counters {
    ($($(#[$doc:meta])* $name:ident),* $(,)?) => {
        /// Live counters shared by the render thread, the conversion worker and
        /// the transmission thread.
        #[derive(Debug, Default)]
        pub struct PipelineStats {
            $($(#[$doc])* pub $name: AtomicU64,)*
        }

        /// Point-in-time copy of [`PipelineStats`].
        #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
        pub struct StatsSnapshot {
            $($(#[$doc])* pub $name: u64,)*
        }

        impl PipelineStats {
            pub fn snapshot(&self) -> StatsSnapshot {
                StatsSnapshot {
                    $($name: self.$name.load(Ordering::Relaxed),)*
                }
            }
        }

        impl StatsSnapshot {
            /// `(name, value)` pairs in declaration order, for structured output.
            pub fn fields(&self) -> Vec<(&'static str, u64)> {
                vec![$((stringify!($name), self.$name),)*]
            }
        }
    };
}

pipeline_counters! {
    /// Render ticks seen
    ticks,
    /// Transfer slots mapped and copied out
    harvested,
    map_failures,
    /// Ticks whose mapped slot had no read in flight
    nothing_pending,
    /// Transfers discarded because they predate a resize
    stale_discarded,
    /// Pixel reads that could not be issued
    read_failures,
    /// RGBA copies that needed a fresh allocation
    rgba_pool_fallbacks,
    /// NV21 outputs that needed a fresh allocation
    nv21_pool_fallbacks,
    /// Readbacks dropped because the conversion worker was saturated
    worker_drops,
    converted,
    convert_failures,
    /// Converted frames dropped by the queue to make room
    queue_evictions,
    /// Frames the sink accepted
    sent,
    sink_errors,
}

/// Adds one to a counter.
#[inline]
pub(crate) fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}
