//! Tracing macros for the tensordag runtime.
//!
//! These macros provide structured tracing for scheduler execution with
//! worker context, per-queue events, and operation dispatch tracking.
//!
//! When the `no-trace` feature is enabled, all macros compile to nothing
//! for zero overhead in production/benchmark builds.

// ---- With tracing enabled (default) ----

/// Trace scheduler-level events (worker lifecycle, registry, shutdown).
#[cfg(not(feature = "no-trace"))]
#[macro_export]
macro_rules! tdag_sched {
    ($level:ident, worker = $worker:expr, $($arg:tt)*) => {
        tracing::$level!(target: "tensordag::scheduler", worker = $worker, $($arg)*)
    };
    ($level:ident, $($arg:tt)*) => {
        tracing::$level!(target: "tensordag::scheduler", $($arg)*)
    }
}

/// Trace operation dispatch and completion with worker context.
#[cfg(not(feature = "no-trace"))]
#[macro_export]
macro_rules! tdag_op {
    ($level:ident, worker = $worker:expr, $($arg:tt)*) => {
        tracing::$level!(target: "tensordag::ops", worker = $worker, $($arg)*)
    };
    ($level:ident, $($arg:tt)*) => {
        tracing::$level!(target: "tensordag::ops", $($arg)*)
    }
}

/// Trace per-device queue activity (enqueue, eviction, retry-swap).
#[cfg(not(feature = "no-trace"))]
#[macro_export]
macro_rules! tdag_queue {
    ($level:ident, worker = $worker:expr, $($arg:tt)*) => {
        tracing::$level!(target: "tensordag::queue", worker = $worker, $($arg)*)
    };
    ($level:ident, $($arg:tt)*) => {
        tracing::$level!(target: "tensordag::queue", $($arg)*)
    }
}

// ---- With tracing disabled (no-trace feature) ----

/// Trace scheduler-level events - compiles to nothing when no-trace is enabled.
#[cfg(feature = "no-trace")]
#[macro_export]
macro_rules! tdag_sched {
    ($level:ident, worker = $worker:expr, $($arg:tt)*) => {};
    ($level:ident, $($arg:tt)*) => {};
}

/// Trace operation dispatch and completion - compiles to nothing when no-trace is enabled.
#[cfg(feature = "no-trace")]
#[macro_export]
macro_rules! tdag_op {
    ($level:ident, worker = $worker:expr, $($arg:tt)*) => {};
    ($level:ident, $($arg:tt)*) => {};
}

/// Trace per-device queue activity - compiles to nothing when no-trace is enabled.
#[cfg(feature = "no-trace")]
#[macro_export]
macro_rules! tdag_queue {
    ($level:ident, worker = $worker:expr, $($arg:tt)*) => {};
    ($level:ident, $($arg:tt)*) => {};
}
