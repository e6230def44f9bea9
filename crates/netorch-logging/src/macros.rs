//! ---
//! netorch_section: "03-logging"
//! netorch_subsection: "module"
//! netorch_type: "source"
//! netorch_scope: "code"
//! netorch_description: "Structured logging adapters and sinks."
//! netorch_version: "v0.0.0-prealpha"
//! netorch_owner: "tbd"
//! ---
//! Context-stamping wrappers around `tracing::event!`.

/// Shared expansion used by the level-specific macros.
#[doc(hidden)]
#[macro_export]
macro_rules! __net_event {
    ($level:expr, $ctx:expr, $($arg:tt)+) => {{
        let ctx = &$ctx;
        tracing::event!(
            $level,
            project = ctx.project.unwrap_or(""),
            device = ctx.device.unwrap_or(""),
            compute = ctx.compute.unwrap_or(""),
            operation = ctx.operation.unwrap_or(""),
            message = %format_args!($($arg)+)
        );
    }};
}

/// Emit an informational log enriched with netorch context.
#[macro_export]
macro_rules! net_info {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__net_event!(tracing::Level::INFO, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__net_event!(tracing::Level::INFO, $crate::LogContext::default(), $($arg)+)
    };
}

/// Emit a debug log enriched with netorch context.
#[macro_export]
macro_rules! net_debug {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__net_event!(tracing::Level::DEBUG, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__net_event!(tracing::Level::DEBUG, $crate::LogContext::default(), $($arg)+)
    };
}

/// Emit a warning enriched with netorch context.
#[macro_export]
macro_rules! net_warn {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__net_event!(tracing::Level::WARN, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__net_event!(tracing::Level::WARN, $crate::LogContext::default(), $($arg)+)
    };
}

/// Emit an error log enriched with netorch context.
#[macro_export]
macro_rules! net_error {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__net_event!(tracing::Level::ERROR, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__net_event!(tracing::Level::ERROR, $crate::LogContext::default(), $($arg)+)
    };
}
