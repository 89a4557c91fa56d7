//! Process-wide handling of resource exhaustion
//!
//! An operation thread that hits [`ProcessError::ResourceExhausted`] cannot
//! trust its own state any more. Instead of logging and carrying on, it hands
//! the event to the handler installed here and terminates.
//!
//! [`ProcessError::ResourceExhausted`]: crate::processor::ProcessError::ResourceExhausted

use parking_lot::RwLock;
use std::sync::Arc;

/// Details of a resource exhaustion event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceExhaustion {
    /// Name of the operation thread that hit the condition
    pub thread_name: String,

    /// Message reported by the processor
    pub message: String,
}

type Handler = Arc<dyn Fn(&ResourceExhaustion) + Send + Sync>;

static HANDLER: RwLock<Option<Handler>> = parking_lot::const_rwlock(None);

/// Serializes tests that touch the process-wide handler
#[cfg(test)]
pub(crate) static HANDLER_LOCK: parking_lot::Mutex<()> = parking_lot::const_mutex(());

/// Install the process-wide handler, replacing any previous one
pub fn set_resource_exhaustion_handler<F>(handler: F)
where
    F: Fn(&ResourceExhaustion) + Send + Sync + 'static,
{
    *HANDLER.write() = Some(Arc::new(handler));
}

/// Remove the installed handler, restoring the logging default
pub fn clear_resource_exhaustion_handler() {
    *HANDLER.write() = None;
}

/// Dispatch an event to the installed handler
pub fn on_resource_exhaustion(event: &ResourceExhaustion) {
    // Clone out so the handler runs without the lock held
    let handler = HANDLER.read().clone();
    match handler {
        Some(handler) => handler(event),
        None => tracing::error!(
            thread = %event.thread_name,
            message = %event.message,
            "resource exhausted on operation thread"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::io;

    #[derive(Clone, Default)]
    struct CapturedLog(Arc<Mutex<Vec<u8>>>);

    impl CapturedLog {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock()).into_owned()
        }
    }

    impl io::Write for CapturedLog {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn event() -> ResourceExhaustion {
        ResourceExhaustion {
            thread_name: "unit.partition-operation.thread-0".to_string(),
            message: "heap".to_string(),
        }
    }

    fn dispatch_capturing_log(event: &ResourceExhaustion) -> String {
        let log = CapturedLog::default();
        let writer = log.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();

        tracing::subscriber::with_default(subscriber, || on_resource_exhaustion(event));
        log.contents()
    }

    #[test]
    fn test_default_handler_logs() {
        let _handler = HANDLER_LOCK.lock();
        clear_resource_exhaustion_handler();

        let output = dispatch_capturing_log(&event());
        assert!(output.contains("ERROR"), "{output}");
        assert!(output.contains("resource exhausted on operation thread"), "{output}");
        assert!(output.contains("unit.partition-operation.thread-0"), "{output}");
    }

    #[test]
    fn test_installed_handler_replaces_logging() {
        let _handler = HANDLER_LOCK.lock();
        let (tx, rx) = flume::unbounded();
        set_resource_exhaustion_handler(move |event| {
            let _ = tx.send(event.clone());
        });

        let output = dispatch_capturing_log(&event());
        assert_eq!(rx.try_recv(), Ok(event()));
        assert!(output.is_empty(), "{output}");

        clear_resource_exhaustion_handler();
        let output = dispatch_capturing_log(&event());
        assert!(rx.try_recv().is_err());
        assert!(output.contains("resource exhausted on operation thread"), "{output}");
    }
}
