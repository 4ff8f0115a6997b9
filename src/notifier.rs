use tracing::{info, warn};

/// Outbound notification channel. Failures inside the engine surface here
/// as warnings; nothing in this core ever crashes the process to get an
/// operator's attention.
pub trait Notifier: Send + Sync {
    fn warn(&self, context: &str, message: &str);
    fn info(&self, context: &str, message: &str);
}

/// Default notifier: routes through the tracing pipeline. Deployments that
/// want chat/push delivery implement `Notifier` over their transport.
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn warn(&self, context: &str, message: &str) {
        warn!(context, "🔔 {}", message);
    }

    fn info(&self, context: &str, message: &str) {
        info!(context, "🔔 {}", message);
    }
}
