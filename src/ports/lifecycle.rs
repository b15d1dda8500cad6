/// Hooks the host environment drives at startup and teardown.
pub trait LifecycleSignal: Send + Sync {
    fn start(&self);

    fn stop(&self);
}
