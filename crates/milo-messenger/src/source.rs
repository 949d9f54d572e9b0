/// Hooks a messenger calls when its exact-message subscriptions change.
///
/// A source connects a messenger to an upstream producer lazily: it only
/// needs to listen upstream while somebody listens downstream. Pattern
/// subscriptions never reach the source.
pub trait MessageSource {
    /// `message` got its first subscriber.
    fn on_subscriber_added(&self, message: &str);

    /// The last subscriber of `message` is gone.
    fn on_subscriber_removed(&self, message: &str);

    fn destroy(&self) {}
}
