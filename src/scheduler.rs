use std::time::Duration;

/// A request to re-encrypt a context's data under its newest key, some time after a
/// rotation.  Purely advisory: decryption correctness never depends on the task running,
/// only on the retired keys staying resolvable by version.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ReencryptTask {
	/// The context whose key was just rotated.
	pub context: String,

	/// How long the host should wait before running the task, so re-encryption never
	/// competes with the request that happened to trigger the rotation.
	pub delay: Duration,
}

/// Deferred-task hand-off point for the host's job system.
///
/// [`KeyManager`](super::KeyManager) emits one [`ReencryptTask`] per rotation,
/// fire-and-forget; it never awaits or tracks completion.
pub trait ReencryptScheduler: Send + Sync {
	fn schedule(&self, task: ReencryptTask);
}

/// A [`ReencryptScheduler`] that drops every task on the floor.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopScheduler;

impl ReencryptScheduler for NoopScheduler {
	fn schedule(&self, _task: ReencryptTask) {}
}
