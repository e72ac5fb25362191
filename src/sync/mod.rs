// Coordination primitives
// Small building blocks shared by the query pipeline and the catalog scheduler.

pub mod cancel;
pub mod promise;
pub mod semaphore;
pub mod topic;

pub use cancel::CancelToken;
pub use promise::{PromiseState, StatePromise};
pub use semaphore::{Semaphore, SemaphorePermit};
pub use topic::{AsyncValueTopic, TopicClosed, TopicNext};
