//! The coordination fabric: the execution engine, the
//! in-process event bus, the webhook dispatcher, the submission gate, and
//! the background scheduler. Each is a leaf with respect to the others —
//! none of these modules depends on `orchestra-server` or on a plugin's own
//! crate, so the engine/framework/websocket circular-import shape the
//! reference backend has is never reproduced here.

pub mod bus;
pub mod engine;
pub mod gate;
pub mod observability;
pub mod scheduler;
pub mod signing;
pub mod url_hygiene;
pub mod webhooks;

pub use bus::EventBus;
pub use engine::{ExecutionEngine, SubmitOptions};
pub use gate::{Identity, RateLimitConfig, SubmissionGate};
pub use scheduler::{Schedule, Scheduler};
pub use url_hygiene::UrlHygienePolicy;
pub use webhooks::WebhookDispatcher;
