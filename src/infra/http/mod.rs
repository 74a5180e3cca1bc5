mod middleware;
mod public;

pub use public::{HttpState, WEBHOOK_PATH, WEBHOOK_SECRET_HEADER, WebhookState, build_router};
