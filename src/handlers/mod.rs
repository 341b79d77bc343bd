mod applications;
mod health;
mod metrics;
mod newsletter;

pub use applications::submit_application_handler;
pub use health::health_handler;
pub use metrics::metrics_handler;
pub use newsletter::subscribe_handler;
