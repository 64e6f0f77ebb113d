// The infra module contains implementations of core traits and everything
// that touches the outside world: OAuth, the redirect listener, the HTTP
// endpoint, and configuration.

#[path = "listener.rs"]
pub mod listener;

#[path = "oauth.rs"]
pub mod oauth;

#[path = "endpoint.rs"]
pub mod endpoint;

#[path = "settings.rs"]
pub mod settings;
