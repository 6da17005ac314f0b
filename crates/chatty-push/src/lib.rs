pub mod fanout;
pub mod provider;

pub use fanout::Notifier;
pub use provider::{Delivery, HttpPushProvider, PushNotification, PushProvider};

/// Production notifier wired to the HTTP provider.
pub type DefaultNotifier = Notifier<HttpPushProvider>;
