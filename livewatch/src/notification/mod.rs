//! Notification rendering.
//!
//! Events are rendered per binding against the binding's templates,
//! optionally with a screenshot, and handed to the dispatcher.

mod notifier;
pub mod screenshot;
pub mod template;

pub use notifier::{MessageSink, Notifier, NotifyOutcome};
pub use screenshot::{HttpScreenshotRenderer, ScreenshotRenderer};
pub use template::{Template, TemplateValues, default_template, format_duration};
