//! Job completion notifications

pub mod content;
mod dispatcher;

pub use content::{render_message, NotificationContent};
pub use dispatcher::{
    generate_callback_key, DeliveryMode, LoggingMailer, Mailer, NotificationDispatcher,
    OutgoingMail, SenderIdentity, CALLBACK_KEY_LENGTH,
};
