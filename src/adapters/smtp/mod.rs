//! SMTP plumbing: the inbound listener that receives mail for classification
//! and the downstream hop that delivers stamped messages.

pub mod command;
pub mod delivery;
pub mod listener;
pub mod response;
pub mod session;

pub use delivery::{Delivery, SmtpDelivery};
pub use listener::{ListenerSettings, MessageHandler};
pub use response::SmtpResponse;
pub use session::MailTransaction;
