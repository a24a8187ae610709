//! Read-only IMAP access: folder listing, message harvest and IDLE.

pub mod connection;
pub mod folders;
pub mod idle;
pub mod mailbox;
pub mod messages;

pub use folders::FolderInfo;
pub use idle::{IdleConnector, IdleEvent, IdleSession, ImapIdleConnector};
pub use mailbox::{ImapConnector, MailboxClient, MailboxConnector};
pub use messages::{FetchedMessage, MessageHeaders};
