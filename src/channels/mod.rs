//! I/O channels. Email is the only one: IMAP in, SMTP out.

pub mod email;

pub use email::EmailChannel;
