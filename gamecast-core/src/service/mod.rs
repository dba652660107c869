pub mod invite;

pub use invite::{invite_message, BulkReport, InviteNotifier, LogInviteNotifier};
