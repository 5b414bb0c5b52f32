pub mod backend;
pub mod events;
pub mod format;
pub mod init;
pub mod notifications;
pub mod scheduler;
pub mod telegram;

#[cfg(test)]
pub(crate) mod test_support;
