pub mod mailjet;

pub use mailjet::Mailer;
