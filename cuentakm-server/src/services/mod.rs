//! Reading workflow services
//!
//! - `weekly_state`: which reading kind an agent may submit
//! - `odometer`: vision-model extraction and text normalization
//! - `photo_store`: transient photo storage
//! - `reconciliation`: continuity and week-close rules
//! - `notifications`: administrative emails
//! - `submission`: the engine sequencing all of the above

pub mod notifications;
pub mod odometer;
pub mod photo_store;
pub mod reconciliation;
pub mod submission;
pub mod weekly_state;

pub use notifications::{LogOnlyNotifier, MailApiNotifier, NotificationDispatcher, Notifier};
pub use odometer::{ExtractionError, OdometerExtractor, VisionApiExtractor};
pub use photo_store::PhotoStore;
pub use submission::{Submission, SubmissionEngine, SubmissionError, SubmissionOutcome};
pub use weekly_state::WeeklyState;
