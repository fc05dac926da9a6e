pub mod event_repository;
pub mod user_repository;

pub use event_repository::{ClaimOutcome, DueEventsPage, EventRepository, PageCursor};
pub use user_repository::UserRepository;
