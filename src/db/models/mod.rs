pub mod event;
pub mod user;

pub use self::event::*;
pub use self::user::*;
