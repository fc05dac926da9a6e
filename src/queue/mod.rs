pub mod gateway;
pub mod message;

pub use gateway::{QueueGateway, ReceivedDlqMessage, ReceivedMessage, SqliteQueueGateway, MAX_RECEIVE_COUNT};
pub use message::GreeterMessage;
