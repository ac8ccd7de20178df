//! FIFO of packets waiting for the pacer.
pub mod rtp_send_queue;
pub mod send_queue_item;
pub use rtp_send_queue::RtpSendQueue;
pub use send_queue_item::SendQueueItem;
