//! Control protocol between clients and the driver.
//!
//! Commands travel client -> driver over the to-driver ring; responses
//! travel driver -> clients over the broadcast. Every message is a
//! fixed-layout `#[repr(C)]` Pod record decoded with [`decode`] and
//! encoded with [`encode`]: no codec, readable from any process mapping
//! the buffers.

use bytemuck::{Pod, Zeroable};

use crate::error::{HermesError, HermesResult};
use crate::types::FixedString;

/// Channel/path/message string capacity on the wire.
pub const MAX_CHANNEL_LENGTH: usize = 255;

/// The only media this core recognises.
pub const IPC_CHANNEL: &str = "hermes:ipc";

/// Command message types (client -> driver).
pub mod msg_type {
    pub const ADD_PUBLICATION: i32 = 0x01;
    pub const REMOVE_PUBLICATION: i32 = 0x02;
    pub const ADD_SUBSCRIPTION: i32 = 0x03;
    pub const REMOVE_SUBSCRIPTION: i32 = 0x04;
    pub const CLIENT_KEEPALIVE: i32 = 0x05;
    pub const CLIENT_CLOSE: i32 = 0x06;
    pub const ADD_COUNTER: i32 = 0x07;
    pub const REMOVE_COUNTER: i32 = 0x08;
    pub const TERMINATE_DRIVER: i32 = 0x09;
}

/// Response message types (driver -> clients).
pub mod response_type {
    pub const ON_ERROR: i32 = 0x0F01;
    pub const ON_AVAILABLE_IMAGE: i32 = 0x0F02;
    pub const ON_PUBLICATION_READY: i32 = 0x0F03;
    pub const ON_OPERATION_SUCCESS: i32 = 0x0F04;
    pub const ON_UNAVAILABLE_IMAGE: i32 = 0x0F05;
    pub const ON_SUBSCRIPTION_READY: i32 = 0x0F06;
    pub const ON_COUNTER_READY: i32 = 0x0F07;
    pub const ON_UNAVAILABLE_COUNTER: i32 = 0x0F08;
    pub const ON_CLIENT_TIMEOUT: i32 = 0x0F09;
}

/// Wire error codes carried by [`ErrorResponse`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ErrorCode {
    GenericError = 0,
    InvalidChannel = 1,
    UnknownSubscription = 2,
    UnknownPublication = 3,
    StorageSpace = 4,
    UnknownCounter = 5,
    SessionIdClash = 6,
    ClashingSubscriptionParams = 7,
    MalformedCommand = 8,
}

impl ErrorCode {
    pub fn from_i32(value: i32) -> Self {
        match value {
            1 => ErrorCode::InvalidChannel,
            2 => ErrorCode::UnknownSubscription,
            3 => ErrorCode::UnknownPublication,
            4 => ErrorCode::StorageSpace,
            5 => ErrorCode::UnknownCounter,
            6 => ErrorCode::SessionIdClash,
            7 => ErrorCode::ClashingSubscriptionParams,
            8 => ErrorCode::MalformedCommand,
            _ => ErrorCode::GenericError,
        }
    }
}

/// Common prefix of every command: which client sent it and the
/// correlation id its response will carry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct CorrelatedMessage {
    pub client_id: i64,
    pub correlation_id: i64,
}

// SAFETY: repr(C) structs of Pod fields with explicit padding, no
// implicit padding (sizes asserted below), any bit pattern valid.
unsafe impl Zeroable for CorrelatedMessage {}
unsafe impl Pod for CorrelatedMessage {}

/// Add a publication (shared or exclusive) on a stream.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct PublicationMessage {
    pub correlated: CorrelatedMessage,
    pub stream_id: i32,
    pub is_exclusive: i32,
    /// Explicit session id request; only honoured when
    /// `has_explicit_session_id` is non-zero.
    pub session_id: i32,
    pub has_explicit_session_id: i32,
    pub channel: FixedString<MAX_CHANNEL_LENGTH>,
}

unsafe impl Zeroable for PublicationMessage {}
unsafe impl Pod for PublicationMessage {}

/// Add a subscription on a stream.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct SubscriptionMessage {
    pub correlated: CorrelatedMessage,
    pub stream_id: i32,
    pub is_tether: i32,
    pub is_reliable: i32,
    pub is_rejoin: i32,
    pub channel: FixedString<MAX_CHANNEL_LENGTH>,
}

unsafe impl Zeroable for SubscriptionMessage {}
unsafe impl Pod for SubscriptionMessage {}

/// Remove a publication, subscription or counter by registration id.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct RemoveMessage {
    pub correlated: CorrelatedMessage,
    pub registration_id: i64,
}

unsafe impl Zeroable for RemoveMessage {}
unsafe impl Pod for RemoveMessage {}

/// Allocate a client-owned counter.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct CounterMessage {
    pub correlated: CorrelatedMessage,
    pub type_id: i32,
    pub _pad: i32,
    pub label: FixedString<MAX_CHANNEL_LENGTH>,
}

unsafe impl Zeroable for CounterMessage {}
unsafe impl Pod for CounterMessage {}

/// Reject a command.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct ErrorResponse {
    pub offending_correlation_id: i64,
    pub error_code: i32,
    pub _pad: i32,
    pub message: FixedString<MAX_CHANNEL_LENGTH>,
}

unsafe impl Zeroable for ErrorResponse {}
unsafe impl Pod for ErrorResponse {}

/// A new publication's log and counters are ready.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct PublicationReady {
    pub correlation_id: i64,
    pub registration_id: i64,
    pub session_id: i32,
    pub stream_id: i32,
    pub publisher_limit_counter_id: i32,
    pub is_exclusive: i32,
    pub log_file: FixedString<MAX_CHANNEL_LENGTH>,
}

unsafe impl Zeroable for PublicationReady {}
unsafe impl Pod for PublicationReady {}

/// A subscription is registered.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct SubscriptionReady {
    pub correlation_id: i64,
}

unsafe impl Zeroable for SubscriptionReady {}
unsafe impl Pod for SubscriptionReady {}

/// A command with no dedicated response completed.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct OperationSucceeded {
    pub correlation_id: i64,
}

unsafe impl Zeroable for OperationSucceeded {}
unsafe impl Pod for OperationSucceeded {}

/// An image (per-session view of a publication) is available to a
/// subscription.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct ImageReady {
    pub correlation_id: i64,
    pub subscription_registration_id: i64,
    pub session_id: i32,
    pub stream_id: i32,
    pub subscriber_position_counter_id: i32,
    pub _pad: i32,
    pub log_file: FixedString<MAX_CHANNEL_LENGTH>,
}

unsafe impl Zeroable for ImageReady {}
unsafe impl Pod for ImageReady {}

/// An image is no longer available.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct ImageMessage {
    pub correlation_id: i64,
    pub subscription_registration_id: i64,
    pub stream_id: i32,
    pub _pad: i32,
}

unsafe impl Zeroable for ImageMessage {}
unsafe impl Pod for ImageMessage {}

/// A counter was allocated (ready) or freed (unavailable).
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct CounterUpdate {
    pub correlation_id: i64,
    pub counter_id: i32,
    pub _pad: i32,
}

unsafe impl Zeroable for CounterUpdate {}
unsafe impl Pod for CounterUpdate {}

/// A client missed its keepalives and was torn down.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct ClientTimeout {
    pub client_id: i64,
}

unsafe impl Zeroable for ClientTimeout {}
unsafe impl Pod for ClientTimeout {}

// Layout guards: any implicit padding would make these sizes disagree.
const _: () = assert!(std::mem::size_of::<CorrelatedMessage>() == 16);
const _: () = assert!(std::mem::size_of::<PublicationMessage>() == 288);
const _: () = assert!(std::mem::size_of::<SubscriptionMessage>() == 288);
const _: () = assert!(std::mem::size_of::<RemoveMessage>() == 24);
const _: () = assert!(std::mem::size_of::<CounterMessage>() == 280);
const _: () = assert!(std::mem::size_of::<ErrorResponse>() == 272);
const _: () = assert!(std::mem::size_of::<PublicationReady>() == 288);
const _: () = assert!(std::mem::size_of::<ImageReady>() == 288);
const _: () = assert!(std::mem::size_of::<ImageMessage>() == 24);
const _: () = assert!(std::mem::size_of::<CounterUpdate>() == 16);

/// Encode a message as its wire bytes.
#[inline]
pub fn encode<T: Pod>(msg: &T) -> &[u8] {
    bytemuck::bytes_of(msg)
}

/// Decode a message from wire bytes (unaligned-safe copy).
pub fn decode<T: Pod>(payload: &[u8]) -> HermesResult<T> {
    let size = std::mem::size_of::<T>();
    if payload.len() < size {
        return Err(HermesError::protocol(
            ErrorCode::MalformedCommand,
            format!(
                "command too short: {} bytes, expected {}",
                payload.len(),
                size
            ),
        ));
    }
    Ok(bytemuck::pod_read_unaligned(&payload[..size]))
}
