//! Data model: channel desired state and the event envelope.

mod channel;
mod message;

pub use channel::{ChannelConfig, ChannelRef, Subscription};
pub use message::{
    ATTRIBUTE_HEADER_PREFIX, CONTENT_TYPE_ATTRIBUTE, Message, REQUIRED_ATTRIBUTES,
};
