// SPDX-License-Identifier: MIT
//! Raw channels and the message channel adapter.

pub mod adapter;
pub mod raw;
pub mod ws;

pub use adapter::ChannelAdapter;
pub use raw::{RawChannel, RawEvent};
