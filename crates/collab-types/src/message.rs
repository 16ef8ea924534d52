//! On-wire message type tags. The outer frame is `{documentName, type, body...}`;
//! everything after `type` is opaque to the kernel except for the few tags below
//! it has to branch on itself.

use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
	Sync,
	Awareness,
	Auth,
	QueryAwareness,
	Stateless,
	BroadcastStateless,
	SyncStatus,
	SyncReply,
	Authenticated,
	PermissionDenied,
}

impl MessageType {
	pub const fn wire_value(self) -> u64 {
		match self {
			MessageType::Sync => 0,
			MessageType::Awareness => 1,
			MessageType::Auth => 2,
			MessageType::QueryAwareness => 3,
			MessageType::Stateless => 4,
			MessageType::BroadcastStateless => 5,
			MessageType::SyncStatus => 6,
			MessageType::SyncReply => 7,
			MessageType::Authenticated => 8,
			MessageType::PermissionDenied => 9,
		}
	}

	pub const fn from_wire_value(value: u64) -> Option<Self> {
		Some(match value {
			0 => MessageType::Sync,
			1 => MessageType::Awareness,
			2 => MessageType::Auth,
			3 => MessageType::QueryAwareness,
			4 => MessageType::Stateless,
			5 => MessageType::BroadcastStateless,
			6 => MessageType::SyncStatus,
			7 => MessageType::SyncReply,
			8 => MessageType::Authenticated,
			9 => MessageType::PermissionDenied,
			_ => return None,
		})
	}

	pub fn try_from_wire_value(value: u64) -> Result<Self, Error> {
		Self::from_wire_value(value).ok_or(Error::UnknownMessageType(value))
	}
}

// vim: ts=4
