pub mod audit;
pub mod invite;
pub mod message;
pub mod session;
pub mod user;

// Re-export common types
pub use audit::{AuditError, AuditRecord, NewAuditRecord};
pub use invite::{ConsumedSignup, Invite, InviteError};
pub use message::{
    AppendRequest, Conversation, ConversationKind, MessageError, MessageRow, StoredMessage,
    Visibility,
};
pub use session::{DeviceInfo, Platform, Session, SessionError};
pub use user::{NewUserSpec, PublicUser, User, UserError};
