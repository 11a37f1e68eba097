//! Persistent protocol state: sessions, prekeys and sender keys.

mod prekey;
mod record;
mod sender_key;
mod session;

pub use prekey::{generate_registration_id, PreKeyBundle, PreKeyRecord, SignedPreKeyRecord};
pub use record::SessionRecord;
pub use sender_key::{SenderChainKey, SenderKeyRecord, SenderKeyState, SenderMessageKey};
pub use session::{PendingKeyExchange, PendingPreKey, SessionState};
