//! Storage provider clients.
//!
//! Two backing stores share one contract ([`StorageProvider`]):
//! a pinning service reached over a REST API with key-pair headers, and a
//! permanent ledger store reached through an upload relay. Both run every
//! request through a [`Transport`](crate::transport::Transport) and can
//! share one [`EncryptedCache`](crate::cache::EncryptedCache).

pub mod identifier;
pub mod permanent;
pub mod pinning;
pub mod source;
pub mod traits;

pub use identifier::{is_cid_v0, is_cid_v1, is_ipfs_cid, is_ledger_id};
pub use permanent::{PermanentClient, PermanentConfig};
pub use pinning::{PinResponse, PinningClient, PinningConfig};
pub use source::{Payload, UploadSource};
pub use traits::StorageProvider;
