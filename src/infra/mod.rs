//! External collaborators.
//!
//! Narrow facades the engine consumes: the Bitcoin node, the ban list,
//! the used-script store and the credential issuer.

pub mod credentials;
pub mod prison;
pub mod rpc;
pub mod scripts;

// Re-export facade types
pub use credentials::{
    Credential, CredentialError, CredentialIssuer, CredentialKind, CredentialRequest,
    CredentialResponse, InProcessIssuer,
};
pub use prison::{Prison, Sentence};
pub use rpc::{BitcoinRpc, MemoryRpc, UtxoInfo};
pub use scripts::UsedScripts;
