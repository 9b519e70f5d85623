//! Permission tokens and the approval workflow.
//!
//! # Overview
//!
//! - **[`PermissionToken`]**: stored authorization for one resource
//! - **[`PermissionDescriptor`]**: what an operation needs permission for
//! - **[`TokenStore`]**: trait for persisting tokens and monthly spend
//! - **[`MemoryTokenStore`]**: in-memory store (cleared on exit)
//! - **[`FileTokenStore`]**: JSON file store
//! - **[`TokenResolver`]**: decides pass / deny / ask the user
//! - **[`RequestCoalescer`]**: one pending request per resource, many waiters
//!
//! # Token Kinds
//!
//! | Kind | Glossary | Resource identity |
//! |------|----------|-------------------|
//! | Protocol | DPACP | originator, privileged, protocol id, counterparty at level 2 |
//! | Basket | DBAP | originator, basket name |
//! | Certificate | DCAP | originator, privileged, verifier, certificate type |
//! | Spending | DSAP | originator |

mod coalescer;
mod resolver;
mod store;
mod token;

pub use coalescer::{
    Grant, GrantOptions, NewRequest, PendingRequestSnapshot, PermissionRequest, RequestCoalescer,
    RequestInfo, Waiter,
};
pub use resolver::{
    RequestNeeds, Resolution, TokenResolver, ADMIN_RESERVED_PREFIX, DEFAULT_BASKET,
    LABEL_PROTOCOL_PREFIX,
};
pub use store::{FileTokenStore, MemoryTokenStore, TokenStore, TokenStoreError};
pub use token::{
    BasketUsage, PermissionDescriptor, PermissionToken, ProtocolId, ProtocolUsage, ResourceKey,
    TokenKind, TokenPayload, SECURITY_LEVEL_APP, SECURITY_LEVEL_COUNTERPARTY,
    SECURITY_LEVEL_OPEN,
};
