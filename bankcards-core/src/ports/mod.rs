//! Port definitions - collaborator traits
//!
//! Ports are the seams between the services and storage. Adapters implement
//! them; services only ever see the traits.

mod card_store;

pub use card_store::{CardStore, CardTransaction, OwnerDirectory};
