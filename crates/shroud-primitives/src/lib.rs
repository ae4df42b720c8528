//! Chain primitives shared by the shroud node components.
//!
//! The shroud chain carries a transparent, Bitcoin-shaped value pool plus
//! three shielded protocols (sprout, sapling, orchard). The transparent
//! half reuses the `bitcoin` crate types directly; the shielded half is
//! modelled here.

pub mod coins;
pub mod consensus;
pub mod merkle;
pub mod transaction;

pub use self::coins::{Coins, CoinsCache, CoinsView};
pub use self::merkle::{IncrementalMerkleTree, SaplingMerkleTree, SproutMerkleTree};
pub use self::transaction::{JoinSplit, OrchardBundle, SaplingSpend, Transaction, TxIn};

/// Sentinel chain height assigned to coins synthesized from unconfirmed
/// transactions.
pub const MEMPOOL_HEIGHT: u32 = 0x7FFF_FFFF;

/// Number of confirmations a coinbase output needs before it can be spent.
pub const COINBASE_MATURITY: u32 = 100;

/// Lock-time values below this threshold are block heights, values at or
/// above it are unix timestamps.
pub const LOCKTIME_THRESHOLD: u32 = 500_000_000;

/// The network the node is running on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Network {
    Main,
    Test,
    Regtest,
}

/// The shielded protocol a nullifier or anchor belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShieldedKind {
    Sprout,
    Sapling,
    Orchard,
}

macro_rules! bytes32_newtype {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
        pub struct $name(pub [u8; 32]);

        impl $name {
            pub const fn from_bytes(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }

            pub fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                for byte in self.0.iter() {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
        }
    };
}

bytes32_newtype! {
    /// Per-protocol tag revealed when a shielded note is spent.
    Nullifier
}

bytes32_newtype! {
    /// Root of a shielded note commitment tree at which a spend is proved.
    Anchor
}

bytes32_newtype! {
    /// A shielded note commitment appended to the commitment tree.
    NoteCommitment
}
