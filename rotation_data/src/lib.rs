pub mod identities;
pub mod v1;
