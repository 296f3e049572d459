//! Data types shared across the API surface.

pub mod user;

pub use user::{
    CredentialRepresentation, NewUser, RoleRepresentation, UserRepresentation, UserUpdate,
};
