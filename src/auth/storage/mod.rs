//! Storage abstraction
//!
//! The auth core only talks to these traits; [`MemoryStore`] backs development and tests.

pub mod memory;
pub mod profiles;
pub mod r#trait;

pub use memory::MemoryStore;
pub use profiles::{AdminProfiles, CompanyProfiles, ProfileRegistry, StudentProfiles};
pub use r#trait::{
    FindOptions, NewUser, ProfileRepository, SessionFactory, UnitOfWork, UserPatch,
    UserRepository,
};
