//! Clients for the backend collaborators: result cache, layout service, and
//! track service.

pub mod cache;
pub mod layout;
pub mod track;
