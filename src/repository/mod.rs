pub mod connection;
pub mod credentials;
pub mod handlers;
pub mod models;
pub mod resolver;
pub mod routes;
pub mod service;

pub use service::{Collaborators, RepositoryService, ServiceOptions};
