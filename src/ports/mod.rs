//! Ports - Traits the application layer is written against.

pub mod credentials;
pub mod queue;
pub mod repository;
pub mod resolver;
pub mod storage;

use credentials::CredentialStore;
use queue::TaskQueue;
use repository::{TaskRepository, VideoCatalog};

/// Everything a backing store provides.
pub trait Store: TaskRepository + VideoCatalog + TaskQueue + CredentialStore + Clone + 'static {}

impl<T> Store for T where T: TaskRepository + VideoCatalog + TaskQueue + CredentialStore + Clone + 'static {}
