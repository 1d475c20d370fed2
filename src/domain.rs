pub mod audit;
pub mod email;
pub mod error;
pub mod id;
pub mod money;
pub mod notification;
pub mod payment;
pub mod provider;
pub mod reference;
pub mod store;
pub mod subscription;

use std::{future::Future, pin::Pin};

/// Boxed future returned by the object-safe seams (gateway, store, email).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
