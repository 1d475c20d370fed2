pub mod adapters;
pub mod config;
pub mod domain;
pub mod infra;
pub mod services;

use {adapters::signature::SignatureVerifier, services::Engine};

#[derive(Clone)]
pub struct AppState {
    pub engine: Engine,
    pub verifier: SignatureVerifier,
}
