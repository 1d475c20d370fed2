pub mod api_errors;
pub mod email;
pub mod gateway_client;
pub mod http;
pub mod signature;
pub mod webhook;
