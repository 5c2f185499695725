pub mod client;
pub mod oauth;
pub mod pkce;
