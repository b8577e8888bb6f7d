pub mod e2e_http;
pub mod flows;
