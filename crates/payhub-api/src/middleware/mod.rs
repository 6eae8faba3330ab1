pub mod auth;
pub mod request_id;

pub use auth::{require_api_key, MerchantId};
pub use request_id::{propagate_request_id, RequestId};
