mod params_json;
mod request_ctx;

pub use params_json::ParamsJson;
pub use request_ctx::{RequestCtx, header_value, required_header};
